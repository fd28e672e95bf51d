// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use crate::{client::MsgToken, msg::Msg};

/// Identifier of a conversation thread, unique within one tracker.
pub type ThrId = u32;

/// Lifecycle state of a thread.
///
/// The variants listed by [`ThrStatus::is_final`] are terminal: once a
/// thread enters one, its status never changes again. The one nuance is
/// `ConnEnded`, which is entered only when the transport loses its
/// LOGON and which also clears the unseen-change flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrStatus {
    /// Freshly created, no rule has matched yet.
    #[default]
    None,
    Open,
    Closed,
    Accepted,
    Rejected,
    TimedOut,
    Standby,
    /// Our downlink request is still with the transport.
    Pending,
    /// The transport failed to deliver our downlink request.
    Failed,
    Disregard,
    Error,
    ConnEnded,
}

impl ThrStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            Self::Closed
                | Self::Accepted
                | Self::Rejected
                | Self::TimedOut
                | Self::Disregard
                | Self::Failed
                | Self::Error
                | Self::ConnEnded
        )
    }
}

/// One message inside a thread: the message itself plus bookkeeping
/// about how and when it got there.
#[derive(Debug, Clone)]
pub struct Bucket {
    pub msg: Arc<Msg>,
    /// Transport handle; present only on sent buckets.
    pub token: Option<MsgToken>,
    pub sent: bool,
    /// Wall-clock receipt/send time for display.
    pub hours: u8,
    pub mins: u8,
    /// Epoch seconds; drives response timeouts.
    pub time: i64,
}

/// A conversation: an ordered run of buckets (oldest first) plus its
/// lifecycle state and the UI's unseen-change flag.
#[derive(Debug)]
pub struct Thread {
    pub id: ThrId,
    pub status: ThrStatus,
    pub dirty: bool,
    pub buckets: Vec<Bucket>,
}

impl Thread {
    pub fn new(id: ThrId) -> Self {
        Self {
            id,
            status: ThrStatus::None,
            dirty: false,
            buckets: Vec::new(),
        }
    }
}
