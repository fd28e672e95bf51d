// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Seam between the message-thread tracker and the transport-level
//! client that actually moves CPDLC messages over the link. The tracker
//! only needs to hand a message over, poll its delivery status and know
//! whether the LOGON session is still up, so that is all the trait asks
//! for. Test code substitutes an in-memory implementation.

use crate::msg::Msg;

/// Handle returned by the transport for one submitted message; valid
/// for status queries until the transport forgets the message.
pub type MsgToken = u32;

/// Delivery progress of one submitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sending,
    SendFailed,
    Sent,
}

/// Where the transport's LOGON session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogonStatus {
    None,
    InProgress,
    Complete,
}

pub trait ClientLink: Send + Sync {
    /// Queues a message for transmission and returns its token.
    fn send_msg(&self, msg: &Msg) -> MsgToken;

    /// Delivery status of a previously submitted message.
    fn msg_status(&self, token: MsgToken) -> SendStatus;

    fn logon_status(&self) -> LogonStatus;
}
