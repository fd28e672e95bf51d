// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};

use crate::msg::info::{
    DM_AFFIRM, DM_ERROR, DM_NEGATIVE, DM_ROGER, DM_STANDBY, DM_UNABLE, DM_WILCO,
    Resp, SegInfo, UM_AFFIRM, UM_DISREGARD, UM_END_SVC, UM_ERROR,
    UM_NEGATIVE, UM_NEXT_DATA_AUTHORITY, UM_ROGER, UM_STANDBY, UM_UNABLE,
};

/// Longest permitted station callsign, terminator excluded.
pub const CALLSIGN_MAX: usize = 15;

/// One message element plus its optional free-text argument.
#[derive(Debug, Clone)]
pub struct Seg {
    pub info: &'static SegInfo,
    pub text: Option<String>,
}

/// A single CPDLC message: header fields plus one or more elements.
///
/// `min` is the sender-assigned sequence number, `mrn` points at the
/// `min` of the message being answered. Both are absent until the
/// sending layer assigns them.
#[derive(Debug, Clone, Default)]
pub struct Msg {
    pub from: String,
    pub to: String,
    pub min: Option<u32>,
    pub mrn: Option<u32>,
    pub is_logon: bool,
    pub segs: Vec<Seg>,
}

/// Callsigns are short printable-ASCII identifiers; the relay and the
/// codec both refuse anything else.
pub fn valid_callsign(cs: &str) -> bool {
    !cs.is_empty()
        && cs.len() <= CALLSIGN_MAX
        && cs.bytes().all(|b| (0x21..=0x7e).contains(&b) && b != b'/')
}

impl Msg {
    /// A LOGON handshake declaring our own callsign and the intended
    /// ATC station.
    pub fn logon(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            is_logon: true,
            ..Self::default()
        }
    }

    /// A single-element message of the given type.
    pub fn of_type(is_dl: bool, code: u16) -> Result<Self> {
        let info = SegInfo::lookup(is_dl, code).with_context(|| {
            format!(
                "unknown message element {}{}",
                if is_dl { "DM" } else { "UM" },
                code
            )
        })?;
        Ok(Self {
            segs: vec![Seg { info, text: None }],
            ..Self::default()
        })
    }

    pub fn with_text(mut self, text: &str) -> Self {
        if let Some(seg) = self.segs.last_mut() {
            seg.text = Some(text.to_string());
        }
        self
    }

    pub fn with_to(mut self, to: &str) -> Self {
        self.to = to.to_string();
        self
    }

    /// Descriptor of the first element; `None` only for bare LOGONs.
    pub fn first_info(&self) -> Option<&'static SegInfo> {
        self.segs.first().map(|s| s.info)
    }

    /// Direction of the message as a whole (taken from the first
    /// element, the way the response discipline defines it).
    pub fn is_dl(&self) -> bool {
        self.first_info().is_some_and(|i| i.is_dl)
    }

    fn first_is(&self, is_dl: bool, code: u16) -> bool {
        self.first_info()
            .is_some_and(|i| i.is_dl == is_dl && i.code == code)
    }

    /// Downlink request element (opens a dialogue the ATC must answer).
    pub fn is_dl_req(&self) -> bool {
        self.first_info().is_some_and(|i| i.is_dl && i.is_req)
    }

    /// First element carries the `Y` response discipline, i.e. the
    /// conversation stays open until the peer answers.
    pub fn requires_response(&self) -> bool {
        self.first_info().is_some_and(|i| i.resp == Resp::Y)
    }

    /// Uplink element demanding a closure from the aircraft.
    pub fn is_ul_req(&self) -> bool {
        self.first_info().is_some_and(|i| {
            !i.is_dl && matches!(i.resp, Resp::WU | Resp::AN | Resp::NE)
        })
    }

    pub fn is_standby(&self) -> bool {
        self.first_is(true, DM_STANDBY) || self.first_is(false, UM_STANDBY)
    }

    pub fn is_accept(&self) -> bool {
        self.first_is(true, DM_WILCO)
            || self.first_is(true, DM_AFFIRM)
            || self.first_is(false, UM_AFFIRM)
    }

    pub fn is_reject(&self) -> bool {
        self.first_is(true, DM_UNABLE)
            || self.first_is(true, DM_NEGATIVE)
            || self.first_is(false, UM_UNABLE)
            || self.first_is(false, UM_NEGATIVE)
            || self.is_error()
    }

    pub fn is_roger(&self) -> bool {
        self.first_is(true, DM_ROGER) || self.first_is(false, UM_ROGER)
    }

    /// Uplink link-management elements terminate the dialogue.
    pub fn is_link_mgmt(&self) -> bool {
        self.first_is(false, UM_END_SVC)
            || self.first_is(false, UM_NEXT_DATA_AUTHORITY)
    }

    pub fn is_disregard(&self) -> bool {
        self.first_is(false, UM_DISREGARD)
    }

    pub fn is_error(&self) -> bool {
        self.first_is(true, DM_ERROR) || self.first_is(false, UM_ERROR)
    }

    /// Smallest nonzero per-element timeout, seconds; 0 when no element
    /// sets one.
    pub fn timeout_secs(&self) -> u32 {
        self.segs
            .iter()
            .map(|s| s.info.timeout_secs)
            .filter(|&t| t != 0)
            .min()
            .unwrap_or(0)
    }
}
