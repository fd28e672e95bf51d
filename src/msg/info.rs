// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

/// Response discipline attached to a message element by ICAO Doc 4444:
/// which (if any) closure the sender expects from the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resp {
    /// No response expected.
    N,
    /// Downlink request: expects an uplink answer.
    Y,
    /// Uplink clearance: expects WILCO / UNABLE.
    WU,
    /// Uplink query: expects AFFIRM / NEGATIVE.
    AN,
    /// Uplink advisory: expects nothing beyond an acknowledge.
    NE,
}

/// Static descriptor of a single CPDLC message element type.
///
/// The table below covers the subset of uplink (UM) and downlink (DM)
/// elements the relay and the thread tracker exercise. Adding an element
/// is a new row, nothing else.
#[derive(Debug)]
pub struct SegInfo {
    /// Element number within its direction (e.g. 159 for UM159).
    pub code: u16,
    /// true for downlink (aircraft to ATC) elements.
    pub is_dl: bool,
    pub resp: Resp,
    /// Seconds the sender waits for the expected response; 0 = no limit.
    pub timeout_secs: u32,
    /// Request-class element (opens a dialogue the peer must answer).
    pub is_req: bool,
    pub label: &'static str,
}

macro_rules! seg {
    ($code:expr, $is_dl:expr, $resp:expr, $timeout:expr, $is_req:expr, $label:expr) => {
        SegInfo {
            code: $code,
            is_dl: $is_dl,
            resp: $resp,
            timeout_secs: $timeout,
            is_req: $is_req,
            label: $label,
        }
    };
}

static UPLINK: &[SegInfo] = &[
    seg!(0, false, Resp::N, 0, false, "UNABLE"),
    seg!(1, false, Resp::N, 0, false, "STANDBY"),
    seg!(3, false, Resp::N, 0, false, "ROGER"),
    seg!(4, false, Resp::N, 0, false, "AFFIRM"),
    seg!(5, false, Resp::N, 0, false, "NEGATIVE"),
    seg!(74, false, Resp::WU, 300, false, "PROCEED DIRECT TO [position]"),
    seg!(117, false, Resp::WU, 60, false, "CONTACT [unit] [frequency]"),
    seg!(159, false, Resp::N, 0, false, "ERROR [description]"),
    seg!(160, false, Resp::N, 0, false, "NEXT DATA AUTHORITY [id]"),
    seg!(161, false, Resp::N, 0, false, "END SERVICE"),
    seg!(168, false, Resp::N, 0, false, "DISREGARD"),
];

static DOWNLINK: &[SegInfo] = &[
    seg!(0, true, Resp::N, 0, false, "WILCO"),
    seg!(1, true, Resp::N, 0, false, "UNABLE"),
    seg!(2, true, Resp::N, 0, false, "STANDBY"),
    seg!(3, true, Resp::N, 0, false, "ROGER"),
    seg!(4, true, Resp::N, 0, false, "AFFIRM"),
    seg!(5, true, Resp::N, 0, false, "NEGATIVE"),
    seg!(6, true, Resp::Y, 0, true, "REQUEST [altitude]"),
    seg!(18, true, Resp::Y, 0, true, "REQUEST [speed]"),
    seg!(22, true, Resp::Y, 0, true, "REQUEST DIRECT TO [position]"),
    seg!(62, true, Resp::N, 0, false, "ERROR [errorinfo]"),
    seg!(67, true, Resp::N, 0, false, "FREETEXT"),
];

// Element numbers of the special roles referenced throughout the tracker.
pub const UM_STANDBY: u16 = 1;
pub const UM_ROGER: u16 = 3;
pub const UM_AFFIRM: u16 = 4;
pub const UM_UNABLE: u16 = 0;
pub const UM_NEGATIVE: u16 = 5;
pub const UM_ERROR: u16 = 159;
pub const UM_NEXT_DATA_AUTHORITY: u16 = 160;
pub const UM_END_SVC: u16 = 161;
pub const UM_DISREGARD: u16 = 168;
pub const DM_WILCO: u16 = 0;
pub const DM_UNABLE: u16 = 1;
pub const DM_STANDBY: u16 = 2;
pub const DM_ROGER: u16 = 3;
pub const DM_AFFIRM: u16 = 4;
pub const DM_NEGATIVE: u16 = 5;
pub const DM_ERROR: u16 = 62;

impl SegInfo {
    /// Looks up the descriptor for an element number in the given
    /// direction.
    pub fn lookup(is_dl: bool, code: u16) -> Option<&'static SegInfo> {
        let table = if is_dl { DOWNLINK } else { UPLINK };
        table.iter().find(|i| i.code == code)
    }

    /// Wire identifier of the element, e.g. `UM159` or `DM0`.
    pub fn ident(&self) -> String {
        format!("{}{}", if self.is_dl { "DM" } else { "UM" }, self.code)
    }
}

impl fmt::Display for SegInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ident(), self.label)
    }
}
