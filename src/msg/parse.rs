// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write as _;

use thiserror::Error;

use crate::msg::{
    info::SegInfo,
    model::{CALLSIGN_MAX, Msg, Seg},
};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message is not valid UTF-8 text")]
    NotText,
    #[error("message does not start with the CPDLC marker")]
    BadMarker,
    #[error("unknown header field {0:?}")]
    UnknownField(String),
    #[error("invalid {field} value {value:?}")]
    BadValue { field: &'static str, value: String },
    #[error("unknown message element {0:?}")]
    UnknownElement(String),
    #[error("message carries no elements")]
    Empty,
}

/// Encodes a message into its single-line wire form, LF terminator
/// included. The inverse of [`decode`].
pub fn encode(msg: &Msg) -> String {
    let mut out = String::with_capacity(64);
    out.push_str("CPDLC");
    if msg.is_logon {
        out.push_str("/LOGON");
    }
    if !msg.from.is_empty() {
        let _ = write!(out, "/FROM={}", msg.from);
    }
    if !msg.to.is_empty() {
        let _ = write!(out, "/TO={}", msg.to);
    }
    if let Some(min) = msg.min {
        let _ = write!(out, "/MIN={min}");
    }
    if let Some(mrn) = msg.mrn {
        let _ = write!(out, "/MRN={mrn}");
    }
    for seg in &msg.segs {
        let _ = write!(out, "/SEG={}", seg.info.ident());
        if let Some(text) = &seg.text {
            let _ = write!(out, ":{text}");
        }
    }
    out.push('\n');
    out
}

/// Pulls the next complete message out of `buf`.
///
/// Returns `(None, 0)` while no full line is buffered yet, otherwise
/// `(Some(msg), consumed)` with `consumed > 0` covering the line and its
/// LF terminator. A complete line that does not parse is an error; the
/// relay treats that as fatal for the connection.
pub fn decode(buf: &[u8]) -> Result<(Option<Msg>, usize), DecodeError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        return Ok((None, 0));
    };
    let line = std::str::from_utf8(&buf[..nl]).map_err(|_| DecodeError::NotText)?;
    let msg = parse_line(line.trim_end_matches('\r'))?;
    Ok((Some(msg), nl + 1))
}

fn parse_callsign(field: &'static str, value: &str) -> Result<String, DecodeError> {
    let ok = value.len() <= CALLSIGN_MAX
        && value.bytes().all(|b| (0x21..=0x7e).contains(&b));
    if !ok {
        return Err(DecodeError::BadValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn parse_seq(field: &'static str, value: &str) -> Result<u32, DecodeError> {
    value.parse().map_err(|_| DecodeError::BadValue {
        field,
        value: value.to_string(),
    })
}

fn parse_seg(value: &str) -> Result<Seg, DecodeError> {
    let (ident, text) = match value.split_once(':') {
        Some((ident, text)) => (ident, Some(text)),
        None => (value, None),
    };
    let (is_dl, code) = if let Some(code) = ident.strip_prefix("DM") {
        (true, code)
    } else if let Some(code) = ident.strip_prefix("UM") {
        (false, code)
    } else {
        return Err(DecodeError::UnknownElement(ident.to_string()));
    };
    let code: u16 = code
        .parse()
        .map_err(|_| DecodeError::UnknownElement(ident.to_string()))?;
    let info = SegInfo::lookup(is_dl, code)
        .ok_or_else(|| DecodeError::UnknownElement(ident.to_string()))?;
    Ok(Seg {
        info,
        text: text.map(str::to_string),
    })
}

fn parse_line(line: &str) -> Result<Msg, DecodeError> {
    let mut fields = line.split('/');
    if fields.next() != Some("CPDLC") {
        return Err(DecodeError::BadMarker);
    }

    let mut msg = Msg::default();
    for field in fields {
        if field == "LOGON" {
            msg.is_logon = true;
            continue;
        }
        let Some((key, value)) = field.split_once('=') else {
            return Err(DecodeError::UnknownField(field.to_string()));
        };
        match key {
            "FROM" => msg.from = parse_callsign("FROM", value)?,
            "TO" => msg.to = parse_callsign("TO", value)?,
            "MIN" => msg.min = Some(parse_seq("MIN", value)?),
            "MRN" => msg.mrn = Some(parse_seq("MRN", value)?),
            "SEG" => msg.segs.push(parse_seg(value)?),
            _ => return Err(DecodeError::UnknownField(key.to_string())),
        }
    }

    // Everything except a bare LOGON must carry at least one element.
    if msg.segs.is_empty() && !msg.is_logon {
        return Err(DecodeError::Empty);
    }
    Ok(msg)
}
