// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Static per-message-type descriptors (direction, response discipline,
/// timeouts).
pub mod info;
/// The in-memory CPDLC message model.
pub mod model;
/// Textual wire codec (encode / incremental decode).
pub mod parse;

pub use info::{Resp, SegInfo};
pub use model::{Msg, Seg};
pub use parse::{DecodeError, decode, encode};
