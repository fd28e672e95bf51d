// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Reloadable peer-address blocklist.
pub mod blocklist;
/// Per-connection protocol state and input pump.
pub mod conn;
/// Store-and-forward queue for offline recipients.
pub mod queue;
/// Callsign-to-connections routing index.
pub mod router;
/// The relay daemon itself: listeners, connection tasks, dispatch.
pub mod server;
/// Process-wide TLS credentials.
pub mod tls;

pub use server::{Relay, RelayState};
