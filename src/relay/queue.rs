// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::{debug, warn};

/// Seconds an undeliverable message survives before it is dropped.
pub const QUEUED_MSG_TIMEOUT: i64 = 3600;

/// Default cap on the total accounted size of the queue.
pub const QUEUED_MSG_MAX_BYTES: u64 = 128 << 20;

/// A message held for a recipient that is not currently connected.
/// The payload is the already-encoded wire form; delivery appends it
/// verbatim, so the `from` rewrite has happened before enqueue.
#[derive(Debug)]
pub struct QueuedMsg {
    pub from: String,
    pub to: String,
    pub created: i64,
    pub encoded: Bytes,
}

fn entry_cost(encoded: &Bytes) -> u64 {
    (size_of::<QueuedMsg>() + encoded.len() + 1) as u64
}

/// FIFO store-and-forward queue with byte-size accounting.
#[derive(Debug)]
pub struct MsgQueue {
    entries: VecDeque<QueuedMsg>,
    bytes: u64,
    max_bytes: u64,
}

impl MsgQueue {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Appends a message. Fails (leaving the queue unchanged) when the
    /// accounted size would exceed the cap; the caller surfaces that to
    /// the sender.
    pub fn enqueue(&mut self, from: &str, to: &str, now: i64, encoded: Bytes) -> bool {
        let cost = entry_cost(&encoded);
        if self.bytes + cost > self.max_bytes {
            warn!(
                max_bytes = self.max_bytes,
                "cannot queue message, global message queue is out of space"
            );
            return false;
        }
        self.entries.push_back(QueuedMsg {
            from: from.to_string(),
            to: to.to_string(),
            created: now,
            encoded,
        });
        self.bytes += cost;
        true
    }

    /// One maintenance pass, head to tail: entries for which `deliver`
    /// returns true leave the queue, entries older than
    /// [`QUEUED_MSG_TIMEOUT`] are dropped silently.
    pub fn sweep(&mut self, now: i64, mut deliver: impl FnMut(&QueuedMsg) -> bool) {
        let mut kept = VecDeque::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if deliver(&entry) {
                self.bytes -= entry_cost(&entry.encoded);
            } else if now - entry.created > QUEUED_MSG_TIMEOUT {
                debug!(to = %entry.to, "dropping aged-out queued message");
                self.bytes -= entry_cost(&entry.encoded);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        if self.entries.is_empty() {
            debug_assert_eq!(self.bytes, 0);
        }
    }
}
