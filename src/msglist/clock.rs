// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use chrono::{Local, Timelike, Utc};

/// Time source injected into the tracker so timeout behaviour is
/// deterministic under test.
pub trait Clock: Send + Sync {
    /// Epoch seconds; drives per-segment timeouts.
    fn now(&self) -> i64;

    /// Local wall-clock `(hours, minutes)`; display only.
    fn wall_hm(&self) -> (u8, u8);
}

/// Default clock: real local time.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn wall_hm(&self) -> (u8, u8) {
        let now = Local::now();
        (now.hour() as u8, now.minute() as u8)
    }
}
