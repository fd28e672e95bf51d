// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashSet,
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{info, warn};

/// Set of peer addresses refused at accept time.
///
/// Backed by a plain text file (one address per line, `#` comments); the
/// file is re-read when its modification time changes, so operators can
/// edit it without restarting the daemon.
#[derive(Debug, Default)]
pub struct Blocklist {
    path: Option<PathBuf>,
    entries: HashSet<IpAddr>,
    mtime: Option<SystemTime>,
}

impl Blocklist {
    pub fn new(path: Option<PathBuf>) -> Self {
        let mut bl = Self {
            path,
            ..Self::default()
        };
        bl.refresh();
        bl
    }

    /// True when the peer address is currently blocked.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.contains(&ip)
    }

    /// Reloads the backing file if it changed on disk. Returns true when
    /// a reload happened; the caller then re-checks live connections.
    pub fn refresh(&mut self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(err) => {
                // A missing or unreadable file clears the list once.
                if self.mtime.take().is_some() {
                    warn!(path = %path.display(), %err, "blocklist unreadable, clearing");
                    self.entries.clear();
                    return true;
                }
                return false;
            },
        };
        if self.mtime == Some(mtime) {
            return false;
        }
        self.entries = load_entries(path);
        self.mtime = Some(mtime);
        info!(
            path = %path.display(),
            entries = self.entries.len(),
            "blocklist loaded"
        );
        true
    }
}

fn load_entries(path: &Path) -> HashSet<IpAddr> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), %err, "cannot read blocklist");
            return HashSet::new();
        },
    };
    let mut entries = HashSet::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<IpAddr>() {
            Ok(ip) => {
                entries.insert(ip);
            },
            Err(_) => warn!(%line, "ignoring malformed blocklist entry"),
        }
    }
    entries
}
