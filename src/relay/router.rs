// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use crate::relay::conn::ConnId;

/// Callsign-to-connections multimap.
///
/// Several live connections may share a `from` callsign (redundant ATC
/// workstations); a delivery to that callsign fans out to all of them.
/// Entries hold connection ids, never the connections themselves; the
/// connection set stays the single owner.
#[derive(Debug, Default)]
pub struct Router {
    by_from: HashMap<String, Vec<ConnId>>,
}

impl Router {
    pub fn insert(&mut self, from: &str, id: ConnId) {
        self.by_from.entry(from.to_string()).or_default().push(id);
    }

    pub fn remove(&mut self, from: &str, id: ConnId) {
        if let Some(ids) = self.by_from.get_mut(from) {
            ids.retain(|&other| other != id);
            if ids.is_empty() {
                self.by_from.remove(from);
            }
        }
    }

    /// All connections registered under `to`; empty when the recipient
    /// is offline.
    pub fn lookup(&self, to: &str) -> &[ConnId] {
        self.by_from.get(to).map_or(&[], Vec::as_slice)
    }

    pub fn is_registered(&self, id: ConnId, from: &str) -> bool {
        self.lookup(from).contains(&id)
    }
}
