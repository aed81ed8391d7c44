use std::collections::BTreeSet;

use serde::Serialize;

/// Delta that turns a stored name set into a requested one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl SyncDiff {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = requested \ current`, `to_remove = current \ requested`.
/// Names in both sets are left alone.
pub fn diff(current: &BTreeSet<String>, requested: &BTreeSet<String>) -> SyncDiff {
    SyncDiff {
        to_add: requested.difference(current).cloned().collect(),
        to_remove: current.difference(requested).cloned().collect(),
    }
}

/// What a sync actually changed, plus the resulting set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub current: BTreeSet<String>,
}
