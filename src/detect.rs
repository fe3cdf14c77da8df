//! Change detection between two snapshots.

use crate::subscription::Subscription;
use crate::tree::FactTree;

/// True when `path` resolves to different nodes in `old` and `new`.
///
/// Deep equality; appearing or disappearing counts as a change.
#[must_use]
pub fn changed(old: &FactTree, new: &FactTree, path: &str) -> bool {
    old.get(path) != new.get(path)
}

/// The subscriptions whose paths changed between `old` and `new`, in
/// registration order.
///
/// Each subscription is judged on its own path. Nested or duplicate paths are
/// neither merged nor short-circuited.
#[must_use]
pub fn matched(old: &FactTree, new: &FactTree, subscriptions: &[Subscription]) -> Vec<Subscription> {
    subscriptions
        .iter()
        .filter(|s| changed(old, new, s.path().as_str()))
        .cloned()
        .collect()
}
