//! Snapshot reconciliation.
//!
//! The policy is incoming-snapshot-dominant per path, freshest-per-source
//! wins. The result has exactly the incoming snapshot's paths; within a leaf
//! both snapshots share, each source keeps its strictly newer tuple and ties
//! go to the incoming side. Attributes always come from `incoming`.
//!
//! This is deliberately not a CRDT join: a path known only to `base` is
//! dropped.

use crate::tree::FactTree;

/// Reconciles `incoming` against `base`, producing a fresh tree.
///
/// # Examples
///
/// ```
/// use xal::merge::merge;
/// use xal::{FactTree, Stamp, Timestamp};
///
/// let mut base = FactTree::new();
/// base.put("a", 2, &Stamp::new("s", Timestamp::from_millis(20))).unwrap();
/// base.put("only_base", 1, &Stamp::new("s", Timestamp::from_millis(1))).unwrap();
///
/// let mut incoming = FactTree::new();
/// incoming.put("a", 1, &Stamp::new("s", Timestamp::from_millis(10))).unwrap();
///
/// let merged = merge(&base, &incoming);
/// assert_eq!(merged.leaf("a").unwrap()[0].value.as_int(), Some(2));
/// assert!(merged.get("only_base").is_none());
/// ```
#[must_use]
pub fn merge(base: &FactTree, incoming: &FactTree) -> FactTree {
    let mut merged = incoming.clone();
    base.for_each(|path, base_tuples| {
        let Some(leaf) = merged.leaf_mut(path) else {
            return;
        };
        for tuple in base_tuples {
            match leaf.iter_mut().find(|held| held.source == tuple.source) {
                Some(held) => {
                    if tuple.is_fresher_than(held) {
                        *held = tuple.clone();
                    }
                }
                None => leaf.push(tuple.clone()),
            }
        }
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certainty::AgentId;
    use crate::time::Timestamp;
    use crate::tuple::Stamp;
    use crate::value::Scalar;
    use proptest::prelude::*;

    fn stamp(source: &str, millis: i64) -> Stamp {
        Stamp::new(source, Timestamp::from_millis(millis))
    }

    #[test]
    fn test_base_only_paths_are_dropped() {
        let mut base = FactTree::new();
        base.put("x.y", 1, &stamp("s", 1)).unwrap();
        let mut incoming = FactTree::new();
        incoming.put("x.z", 2, &stamp("s", 1)).unwrap();

        let merged = merge(&base, &incoming);
        assert!(merged.get("x.y").is_none());
        assert!(merged.leaf("x.z").is_some());
    }

    #[test]
    fn test_fresher_base_tuple_wins() {
        let mut base = FactTree::new();
        base.put("a", "new", &stamp("s", 9)).unwrap();
        let mut incoming = FactTree::new();
        incoming.put("a", "old", &stamp("s", 3)).unwrap();

        let merged = merge(&base, &incoming);
        assert_eq!(merged.leaf("a").unwrap()[0].value, Scalar::from("new"));
    }

    #[test]
    fn test_tie_goes_to_incoming() {
        let mut base = FactTree::new();
        base.put("a", "base", &stamp("s", 5)).unwrap();
        let mut incoming = FactTree::new();
        incoming.put("a", "incoming", &stamp("s", 5)).unwrap();

        let merged = merge(&base, &incoming);
        assert_eq!(merged.leaf("a").unwrap()[0].value, Scalar::from("incoming"));
    }

    #[test]
    fn test_base_sources_augment_shared_leaf() {
        let mut base = FactTree::new();
        base.put("a", 1, &stamp("s1", 1)).unwrap();
        let mut incoming = FactTree::new();
        incoming.put("a", 2, &stamp("s2", 1)).unwrap();

        let merged = merge(&base, &incoming);
        let sources: Vec<AgentId> = merged.leaf("a").unwrap().iter().map(|t| t.source.clone()).collect();
        assert_eq!(sources, vec![AgentId::from("s2"), AgentId::from("s1")]);
    }

    #[test]
    fn test_attributes_come_from_incoming() {
        let mut base = FactTree::new();
        base.set_attribute("xi.event.id", "old").unwrap();
        let mut incoming = FactTree::new();
        incoming.set_attribute("xi.event.id", "new").unwrap();

        let merged = merge(&base, &incoming);
        assert_eq!(merged.attribute("xi.event.id"), Some(&Scalar::from("new")));
    }

    #[test]
    fn test_inputs_are_not_mutated() {
        let mut base = FactTree::new();
        base.put("a", 1, &stamp("s1", 9)).unwrap();
        let mut incoming = FactTree::new();
        incoming.put("a", 2, &stamp("s1", 1)).unwrap();
        let (base_before, incoming_before) = (base.clone(), incoming.clone());

        let _ = merge(&base, &incoming);
        assert_eq!(base, base_before);
        assert_eq!(incoming, incoming_before);
    }

    fn arb_tree() -> impl Strategy<Value = FactTree> {
        let entry = (
            prop::sample::select(vec!["a.x", "a.y", "b", "c.d.e"]),
            prop::sample::select(vec!["s1", "s2"]),
            0i64..5,
            any::<i32>(),
        );
        prop::collection::vec(entry, 0..10).prop_map(|entries| {
            let mut tree = FactTree::new();
            for (path, source, millis, value) in entries {
                tree.put(path, value, &stamp(source, millis)).unwrap();
            }
            tree
        })
    }

    proptest! {
        #[test]
        fn prop_merged_paths_equal_incoming_paths(base in arb_tree(), incoming in arb_tree()) {
            prop_assert_eq!(merge(&base, &incoming).leaf_paths(), incoming.leaf_paths());
        }

        #[test]
        fn prop_freshest_per_source_wins(base in arb_tree(), incoming in arb_tree()) {
            let merged = merge(&base, &incoming);
            incoming.for_each(|path, incoming_tuples| {
                let base_leaf = base.leaf(path).unwrap_or(&[]);
                let merged_leaf = merged.leaf(path).unwrap_or(&[]);
                for theirs in incoming_tuples {
                    let got = merged_leaf.iter().find(|t| t.source == theirs.source).unwrap();
                    match base_leaf.iter().find(|t| t.source == theirs.source) {
                        Some(ours) if ours.timestamp > theirs.timestamp => assert_eq!(got, ours),
                        _ => assert_eq!(got, theirs),
                    }
                }
            });
        }
    }
}
