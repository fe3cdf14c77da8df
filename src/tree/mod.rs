//! Hierarchical, multi-source fact trees.
//!
//! A [`FactTree`] maps dotted paths to [`Node`]s. Leaves hold one [`Tuple`]
//! per source; branches hold children; attributes hold raw scalars (such as
//! the event id) that are outside the fact model.

mod codec;
mod node;
mod path;

use std::collections::{BTreeMap, BTreeSet};

pub use node::Node;
pub use path::{FactPath, MAX_PATH_LEN};

use crate::error::ValidationError;
use crate::tuple::{Fact, Stamp, Tuple};
use crate::value::Scalar;

/// A snapshot of everything known about one event.
///
/// # Examples
///
/// ```
/// use xal::{FactTree, Stamp, Timestamp};
///
/// let mut tree = FactTree::new();
/// tree.put("a.b", 5, &Stamp::new("s1", Timestamp::from_millis(1))).unwrap();
/// tree.put("a.b", 7, &Stamp::new("s1", Timestamp::from_millis(2))).unwrap();
///
/// let leaf = tree.leaf("a.b").unwrap();
/// assert_eq!(leaf.len(), 1);
/// assert_eq!(leaf[0].value.as_int(), Some(7));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactTree {
    root: BTreeMap<String, Node>,
}

impl FactTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Resolves `path` one segment at a time.
    ///
    /// Returns `None` when any segment is absent, when a segment would descend
    /// through a leaf or attribute, or when the path is malformed. Never fails.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split('.');
        let mut node = self.root.get(segments.next()?)?;
        for segment in segments {
            match node {
                Node::Branch(children) => node = children.get(segment)?,
                Node::Leaf(_) | Node::Attribute(_) => return None,
            }
        }
        Some(node)
    }

    /// The tuples at `path`, if it resolves to a leaf.
    #[must_use]
    pub fn leaf(&self, path: &str) -> Option<&[Tuple]> {
        self.get(path).and_then(Node::as_leaf)
    }

    /// The raw scalar at `path`, if it resolves to an attribute.
    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<&Scalar> {
        self.get(path).and_then(Node::as_attribute)
    }

    pub(crate) fn leaf_mut(&mut self, path: &str) -> Option<&mut Vec<Tuple>> {
        let mut segments = path.split('.');
        let mut node = self.root.get_mut(segments.next()?)?;
        for segment in segments {
            match node {
                Node::Branch(children) => node = children.get_mut(segment)?,
                Node::Leaf(_) | Node::Attribute(_) => return None,
            }
        }
        match node {
            Node::Leaf(tuples) => Some(tuples),
            _ => None,
        }
    }

    /// Ensures every segment of `path` exists, creating empty branches for
    /// intermediate segments and `default` for the final one if absent.
    ///
    /// Idempotent: an existing final node is returned untouched, whatever its
    /// kind.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a malformed path, `PathConflict` when an intermediate
    /// segment is a leaf or attribute.
    pub fn inflate(&mut self, path: &str, default: Node) -> Result<&mut Node, ValidationError> {
        let parsed = FactPath::parse(path)?;
        let segments: Vec<&str> = parsed.segments().collect();
        let Some((last, parents)) = segments.split_last() else {
            return Err(ValidationError::InvalidPath {
                path: path.to_string(),
                reason: "path is empty".to_string(),
            });
        };

        let mut children = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let node = children
                .entry((*segment).to_string())
                .or_insert_with(Node::empty_branch);
            match node {
                Node::Branch(next) => children = next,
                other => {
                    return Err(ValidationError::PathConflict {
                        path: segments[..=depth].join("."),
                        found: other.kind(),
                    })
                }
            }
        }
        Ok(children.entry((*last).to_string()).or_insert(default))
    }

    /// Records a fact at `path`, replacing any earlier tuple from the same
    /// source.
    ///
    /// Plain scalars are claimed by `stamp.source` with full certainty at
    /// `stamp.timestamp`; a [`Claim`](crate::Claim) must carry its own value
    /// and certainty.
    ///
    /// # Errors
    ///
    /// Any `inflate` error, `MissingField`/`CertaintyOutOfRange` for a bad
    /// claim, or `PathConflict` when `path` already holds a branch or
    /// attribute.
    pub fn put(&mut self, path: &str, fact: impl Into<Fact>, stamp: &Stamp) -> Result<(), ValidationError> {
        let tuple = fact.into().into_tuple(stamp)?;
        match self.inflate(path, Node::empty_leaf())? {
            Node::Leaf(tuples) => {
                insert_tuple(tuples, tuple);
                Ok(())
            }
            other => Err(ValidationError::PathConflict {
                path: path.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Stores a raw scalar at `path`, overwriting an existing attribute.
    ///
    /// # Errors
    ///
    /// Any `inflate` error, or `PathConflict` when `path` holds a branch or leaf.
    pub fn set_attribute(&mut self, path: &str, value: impl Into<Scalar>) -> Result<(), ValidationError> {
        let value = value.into();
        match self.inflate(path, Node::Attribute(value.clone()))? {
            Node::Attribute(existing) => {
                *existing = value;
                Ok(())
            }
            other => Err(ValidationError::PathConflict {
                path: path.to_string(),
                found: other.kind(),
            }),
        }
    }

    /// Visits every leaf depth-first, in key order.
    ///
    /// Branches are descended, leaves are passed to `visit`, attributes are
    /// skipped.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &[Tuple]),
    {
        let mut prefix = String::new();
        walk(&self.root, &mut prefix, &mut visit);
    }

    /// The set of paths that resolve to leaves.
    #[must_use]
    pub fn leaf_paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        self.for_each(|path, _| {
            paths.insert(path.to_string());
        });
        paths
    }

    /// Hex blake3 digest of the canonical JSON form.
    #[must_use]
    pub fn digest(&self) -> String {
        blake3::hash(self.to_json().to_string().as_bytes()).to_hex().to_string()
    }

    /// First 12 hex characters of [`digest`](Self::digest), for log fields.
    #[must_use]
    pub fn short_digest(&self) -> String {
        let mut digest = self.digest();
        digest.truncate(12);
        digest
    }
}

/// Removes any tuple from the same source, then appends.
pub(crate) fn insert_tuple(tuples: &mut Vec<Tuple>, tuple: Tuple) {
    tuples.retain(|t| t.source != tuple.source);
    tuples.push(tuple);
}

fn walk<F>(children: &BTreeMap<String, Node>, prefix: &mut String, visit: &mut F)
where
    F: FnMut(&str, &[Tuple]),
{
    for (segment, node) in children {
        let restore = prefix.len();
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(segment);
        match node {
            Node::Branch(grandchildren) => walk(grandchildren, prefix, visit),
            Node::Leaf(tuples) => visit(prefix, tuples),
            Node::Attribute(_) => {}
        }
        prefix.truncate(restore);
    }
}
