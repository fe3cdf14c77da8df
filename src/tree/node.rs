use std::collections::BTreeMap;

use crate::tuple::Tuple;
use crate::value::Scalar;

/// A node in a fact tree.
///
/// Three kinds, distinguished by type rather than probed at runtime:
/// - `Branch`: maps path segments to child nodes.
/// - `Leaf`: an ordered sequence of tuples, at most one per source.
/// - `Attribute`: a raw scalar outside the fact model (for example the event
///   identity at `xi.event.id`). Traversals skip attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Branch(BTreeMap<String, Node>),
    Leaf(Vec<Tuple>),
    Attribute(Scalar),
}

impl Node {
    #[must_use]
    pub const fn empty_branch() -> Self {
        Self::Branch(BTreeMap::new())
    }

    #[must_use]
    pub const fn empty_leaf() -> Self {
        Self::Leaf(Vec::new())
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Branch(_) => "branch",
            Self::Leaf(_) => "leaf",
            Self::Attribute(_) => "attribute",
        }
    }

    pub const fn is_branch(&self) -> bool {
        matches!(self, Self::Branch(_))
    }

    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&[Tuple]> {
        match self {
            Self::Leaf(tuples) => Some(tuples),
            _ => None,
        }
    }

    pub const fn as_branch(&self) -> Option<&BTreeMap<String, Node>> {
        match self {
            Self::Branch(children) => Some(children),
            _ => None,
        }
    }

    pub const fn as_attribute(&self) -> Option<&Scalar> {
        match self {
            Self::Attribute(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vec<Tuple>> for Node {
    fn from(tuples: Vec<Tuple>) -> Self {
        Self::Leaf(tuples)
    }
}

impl From<Scalar> for Node {
    fn from(v: Scalar) -> Self {
        Self::Attribute(v)
    }
}
