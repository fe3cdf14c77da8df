//! Certainty and identity types.
//!
//! Every tuple in a fact tree states how certain its source is, on a closed
//! [0.0, 1.0] scale. Agents and events are identified by opaque strings minted
//! by the registry service.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Identifier of an agent, as minted by the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Source recorded on tuples written before the agent has registered.
    pub const UNREGISTERED: &'static str = "unregistered";

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn unregistered() -> Self {
        Self(Self::UNREGISTERED.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for AgentId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// The agent id assigned by the registry, shared between the agent and its
/// dispatcher. Empty until registration completes and again after a reset.
#[derive(Debug, Default)]
pub struct IdentityCell(RwLock<Option<AgentId>>);

impl IdentityCell {
    #[must_use]
    pub fn get(&self) -> Option<AgentId> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The registered id, or [`AgentId::unregistered`] before registration.
    #[must_use]
    pub fn current(&self) -> AgentId {
        self.get().unwrap_or_else(AgentId::unregistered)
    }

    pub fn set(&self, id: AgentId) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(id);
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Identifier of a shared event.
///
/// Canonical ids come from the registry. Events drafted locally carry a
/// `local <uuid>` id until the registry has accepted them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    const LOCAL_PREFIX: &'static str = "local ";

    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mints a fresh local id for an event that has not been posted yet.
    #[must_use]
    pub fn local() -> Self {
        Self(format!("{}{}", Self::LOCAL_PREFIX, uuid::Uuid::new_v4()))
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for EventId {
    fn from(v: String) -> Self {
        Self(v)
    }
}

/// How certain a source is about its claimed value.
///
/// # Examples
///
/// ```
/// use xal::Certainty;
///
/// let c = Certainty::new(0.75).unwrap();
/// assert_eq!(c.value(), 0.75);
/// assert!(Certainty::new(1.5).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Certainty(f64);

impl Certainty {
    /// Minimum valid certainty.
    pub const MIN_VALUE: f64 = 0.0;

    /// Maximum valid certainty.
    pub const MAX_VALUE: f64 = 1.0;

    /// Full certainty, used for plain scalar puts.
    pub const CERTAIN: Self = Self(1.0);

    /// Creates a certainty with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::CertaintyOutOfRange` if the value is not in [0.0, 1.0]
    /// or is NaN.
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::CertaintyOutOfRange { value });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Default for Certainty {
    fn default() -> Self {
        Self::CERTAIN
    }
}

impl TryFrom<f64> for Certainty {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Certainty> for f64 {
    fn from(c: Certainty) -> Self {
        c.0
    }
}

impl fmt::Display for Certainty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
