//! The registry-service boundary.
//!
//! The agent core talks to the registry only through [`RegistryTransport`].
//! Network implementations live outside this crate; [`MemoryRegistry`] is the
//! in-process implementation used by tests and the demo binary.

mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::certainty::{AgentId, EventId};
use crate::error::TransportError;
use crate::tree::{FactPath, FactTree};

pub use memory::{MemoryRegistry, RegistryCall, RegistryOp};

/// How an agent presents itself to the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Filled in by the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
}

impl AgentDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, url: Option<String>) -> Self {
        Self {
            name: name.into(),
            url,
            id: None,
        }
    }
}

/// Criteria for [`RegistryTransport::lookup_agent`]. Empty criteria match
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<AgentId>,
}

impl AgentQuery {
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    #[must_use]
    pub fn by_id(id: AgentId) -> Self {
        Self { name: None, id: Some(id) }
    }

    /// True when every criterion that is set agrees with `descriptor`.
    #[must_use]
    pub fn matches(&self, descriptor: &AgentDescriptor) -> bool {
        if self.name.is_none() && self.id.is_none() {
            return false;
        }
        let name_ok = self.name.as_ref().map_or(true, |n| *n == descriptor.name);
        let id_ok = self.id.as_ref().map_or(true, |id| descriptor.id.as_ref() == Some(id));
        name_ok && id_ok
    }
}

/// Calls the agent core makes on the registry service.
#[async_trait]
pub trait RegistryTransport: Send + Sync + fmt::Debug {
    /// Registers the agent and returns the id the registry minted.
    ///
    /// Not idempotent; calling twice may register twice.
    async fn register(&self, descriptor: &AgentDescriptor) -> Result<AgentId, TransportError>;

    /// Subscribes the agent upstream to changes at `paths`.
    async fn subscribe(&self, agent_id: &AgentId, paths: &[FactPath]) -> Result<(), TransportError>;

    /// Creates a shared event from `snapshot`; the registry mints the id.
    async fn create_event(&self, snapshot: &FactTree) -> Result<EventId, TransportError>;

    /// Sends the agent's view of an event upstream.
    async fn push_snapshot(&self, event_id: &EventId, snapshot: &FactTree) -> Result<(), TransportError>;

    async fn lookup_agent(&self, query: &AgentQuery) -> Result<Option<AgentDescriptor>, TransportError>;

    async fn ping(&self) -> Result<(), TransportError>;
}
