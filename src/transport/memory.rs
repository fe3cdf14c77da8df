//! In-process registry.
//!
//! Records every call for assertions and can be told to fail selected
//! operations.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AgentDescriptor, AgentQuery, RegistryTransport};
use crate::certainty::{AgentId, EventId};
use crate::error::TransportError;
use crate::tree::{FactPath, FactTree};

fn lock_err(context: &'static str) -> TransportError {
    TransportError::ServerError {
        code: 500,
        message: format!("poisoned lock: {context}"),
    }
}

/// Registry operations that can be made to fail.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryOp {
    Register,
    Subscribe,
    CreateEvent,
    PushSnapshot,
    LookupAgent,
    Ping,
}

/// One call received by a [`MemoryRegistry`], successful or not.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryCall {
    Register(AgentDescriptor),
    Subscribe { agent_id: AgentId, paths: Vec<FactPath> },
    CreateEvent(FactTree),
    PushSnapshot { event_id: EventId, snapshot: FactTree },
    LookupAgent(AgentQuery),
    Ping,
}

#[derive(Debug, Default)]
struct RegistryState {
    agents: Vec<AgentDescriptor>,
    subscriptions: HashMap<AgentId, Vec<FactPath>>,
    events: HashMap<EventId, FactTree>,
    calls: Vec<RegistryCall>,
    failing: HashSet<RegistryOp>,
}

impl RegistryState {
    fn record(&mut self, op: RegistryOp, call: RegistryCall) -> Result<(), TransportError> {
        self.calls.push(call);
        if self.failing.contains(&op) {
            return Err(TransportError::ConnectionFailed {
                message: format!("injected failure: {op:?}"),
            });
        }
        Ok(())
    }
}

/// A registry that lives in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail with `ConnectionFailed` until switched back.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn set_failing(&self, op: RegistryOp, failing: bool) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
        Ok(())
    }

    /// Every call received so far, in order.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn calls(&self) -> Result<Vec<RegistryCall>, TransportError> {
        Ok(self.state.lock().map_err(|_| lock_err("memory registry"))?.calls.clone())
    }

    /// Snapshots pushed for `event_id`, including attempts that failed.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn pushes(&self, event_id: &EventId) -> Result<Vec<FactTree>, TransportError> {
        Ok(self
            .calls()?
            .into_iter()
            .filter_map(|call| match call {
                RegistryCall::PushSnapshot { event_id: id, snapshot } if id == *event_id => Some(snapshot),
                _ => None,
            })
            .collect())
    }

    /// The registry's current copy of an event.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn event(&self, event_id: &EventId) -> Result<Option<FactTree>, TransportError> {
        Ok(self
            .state
            .lock()
            .map_err(|_| lock_err("memory registry"))?
            .events
            .get(event_id)
            .cloned())
    }

    /// Paths the agent is subscribed to upstream.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn subscriptions(&self, agent_id: &AgentId) -> Result<Vec<FactPath>, TransportError> {
        Ok(self
            .state
            .lock()
            .map_err(|_| lock_err("memory registry"))?
            .subscriptions
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }

    /// Registered agents, in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error on a poisoned lock.
    pub fn agents(&self) -> Result<Vec<AgentDescriptor>, TransportError> {
        Ok(self.state.lock().map_err(|_| lock_err("memory registry"))?.agents.clone())
    }
}

#[async_trait]
impl RegistryTransport for MemoryRegistry {
    async fn register(&self, descriptor: &AgentDescriptor) -> Result<AgentId, TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        state.record(RegistryOp::Register, RegistryCall::Register(descriptor.clone()))?;
        let id = AgentId::new(Uuid::new_v4().to_string());
        state.agents.push(AgentDescriptor {
            id: Some(id.clone()),
            ..descriptor.clone()
        });
        Ok(id)
    }

    async fn subscribe(&self, agent_id: &AgentId, paths: &[FactPath]) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        state.record(
            RegistryOp::Subscribe,
            RegistryCall::Subscribe {
                agent_id: agent_id.clone(),
                paths: paths.to_vec(),
            },
        )?;
        if !state.agents.iter().any(|a| a.id.as_ref() == Some(agent_id)) {
            return Err(TransportError::ServerError {
                code: 404,
                message: format!("unknown agent {agent_id}"),
            });
        }
        state.subscriptions.insert(agent_id.clone(), paths.to_vec());
        Ok(())
    }

    async fn create_event(&self, snapshot: &FactTree) -> Result<EventId, TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        state.record(RegistryOp::CreateEvent, RegistryCall::CreateEvent(snapshot.clone()))?;
        let id = EventId::new(Uuid::new_v4().to_string());
        state.events.insert(id.clone(), snapshot.clone());
        Ok(id)
    }

    async fn push_snapshot(&self, event_id: &EventId, snapshot: &FactTree) -> Result<(), TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        state.record(
            RegistryOp::PushSnapshot,
            RegistryCall::PushSnapshot {
                event_id: event_id.clone(),
                snapshot: snapshot.clone(),
            },
        )?;
        state.events.insert(event_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn lookup_agent(&self, query: &AgentQuery) -> Result<Option<AgentDescriptor>, TransportError> {
        let mut state = self.state.lock().map_err(|_| lock_err("memory registry"))?;
        state.record(RegistryOp::LookupAgent, RegistryCall::LookupAgent(query.clone()))?;
        Ok(state.agents.iter().find(|a| query.matches(a)).cloned())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.state
            .lock()
            .map_err(|_| lock_err("memory registry"))?
            .record(RegistryOp::Ping, RegistryCall::Ping)
    }
}
