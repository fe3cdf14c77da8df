//! The agent context.
//!
//! An [`Agent`] owns everything that is per-agent state: identity, the
//! subscription list, and the event records. It is cheap to clone and
//! can be reset to a fresh state without rebuilding it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::certainty::{AgentId, EventId, IdentityCell};
use crate::config::AgentConfig;
use crate::dispatcher::{EventDispatcher, EventStatus, Inbound};
use crate::error::{ValidationError, XalResult};
use crate::subscription::{Handler, SubscriptionId, SubscriptionRegistry};
use crate::time::{Clock, SystemClock};
use crate::transport::{AgentDescriptor, AgentQuery, RegistryTransport};
use crate::tree::{FactPath, FactTree, Node};
use crate::tuple::{Fact, Stamp};
use crate::value::Scalar;

/// A client-side agent bound to one registry.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use xal::{handler_fn, Agent, AgentConfig, FactTree, HandlerContext, MemoryRegistry};
///
/// # #[tokio::main]
/// # async fn main() {
/// let agent = Agent::new(AgentConfig::new("echo"), Arc::new(MemoryRegistry::new())).unwrap();
/// agent
///     .on("xi.event.input.text", handler_fn(|ctx: HandlerContext, mut state: FactTree| async move {
///         ctx.put(&mut state, "xi.event.output.text", "heard you")?;
///         Ok(state)
///     }))
///     .unwrap();
/// agent.start().await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

#[derive(Debug)]
struct AgentInner {
    config: AgentConfig,
    event_id_path: FactPath,
    identity: Arc<IdentityCell>,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: EventDispatcher,
    transport: Arc<dyn RegistryTransport>,
    clock: Arc<dyn Clock>,
}

impl Agent {
    /// # Errors
    ///
    /// Returns a `ValidationError` for an invalid config.
    pub fn new(config: AgentConfig, transport: Arc<dyn RegistryTransport>) -> XalResult<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    /// Builds an agent that stamps tuples from `clock`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for an invalid config.
    pub fn with_clock(
        config: AgentConfig,
        transport: Arc<dyn RegistryTransport>,
        clock: Arc<dyn Clock>,
    ) -> XalResult<Self> {
        config.validate()?;
        let event_id_path = FactPath::parse(&config.event_id_path)?;
        let identity = Arc::new(IdentityCell::default());
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let dispatcher = config.retention.apply(EventDispatcher::new(
            Arc::clone(&subscriptions),
            Arc::clone(&transport),
            Arc::clone(&clock),
            Arc::clone(&identity),
        ));
        Ok(Self {
            inner: Arc::new(AgentInner {
                config,
                event_id_path,
                identity,
                subscriptions,
                dispatcher,
                transport,
                clock,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    #[must_use]
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// The registry-assigned id, once [`start`](Self::start) has succeeded.
    #[must_use]
    pub fn agent_id(&self) -> Option<AgentId> {
        self.inner.identity.get()
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    /// Registers `handler` for changes at `path`.
    ///
    /// Handlers run in registration order. Register before `start` so the
    /// path is included in the upstream subscription.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a malformed path.
    pub fn on(&self, path: &str, handler: impl Handler + 'static) -> XalResult<SubscriptionId> {
        let id = self.inner.subscriptions.register(path, Arc::new(handler))?;
        debug!(path, "registered handler");
        Ok(id)
    }

    /// Registers with the registry, then subscribes upstream to every
    /// registered path.
    ///
    /// # Errors
    ///
    /// The transport error from either call. A failed subscribe leaves the
    /// agent registered.
    pub async fn start(&self) -> XalResult<AgentId> {
        let config = &self.inner.config;
        info!(agent = %config.name, "registering agent");
        let descriptor = AgentDescriptor::new(config.name.clone(), config.url.clone());
        let agent_id = self.inner.transport.register(&descriptor).await?;
        self.inner.identity.set(agent_id.clone());
        info!(agent_id = %agent_id, "registered with registry");

        let paths = self.inner.subscriptions.paths()?;
        if let Err(err) = self.inner.transport.subscribe(&agent_id, &paths).await {
            warn!(agent_id = %agent_id, error = %err, "subscribe failed");
            return Err(err.into());
        }
        info!(agent_id = %agent_id, paths = paths.len(), "subscribed upstream");
        Ok(agent_id)
    }

    /// Forgets identity, subscriptions, and every event record.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn stop(&self) -> XalResult<()> {
        info!(agent = %self.name(), "stopping agent");
        self.reset()
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn reset(&self) -> XalResult<()> {
        self.inner.dispatcher.reset()?;
        self.inner.subscriptions.reset()?;
        self.inner.identity.clear();
        Ok(())
    }

    /// Reads the event id from the configured event-identity field.
    ///
    /// # Errors
    ///
    /// `MissingEventId` when the field is absent or not a string or integer.
    pub fn event_id_of(&self, snapshot: &FactTree) -> Result<EventId, ValidationError> {
        match snapshot.attribute(self.inner.event_id_path.as_str()) {
            Some(Scalar::String(id)) if !id.is_empty() => Ok(EventId::new(id.clone())),
            Some(Scalar::Int(id)) => Ok(EventId::new(id.to_string())),
            _ => Err(ValidationError::MissingEventId {
                path: self.inner.event_id_path.to_string(),
            }),
        }
    }

    /// Entry point for a received snapshot.
    ///
    /// # Errors
    ///
    /// `MissingEventId`, or any dispatch error.
    pub async fn handle_inbound(&self, snapshot: FactTree) -> XalResult<Inbound> {
        let event_id = self.event_id_of(&snapshot)?;
        self.inner.dispatcher.inbound(event_id, snapshot).await
    }

    /// Decodes a wire snapshot, then behaves like
    /// [`handle_inbound`](Self::handle_inbound).
    ///
    /// # Errors
    ///
    /// `MalformedSnapshot` for an undecodable body, then as `handle_inbound`.
    pub async fn handle_inbound_json(&self, raw: &serde_json::Value) -> XalResult<Inbound> {
        let snapshot = FactTree::from_json(raw)?;
        self.handle_inbound(snapshot).await
    }

    /// Runs [`handle_inbound`](Self::handle_inbound) on its own task.
    #[must_use]
    pub fn spawn_inbound(&self, snapshot: FactTree) -> JoinHandle<XalResult<Inbound>> {
        let agent = self.clone();
        tokio::spawn(async move { agent.handle_inbound(snapshot).await })
    }

    fn stamp(&self) -> Stamp {
        Stamp::new(self.inner.identity.current(), self.inner.clock.now())
    }

    /// Starts a new event locally.
    ///
    /// The draft gets a `local <uuid>` id at the event-identity field and an
    /// empty leaf at `seed_path`; an idle record is parked under the local id
    /// until [`post_event`](Self::post_event).
    ///
    /// # Errors
    ///
    /// `InvalidPath` or `PathConflict` when `seed_path` cannot coexist with
    /// the event-identity field.
    pub fn draft_event(&self, seed_path: &str) -> XalResult<EventDraft> {
        let local_id = EventId::local();
        let mut state = FactTree::new();
        state.set_attribute(self.inner.event_id_path.as_str(), local_id.as_str())?;
        state.inflate(seed_path, Node::empty_leaf())?;
        self.inner.dispatcher.park(local_id.clone(), state.clone())?;
        debug!(event_id = %local_id, seed_path, "drafted event");
        Ok(EventDraft {
            local_id,
            state,
            source: self.inner.identity.current(),
            clock: Arc::clone(&self.inner.clock),
        })
    }

    /// Sends a draft to the registry and adopts the canonical id it returns.
    ///
    /// # Errors
    ///
    /// The transport error; the draft's local record stays parked.
    pub async fn post_event(&self, draft: &EventDraft) -> XalResult<EventId> {
        let event_id = self.inner.transport.create_event(&draft.state).await?;
        let mut posted = draft.state.clone();
        posted.set_attribute(self.inner.event_id_path.as_str(), event_id.as_str())?;
        self.inner.dispatcher.rekey(&draft.local_id, event_id.clone(), posted)?;
        info!(event_id = %event_id, local_id = %draft.local_id, "posted event");
        Ok(event_id)
    }

    /// Puts a fact into an event as this agent and pushes the whole state.
    ///
    /// # Errors
    ///
    /// `UnknownEvent`, `Wedged`, the `put` validation error, or the push's
    /// transport error.
    pub async fn update_event(&self, event_id: &EventId, path: &str, fact: impl Into<Fact>) -> XalResult<()> {
        let fact = fact.into();
        let stamp = self.stamp();
        let state = self.inner.dispatcher.update(event_id, |tree| {
            tree.put(path, fact, &stamp)?;
            Ok(())
        })?;
        self.inner.transport.push_snapshot(event_id, &state).await?;
        info!(event_id = %event_id, path, digest = %state.short_digest(), "pushed update");
        Ok(())
    }

    /// # Errors
    ///
    /// The transport error.
    pub async fn lookup_agent(&self, query: &AgentQuery) -> XalResult<Option<AgentDescriptor>> {
        Ok(self.inner.transport.lookup_agent(query).await?)
    }

    /// # Errors
    ///
    /// The transport error.
    pub async fn ping(&self) -> XalResult<()> {
        Ok(self.inner.transport.ping().await?)
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn status(&self, event_id: &EventId) -> XalResult<Option<EventStatus>> {
        self.inner.dispatcher.status(event_id)
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn internal_state(&self, event_id: &EventId) -> XalResult<Option<FactTree>> {
        self.inner.dispatcher.internal_state(event_id)
    }
}

/// An event built locally and not yet accepted by the registry.
#[derive(Debug, Clone)]
pub struct EventDraft {
    local_id: EventId,
    state: FactTree,
    source: AgentId,
    clock: Arc<dyn Clock>,
}

impl EventDraft {
    #[must_use]
    pub const fn local_id(&self) -> &EventId {
        &self.local_id
    }

    #[must_use]
    pub const fn state(&self) -> &FactTree {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut FactTree {
        &mut self.state
    }

    /// Writes a fact into the draft as the drafting agent.
    ///
    /// # Errors
    ///
    /// The `put` validation error.
    pub fn put(&mut self, path: &str, fact: impl Into<Fact>) -> XalResult<()> {
        let stamp = Stamp::new(self.source.clone(), self.clock.now());
        self.state.put(path, fact, &stamp)?;
        Ok(())
    }
}
