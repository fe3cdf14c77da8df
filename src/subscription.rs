//! Handlers and the ordered subscription list.
//!
//! A [`Handler`] receives the round's current state and returns the updated
//! state. Returning is the single hand-back to the dispatcher, so a handler
//! cannot continue twice or forget to continue. Registration order is
//! dispatch order.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::certainty::{AgentId, EventId};
use crate::error::{lock_err, XalResult};
use crate::time::Clock;
use crate::tree::{FactPath, FactTree};
use crate::tuple::{Fact, Stamp};

/// Reacts to a change at a subscribed path.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the next state from `state`.
    ///
    /// An `Err` aborts the round and wedges the event.
    async fn handle(&self, ctx: HandlerContext, state: FactTree) -> XalResult<FactTree>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps an async closure as a [`Handler`].
///
/// # Examples
///
/// ```
/// use xal::{handler_fn, FactTree, HandlerContext, XalResult};
///
/// let handler = handler_fn(|ctx: HandlerContext, mut state: FactTree| async move {
///     ctx.put(&mut state, "xi.event.reply", "ack")?;
///     XalResult::Ok(state)
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(HandlerContext, FactTree) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = XalResult<FactTree>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(HandlerContext, FactTree) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = XalResult<FactTree>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, state: FactTree) -> XalResult<FactTree> {
        (self.0)(ctx, state).await
    }
}

/// What a handler knows about the invocation it is serving.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    event_id: EventId,
    path: FactPath,
    agent_id: AgentId,
    clock: Arc<dyn Clock>,
}

impl HandlerContext {
    #[must_use]
    pub fn new(event_id: EventId, path: FactPath, agent_id: AgentId, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                event_id,
                path,
                agent_id,
                clock,
            }),
        }
    }

    #[must_use]
    pub fn event_id(&self) -> &EventId {
        &self.inner.event_id
    }

    /// The subscription path that triggered this invocation.
    #[must_use]
    pub fn path(&self) -> &FactPath {
        &self.inner.path
    }

    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.inner.agent_id
    }

    /// This agent, now.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp::new(self.inner.agent_id.clone(), self.inner.clock.now())
    }

    /// Writes a fact into `tree` as this agent.
    ///
    /// # Errors
    ///
    /// Propagates the `ValidationError` from [`FactTree::put`].
    pub fn put(&self, tree: &mut FactTree, path: &str, fact: impl Into<Fact>) -> XalResult<()> {
        tree.put(path, fact, &self.stamp())?;
        Ok(())
    }
}

/// Identifier for a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A path paired with the handler that reacts to changes there.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    path: FactPath,
    handler: Arc<dyn Handler>,
}

impl Subscription {
    #[must_use]
    pub fn new(path: FactPath, handler: Arc<dyn Handler>) -> Self {
        Self {
            id: SubscriptionId::new(),
            path,
            handler,
        }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    #[must_use]
    pub const fn path(&self) -> &FactPath {
        &self.path
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Append-only, ordered list of subscriptions.
///
/// Reads take a snapshot so that dispatch never holds the lock across a
/// handler invocation.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscription. Overlapping and duplicate paths are allowed.
    ///
    /// # Errors
    ///
    /// `InvalidPath` for a malformed path; `Internal` on a poisoned lock.
    pub fn register(&self, path: &str, handler: Arc<dyn Handler>) -> XalResult<SubscriptionId> {
        let subscription = Subscription::new(FactPath::parse(path)?, handler);
        let id = subscription.id();
        self.entries
            .write()
            .map_err(|_| lock_err("subscription registry"))?
            .push(subscription);
        Ok(id)
    }

    /// The subscriptions in registration order.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn snapshot(&self) -> XalResult<Vec<Subscription>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| lock_err("subscription registry"))?
            .clone())
    }

    /// Registered paths in registration order, duplicates included.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn paths(&self) -> XalResult<Vec<FactPath>> {
        Ok(self
            .entries
            .read()
            .map_err(|_| lock_err("subscription registry"))?
            .iter()
            .map(|s| s.path().clone())
            .collect())
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn len(&self) -> XalResult<usize> {
        Ok(self
            .entries
            .read()
            .map_err(|_| lock_err("subscription registry"))?
            .len())
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn is_empty(&self) -> XalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drops every subscription.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn reset(&self) -> XalResult<()> {
        self.entries
            .write()
            .map_err(|_| lock_err("subscription registry"))?
            .clear();
        Ok(())
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("len", &self.len().unwrap_or_default())
            .finish()
    }
}
