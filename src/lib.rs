//! # xal - client-side agent runtime
//!
//! An agent exchanges probabilistic facts about shared conversational events
//! with a central registry. Every event is a [`FactTree`]: a hierarchy of
//! dotted paths whose leaves hold one [`Tuple`] (value, certainty, timestamp)
//! per source.
//!
//! ## Core Concepts
//!
//! - **FactTree**: the snapshot of one event; leaves are per-source tuples
//! - **Merge**: incoming-snapshot-dominant per path, freshest tuple per source wins
//! - **Subscription**: a path plus a [`Handler`]; registration order is dispatch order
//! - **EventDispatcher**: one record per event, at most one round in flight, queued
//!   snapshots merged and re-dispatched, upstream push only when state changed
//! - **Agent**: the per-agent context tying identity, subscriptions and records
//!   to a [`RegistryTransport`]
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use xal::{handler_fn, Agent, AgentConfig, FactTree, HandlerContext, MemoryRegistry, Stamp, Timestamp};
//!
//! # #[tokio::main]
//! # async fn main() -> xal::XalResult<()> {
//! let registry = Arc::new(MemoryRegistry::new());
//! let agent = Agent::new(AgentConfig::new("greeter"), registry.clone())?;
//!
//! agent.on("xi.event.input.text", handler_fn(|ctx: HandlerContext, mut state: FactTree| async move {
//!     ctx.put(&mut state, "xi.event.output.text", "hello!")?;
//!     Ok(state)
//! }))?;
//! agent.start().await?;
//!
//! let mut snapshot = FactTree::new();
//! snapshot.set_attribute("xi.event.id", "event-1")?;
//! snapshot.put("xi.event.input.text", "hi", &Stamp::new("asr", Timestamp::from_millis(1)))?;
//! agent.handle_inbound(snapshot).await?;
//!
//! let pushed = registry.pushes(&"event-1".into())?;
//! assert_eq!(pushed.len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod certainty;
pub mod error;
pub mod time;
pub mod tuple;
pub mod value;

// Trees and reconciliation
pub mod detect;
pub mod merge;
pub mod tree;

// Dispatch
pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod subscription;
pub mod transport;

// Re-export primary types at crate root for convenience
pub use agent::{Agent, EventDraft};
pub use certainty::{AgentId, Certainty, EventId, IdentityCell};
pub use config::{AgentConfig, RetentionMode, DEFAULT_EVENT_ID_PATH};
pub use dispatcher::{EventDispatcher, EventRecord, EventStatus, EvictWhenIdle, Inbound, RetainAll, RetentionPolicy};
pub use error::{DispatchError, TransportError, ValidationError, XalError, XalResult};
pub use subscription::{handler_fn, FnHandler, Handler, HandlerContext, Subscription, SubscriptionId, SubscriptionRegistry};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};
pub use transport::{AgentDescriptor, AgentQuery, MemoryRegistry, RegistryCall, RegistryOp, RegistryTransport};
pub use tree::{FactPath, FactTree, Node};
pub use tuple::{Claim, Fact, Stamp, Tuple};
pub use value::Scalar;
