//! Per-event dispatch.
//!
//! Each event id has one [`EventRecord`]. A snapshot arriving while the event
//! is idle starts a dispatch burst: rounds run back to back until no snapshot
//! is waiting, then the record returns to idle and the final state is pushed
//! upstream if the last round changed it. A snapshot
//! arriving mid-burst is merged into the waiting slot and picked up by the
//! next round, so at most one round per event is ever in flight.
//!
//! Rounds run in a loop rather than by re-entry, so bursts do not grow the
//! stack. Distinct events dispatch independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::certainty::{EventId, IdentityCell};
use crate::detect;
use crate::error::{lock_err, DispatchError, XalError, XalResult};
use crate::merge::merge;
use crate::subscription::{HandlerContext, SubscriptionRegistry};
use crate::time::Clock;
use crate::transport::RegistryTransport;
use crate::tree::FactTree;

/// Where an event's record stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// No round in flight.
    Idle,
    /// A round is running; new snapshots queue.
    Dispatching,
    /// A handler failed. The record never leaves this state and later
    /// snapshots queue without being dispatched.
    Wedged,
}

/// Outcome of handing a snapshot to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// A round was already in flight; the snapshot waits for it.
    Queued,
    /// This call drove the event back to idle.
    Settled {
        /// Rounds run during the burst, including re-dispatches of snapshots
        /// that arrived mid-burst.
        rounds: usize,
        /// Whether a push was attempted. Push failures are logged, not
        /// reported here.
        pushed: bool,
    },
}

/// Dispatch state for one event.
#[derive(Debug, Clone)]
pub struct EventRecord {
    event_id: EventId,
    internal_state: FactTree,
    pending_state: Option<FactTree>,
    processing: bool,
    wedged: bool,
    rounds: u64,
    generation: u64,
}

impl EventRecord {
    fn new(event_id: EventId, generation: u64) -> Self {
        Self {
            event_id,
            internal_state: FactTree::new(),
            pending_state: None,
            processing: false,
            wedged: false,
            rounds: 0,
            generation,
        }
    }

    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    #[must_use]
    pub const fn internal_state(&self) -> &FactTree {
        &self.internal_state
    }

    #[must_use]
    pub const fn pending_state(&self) -> Option<&FactTree> {
        self.pending_state.as_ref()
    }

    #[must_use]
    pub const fn is_processing(&self) -> bool {
        self.processing
    }

    /// Rounds run over the record's lifetime.
    #[must_use]
    pub const fn rounds(&self) -> u64 {
        self.rounds
    }

    #[must_use]
    pub const fn status(&self) -> EventStatus {
        match (self.processing, self.wedged) {
            (_, true) => EventStatus::Wedged,
            (true, false) => EventStatus::Dispatching,
            (false, false) => EventStatus::Idle,
        }
    }

    /// Folds `snapshot` into the waiting slot: first over any snapshot
    /// already waiting, then over the internal state.
    fn enqueue(&mut self, snapshot: FactTree) {
        let queued = match self.pending_state.take() {
            Some(waiting) => merge(&waiting, &snapshot),
            None => snapshot,
        };
        self.pending_state = Some(merge(&self.internal_state, &queued));
    }
}

/// Decides whether a record is kept once it returns to idle.
pub trait RetentionPolicy: Send + Sync + fmt::Debug {
    /// `false` evicts the record. A later snapshot for the same event then
    /// starts from an empty internal state.
    fn retain(&self, record: &EventRecord) -> bool;
}

/// Keeps every record for the life of the process.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainAll;

impl RetentionPolicy for RetainAll {
    fn retain(&self, _record: &EventRecord) -> bool {
        true
    }
}

/// Drops a record as soon as it returns to idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictWhenIdle;

impl RetentionPolicy for EvictWhenIdle {
    fn retain(&self, _record: &EventRecord) -> bool {
        false
    }
}

type Records = HashMap<EventId, EventRecord>;

/// Owns every event record and runs dispatch rounds.
#[derive(Debug)]
pub struct EventDispatcher {
    records: Mutex<Records>,
    subscriptions: Arc<SubscriptionRegistry>,
    transport: Arc<dyn RegistryTransport>,
    clock: Arc<dyn Clock>,
    identity: Arc<IdentityCell>,
    retention: Box<dyn RetentionPolicy>,
    generations: AtomicU64,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(
        subscriptions: Arc<SubscriptionRegistry>,
        transport: Arc<dyn RegistryTransport>,
        clock: Arc<dyn Clock>,
        identity: Arc<IdentityCell>,
    ) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            subscriptions,
            transport,
            clock,
            identity,
            retention: Box::new(RetainAll),
            generations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_retention(mut self, policy: impl RetentionPolicy + 'static) -> Self {
        self.retention = Box::new(policy);
        self
    }

    fn records(&self) -> XalResult<MutexGuard<'_, Records>> {
        self.records.lock().map_err(|_| lock_err("event records"))
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands a snapshot for `event_id` to the dispatcher.
    ///
    /// Creates the record on first sight. Returns [`Inbound::Queued`] at once
    /// when a round is already in flight; otherwise drives rounds until the
    /// event is idle again.
    ///
    /// # Errors
    ///
    /// `DispatchError::HandlerFailed` when a handler fails (the record is
    /// wedged), `DispatchError::UnknownEvent` when the record was reset away
    /// mid-burst, `Internal` on a poisoned lock.
    pub async fn inbound(&self, event_id: EventId, snapshot: FactTree) -> XalResult<Inbound> {
        debug!(event_id = %event_id, digest = %snapshot.short_digest(), "inbound snapshot");
        let generation = {
            let mut records = self.records()?;
            let record = records
                .entry(event_id.clone())
                .or_insert_with(|| EventRecord::new(event_id.clone(), self.next_generation()));
            record.enqueue(snapshot);
            if record.processing {
                debug!(event_id = %event_id, wedged = record.wedged, "snapshot queued behind in-flight round");
                return Ok(Inbound::Queued);
            }
            record.processing = true;
            record.generation
        };
        self.drive(&event_id, generation).await
    }

    async fn drive(&self, event_id: &EventId, generation: u64) -> XalResult<Inbound> {
        let mut rounds = 0usize;
        loop {
            let (current, target) = {
                let mut records = self.records()?;
                let record = live_record(&mut records, event_id, generation)?;
                let target = record
                    .pending_state
                    .take()
                    .ok_or_else(|| XalError::internal(format!("no pending snapshot for {event_id}")))?;
                record.rounds += 1;
                (record.internal_state.clone(), target)
            };
            rounds += 1;
            self.run_round(event_id, generation, rounds, &current, target).await?;

            let settled = {
                let mut records = self.records()?;
                let record = live_record(&mut records, event_id, generation)?;
                if let Some(waiting) = record.pending_state.take() {
                    record.pending_state = Some(merge(&record.internal_state, &waiting));
                    debug!(event_id = %event_id, round = rounds, "snapshot arrived mid-round; dispatching again");
                    None
                } else {
                    record.processing = false;
                    // compared against the last round's starting state only
                    let push = (record.internal_state != current).then(|| record.internal_state.clone());
                    if !self.retention.retain(record) {
                        records.remove(event_id);
                        debug!(event_id = %event_id, "record evicted");
                    }
                    Some(push)
                }
            };

            if let Some(push) = settled {
                let pushed = push.is_some();
                match push {
                    Some(state) => self.push(event_id, &state).await,
                    None => debug!(event_id = %event_id, "push suppressed; state unchanged"),
                }
                return Ok(Inbound::Settled { rounds, pushed });
            }
        }
    }

    async fn run_round(
        &self,
        event_id: &EventId,
        generation: u64,
        round: usize,
        current: &FactTree,
        target: FactTree,
    ) -> XalResult<()> {
        let subscriptions = self.subscriptions.snapshot()?;
        let triggered = detect::matched(current, &target, &subscriptions);
        debug!(
            event_id = %event_id,
            round,
            matched = ?triggered.iter().map(|s| s.path().as_str()).collect::<Vec<_>>(),
            "round begin"
        );
        if triggered.is_empty() {
            return Ok(());
        }

        let agent_id = self.identity.current();
        let mut state = target;
        for subscription in triggered {
            let ctx = HandlerContext::new(
                event_id.clone(),
                subscription.path().clone(),
                agent_id.clone(),
                Arc::clone(&self.clock),
            );
            state = match subscription.handler().handle(ctx, state).await {
                Ok(next) => next,
                Err(err) => {
                    self.wedge(event_id, generation)?;
                    error!(
                        event_id = %event_id,
                        path = %subscription.path(),
                        error = %err,
                        "handler failed; event is wedged"
                    );
                    return Err(DispatchError::HandlerFailed {
                        event_id: event_id.clone(),
                        path: subscription.path().to_string(),
                        message: err.to_string(),
                    }
                    .into());
                }
            };
            {
                let mut records = self.records()?;
                live_record(&mut records, event_id, generation)?.internal_state = state.clone();
            }
        }
        Ok(())
    }

    fn wedge(&self, event_id: &EventId, generation: u64) -> XalResult<()> {
        let mut records = self.records()?;
        live_record(&mut records, event_id, generation)?.wedged = true;
        Ok(())
    }

    async fn push(&self, event_id: &EventId, state: &FactTree) {
        match self.transport.push_snapshot(event_id, state).await {
            Ok(()) => info!(event_id = %event_id, digest = %state.short_digest(), "pushed snapshot"),
            Err(err) => warn!(event_id = %event_id, error = %err, "push failed; not retried"),
        }
    }

    /// Stores an idle record whose internal state is `state`, replacing any
    /// record under the same id.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn park(&self, event_id: EventId, state: FactTree) -> XalResult<()> {
        let mut record = EventRecord::new(event_id.clone(), self.next_generation());
        record.internal_state = state;
        self.records()?.insert(event_id, record);
        Ok(())
    }

    /// Moves the record at `from` to `to` with `state` as its internal state.
    ///
    /// If a record already exists under `to` (the registry echoed the event
    /// before this call), that record wins and the one at `from` is dropped.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn rekey(&self, from: &EventId, to: EventId, state: FactTree) -> XalResult<()> {
        let generation = self.next_generation();
        let mut records = self.records()?;
        records.remove(from);
        records.entry(to.clone()).or_insert_with(|| {
            let mut record = EventRecord::new(to, generation);
            record.internal_state = state;
            record
        });
        Ok(())
    }

    /// Applies `edit` to an event's internal state and returns the result.
    ///
    /// # Errors
    ///
    /// `UnknownEvent` with no record, `Wedged` for a wedged record, or
    /// whatever `edit` returns (the state is left untouched in that case).
    pub fn update<F>(&self, event_id: &EventId, edit: F) -> XalResult<FactTree>
    where
        F: FnOnce(&mut FactTree) -> XalResult<()>,
    {
        let mut records = self.records()?;
        let record = records.get_mut(event_id).ok_or_else(|| DispatchError::UnknownEvent {
            event_id: event_id.clone(),
        })?;
        if record.wedged {
            return Err(DispatchError::Wedged {
                event_id: event_id.clone(),
            }
            .into());
        }
        let mut next = record.internal_state.clone();
        edit(&mut next)?;
        record.internal_state = next.clone();
        Ok(next)
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn status(&self, event_id: &EventId) -> XalResult<Option<EventStatus>> {
        Ok(self.records()?.get(event_id).map(EventRecord::status))
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn internal_state(&self, event_id: &EventId) -> XalResult<Option<FactTree>> {
        Ok(self.records()?.get(event_id).map(|r| r.internal_state.clone()))
    }

    /// A copy of the whole record.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn record(&self, event_id: &EventId) -> XalResult<Option<EventRecord>> {
        Ok(self.records()?.get(event_id).cloned())
    }

    /// Known event ids, sorted.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn event_ids(&self) -> XalResult<Vec<EventId>> {
        let mut ids: Vec<EventId> = self.records()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn len(&self) -> XalResult<usize> {
        Ok(self.records()?.len())
    }

    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn is_empty(&self) -> XalResult<bool> {
        Ok(self.records()?.is_empty())
    }

    /// Drops every record. Bursts still in flight fail with `UnknownEvent`
    /// at their next step rather than touching records created afterwards.
    ///
    /// # Errors
    ///
    /// `Internal` on a poisoned lock.
    pub fn reset(&self) -> XalResult<()> {
        self.records()?.clear();
        Ok(())
    }
}

fn live_record<'a>(records: &'a mut Records, event_id: &EventId, generation: u64) -> XalResult<&'a mut EventRecord> {
    records
        .get_mut(event_id)
        .filter(|r| r.generation == generation)
        .ok_or_else(|| {
            DispatchError::UnknownEvent {
                event_id: event_id.clone(),
            }
            .into()
        })
}
