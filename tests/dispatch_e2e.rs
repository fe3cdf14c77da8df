use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use xal::{
    handler_fn, Agent, AgentConfig, DispatchError, EventId, EventStatus, FactTree, HandlerContext, Inbound,
    ManualClock, MemoryRegistry, RegistryOp, RegistryTransport, Stamp, Timestamp, XalError,
};

const WAIT: Duration = Duration::from_secs(5);

fn agent() -> (Agent, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry::new());
    let agent = Agent::with_clock(
        AgentConfig::new("dispatch-test"),
        Arc::clone(&registry) as Arc<dyn RegistryTransport>,
        Arc::new(ManualClock::new(1_000)),
    )
    .unwrap();
    (agent, registry)
}

fn snapshot(event: &str, path: &str, value: i64, millis: i64) -> FactTree {
    let mut tree = FactTree::new();
    tree.set_attribute("xi.event.id", event).unwrap();
    tree.put(path, value, &Stamp::new("peer", Timestamp::from_millis(millis)))
        .unwrap();
    tree
}

fn peer_value(state: &FactTree, path: &str) -> Option<i64> {
    state
        .leaf(path)?
        .iter()
        .find(|t| t.source.as_str() == "peer")
        .and_then(|t| t.value.as_int())
}

/// Handler harness that blocks each invocation until released.
struct Gate {
    active: AtomicUsize,
    calls: AtomicUsize,
    seen: Mutex<Vec<Option<i64>>>,
    started: mpsc::UnboundedSender<()>,
    release: Notify,
}

impl Gate {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
        let (started, started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Self {
            active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            started,
            release: Notify::new(),
        });
        (gate, started_rx)
    }

    fn install(self: &Arc<Self>, agent: &Agent, path: &'static str) {
        let gate = Arc::clone(self);
        agent
            .on(
                path,
                handler_fn(move |ctx: HandlerContext, mut state: FactTree| {
                    let gate = Arc::clone(&gate);
                    async move {
                        let overlapping = gate.active.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(overlapping, 0, "two rounds ran at once for one event");
                        gate.calls.fetch_add(1, Ordering::SeqCst);
                        gate.seen.lock().unwrap().push(peer_value(&state, path));
                        let _ = gate.started.send(());

                        gate.release.notified().await;

                        ctx.put(&mut state, "a.seen", true)?;
                        gate.active.fetch_sub(1, Ordering::SeqCst);
                        Ok(state)
                    }
                }),
            )
            .unwrap();
    }
}

#[tokio::test]
async fn handlers_run_in_registration_order_and_thread_state() {
    let (agent, registry) = agent();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (name, path) in [("A", "a.b"), ("B", "a")] {
        let log = Arc::clone(&log);
        agent
            .on(
                path,
                handler_fn(move |ctx: HandlerContext, mut state: FactTree| {
                    let log = Arc::clone(&log);
                    async move {
                        let saw_a = state.leaf("out.a").is_some();
                        log.lock().unwrap().push((name, saw_a));
                        ctx.put(&mut state, &format!("out.{}", name.to_lowercase()), true)?;
                        Ok(state)
                    }
                }),
            )
            .unwrap();
    }
    agent.start().await.unwrap();

    let outcome = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 1, pushed: true });
    assert_eq!(*log.lock().unwrap(), vec![("A", false), ("B", true)]);

    let pushed = registry.pushes(&EventId::from("e1")).unwrap();
    assert_eq!(pushed.len(), 1);
    assert!(pushed[0].leaf("out.a").is_some());
    assert!(pushed[0].leaf("out.b").is_some());
}

#[tokio::test]
async fn push_is_suppressed_when_handlers_restore_starting_state() {
    let (agent, registry) = agent();
    agent
        .on(
            "a.b",
            handler_fn(|_ctx: HandlerContext, _state: FactTree| async move { Ok(FactTree::new()) }),
        )
        .unwrap();

    let outcome = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 1, pushed: false });
    assert!(registry.pushes(&EventId::from("e1")).unwrap().is_empty());
    assert!(agent.internal_state(&EventId::from("e1")).unwrap().unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_during_round_is_queued_then_dispatched_once() {
    let (agent, registry) = agent();
    let (gate, mut started) = Gate::new();
    gate.install(&agent, "a.b");
    let event = EventId::from("e1");

    let first = agent.spawn_inbound(snapshot("e1", "a.b", 1, 1));
    timeout(WAIT, started.recv()).await.unwrap().unwrap();

    let queued = agent.handle_inbound(snapshot("e1", "a.b", 2, 2)).await.unwrap();
    assert_eq!(queued, Inbound::Queued);
    assert_eq!(agent.status(&event).unwrap(), Some(EventStatus::Dispatching));
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

    gate.release.notify_one();
    timeout(WAIT, started.recv()).await.unwrap().unwrap();
    gate.release.notify_one();

    let outcome = timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 2, pushed: true });
    assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
    assert_eq!(*gate.seen.lock().unwrap(), vec![Some(1), Some(2)]);

    let state = agent.internal_state(&event).unwrap().unwrap();
    assert_eq!(peer_value(&state, "a.b"), Some(2));
    assert!(state.leaf("a.seen").is_some());
    assert_eq!(registry.pushes(&event).unwrap().len(), 1);
    assert_eq!(agent.status(&event).unwrap(), Some(EventStatus::Idle));
}

#[tokio::test]
async fn queued_burst_coalesces_into_one_extra_round() {
    let (agent, _registry) = agent();
    let (gate, mut started) = Gate::new();
    gate.install(&agent, "a.b");

    let first = agent.spawn_inbound(snapshot("e1", "a.b", 1, 1));
    timeout(WAIT, started.recv()).await.unwrap().unwrap();

    for (value, millis) in [(2, 2), (4, 4), (3, 3)] {
        let outcome = agent.handle_inbound(snapshot("e1", "a.b", value, millis)).await.unwrap();
        assert_eq!(outcome, Inbound::Queued);
    }

    gate.release.notify_one();
    timeout(WAIT, started.recv()).await.unwrap().unwrap();
    gate.release.notify_one();

    let outcome = timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 2, pushed: true });
    // the freshest queued tuple wins regardless of arrival order
    assert_eq!(*gate.seen.lock().unwrap(), vec![Some(1), Some(4)]);
}

#[tokio::test]
async fn final_round_without_changes_pushes_nothing() {
    let (agent, registry) = agent();
    let (gate, mut started) = Gate::new();
    gate.install(&agent, "a.b");
    let event = EventId::from("e1");

    let first = agent.spawn_inbound(snapshot("e1", "a.b", 1, 1));
    timeout(WAIT, started.recv()).await.unwrap().unwrap();
    let queued = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap();
    assert_eq!(queued, Inbound::Queued);
    gate.release.notify_one();

    // the second round starts from the first round's result and matches nothing
    let outcome = timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 2, pushed: false });
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    assert!(registry.pushes(&event).unwrap().is_empty());
    assert_eq!(agent.status(&event).unwrap(), Some(EventStatus::Idle));
}

#[tokio::test]
async fn stale_snapshot_does_not_overwrite_fresher_state() {
    let (agent, registry) = agent();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    agent
        .on(
            "a.b",
            handler_fn(move |_ctx: HandlerContext, state: FactTree| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(state) }
            }),
        )
        .unwrap();
    let event = EventId::from("e1");

    agent.handle_inbound(snapshot("e1", "a.b", 5, 5)).await.unwrap();
    let outcome = agent.handle_inbound(snapshot("e1", "a.b", 3, 3)).await.unwrap();

    assert_eq!(outcome, Inbound::Settled { rounds: 1, pushed: false });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let state = agent.internal_state(&event).unwrap().unwrap();
    assert_eq!(peer_value(&state, "a.b"), Some(5));
    assert_eq!(registry.pushes(&event).unwrap().len(), 1);
}

#[tokio::test]
async fn handler_failure_wedges_the_event() {
    let (agent, registry) = agent();
    agent
        .on(
            "a.b",
            handler_fn(|_ctx: HandlerContext, _state: FactTree| async move { Err(XalError::handler("boom")) }),
        )
        .unwrap();
    let event = EventId::from("e1");

    let err = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap_err();
    match err {
        XalError::Dispatch(DispatchError::HandlerFailed { event_id, path, message }) => {
            assert_eq!(event_id, event);
            assert_eq!(path, "a.b");
            assert!(message.contains("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(agent.status(&event).unwrap(), Some(EventStatus::Wedged));

    let later = agent.handle_inbound(snapshot("e1", "a.b", 2, 2)).await.unwrap();
    assert_eq!(later, Inbound::Queued);
    assert!(registry.pushes(&event).unwrap().is_empty());

    let update = agent.update_event(&event, "a.c", 1).await.unwrap_err();
    assert!(matches!(update, XalError::Dispatch(DispatchError::Wedged { .. })));
}

#[tokio::test]
async fn distinct_events_dispatch_independently() {
    let (agent, _registry) = agent();
    let (gate, mut started) = Gate::new();
    gate.install(&agent, "slow.path");
    agent
        .on(
            "fast.path",
            handler_fn(|ctx: HandlerContext, mut state: FactTree| async move {
                ctx.put(&mut state, "fast.done", true)?;
                Ok(state)
            }),
        )
        .unwrap();

    let slow = agent.spawn_inbound(snapshot("slow", "slow.path", 1, 1));
    timeout(WAIT, started.recv()).await.unwrap().unwrap();

    let fast = timeout(WAIT, agent.handle_inbound(snapshot("fast", "fast.path", 1, 1)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fast, Inbound::Settled { rounds: 1, pushed: true });
    assert_eq!(
        agent.status(&EventId::from("slow")).unwrap(),
        Some(EventStatus::Dispatching)
    );

    gate.release.notify_one();
    let slow = timeout(WAIT, slow).await.unwrap().unwrap().unwrap();
    assert_eq!(slow, Inbound::Settled { rounds: 1, pushed: true });
}

#[tokio::test]
async fn push_failure_is_logged_not_retried() {
    let (agent, registry) = agent();
    agent
        .on(
            "a.b",
            handler_fn(|ctx: HandlerContext, mut state: FactTree| async move {
                ctx.put(&mut state, "a.reply", "ok")?;
                Ok(state)
            }),
        )
        .unwrap();
    registry.set_failing(RegistryOp::PushSnapshot, true).unwrap();
    let event = EventId::from("e1");

    let outcome = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap();
    assert_eq!(outcome, Inbound::Settled { rounds: 1, pushed: true });
    assert!(registry.event(&event).unwrap().is_none());
    assert!(agent.internal_state(&event).unwrap().unwrap().leaf("a.reply").is_some());

    registry.set_failing(RegistryOp::PushSnapshot, false).unwrap();
    let again = agent.handle_inbound(snapshot("e1", "a.b", 1, 1)).await.unwrap();
    assert_eq!(again, Inbound::Settled { rounds: 1, pushed: false });
    assert_eq!(registry.pushes(&event).unwrap().len(), 1);
}

#[tokio::test]
async fn reset_mid_round_abandons_the_burst() {
    let (agent, _registry) = agent();
    let (gate, mut started) = Gate::new();
    gate.install(&agent, "a.b");

    let first = agent.spawn_inbound(snapshot("e1", "a.b", 1, 1));
    timeout(WAIT, started.recv()).await.unwrap().unwrap();
    agent.dispatcher().reset().unwrap();
    gate.release.notify_one();

    let err = timeout(WAIT, first).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, XalError::Dispatch(DispatchError::UnknownEvent { .. })));
    assert!(agent.dispatcher().is_empty().unwrap());
}
