//! Integration tests for dispatch ordering and ids.

use dispatch_rs::engine::{Engine, Handle};
use dispatch_rs::event::EventKind;
use dispatch_rs::model::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn test_engine() -> Engine {
    Engine::start().expect("failed to start engine")
}

/// An event that reports `label` on the channel when it runs.
fn record(tx: &Sender<String>, label: &str) -> NewEvent {
    let tx = tx.clone();
    let label = label.to_string();
    let tag = label.clone();
    NewEvent::new(move || {
        let _ = tx.send(label.clone());
        EventStatus::OneShot
    })
    .tag(tag)
}

fn collect(rx: &Receiver<String>, n: usize) -> Vec<String> {
    (0..n)
        .map(|_| rx.recv_timeout(WAIT).expect("event did not fire"))
        .collect()
}

// ---------------------------------------------------------------------------
// Idle queue
// ---------------------------------------------------------------------------

#[test]
fn idle_events_fire_in_insertion_order() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();

    let labels: Vec<String> = (0..20).map(|n| format!("e{n}")).collect();
    for label in &labels {
        engine.idle_add(record(&tx, label));
    }

    assert_eq!(collect(&rx, labels.len()), labels);
}

#[test]
fn idle_ids_start_after_zero_and_increase() {
    let engine = test_engine();
    let ids: Vec<EventId> = (0..3)
        .map(|_| engine.idle_add(NewEvent::new(|| EventStatus::OneShot)))
        .collect();

    assert_eq!(ids, vec![EventId(1), EventId(2), EventId(3)]);
}

#[test]
fn continue_status_still_runs_once() {
    let engine = test_engine();
    let runs = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let counter = Arc::clone(&runs);
    engine.idle_add(NewEvent::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        EventStatus::Continue
    }));
    engine.idle_add(record(&tx, "after"));

    collect(&rx, 1);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(engine.pending().is_empty());
}

// ---------------------------------------------------------------------------
// Timed queue
// ---------------------------------------------------------------------------

/// Timed ids come from their own range and can be passed to `remove_by_id`.
#[test]
fn timed_add_returns_real_id_instead_of_sentinel() {
    let engine = test_engine();
    let far = Instant::now() + Duration::from_secs(60);

    let first = engine.timed_add(NewEvent::new(|| EventStatus::OneShot), far);
    let second = engine.timed_add(NewEvent::new(|| EventStatus::OneShot), far);

    assert_eq!(first, EventId(TIMED_ID_BASE));
    assert_eq!(second, EventId(TIMED_ID_BASE + 1));
    assert_eq!(
        engine.remove_by_id(second).map(|r| r.queue),
        Some(QueueKind::Timed)
    );
}

#[test]
fn unrepresentable_delay_is_clamped_instead_of_panicking() {
    let engine = test_engine();

    let id = engine.timed_add_after(NewEvent::new(|| EventStatus::OneShot), Duration::MAX);

    assert!(id.is_timed_range());
    assert_eq!(engine.pending(), Pending { idle: 0, timed: 1 });
    assert_eq!(engine.remove_by_id(id).map(|r| r.queue), Some(QueueKind::Timed));
}

#[test]
fn earlier_deadline_fires_first_regardless_of_call_order() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();
    let now = Instant::now();

    engine.timed_add(record(&tx, "b"), now + Duration::from_millis(300));
    engine.timed_add(record(&tx, "a"), now + Duration::from_millis(100));

    assert_eq!(collect(&rx, 2), vec!["a", "b"]);
}

#[test]
fn equal_deadlines_fire_in_insertion_order() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();
    let at = Instant::now() + Duration::from_millis(150);

    let labels: Vec<String> = (0..5).map(|n| format!("same{n}")).collect();
    for label in &labels {
        engine.timed_add(record(&tx, label), at);
    }

    assert_eq!(collect(&rx, labels.len()), labels);
}

#[test]
fn past_deadline_fires_on_next_pass() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();

    engine.timed_add(record(&tx, "late"), Instant::now());

    assert_eq!(collect(&rx, 1), vec!["late"]);
}

#[test]
fn timed_events_do_not_fire_before_their_deadline() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();
    let deadline = Instant::now() + Duration::from_millis(200);

    engine.timed_add(
        NewEvent::new(move || {
            let _ = tx.send(Instant::now());
            EventStatus::OneShot
        }),
        deadline,
    );

    let fired = rx.recv_timeout(WAIT).expect("timed event did not fire");
    assert!(fired >= deadline);
}

#[test]
fn idle_order_is_not_disturbed_by_timed_activity() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();
    let now = Instant::now();

    for n in 0..10 {
        engine.idle_add(record(&tx, &format!("idle{n}")));
        engine.timed_add(
            record(&tx, &format!("timed{n}")),
            now + Duration::from_millis(10 * n),
        );
    }

    let fired = collect(&rx, 20);
    let idle: Vec<&String> = fired.iter().filter(|l| l.starts_with("idle")).collect();
    let timed: Vec<&String> = fired.iter().filter(|l| l.starts_with("timed")).collect();
    let expected_idle: Vec<String> = (0..10).map(|n| format!("idle{n}")).collect();
    let expected_timed: Vec<String> = (0..10).map(|n| format!("timed{n}")).collect();

    assert_eq!(idle, expected_idle.iter().collect::<Vec<_>>());
    assert_eq!(timed, expected_timed.iter().collect::<Vec<_>>());
}

#[test]
fn migration_moves_event_under_a_fresh_idle_id() {
    let engine = test_engine();
    let events = engine.subscribe();
    let (tx, rx) = mpsc::channel();

    let timed_id = engine.timed_add_after(record(&tx, "m"), Duration::from_millis(50));
    collect(&rx, 1);

    let migrated = events
        .iter()
        .find_map(|e| match e.kind {
            EventKind::Migrated {
                timed_id,
                idle_id,
                tag,
            } => Some((timed_id, idle_id, tag)),
            _ => None,
        })
        .expect("no migration event");

    assert_eq!(migrated.0, timed_id);
    assert!(!migrated.1.is_timed_range());
    assert_eq!(migrated.2, "m");
}

#[test]
fn idle_and_timed_ids_never_collide() {
    let engine = test_engine();
    let far = Instant::now() + Duration::from_secs(60);
    let mut seen = HashSet::new();

    for _ in 0..1000 {
        assert!(seen.insert(engine.idle_add(NewEvent::new(|| EventStatus::OneShot))));
        assert!(seen.insert(engine.timed_add(NewEvent::new(|| EventStatus::OneShot), far)));
    }

    assert_eq!(seen.len(), 2000);
}

// ---------------------------------------------------------------------------
// Reentrancy
// ---------------------------------------------------------------------------

#[test]
fn actions_can_add_and_remove_through_a_handle() {
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();
    let handle: Handle = engine.handle();

    let (go_tx, go_rx) = mpsc::channel::<()>();
    let inner_tx = tx.clone();
    let outer_tx = tx.clone();
    engine.idle_add(NewEvent::new(move || {
        // Wait until the victim is queued behind us.
        let _ = go_rx.recv_timeout(WAIT);
        let _ = outer_tx.send("outer".to_string());
        handle.remove_by_tag("victim");
        handle.idle_add(record(&inner_tx, "inner"));
        EventStatus::OneShot
    }));
    engine.idle_add(record(&tx, "victim"));
    go_tx.send(()).unwrap();

    assert_eq!(collect(&rx, 2), vec!["outer", "inner"]);
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// The walkthrough from the demo binary, at a quarter of its real pace.
#[test]
fn ordering_cancellation_and_in_flight_scenario() {
    let unit = Duration::from_millis(250);
    let engine = test_engine();
    let (tx, rx) = mpsc::channel();

    // t1 fires once after one unit.
    engine.timed_add(record(&tx, "t1"), Instant::now() + unit);
    std::thread::sleep(2 * unit);
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["t1"]);

    // t3 is added second with the earlier deadline and fires first.
    let now = Instant::now();
    engine.timed_add(record(&tx, "t2"), now + 2 * unit);
    engine.timed_add(record(&tx, "t3"), now + unit);
    std::thread::sleep(3 * unit);
    assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["t3", "t2"]);

    // t4 is removed before its deadline.
    engine.timed_add(record(&tx, "t4"), Instant::now() + unit);
    assert!(engine.remove_by_tag("t4").is_some());
    std::thread::sleep(2 * unit);
    assert!(rx.try_iter().next().is_none());

    // t5 is already running when it is removed, so it completes.
    let (started_tx, started_rx) = mpsc::channel();
    let t5_tx = tx.clone();
    engine.idle_add(
        NewEvent::new(move || {
            let _ = started_tx.send(());
            std::thread::sleep(unit);
            let _ = t5_tx.send("t5".to_string());
            EventStatus::OneShot
        })
        .tag("t5"),
    );
    started_rx.recv_timeout(WAIT).expect("t5 never started");
    engine.idle_add(record(&tx, "t6"));
    assert!(engine.remove_by_tag("t5").is_none());

    assert_eq!(collect(&rx, 2), vec!["t5", "t6"]);
}
