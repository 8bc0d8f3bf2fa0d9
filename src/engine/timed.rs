//! Timed queue: future events sorted by deadline, and the dispatcher that
//! migrates them into the idle queue as they expire.
//!
//! Only the head's deadline decides how long the dispatcher sleeps, so the
//! queue wakes it whenever the head changes: an insertion at position 0 or
//! the removal of the current head.

use std::collections::VecDeque;
use std::time::Instant;

use opentelemetry::KeyValue;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use super::Shared;
use crate::event::EventKind;
use crate::model::{EventId, NewEvent, QueueKind, TIMED_ID_BASE, TimedEvent};
use crate::telemetry::metrics;

pub(super) struct TimedQueue {
    state: Mutex<TimedState>,
    head_changed: Condvar,
}

struct TimedState {
    events: VecDeque<TimedEvent>,
    next_id: u32,
    closed: bool,
}

/// Where a record due at `deadline` goes: before the first record due
/// strictly later, so equal deadlines keep insertion order.
fn insertion_point(events: &VecDeque<TimedEvent>, deadline: Instant) -> usize {
    events
        .iter()
        .position(|e| deadline < e.deadline)
        .unwrap_or(events.len())
}

impl TimedQueue {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(TimedState {
                events: VecDeque::new(),
                next_id: TIMED_ID_BASE,
                closed: false,
            }),
            head_changed: Condvar::new(),
        }
    }

    /// Insert in deadline order. Wakes the dispatcher only if the new
    /// record became the head. A closed queue hands the event back.
    pub(super) fn insert(
        &self,
        event: NewEvent,
        deadline: Instant,
    ) -> (EventId, Option<NewEvent>) {
        let mut state = self.lock();
        let id = EventId(state.next_id);
        state.next_id = state.next_id.wrapping_add(1);
        if state.closed {
            return (id, Some(event));
        }

        let at = insertion_point(&state.events, deadline);
        state.events.insert(
            at,
            TimedEvent {
                deadline,
                id,
                tag: event.tag,
                action: event.action,
            },
        );
        if at == 0 {
            self.head_changed.notify_one();
        }
        (id, None)
    }

    pub(super) fn remove_first(
        &self,
        matches: impl Fn(EventId, &str) -> bool,
    ) -> Option<TimedEvent> {
        let mut state = self.lock();
        let at = state.events.iter().position(|e| matches(e.id, &e.tag))?;
        let removed = state.events.remove(at);
        if at == 0 {
            self.head_changed.notify_one();
        }
        removed
    }

    pub(super) fn remove_all(&self, matches: impl Fn(EventId, &str) -> bool) -> Vec<TimedEvent> {
        let mut state = self.lock();
        let head = state.events.front().map(|e| e.id);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.events)
            .into_iter()
            .partition(|e| matches(e.id, &e.tag));
        state.events = kept.into();
        if state.events.front().map(|e| e.id) != head {
            self.head_changed.notify_one();
        }
        removed
    }

    pub(super) fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Close the queue, empty it, and wake the dispatcher so it can observe
    /// shutdown.
    pub(super) fn close(&self) -> Vec<TimedEvent> {
        let mut state = self.lock();
        state.closed = true;
        let drained = state.events.drain(..).collect();
        self.head_changed.notify_all();
        drained
    }

    fn lock(&self) -> MutexGuard<'_, TimedState> {
        self.state.lock()
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<EventId> {
        self.lock().events.iter().map(|e| e.id).collect()
    }
}

impl Shared {
    pub(super) fn timed_add(&self, event: NewEvent, deadline: Instant) -> EventId {
        let tag = event.tag.clone();
        let (id, refused) = self.timed.insert(event, deadline);
        if let Some(event) = refused {
            self.refuse(id, event, QueueKind::Timed);
            return id;
        }
        let delay_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
        debug!(%id, %tag, delay_ms, "timed event queued");
        metrics::events_added().add(1, &[KeyValue::new("queue", "timed")]);
        self.bus.emit(EventKind::TimedQueued { id, tag, delay_ms });
        id
    }

    /// Move an expired timed record into the idle queue under a fresh id.
    fn migrate(&self, expired: TimedEvent) {
        let timed_id = expired.id;
        let new = expired.into_new_event();
        let tag = new.tag.clone();
        let (idle_id, refused) = self.idle.push(new);
        if let Some(event) = refused {
            self.refuse(idle_id, event, QueueKind::Idle);
            return;
        }
        debug!(%timed_id, %idle_id, %tag, "timed event expired");
        metrics::events_migrated().add(1, &[]);
        self.bus.emit(EventKind::Migrated {
            timed_id,
            idle_id,
            tag,
        });
    }
}

/// Timed dispatcher loop.
///
/// Sleeps until the head's deadline, re-reading the head after every
/// wakeup; a wakeup may mean a new head, a removed head, shutdown, or
/// nothing at all.
pub(super) fn run_dispatcher(shared: &Shared) {
    debug!("timed dispatcher started");
    let queue = &shared.timed;
    let mut state = queue.lock();
    loop {
        while shared.is_running() && state.events.is_empty() {
            queue.head_changed.wait(&mut state);
        }
        if !shared.is_running() {
            break;
        }
        let Some(deadline) = state.events.front().map(|e| e.deadline) else {
            continue;
        };

        let now = Instant::now();
        if deadline <= now {
            let Some(expired) = state.events.pop_front() else {
                continue;
            };
            // The idle queue has its own lock; never nest it inside ours.
            MutexGuard::unlocked(&mut state, || shared.migrate(expired));
        } else {
            queue.head_changed.wait_for(&mut state, deadline - now);
        }
    }
    debug!("timed dispatcher stopped");
}
