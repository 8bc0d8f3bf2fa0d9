//! Idle queue: ready-to-run events in FIFO order, and the dispatcher that
//! drains it.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use opentelemetry::KeyValue;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error};

use super::Shared;
use crate::event::EventKind;
use crate::model::{EventId, EventStatus, IDLE_ID_BASE, IdleEvent, NewEvent, QueueKind};
use crate::telemetry::dispatch::{record_outcome, start_dispatch_span};
use crate::telemetry::metrics;

pub(super) struct IdleQueue {
    state: Mutex<IdleState>,
    ready: Condvar,
}

struct IdleState {
    events: VecDeque<IdleEvent>,
    last_id: u32,
    closed: bool,
}

impl IdleQueue {
    pub(super) fn new() -> Self {
        Self::starting_at(IDLE_ID_BASE)
    }

    fn starting_at(last_id: u32) -> Self {
        Self {
            state: Mutex::new(IdleState {
                events: VecDeque::new(),
                last_id,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append to the tail and wake the dispatcher.
    ///
    /// Once the queue is closed the id is still minted, but the event is
    /// handed back so the caller can drop it outside the lock.
    pub(super) fn push(&self, event: NewEvent) -> (EventId, Option<NewEvent>) {
        let mut state = self.lock();
        state.last_id = state.last_id.wrapping_add(1);
        let id = EventId(state.last_id);
        if state.closed {
            return (id, Some(event));
        }
        state.events.push_back(IdleEvent {
            id,
            tag: event.tag,
            action: event.action,
        });
        self.ready.notify_one();
        (id, None)
    }

    /// Take out the first record that matches, front to back.
    pub(super) fn remove_first(
        &self,
        matches: impl Fn(EventId, &str) -> bool,
    ) -> Option<IdleEvent> {
        let mut state = self.lock();
        let at = state.events.iter().position(|e| matches(e.id, &e.tag))?;
        state.events.remove(at)
    }

    pub(super) fn remove_all(&self, matches: impl Fn(EventId, &str) -> bool) -> Vec<IdleEvent> {
        let mut state = self.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.events)
            .into_iter()
            .partition(|e| matches(e.id, &e.tag));
        state.events = kept.into();
        removed
    }

    pub(super) fn len(&self) -> usize {
        self.lock().events.len()
    }

    /// Close the queue, empty it, and wake the dispatcher so it can observe
    /// shutdown. The records are returned so they drop outside the lock.
    pub(super) fn close(&self) -> Vec<IdleEvent> {
        let mut state = self.lock();
        state.closed = true;
        let drained = state.events.drain(..).collect();
        self.ready.notify_all();
        drained
    }

    fn lock(&self) -> MutexGuard<'_, IdleState> {
        self.state.lock()
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<EventId> {
        self.lock().events.iter().map(|e| e.id).collect()
    }
}

impl Shared {
    pub(super) fn idle_add(&self, event: NewEvent) -> EventId {
        let tag = event.tag.clone();
        let (id, refused) = self.idle.push(event);
        if let Some(event) = refused {
            self.refuse(id, event, QueueKind::Idle);
            return id;
        }
        debug!(%id, %tag, "idle event queued");
        metrics::events_added().add(1, &[KeyValue::new("queue", "idle")]);
        self.bus.emit(EventKind::IdleQueued { id, tag });
        id
    }

    /// Run one dequeued action on the calling thread. No queue lock is held.
    fn execute(&self, event: IdleEvent) {
        let IdleEvent {
            id,
            tag,
            mut action,
        } = event;

        let span = start_dispatch_span(id, &tag);
        let _entered = span.enter();
        self.bus.emit(EventKind::Started {
            id,
            tag: tag.clone(),
        });

        let started = Instant::now();
        let outcome = if self.catch_panics {
            panic::catch_unwind(AssertUnwindSafe(|| action.run()))
        } else {
            Ok(action.run())
        };
        let elapsed = started.elapsed();
        metrics::action_duration_ms().record(elapsed.as_secs_f64() * 1000.0, &[]);

        match outcome {
            Ok(status) => {
                record_outcome(&span, status.as_str());
                if status == EventStatus::Continue {
                    debug!(%id, "continue requested; runs are one-shot, not re-queued");
                }
                metrics::events_dispatched().add(1, &[KeyValue::new("status", status.as_str())]);
                self.bus.emit(EventKind::Finished {
                    id,
                    tag,
                    status,
                    duration_ms: elapsed.as_millis() as u64,
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                record_outcome(&span, "panicked");
                error!(%id, %tag, %message, "action panicked");
                metrics::action_panics().add(1, &[]);
                self.bus.emit(EventKind::Panicked { id, tag, message });
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Idle dispatcher loop: wait for work, pop the head, run it outside the
/// lock. Exits once the engine stops running.
pub(super) fn run_dispatcher(shared: &Shared) {
    debug!("idle dispatcher started");
    loop {
        let event = {
            let mut state = shared.idle.lock();
            while shared.is_running() && state.events.is_empty() {
                shared.idle.ready.wait(&mut state);
            }
            if !shared.is_running() {
                break;
            }
            match state.events.pop_front() {
                Some(event) => event,
                None => continue,
            }
        };
        shared.execute(event);
    }
    debug!("idle dispatcher stopped");
}
