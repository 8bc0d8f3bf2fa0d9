//! Structured events emitted by the engine on every lifecycle transition.
//!
//! Consumers subscribe to the event stream to watch dispatch order, build
//! audit logs, or drive tests. Events are emitted after the queue lock that
//! guarded the transition has been released, so `seq` reflects emission
//! order rather than a strict happens-before across the two dispatchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::{Mutex, MutexGuard};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::model::{EventId, EventStatus, QueueKind};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    /// When this event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    IdleQueued {
        id: EventId,
        tag: String,
    },
    TimedQueued {
        id: EventId,
        tag: String,
        delay_ms: u64,
    },
    /// An expired timed record moved into the idle queue under a fresh id.
    Migrated {
        timed_id: EventId,
        idle_id: EventId,
        tag: String,
    },
    Started {
        id: EventId,
        tag: String,
    },
    Finished {
        id: EventId,
        tag: String,
        status: EventStatus,
        duration_ms: u64,
    },
    Panicked {
        id: EventId,
        tag: String,
        message: String,
    },
    Removed {
        id: EventId,
        tag: String,
        queue: QueueKind,
    },
    /// Dropped without running at shutdown.
    Discarded {
        id: EventId,
        tag: String,
        queue: QueueKind,
    },
    Stopped {
        discarded_idle: usize,
        discarded_timed: usize,
    },
}

/// Fan-out of engine events to any number of channel subscribers.
pub(crate) struct EventBus {
    state: Mutex<BusState>,
}

struct BusState {
    next_seq: u64,
    subscribers: Vec<Sender<EngineEvent>>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BusState {
                next_seq: 0,
                subscribers: Vec::new(),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Deliver to every live subscriber, dropping the ones whose receiver
    /// has gone away.
    pub(crate) fn emit(&self, kind: EventKind) {
        let mut state = self.lock();
        if state.subscribers.is_empty() {
            return;
        }
        state.next_seq += 1;
        let event = EngineEvent {
            seq: state.next_seq,
            timestamp: Utc::now(),
            kind,
        };
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock()
    }
}
