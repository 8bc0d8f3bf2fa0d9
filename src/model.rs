//! Core data model.
//!
//! An event is a unit of work: an action to run, an optional tag used for
//! cancellation lookups, and the id minted by the queue that accepted it.

use serde::{Deserialize, Serialize};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// First value of the idle queue's id counter. Ids are pre-incremented, so
/// the first idle id handed out is `IDLE_ID_BASE + 1`.
pub const IDLE_ID_BASE: u32 = 0x0000_0000;

/// First timed id. The timed counter starts high so the two queues mint
/// from disjoint ranges of the same 32-bit space.
pub const TIMED_ID_BASE: u32 = 0xFFFF_0000;

/// Newtype for event ids.
///
/// Counters wrap after 2^32 allocations per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u32);

impl EventId {
    /// True if the id falls in the timed queue's range.
    pub fn is_timed_range(self) -> bool {
        self.0 >= TIMED_ID_BASE
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status code returned by an action.
///
/// `Continue` is reserved for re-scheduling; dispatch currently treats
/// every run as one-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    OneShot,
    Continue,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::OneShot => "one_shot",
            EventStatus::Continue => "continue",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Something a dispatcher can run.
///
/// Implemented for every `FnMut() -> EventStatus` closure that can be sent
/// to another thread, so most callers never name this trait.
pub trait Action: Send + 'static {
    fn run(&mut self) -> EventStatus;
}

impl<F> Action for F
where
    F: FnMut() -> EventStatus + Send + 'static,
{
    fn run(&mut self) -> EventStatus {
        self()
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Which queue a record lived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    Idle,
    Timed,
}

impl QueueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueKind::Idle => "idle",
            QueueKind::Timed => "timed",
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A ready-to-run event owned by the idle queue.
pub(crate) struct IdleEvent {
    pub id: EventId,
    pub tag: String,
    pub action: Box<dyn Action>,
}

/// A future event owned by the timed queue.
pub(crate) struct TimedEvent {
    pub deadline: Instant,
    pub id: EventId,
    pub tag: String,
    pub action: Box<dyn Action>,
}

impl TimedEvent {
    /// Strip the deadline and id, keeping what migration carries over.
    pub(crate) fn into_new_event(self) -> NewEvent {
        NewEvent {
            tag: self.tag,
            action: self.action,
        }
    }
}

/// A record taken out of a queue by one of the removal operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Removed {
    pub id: EventId,
    pub tag: String,
    pub queue: QueueKind,
}

/// Snapshot of queue lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pending {
    pub idle: usize,
    pub timed: usize,
}

impl Pending {
    pub fn total(&self) -> usize {
        self.idle + self.timed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for events. The engine's public input for `idle_add` and
/// `timed_add`.
pub struct NewEvent {
    pub(crate) tag: String,
    pub(crate) action: Box<dyn Action>,
}

impl NewEvent {
    pub fn new(action: impl Action) -> Self {
        Self {
            tag: String::new(),
            action: Box::new(action),
        }
    }

    /// Label used by `remove_by_tag`. Tags need not be unique.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

impl std::fmt::Debug for NewEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewEvent")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}
