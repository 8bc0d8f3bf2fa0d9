//! Dispatch engine: two queues, two dispatcher threads, one control surface.
//!
//! [`Engine`] owns the dispatcher threads and is the only thing that can
//! shut them down. [`Handle`] is a cheap clone of the control surface that
//! callers (including running actions) use to add and cancel events.

mod cancel;
mod idle;
mod timed;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::event::{EngineEvent, EventBus, EventKind};
use crate::model::{EventId, NewEvent, Pending, QueueKind, Removed};
use crate::telemetry::metrics;

use idle::IdleQueue;
use timed::TimedQueue;

/// Configuration for the dispatch engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dispatcher threads are named `{thread_prefix}-idle` and
    /// `{thread_prefix}-timed`.
    pub thread_prefix: String,
    /// Contain action panics inside the dispatcher instead of letting them
    /// terminate the dispatcher thread.
    pub catch_panics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thread_prefix: "dispatch".to_string(),
            catch_panics: true,
        }
    }
}

/// What shutdown found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Idle events dropped without running.
    pub discarded_idle: usize,
    /// Timed events dropped before their deadline was acted on.
    pub discarded_timed: usize,
    /// The idle dispatcher thread ended by panicking.
    pub idle_panicked: bool,
    /// The timed dispatcher thread ended by panicking.
    pub timed_panicked: bool,
}

/// State shared by the control surface and both dispatcher threads.
pub(crate) struct Shared {
    idle: IdleQueue,
    timed: TimedQueue,
    running: AtomicBool,
    bus: EventBus,
    catch_panics: bool,
}

impl Shared {
    fn new(catch_panics: bool) -> Self {
        Self {
            idle: IdleQueue::new(),
            timed: TimedQueue::new(),
            running: AtomicBool::new(true),
            bus: EventBus::new(),
            catch_panics,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drop an event offered to a queue that has already been closed.
    fn refuse(&self, id: EventId, event: NewEvent, queue: QueueKind) {
        let tag = event.tag.clone();
        drop(event);
        debug!(%id, %tag, %queue, "engine stopped; event dropped");
        metrics::events_discarded().add(1, &[KeyValue::new("queue", queue.as_str())]);
        self.bus.emit(EventKind::Discarded { id, tag, queue });
    }
}

/// How far ahead a deadline is pushed when `now + delay` is not
/// representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Cloneable access to the engine's control surface.
///
/// Everything except shutdown. Events added after the engine has shut
/// down still get an id, but they are dropped at once and never run.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Handle {
    /// Append an event to the idle queue. Returns its id.
    pub fn idle_add(&self, event: NewEvent) -> EventId {
        self.shared.idle_add(event)
    }

    /// Insert an event into the timed queue, to be moved to the idle queue
    /// once `deadline` has passed. A deadline already in the past fires on
    /// the timed dispatcher's next pass.
    pub fn timed_add(&self, event: NewEvent, deadline: Instant) -> EventId {
        self.shared.timed_add(event, deadline)
    }

    /// [`Handle::timed_add`] relative to now. A delay too large to
    /// represent is clamped to a deadline a century away.
    pub fn timed_add_after(&self, event: NewEvent, delay: Duration) -> EventId {
        self.shared.timed_add(event, deadline_after(delay))
    }

    /// Remove the queued event with this id, timed queue first.
    pub fn remove_by_id(&self, id: EventId) -> Option<Removed> {
        self.shared.remove_by_id(id)
    }

    /// Remove the first queued event carrying this tag, timed queue first.
    pub fn remove_by_tag(&self, tag: &str) -> Option<Removed> {
        self.shared.remove_by_tag(tag)
    }

    /// Remove every queued event carrying this tag from both queues.
    pub fn remove_all_by_tag(&self, tag: &str) -> usize {
        self.shared.remove_all_by_tag(tag)
    }

    pub fn pending(&self) -> Pending {
        Pending {
            idle: self.shared.idle.len(),
            timed: self.shared.timed.len(),
        }
    }

    /// Receive every [`EngineEvent`] emitted from now on.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.bus.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }
}

/// The dispatch engine. Owns both dispatcher threads.
///
/// Dropping the engine shuts it down the same way [`Engine::shutdown`] does.
pub struct Engine {
    handle: Handle,
    idle_thread: Option<JoinHandle<()>>,
    timed_thread: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Engine {
    /// Start an engine with the default configuration.
    pub fn start() -> Result<Self> {
        Self::new(EngineConfig::default())
    }

    /// Start both dispatcher threads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`] if either thread cannot be created. Any
    /// thread already started is stopped before returning.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let shared = Arc::new(Shared::new(config.catch_panics));

        let idle_thread = spawn_dispatcher(
            format!("{}-idle", config.thread_prefix),
            Arc::clone(&shared),
            idle::run_dispatcher,
        )?;

        let mut engine = Self {
            handle: Handle {
                shared: Arc::clone(&shared),
            },
            idle_thread: Some(idle_thread),
            timed_thread: None,
            stopped: false,
        };

        // On failure `engine` drops here and joins the idle dispatcher.
        engine.timed_thread = Some(spawn_dispatcher(
            format!("{}-timed", config.thread_prefix),
            shared,
            timed::run_dispatcher,
        )?);

        info!(
            prefix = %config.thread_prefix,
            catch_panics = config.catch_panics,
            "dispatch engine started"
        );
        Ok(engine)
    }

    /// A cloneable handle to the control surface.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn idle_add(&self, event: NewEvent) -> EventId {
        self.handle.idle_add(event)
    }

    pub fn timed_add(&self, event: NewEvent, deadline: Instant) -> EventId {
        self.handle.timed_add(event, deadline)
    }

    pub fn timed_add_after(&self, event: NewEvent, delay: Duration) -> EventId {
        self.handle.timed_add_after(event, delay)
    }

    pub fn remove_by_id(&self, id: EventId) -> Option<Removed> {
        self.handle.remove_by_id(id)
    }

    pub fn remove_by_tag(&self, tag: &str) -> Option<Removed> {
        self.handle.remove_by_tag(tag)
    }

    pub fn remove_all_by_tag(&self, tag: &str) -> usize {
        self.handle.remove_all_by_tag(tag)
    }

    pub fn pending(&self) -> Pending {
        self.handle.pending()
    }

    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.handle.subscribe()
    }

    /// Stop both dispatchers and wait for them to exit.
    ///
    /// Queued events that have not started are discarded without running.
    /// An action already running is allowed to finish.
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop()
    }

    fn stop(&mut self) -> ShutdownReport {
        self.stopped = true;
        let shared = &self.handle.shared;
        shared.running.store(false, Ordering::Release);
        info!("dispatch engine shutting down");

        // Timed first, so nothing migrates into the idle queue after it
        // has been cleared.
        let timed: Vec<(EventId, String)> = shared
            .timed
            .close()
            .into_iter()
            .map(|e| (e.id, e.tag))
            .collect();
        let timed_panicked = join_dispatcher(self.timed_thread.take(), QueueKind::Timed);

        let idle: Vec<(EventId, String)> = shared
            .idle
            .close()
            .into_iter()
            .map(|e| (e.id, e.tag))
            .collect();
        let idle_panicked = join_dispatcher(self.idle_thread.take(), QueueKind::Idle);

        let report = ShutdownReport {
            discarded_idle: idle.len(),
            discarded_timed: timed.len(),
            idle_panicked,
            timed_panicked,
        };

        for (queue, discarded) in [(QueueKind::Timed, timed), (QueueKind::Idle, idle)] {
            if !discarded.is_empty() {
                metrics::events_discarded().add(
                    discarded.len() as u64,
                    &[KeyValue::new("queue", queue.as_str())],
                );
            }
            for (id, tag) in discarded {
                debug!(%id, %tag, %queue, "discarded at shutdown");
                shared.bus.emit(EventKind::Discarded { id, tag, queue });
            }
        }
        shared.bus.emit(EventKind::Stopped {
            discarded_idle: report.discarded_idle,
            discarded_timed: report.discarded_timed,
        });

        info!(
            discarded_idle = report.discarded_idle,
            discarded_timed = report.discarded_timed,
            "dispatch engine stopped"
        );
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.stopped {
            self.stop();
        }
    }
}

fn spawn_dispatcher(
    name: String,
    shared: Arc<Shared>,
    body: fn(&Shared),
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || body(&shared))
        .map_err(Error::Spawn)
}

/// Join a dispatcher thread. Returns true if it ended by panicking.
fn join_dispatcher(handle: Option<JoinHandle<()>>, queue: QueueKind) -> bool {
    let Some(handle) = handle else {
        return false;
    };
    if handle.thread().id() == thread::current().id() {
        warn!(%queue, "engine dropped from its own dispatcher; not joining");
        return false;
    }
    match handle.join() {
        Ok(()) => false,
        Err(_) => {
            error!(%queue, "dispatcher thread terminated by panic");
            true
        }
    }
}
