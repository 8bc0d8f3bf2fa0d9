//! Cancellation of queued events by id or tag.
//!
//! Both queues are scanned linearly, timed queue first. Removal only
//! prevents an action from starting; one already popped for execution is no
//! longer in any queue and runs to completion.

use opentelemetry::KeyValue;
use tracing::debug;

use super::Shared;
use crate::event::EventKind;
use crate::model::{Action, EventId, QueueKind, Removed};
use crate::telemetry::metrics;

impl Shared {
    pub(super) fn remove_by_id(&self, id: EventId) -> Option<Removed> {
        self.remove_first(|candidate, _| candidate == id)
    }

    pub(super) fn remove_by_tag(&self, tag: &str) -> Option<Removed> {
        self.remove_first(|_, candidate| candidate == tag)
    }

    pub(super) fn remove_all_by_tag(&self, tag: &str) -> usize {
        let matches = |_: EventId, candidate: &str| candidate == tag;
        let timed = self.timed.remove_all(matches);
        let idle = self.idle.remove_all(matches);
        let count = timed.len() + idle.len();

        let records = timed
            .into_iter()
            .map(|e| (e.id, e.tag, QueueKind::Timed, e.action))
            .chain(
                idle.into_iter()
                    .map(|e| (e.id, e.tag, QueueKind::Idle, e.action)),
            );
        for (id, tag, queue, action) in records {
            self.record_removal(id, tag, queue, action);
        }
        count
    }

    /// First match in the timed queue, otherwise first match in the idle
    /// queue. At most one record is removed.
    fn remove_first(&self, matches: impl Fn(EventId, &str) -> bool) -> Option<Removed> {
        let (id, tag, queue, action) = match self.timed.remove_first(&matches) {
            Some(e) => (e.id, e.tag, QueueKind::Timed, e.action),
            None => {
                let e = self.idle.remove_first(&matches)?;
                (e.id, e.tag, QueueKind::Idle, e.action)
            }
        };
        Some(self.record_removal(id, tag, queue, action))
    }

    /// The action is dropped here, after the queue lock has been released.
    fn record_removal(
        &self,
        id: EventId,
        tag: String,
        queue: QueueKind,
        action: Box<dyn Action>,
    ) -> Removed {
        drop(action);
        debug!(%id, %tag, %queue, "event removed");
        metrics::events_removed().add(1, &[KeyValue::new("queue", queue.as_str())]);
        self.bus.emit(EventKind::Removed {
            id,
            tag: tag.clone(),
            queue,
        });
        Removed { id, tag, queue }
    }
}
