//! Dispatch plans: a TOML list of events to schedule in one go.
//!
//! ```toml
//! [[event]]
//! tag = "t1"
//! message = "fires after a second"
//! delay_ms = 1000
//!
//! [[event]]
//! tag = "t2"
//! message = "never fires"
//! delay_ms = 1000
//! cancel = true
//! ```
//!
//! Entries with `delay_ms` go to the timed queue, the rest to the idle
//! queue. Each action sends its message to a caller-supplied channel.

use serde::Deserialize;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::engine::Handle;
use crate::error::{Error, Result};
use crate::model::{EventId, EventStatus, NewEvent};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(default, rename = "event")]
    pub events: Vec<PlannedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedEvent {
    #[serde(default)]
    pub tag: String,
    pub message: String,
    /// Fire this many milliseconds after scheduling. Unset means idle.
    pub delay_ms: Option<u64>,
    /// Simulated work inside the action.
    #[serde(default)]
    pub sleep_ms: u64,
    /// Remove the event by id straight after adding it.
    #[serde(default)]
    pub cancel: bool,
}

/// One plan entry as handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scheduled {
    pub id: EventId,
    pub tag: String,
    pub cancelled: bool,
}

impl Plan {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("bad plan: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read plan {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad plan {}: {e}", path.display())))
    }

    /// Add every entry to the engine in file order.
    pub fn schedule(&self, handle: &Handle, sink: &Sender<String>) -> Vec<Scheduled> {
        self.events
            .iter()
            .map(|planned| {
                let event = planned.to_event(sink.clone());
                let id = match planned.delay_ms {
                    Some(ms) => handle.timed_add_after(event, Duration::from_millis(ms)),
                    None => handle.idle_add(event),
                };
                let cancelled = planned.cancel && handle.remove_by_id(id).is_some();
                Scheduled {
                    id,
                    tag: planned.tag.clone(),
                    cancelled,
                }
            })
            .collect()
    }
}

impl PlannedEvent {
    fn to_event(&self, sink: Sender<String>) -> NewEvent {
        let message = self.message.clone();
        let sleep = Duration::from_millis(self.sleep_ms);
        NewEvent::new(move || {
            if !sleep.is_zero() {
                std::thread::sleep(sleep);
            }
            // The receiver may be gone if the caller stopped listening.
            let _ = sink.send(message.clone());
            EventStatus::OneShot
        })
        .tag(self.tag.clone())
    }
}
