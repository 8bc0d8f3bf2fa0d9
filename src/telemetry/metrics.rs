//! Metric instrument factories for dispatch-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without one installed every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("dispatch-rs")
}

/// Counter: events accepted by `idle_add` / `timed_add`.
/// Labels: `queue` ("idle" | "timed").
pub fn events_added() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.events.added")
        .with_description("Number of events added to a queue")
        .build()
}

/// Counter: timed events moved into the idle queue at expiry.
pub fn events_migrated() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.events.migrated")
        .with_description("Number of expired timed events moved to the idle queue")
        .build()
}

/// Counter: actions that ran to completion.
/// Labels: `status` ("one_shot" | "continue").
pub fn events_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.events.dispatched")
        .with_description("Number of actions run by the idle dispatcher")
        .build()
}

/// Counter: events cancelled before they started.
/// Labels: `queue`.
pub fn events_removed() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.events.removed")
        .with_description("Number of queued events removed by id or tag")
        .build()
}

/// Counter: events dropped unrun at shutdown.
/// Labels: `queue`.
pub fn events_discarded() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.events.discarded")
        .with_description("Number of queued events discarded at shutdown")
        .build()
}

/// Counter: actions that panicked inside a containment boundary.
pub fn action_panics() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.action.panics")
        .with_description("Number of actions that panicked")
        .build()
}

/// Histogram: action run time in milliseconds.
pub fn action_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("dispatch.action.duration_ms")
        .with_description("Action run time in milliseconds")
        .with_unit("ms")
        .build()
}
