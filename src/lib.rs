//! # dispatch-rs
//!
//! Single-process event dispatch engine.
//!
//! Events are either queued for immediate FIFO execution or scheduled for a
//! monotonic deadline. Two background threads drain the queues: one runs
//! ready actions inline, the other moves expired timed events into the
//! ready queue. Queued events can be cancelled by id or by tag until they
//! start running.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod plan;
pub mod telemetry;
