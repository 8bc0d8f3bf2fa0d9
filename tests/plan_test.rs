//! Integration tests for TOML dispatch plans.

use dispatch_rs::engine::Engine;
use dispatch_rs::plan::Plan;
use std::sync::mpsc;
use std::time::Duration;

const PLAN: &str = r#"
[[event]]
tag = "late"
message = "second"
delay_ms = 150

[[event]]
tag = "now"
message = "first"

[[event]]
tag = "never"
message = "cancelled"
delay_ms = 50
cancel = true
"#;

#[test]
fn plan_parses_defaults() {
    let plan = Plan::from_toml_str(PLAN).unwrap();

    assert_eq!(plan.events.len(), 3);
    assert_eq!(plan.events[0].delay_ms, Some(150));
    assert_eq!(plan.events[1].delay_ms, None);
    assert_eq!(plan.events[1].sleep_ms, 0);
    assert!(!plan.events[1].cancel);
    assert!(plan.events[2].cancel);
}

#[test]
fn empty_plan_has_no_events() {
    assert!(Plan::from_toml_str("").unwrap().events.is_empty());
}

#[test]
fn plan_without_message_is_rejected() {
    let err = Plan::from_toml_str("[[event]]\ntag = \"x\"\n").unwrap_err();
    assert!(err.to_string().contains("bad plan"));
}

#[test]
fn missing_plan_file_is_a_config_error() {
    let err = Plan::load(std::path::Path::new("/nonexistent/plan.toml")).unwrap_err();
    assert!(err.to_string().contains("cannot read plan"));
}

#[test]
fn scheduled_plan_runs_in_dispatch_order() {
    let engine = Engine::start().unwrap();
    let plan = Plan::from_toml_str(PLAN).unwrap();
    let (tx, rx) = mpsc::channel();

    let scheduled = plan.schedule(&engine.handle(), &tx);
    assert_eq!(scheduled.len(), 3);
    assert!(scheduled[0].id.is_timed_range());
    assert!(!scheduled[1].id.is_timed_range());
    assert!(scheduled[2].cancelled);

    let wait = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(wait).unwrap(), "first");
    assert_eq!(rx.recv_timeout(wait).unwrap(), "second");
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    let report = engine.shutdown();
    assert_eq!(report.discarded_timed, 0);
}
