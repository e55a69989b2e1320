use serde_json::json;

use crate::tasks::{
    config::RunOptions, error::TaskError, integration_tests::helper, runner::WorkUnit,
};

#[test]
fn run_forked_returns_value_directly() {
    let runner = helper::runner(1);
    let value = runner
        .run_forked(WorkUnit::new("foo"), RunOptions::new().scalar(true))
        .unwrap();

    assert_eq!(value, json!("foo"));
    assert_eq!(runner.tracked_count(), 0);
    assert_eq!(runner.live_count(), 0);
}

#[test]
fn run_forked_in_list_mode() {
    let runner = helper::runner(1);
    let value = runner
        .run_forked(WorkUnit::new("triple"), RunOptions::new())
        .unwrap();
    assert_eq!(value, json!([1, "two", {"three": 3}]));
}

#[test]
fn run_forked_ignores_a_saturated_ceiling() {
    let runner = helper::runner(1);
    let slow = runner.run(helper::sleep_work(200), RunOptions::new()).unwrap();

    let started = std::time::Instant::now();
    let value = runner
        .run_forked(WorkUnit::new("add").arg(1).arg(1), RunOptions::new().scalar(true))
        .unwrap();

    assert_eq!(value, json!(2));
    assert!(started.elapsed() < std::time::Duration::from_millis(200));
    assert_eq!(runner.tracked_count(), 1);
    slow.wait();
}

#[test]
fn run_forked_reports_captured_failure() {
    let runner = helper::runner(1);
    match runner.run_forked(WorkUnit::new("fail"), RunOptions::new().catch_error(true)) {
        Err(TaskError::ChildProcessFailure { .. }) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(runner.tracked_count(), 0);
}

#[test]
fn run_forked_rejects_unknown_handler() {
    let runner = helper::runner(1);
    assert!(matches!(
        runner.run_forked(WorkUnit::new("nope"), RunOptions::new()),
        Err(TaskError::UnknownHandler(_))
    ));
}
