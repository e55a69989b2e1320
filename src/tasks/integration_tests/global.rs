use serde_json::json;

use crate::tasks::{
    config::{RunOptions, RunnerConfig},
    error::TaskError,
    global,
    integration_tests::helper,
    runner::WorkUnit,
};

#[test]
fn default_runner_is_lazy_and_shared() {
    global::install(RunnerConfig::new().max_parallel_tasks(3), helper::registry()).unwrap();
    assert!(!global::is_initialized());

    let runner = global::runner();
    assert!(global::is_initialized());
    assert!(std::ptr::eq(runner, global::runner()));
    assert_eq!(runner.max_parallel_tasks(), 3);

    let value = runner
        .run_forked(WorkUnit::new("foo"), RunOptions::new().scalar(true))
        .unwrap();
    assert_eq!(value, json!("foo"));

    match global::install(RunnerConfig::default(), helper::registry()) {
        Err(TaskError::InvalidState(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}
