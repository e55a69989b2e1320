use serde_json::json;

use crate::tasks::{
    config::RunOptions,
    error::TaskError,
    integration_tests::helper,
    runner::WorkUnit,
    state::ExitStatus,
};

fn caught() -> RunOptions {
    RunOptions::new().catch_error(true)
}

#[test]
fn handler_error_is_captured() {
    let runner = helper::runner(2);
    let task = runner.run(WorkUnit::new("fail"), caught()).unwrap();

    assert!(!task.wait());
    assert_eq!(task.exit_status(), Some(ExitStatus::Exited(1)));
    match task.data() {
        Err(TaskError::ChildProcessFailure { process_id, status }) => {
            assert_eq!(process_id, task.process_id());
            assert_eq!(status, ExitStatus::Exited(1));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    // The captured error is raised again on every access.
    assert!(matches!(
        task.get(),
        Err(TaskError::ChildProcessFailure { .. })
    ));
    assert_eq!(runner.tracked_count(), 0);
}

#[test]
fn handler_panic_is_captured() {
    let runner = helper::runner(2);
    let task = runner.run(WorkUnit::new("panic"), caught()).unwrap();
    assert!(!task.wait());
    assert!(matches!(
        task.data(),
        Err(TaskError::ChildProcessFailure {
            status: ExitStatus::Exited(1),
            ..
        })
    ));
}

#[test]
fn death_by_signal_is_captured() {
    let runner = helper::runner(2);
    let task = runner
        .run(WorkUnit::new("raise").arg("SIGTERM"), caught())
        .unwrap();
    assert!(!task.wait());
    assert_eq!(task.exit_status(), Some(ExitStatus::Signaled(libc::SIGTERM)));
}

#[test]
fn captured_failure_detected_by_polling() {
    let runner = helper::runner(2);
    let task = runner.run(WorkUnit::new("fail"), caught()).unwrap();
    while task.is_running() {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(task.data().is_err());
    assert!(!task.wait());
}

#[test]
fn undecodable_output_is_always_captured() {
    let runner = helper::runner(2);
    // catch_error is off: a decode failure must still not abort the caller.
    let task = runner
        .run(WorkUnit::new("exit_silently"), RunOptions::new())
        .unwrap();

    assert!(!task.wait());
    assert_eq!(task.exit_status(), Some(ExitStatus::Exited(0)));
    match task.get() {
        Err(TaskError::SerializationFailure(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn successful_task_with_catch_error_has_no_error() {
    let runner = helper::runner(2);
    let task = runner
        .run(WorkUnit::new("five"), caught().scalar(true))
        .unwrap();
    assert!(task.wait());
    assert_eq!(task.data().unwrap(), json!(5));
}

#[test]
fn uncaught_failure_aborts_the_caller() {
    // The caller here is itself a child process; it must die from the abort
    // instead of returning normally.
    let runner = helper::runner(2);
    match runner.run_forked(WorkUnit::new("nested_uncaught"), caught()) {
        Err(TaskError::ChildProcessFailure { status, .. }) => {
            assert_eq!(status, ExitStatus::Signaled(libc::SIGABRT));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}
