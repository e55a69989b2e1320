use serde_json::json;

use crate::tasks::{
    config::{RunOptions, RunnerConfig},
    error::TaskError,
    integration_tests::helper,
    runner::{Runner, WorkUnit},
    signal::{ProcessSignal, SignalDisposition},
    state::ExitStatus,
};

#[test]
fn registered_handler_runs_in_child() {
    let runner = helper::runner(2);
    let options = RunOptions::new().scalar(true).signal_handler(
        ProcessSignal::SIGUSR1,
        SignalDisposition::Handler("mark_seen".to_string()),
    );
    let task = runner
        .run(WorkUnit::new("raise_and_report").arg("SIGUSR1"), options)
        .unwrap();

    assert_eq!(task.get().unwrap(), json!(true));
}

#[test]
fn ignored_signal_does_not_kill_child() {
    let runner = helper::runner(2);
    let options = RunOptions::new()
        .scalar(true)
        .signal_handler(ProcessSignal::SIGTERM, SignalDisposition::Ignore);
    let task = runner
        .run(WorkUnit::new("raise").arg("SIGTERM"), options)
        .unwrap();

    assert_eq!(task.get().unwrap(), json!("survived"));
}

#[test]
fn default_disposition_restores_termination() {
    let runner = Runner::new(
        RunnerConfig::new().defaults(
            RunOptions::new().signal_handler(ProcessSignal::SIGUSR2, SignalDisposition::Ignore),
        ),
        helper::registry(),
    )
    .unwrap();

    let survived = runner
        .run(WorkUnit::new("raise").arg("SIGUSR2"), RunOptions::new())
        .unwrap();
    assert_eq!(survived.get().unwrap(), json!(["survived"]));

    let options = RunOptions::new()
        .catch_error(true)
        .signal_handler(ProcessSignal::SIGUSR2, SignalDisposition::Default);
    let killed = runner
        .run(WorkUnit::new("raise").arg("SIGUSR2"), options)
        .unwrap();
    assert!(!killed.wait());
    assert_eq!(
        killed.exit_status(),
        Some(ExitStatus::Signaled(libc::SIGUSR2))
    );
}

#[test]
fn parent_dispositions_are_untouched() {
    let runner = helper::runner(2);
    let options = RunOptions::new().signal_handler(ProcessSignal::SIGUSR1, SignalDisposition::Ignore);
    runner
        .run(WorkUnit::new("five"), options)
        .unwrap()
        .wait();

    // SAFETY: only queries the current disposition.
    let current = unsafe {
        nix::sys::signal::sigaction(
            nix::sys::signal::Signal::SIGUSR1,
            &nix::sys::signal::SigAction::new(
                nix::sys::signal::SigHandler::SigDfl,
                nix::sys::signal::SaFlags::empty(),
                nix::sys::signal::SigSet::empty(),
            ),
        )
    }
    .unwrap();
    assert_eq!(current.handler(), nix::sys::signal::SigHandler::SigDfl);
}

#[test]
fn unregistered_signal_handler_is_rejected() {
    let runner = helper::runner(2);
    let options = RunOptions::new().signal_handler(
        ProcessSignal::SIGUSR1,
        SignalDisposition::Handler("nope".to_string()),
    );
    match runner.run(WorkUnit::new("five"), options) {
        Err(TaskError::InvalidConfiguration(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(runner.live_count(), 0);
}
