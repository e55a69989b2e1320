use std::time::Duration;

use crate::tasks::{
    config::RunOptions,
    integration_tests::helper::{self, as_i64, sleep_work},
    runner::WorkUnit,
    state::TaskState,
};

#[test]
fn ten_tasks_with_ceiling_of_two() {
    let runner = helper::runner(2);
    let mut tasks = Vec::new();
    let mut max_seen = 0;

    for _ in 0..10 {
        let task = runner
            .run(WorkUnit::new("five"), RunOptions::new().scalar(true))
            .unwrap();
        max_seen = max_seen.max(runner.tracked_count());
        tasks.push(task);
    }

    let sum: i64 = tasks.iter().map(|t| as_i64(t.get().unwrap())).sum();
    assert_eq!(sum, 50);
    assert!(max_seen <= 2, "saw {} tracked tasks", max_seen);
}

#[test]
fn ceiling_holds_for_slow_tasks() {
    let runner = helper::runner(3);
    let mut tasks = Vec::new();

    for _ in 0..7 {
        tasks.push(runner.run(sleep_work(15), RunOptions::new()).unwrap());
        let running = tasks
            .iter()
            .filter(|t| t.state() == TaskState::Running)
            .count();
        assert!(runner.tracked_count() <= 3);
        assert!(running <= 3, "{} tasks running", running);
    }

    runner.wait();
    assert_eq!(runner.tracked_count(), 0);
    assert!(tasks.iter().all(|t| t.state() == TaskState::Done));
}

#[test]
fn runner_wait_returns_once_nothing_is_tracked() {
    let runner = helper::runner(4);
    let tasks: Vec<_> = (0..4)
        .map(|i| runner.run(sleep_work(5 * i), RunOptions::new()).unwrap())
        .collect();
    assert!(runner.tracked_count() > 0);

    runner.wait();

    assert_eq!(runner.tracked_count(), 0);
    assert_eq!(runner.live_count(), 0);
    for task in &tasks {
        assert_eq!(task.state(), TaskState::Done);
    }
}

#[test]
fn runner_wait_without_tasks_returns_immediately() {
    let runner = helper::runner(1);
    runner.wait();
    assert_eq!(runner.tracked_count(), 0);
}

#[test]
fn untracked_tasks_are_not_counted() {
    let runner = helper::runner(1);
    let task = runner
        .run(sleep_work(50), RunOptions::new().untracked(true))
        .unwrap();

    assert!(!task.is_tracked());
    assert_eq!(runner.tracked_count(), 0);
    assert_eq!(runner.live_count(), 1);
    task.wait();
    assert_eq!(runner.live_count(), 0);
}

#[test]
fn untracked_tasks_still_wait_for_the_ceiling() {
    let runner = helper::runner(1);
    let slow = runner.run(sleep_work(100), RunOptions::new()).unwrap();

    let quick = runner
        .run(WorkUnit::new("five"), RunOptions::new().untracked(true))
        .unwrap();

    // Admission only let the untracked task in once the slow one was reaped.
    assert_eq!(slow.state(), TaskState::Done);
    assert_eq!(runner.tracked_count(), 0);
    quick.wait();
}

#[test]
fn forced_tasks_skip_admission_but_count() {
    let runner = helper::runner(1);
    let slow = runner.run(sleep_work(200), RunOptions::new()).unwrap();

    let forced = runner
        .run(WorkUnit::new("five"), RunOptions::new().forced(true))
        .unwrap();

    assert_eq!(slow.state(), TaskState::Running);
    assert_eq!(runner.tracked_count(), 2);

    forced.wait();
    slow.wait();
    assert_eq!(runner.tracked_count(), 0);
}

#[test]
fn forced_and_untracked_never_block_or_count() {
    let runner = helper::runner(1);
    let slow = runner.run(sleep_work(200), RunOptions::new()).unwrap();

    let started = std::time::Instant::now();
    let free = runner
        .run(
            WorkUnit::new("five"),
            RunOptions::new().forced(true).untracked(true),
        )
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(runner.tracked_count(), 1);
    free.wait();
    slow.wait();
}

#[test]
fn completion_of_one_task_is_seen_by_polling_another() {
    let runner = helper::runner(4);
    let quick = runner.run(WorkUnit::new("five"), RunOptions::new()).unwrap();
    let slow = runner.run(sleep_work(50), RunOptions::new()).unwrap();

    // Only the slow handle is polled; the quick task completes as a side effect.
    while quick.state() == TaskState::Running {
        assert!(slow.is_running() || slow.state() == TaskState::Done);
        std::thread::sleep(Duration::from_millis(1));
    }

    assert_eq!(quick.state(), TaskState::Done);
    assert_eq!(quick.data().unwrap(), serde_json::json!([5]));
    slow.wait();
}
