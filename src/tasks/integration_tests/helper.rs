use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use nix::{
    errno::Errno,
    sys::{
        signal::{Signal, raise},
        wait::{WaitPidFlag, waitpid},
    },
    unistd::Pid,
};
use serde_json::{Value, json};

use crate::tasks::{
    config::{RunOptions, RunnerConfig},
    registry::TaskRegistry,
    runner::{Runner, WorkUnit},
};

static SIGNAL_SEEN: AtomicBool = AtomicBool::new(false);

extern "C" fn mark_signal_seen(_: libc::c_int) {
    SIGNAL_SEEN.store(true, Ordering::SeqCst);
}

/// Handlers shared by the process-level tests.
pub(crate) fn registry() -> TaskRegistry {
    TaskRegistry::new()
        .function("five", |(): ()| 5)
        .function("foo", |(): ()| "foo")
        .function("add", |(a, b): (i64, i64)| a + b)
        .function("sleep_ms", |(ms,): (u64,)| {
            thread::sleep(Duration::from_millis(ms));
            ms
        })
        .function("big", |(len,): (usize,)| "x".repeat(len))
        .handler("echo", |call| Ok(call.args.clone()))
        .handler("triple", |_| Ok(vec![json!(1), json!("two"), json!({"three": 3})]))
        .handler("nothing", |_| Ok(vec![]))
        .handler("mode", |call| Ok(vec![json!(call.is_scalar())]))
        .handler("fail", |_| Err("handler failed on purpose".into()))
        .handler("panic", |_| panic!("handler panicked on purpose"))
        .handler("exit_silently", |_| {
            // SAFETY: ends the child before anything is written.
            unsafe { libc::_exit(0) }
        })
        .handler("raise", |call| {
            let signal: String = call.arg(0)?;
            raise(signal.parse::<Signal>()?)?;
            Ok(vec![json!("survived")])
        })
        .handler("raise_and_report", |call| {
            let signal: String = call.arg(0)?;
            raise(signal.parse::<Signal>()?)?;
            Ok(vec![json!(SIGNAL_SEEN.load(Ordering::SeqCst))])
        })
        .handler("nested_uncaught", |_| {
            let inner = Runner::new(RunnerConfig::default(), registry())?;
            let task = inner.run(WorkUnit::new("fail"), RunOptions::new())?;
            task.wait();
            Ok(vec![json!("unreachable")])
        })
        .signal_handler("mark_seen", mark_signal_seen)
}

pub(crate) fn runner(max_parallel_tasks: usize) -> Runner {
    Runner::new(
        RunnerConfig::new().max_parallel_tasks(max_parallel_tasks),
        registry(),
    )
    .unwrap()
}

/// True once `pid` no longer exists as our child, i.e. it has been reaped.
pub(crate) fn is_reaped(pid: u32) -> bool {
    matches!(
        waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    )
}

pub(crate) fn sleep_work(ms: u64) -> WorkUnit {
    WorkUnit::new("sleep_ms").arg(ms)
}

pub(crate) fn as_i64(value: Value) -> i64 {
    value.as_i64().unwrap()
}
