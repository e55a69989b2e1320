use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use nix::unistd::Pid;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tasks::{
    codec,
    config::ResolvedOptions,
    error::{TaskError, fatal},
    process::{channel::ChannelReader, reap, spawn::SpawnedChild},
    registry::ReturnMode,
    runner::RunnerShared,
    state::{ExitStatus, TaskState},
};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// State shared between a [`Task`] handle and the runner that spawned it.
///
/// The runner keeps cores of running tasks in its live table so that any
/// poll can complete any task. The core only holds a weak reference back
/// to the runner.
#[derive(Debug)]
pub(crate) struct TaskCore {
    id: u64,
    pid: Pid,
    owner_pid: u32,
    tracked: bool,
    catch_error: bool,
    mode: ReturnMode,
    payload_warn_bytes: usize,
    pub(crate) poll_interval: Duration,
    created_at: SystemTime,
    state: AtomicU8,
    finished_at: AtomicU64,
    runner: Weak<RunnerShared>,
    inner: Mutex<CoreInner>,
}

#[derive(Debug)]
struct CoreInner {
    channel: Option<ChannelReader>,
    expects_data: bool,
    read_error: Option<String>,
    payload_warned: bool,
    exit_status: Option<ExitStatus>,
    outcome: Option<Result<Vec<Value>, TaskError>>,
}

impl CoreInner {
    fn succeeded(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }
}

impl TaskCore {
    pub(crate) fn new(
        id: u64,
        spawned: SpawnedChild,
        options: &ResolvedOptions,
        tracked: bool,
        payload_warn_bytes: usize,
        poll_interval: Duration,
        runner: Weak<RunnerShared>,
    ) -> Self {
        Self {
            id,
            pid: spawned.pid,
            owner_pid: std::process::id(),
            tracked,
            catch_error: options.catch_error,
            mode: options.mode,
            payload_warn_bytes,
            poll_interval,
            created_at: SystemTime::now(),
            state: AtomicU8::new(TaskState::Running as u8),
            finished_at: AtomicU64::new(0),
            runner,
            inner: Mutex::new(CoreInner {
                channel: Some(spawned.channel),
                expects_data: true,
                read_error: None,
                payload_warned: false,
                exit_status: None,
                outcome: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }

    /// Non-blocking reap attempt. Returns whether the task is done.
    ///
    /// Skips the attempt if another thread is already waiting on this task.
    pub(crate) fn poll(&self) -> bool {
        if self.is_done() {
            return true;
        }
        let Some(mut inner) = self.inner.try_lock() else {
            return false;
        };
        if self.is_done() {
            return true;
        }
        // A child with a payload larger than the pipe buffer cannot exit
        // until the parent reads.
        self.pump(&mut inner);
        match reap::try_reap(self.pid) {
            Ok(None) => false,
            Ok(Some(exit)) => {
                self.complete(&mut inner, Ok(exit));
                true
            }
            Err(e) => {
                self.complete(&mut inner, Err(e));
                true
            }
        }
    }

    /// Blocks until the process exits. Returns `false` if an error was captured.
    pub(crate) fn wait(&self) -> bool {
        let mut inner = self.inner.lock();
        while !self.is_done() {
            let status = if self.pump(&mut inner) {
                Some(reap::reap_blocking(self.pid))
            } else {
                reap::try_reap(self.pid).transpose()
            };
            match status {
                Some(status) => self.complete(&mut inner, status),
                None => self.wait_readable(&inner),
            }
        }
        inner.succeeded()
    }

    pub(crate) fn succeeded(&self) -> bool {
        self.inner.lock().succeeded()
    }

    /// The caller dropped its handle: nobody will read the result.
    pub(crate) fn abandon(&self) {
        self.inner.lock().expects_data = false;
    }

    pub(crate) fn values(&self) -> Result<Vec<Value>, TaskError> {
        if !self.is_done() {
            return Err(TaskError::InvalidState(format!(
                "task {} is still running",
                self.id
            )));
        }
        match &self.inner.lock().outcome {
            Some(Ok(values)) => Ok(values.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(TaskError::InvalidState(format!(
                "task {} finished without an outcome",
                self.id
            ))),
        }
    }

    /// Reads whatever the child has written so far without blocking.
    ///
    /// Returns `true` once nothing more can arrive: the child closed its end
    /// or the channel failed. A read failure is kept and reported as the
    /// task's outcome.
    fn pump(&self, inner: &mut CoreInner) -> bool {
        let Some(channel) = inner.channel.as_mut() else {
            return true;
        };
        let pumped = channel.pump().map(|closed| (closed, channel.buffered_len()));
        match pumped {
            Ok((closed, len)) => {
                if !inner.payload_warned && codec::exceeds_threshold(len, self.payload_warn_bytes) {
                    inner.payload_warned = true;

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        task_id = self.id,
                        payload_bytes = len,
                        threshold = self.payload_warn_bytes,
                        "Task payload exceeds the safe pipe size threshold"
                    );
                }
                closed
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(task_id = self.id, error = %e, "Failed to read task payload");

                inner.read_error = Some(e.to_string());
                inner.channel = None;
                true
            }
        }
    }

    fn wait_readable(&self, inner: &CoreInner) {
        let ready = match &inner.channel {
            Some(channel) => channel.wait_readable(self.poll_interval).is_ok(),
            None => false,
        };
        if !ready {
            thread::sleep(self.poll_interval);
        }
    }

    /// Completion processing. Runs at most once per task.
    fn complete(&self, inner: &mut CoreInner, status: Result<ExitStatus, TaskError>) {
        if self.is_done() {
            return;
        }

        let exit_status = status.as_ref().ok().copied();
        let outcome = match status {
            Ok(exit) if exit.is_success() => self.collect(inner),
            Ok(exit) => {
                inner.channel = None;
                Err(TaskError::ChildProcessFailure {
                    process_id: self.pid.as_raw() as u32,
                    status: exit,
                })
            }
            Err(e) => {
                inner.channel = None;
                Err(e)
            }
        };

        // Decode failures are always captured; everything else needs catch_error.
        let uncaught = match &outcome {
            Err(e) if !self.catch_error && !matches!(e, TaskError::SerializationFailure(_)) => {
                Some(e.clone())
            }
            _ => None,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            task_id = self.id,
            pid = self.pid.as_raw(),
            exit_status = ?exit_status,
            success = outcome.is_ok(),
            "Task completion detected"
        );

        inner.exit_status = exit_status;
        inner.outcome = Some(outcome);
        self.finished_at.store(now_nanos(), Ordering::SeqCst);
        self.state.store(TaskState::Done as u8, Ordering::SeqCst);

        if let Some(runner) = self.runner.upgrade() {
            runner.task_finished(self.id, self.tracked);
        }

        if let Some(error) = uncaught {
            fatal(&error);
        }
    }

    /// Decodes the payload of a child that exited successfully.
    ///
    /// The child is gone, so everything it wrote is already in the pipe.
    fn collect(&self, inner: &mut CoreInner) -> Result<Vec<Value>, TaskError> {
        self.pump(inner);
        let channel = inner.channel.take();
        if let Some(e) = inner.read_error.take() {
            return Err(TaskError::SerializationFailure(format!(
                "failed to read payload: {e}"
            )));
        }
        let Some(mut channel) = channel else {
            return Ok(Vec::new());
        };
        if !inner.expects_data {
            return Ok(Vec::new());
        }
        Ok(codec::decode(&channel.take_buffered())?)
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Handle to one task running in a child process.
///
/// Dropping a handle while the task is still running hands the process
/// over to the runner, which reaps it when it is torn down. If the runner
/// is already gone, the drop blocks until the process exits.
///
/// # Examples
///
/// ```rust,no_run
/// use tcrm_isolate::tasks::{
///     config::{RunOptions, RunnerConfig},
///     registry::TaskRegistry,
///     runner::{Runner, WorkUnit},
/// };
/// use serde_json::json;
///
/// let registry = TaskRegistry::new().handler("pair", |_| Ok(vec![json!(1), json!(2)]));
/// let runner = Runner::new(RunnerConfig::default(), registry).unwrap();
///
/// let task = runner.run(WorkUnit::new("pair"), RunOptions::new()).unwrap();
/// while task.is_running() {
///     // other work
/// }
/// assert_eq!(task.data().unwrap(), json!([1, 2]));
/// ```
#[derive(Debug)]
pub struct Task {
    pub(crate) core: Arc<TaskCore>,
}

impl Task {
    pub(crate) fn new(core: Arc<TaskCore>) -> Self {
        Self { core }
    }

    /// Process-local identifier, increasing with every spawned task.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub fn process_id(&self) -> u32 {
        self.core.pid.as_raw() as u32
    }

    /// Current state without attempting a reap.
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Reaps opportunistically, then reports whether the task still runs.
    pub fn is_running(&self) -> bool {
        !self.poll()
    }

    /// Reaps opportunistically, then reports whether the task is done.
    pub fn is_done(&self) -> bool {
        self.poll()
    }

    /// Polls every live task of the owning runner, this one included, so
    /// a poll on one handle also completes its siblings.
    fn poll(&self) -> bool {
        if self.core.is_done() {
            return true;
        }
        match self.core.runner.upgrade() {
            Some(runner) => {
                runner.reap_finished();
                self.core.is_done()
            }
            None => self.core.poll(),
        }
    }

    /// Blocks until the child exits.
    ///
    /// Returns `false` if the task captured an error, `true` otherwise.
    /// Calling it again after completion returns immediately.
    pub fn wait(&self) -> bool {
        self.core.wait()
    }

    /// The task's result.
    ///
    /// In scalar mode this is the leading value (`null` if the handler
    /// returned nothing); otherwise every value as an array.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidState`] if the task is not done yet
    /// - the captured error, if the task failed
    pub fn data(&self) -> Result<Value, TaskError> {
        let values = self.core.values()?;
        Ok(match self.core.mode {
            ReturnMode::Scalar => values.into_iter().next().unwrap_or(Value::Null),
            ReturnMode::List => Value::Array(values),
        })
    }

    /// Every returned value, regardless of the return mode.
    pub fn values(&self) -> Result<Vec<Value>, TaskError> {
        self.core.values()
    }

    /// [`data`](Self::data) decoded into `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        serde_json::from_value(self.data()?)
            .map_err(|e| TaskError::SerializationFailure(e.to_string()))
    }

    /// [`wait`](Self::wait) followed by [`data`](Self::data).
    pub fn get(&self) -> Result<Value, TaskError> {
        self.wait();
        self.data()
    }

    /// [`get`](Self::get) decoded into `T`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T, TaskError> {
        self.wait();
        self.data_as()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.core.inner.lock().exit_status
    }

    pub fn created_at(&self) -> SystemTime {
        self.core.created_at
    }

    pub fn finished_at(&self) -> Option<SystemTime> {
        match self.core.finished_at.load(Ordering::SeqCst) {
            0 => None,
            nanos => Some(UNIX_EPOCH + Duration::from_nanos(nanos)),
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.core.tracked
    }

    pub fn mode(&self) -> ReturnMode {
        self.core.mode
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // A copy inherited by a forked child must not touch the parent's process.
        if std::process::id() != self.core.owner_pid || self.core.poll() {
            return;
        }
        self.core.abandon();
        match self.core.runner.upgrade() {
            Some(runner) => runner.adopt_zombie(Arc::clone(&self.core)),
            None => {
                self.core.wait();
            }
        }
    }
}
