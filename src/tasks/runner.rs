use std::{
    collections::HashMap,
    mem,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::{
    config::{ResolvedOptions, RunOptions, RunnerConfig},
    error::TaskError,
    process::{descriptor::TaskDescriptor, spawn},
    registry::TaskRegistry,
    task::{Task, TaskCore, next_task_id},
};

/// A unit of work: the name of a registered handler plus its arguments.
///
/// # Examples
///
/// ```rust
/// use tcrm_isolate::tasks::runner::WorkUnit;
///
/// let work = WorkUnit::new("resize").arg("image.png").arg(640).arg(480);
/// assert_eq!(work.args.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub handler: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl WorkUnit {
    pub fn new(handler: impl Into<String>) -> Self {
        WorkUnit {
            handler: handler.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends any serializable value as the next argument.
    pub fn arg_serialized<T: Serialize>(mut self, arg: &T) -> Result<Self, TaskError> {
        let value =
            serde_json::to_value(arg).map_err(|e| TaskError::SerializationFailure(e.to_string()))?;
        self.args.push(value);
        Ok(self)
    }
}

/// Accounting shared between a [`Runner`] and its tasks.
///
/// Tasks only hold a `Weak` to this, so they never keep the runner alive.
#[derive(Debug)]
pub(crate) struct RunnerShared {
    config: RunnerConfig,
    registry: Arc<TaskRegistry>,
    creator_pid: u32,
    tracked: AtomicUsize,
    live: Mutex<HashMap<u64, Arc<TaskCore>>>,
    zombies: Mutex<Vec<Arc<TaskCore>>>,
    /// Signaled whenever a task completes, so waiters wake before the
    /// next poll interval when another thread observed the completion.
    finished: Condvar,
    finished_lock: Mutex<()>,
}

impl RunnerShared {
    /// Called exactly once per attached task, when it completes.
    pub(crate) fn task_finished(&self, task_id: u64, tracked: bool) {
        if tracked {
            self.tracked.fetch_sub(1, Ordering::SeqCst);
        }
        self.live.lock().remove(&task_id);
        let _guard = self.finished_lock.lock();
        self.finished.notify_all();
    }

    /// Sleeps for at most `interval`, returning early on task completion.
    fn park(&self, interval: Duration) {
        let mut guard = self.finished_lock.lock();
        self.finished.wait_for(&mut guard, interval);
    }

    pub(crate) fn adopt_zombie(&self, core: Arc<TaskCore>) {
        #[cfg(feature = "tracing")]
        tracing::debug!(task_id = core.id(), "Task dropped while running, deferring reap to runner");

        self.zombies.lock().push(core);
    }

    /// Polls every live task once. Returns how many completed.
    pub(crate) fn reap_finished(&self) -> usize {
        let cores: Vec<Arc<TaskCore>> = self.live.lock().values().cloned().collect();
        let completed = cores
            .iter()
            .filter(|core| !core.is_done() && core.poll())
            .count();
        self.zombies.lock().retain(|core| !core.is_done());
        completed
    }

    fn tracked_count(&self) -> usize {
        self.tracked.load(Ordering::SeqCst)
    }
}

/// Spawns tasks in child processes and bounds how many run at once.
///
/// The runner assumes a single owning thread (or external synchronization)
/// for its blocking waits; all counters are updated as a side effect of
/// task completion, which may be observed by any poll.
///
/// # Examples
///
/// ```rust,no_run
/// use tcrm_isolate::tasks::{
///     config::{RunOptions, RunnerConfig},
///     registry::TaskRegistry,
///     runner::{Runner, WorkUnit},
/// };
///
/// let registry = TaskRegistry::new().function("five", |(): ()| 5);
/// let runner = Runner::new(RunnerConfig::new().max_parallel_tasks(2), registry).unwrap();
///
/// let tasks: Vec<_> = (0..10)
///     .map(|_| runner.run(WorkUnit::new("five"), RunOptions::new().scalar(true)).unwrap())
///     .collect();
///
/// let sum: i64 = tasks.iter().map(|t| t.get_as::<i64>().unwrap()).sum();
/// assert_eq!(sum, 50);
/// ```
#[derive(Debug)]
pub struct Runner {
    shared: Arc<RunnerShared>,
}

impl Runner {
    /// Creates a runner with its own registry.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidConfiguration`] if `config` is invalid or
    /// its default options name unregistered signal handlers.
    pub fn new(config: RunnerConfig, registry: TaskRegistry) -> Result<Self, TaskError> {
        Self::with_registry(config, Arc::new(registry))
    }

    /// Creates a runner sharing an existing registry.
    pub fn with_registry(
        config: RunnerConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, TaskError> {
        config.validate()?;
        config.defaults.validate(&registry)?;
        Ok(Self::from_parts(config, registry))
    }

    pub(crate) fn from_parts(config: RunnerConfig, registry: Arc<TaskRegistry>) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                config,
                registry,
                creator_pid: std::process::id(),
                tracked: AtomicUsize::new(0),
                live: Mutex::new(HashMap::new()),
                zombies: Mutex::new(Vec::new()),
                finished: Condvar::new(),
                finished_lock: Mutex::new(()),
            }),
        }
    }

    /// Spawns `work` in a child process and returns its handle.
    ///
    /// Unless `forced` is set, blocks until fewer than
    /// `max_parallel_tasks` tracked tasks are running. This applies to
    /// untracked tasks too, so they still throttle process creation.
    ///
    /// # Errors
    ///
    /// - [`TaskError::UnknownHandler`] if `work.handler` is not registered
    /// - [`TaskError::InvalidConfiguration`] for unknown signal handlers
    /// - [`TaskError::ForkFailure`] / [`TaskError::HandshakeFailure`] if
    ///   the child cannot be started
    pub fn run(&self, work: WorkUnit, options: RunOptions) -> Result<Task, TaskError> {
        let resolved = self.prepare(&work, &options)?;
        if !resolved.forced {
            self.admit();
        }
        let task = Task::new(self.spawn_core(work, &resolved, !resolved.untracked, true)?);
        if resolved.wait {
            task.wait();
        }
        Ok(task)
    }

    /// Spawns `work` immediately, waits for it and returns its data.
    ///
    /// Bypasses admission control and never counts toward the ceiling.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), plus the captured failure if
    /// `catch_error` is set.
    pub fn run_forked(&self, work: WorkUnit, options: RunOptions) -> Result<Value, TaskError> {
        let resolved = self.prepare(&work, &options)?;
        let task = Task::new(self.spawn_core(work, &resolved, false, false)?);
        task.get()
    }

    /// Blocks until no tracked task is running.
    pub fn wait(&self) {
        let interval = self.shared.config.poll_interval();
        loop {
            self.shared.reap_finished();
            if self.shared.tracked_count() == 0 {
                return;
            }
            self.shared.park(interval);
        }
    }

    /// Polls every running task once. Returns how many completed.
    pub fn reap_finished(&self) -> usize {
        self.shared.reap_finished()
    }

    /// Tracked tasks currently running.
    pub fn tracked_count(&self) -> usize {
        self.shared.tracked_count()
    }

    /// Tasks spawned by `run()` that have not completed, tracked or not.
    pub fn live_count(&self) -> usize {
        self.shared.live.lock().len()
    }

    /// Abandoned tasks still waiting to be reaped.
    pub fn zombie_count(&self) -> usize {
        self.shared.zombies.lock().len()
    }

    pub fn max_parallel_tasks(&self) -> usize {
        self.shared.config.max_parallel_tasks
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    pub(crate) fn prepare(
        &self,
        work: &WorkUnit,
        options: &RunOptions,
    ) -> Result<ResolvedOptions, TaskError> {
        if !self.shared.registry.contains(&work.handler) {
            return Err(TaskError::UnknownHandler(work.handler.clone()));
        }
        options.validate(&self.shared.registry)?;
        Ok(options.resolve(&self.shared.config.defaults))
    }

    pub(crate) fn has_capacity(&self) -> bool {
        self.shared.reap_finished();
        self.shared.tracked_count() < self.shared.config.max_parallel_tasks
    }

    fn admit(&self) {
        let interval = self.shared.config.poll_interval();
        while !self.has_capacity() {
            self.shared.park(interval);
        }
    }

    /// Forks the child and wires the resulting core into the accounting.
    ///
    /// Detached cores (`attach == false`) are invisible to the runner.
    pub(crate) fn spawn_core(
        &self,
        work: WorkUnit,
        resolved: &ResolvedOptions,
        tracked: bool,
        attach: bool,
    ) -> Result<Arc<TaskCore>, TaskError> {
        let task_id = next_task_id();
        let descriptor = TaskDescriptor {
            task_id,
            handler: work.handler,
            args: work.args,
            mode: resolved.mode,
            signals: resolved.signal_handlers.clone(),
        };
        let spawned = spawn::spawn_child(&descriptor, &self.shared.registry)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            task_id,
            pid = spawned.pid.as_raw(),
            handler = %descriptor.handler,
            tracked,
            mode = ?resolved.mode,
            "Task spawned"
        );

        let runner = if attach {
            Arc::downgrade(&self.shared)
        } else {
            Weak::new()
        };
        let core = Arc::new(TaskCore::new(
            task_id,
            spawned,
            resolved,
            tracked,
            self.shared.config.payload_warn_bytes,
            self.shared.config.poll_interval(),
            runner,
        ));

        if attach {
            if tracked {
                self.shared.tracked.fetch_add(1, Ordering::SeqCst);
            }
            self.shared.live.lock().insert(task_id, Arc::clone(&core));
        }
        Ok(core)
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        // A runner inherited by a forked child must not reap the parent's tasks.
        if std::process::id() != self.shared.creator_pid {
            return;
        }
        let zombies = mem::take(&mut *self.shared.zombies.lock());

        #[cfg(feature = "tracing")]
        if !zombies.is_empty() {
            tracing::debug!(count = zombies.len(), "Reaping abandoned tasks");
        }

        for core in zombies {
            core.wait();
        }
    }
}
