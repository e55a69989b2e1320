use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::tasks::{
    codec::PAYLOAD_WARN_THRESHOLD,
    error::TaskError,
    registry::{ReturnMode, TaskRegistry},
    signal::{ProcessSignal, SignalDisposition},
};

/// Per-call options for [`Runner::run`](crate::tasks::runner::Runner::run).
///
/// Every field is optional. Unset fields fall back to the runner's
/// construction-time defaults, then to `false`/empty.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RunOptions {
    /// Signal dispositions installed in the child before the handshake
    pub signal_handlers: Option<BTreeMap<ProcessSignal, SignalDisposition>>,

    /// Block in `run()` until the spawned task is done
    pub wait: Option<bool>,

    /// Capture child failures on the task instead of aborting the caller
    pub catch_error: Option<bool>,

    /// Single-value mode: `data()` returns the leading value only
    pub scalar: Option<bool>,

    /// Skip admission control (still counted unless also untracked)
    pub forced: Option<bool>,

    /// Do not count the task against the ceiling
    pub untracked: Option<bool>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_handler(mut self, signal: ProcessSignal, disposition: SignalDisposition) -> Self {
        self.signal_handlers
            .get_or_insert_with(BTreeMap::new)
            .insert(signal, disposition);
        self
    }

    pub fn wait(mut self, b: bool) -> Self {
        self.wait = Some(b);
        self
    }

    pub fn catch_error(mut self, b: bool) -> Self {
        self.catch_error = Some(b);
        self
    }

    pub fn scalar(mut self, b: bool) -> Self {
        self.scalar = Some(b);
        self
    }

    pub fn forced(mut self, b: bool) -> Self {
        self.forced = Some(b);
        self
    }

    pub fn untracked(mut self, b: bool) -> Self {
        self.untracked = Some(b);
        self
    }

    /// Resolves these options on top of `defaults`.
    ///
    /// Flags set here win. Signal maps are merged per signal, with
    /// entries from `self` replacing those from `defaults`.
    pub fn resolve(&self, defaults: &RunOptions) -> ResolvedOptions {
        let flag = |own: Option<bool>, fallback: Option<bool>| own.or(fallback).unwrap_or(false);

        let mut signals = defaults.signal_handlers.clone().unwrap_or_default();
        if let Some(own) = &self.signal_handlers {
            signals.extend(own.iter().map(|(s, d)| (*s, d.clone())));
        }

        ResolvedOptions {
            signal_handlers: signals.into_iter().collect(),
            wait: flag(self.wait, defaults.wait),
            catch_error: flag(self.catch_error, defaults.catch_error),
            mode: if flag(self.scalar, defaults.scalar) {
                ReturnMode::Scalar
            } else {
                ReturnMode::List
            },
            forced: flag(self.forced, defaults.forced),
            untracked: flag(self.untracked, defaults.untracked),
        }
    }

    /// Checks that every named signal handler exists in `registry`.
    pub fn validate(&self, registry: &TaskRegistry) -> Result<(), TaskError> {
        if let Some(signals) = &self.signal_handlers {
            for (signal, disposition) in signals {
                if let SignalDisposition::Handler(name) = disposition {
                    if name.is_empty() {
                        return Err(TaskError::InvalidConfiguration(format!(
                            "Signal handler name for {signal} cannot be empty"
                        )));
                    }
                    if !registry.contains_signal_handler(name) {
                        return Err(TaskError::InvalidConfiguration(format!(
                            "Signal handler '{name}' for {signal} is not registered"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Options after merging per-call values with the runner defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub signal_handlers: Vec<(ProcessSignal, SignalDisposition)>,
    pub wait: bool,
    pub catch_error: bool,
    pub mode: ReturnMode,
    pub forced: bool,
    pub untracked: bool,
}

/// Construction-time configuration of a [`Runner`](crate::tasks::runner::Runner).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Ceiling on concurrently running tracked tasks
    pub max_parallel_tasks: usize,

    /// Sleep between admission-control polls, in milliseconds
    pub poll_interval_ms: u64,

    /// Payload size above which a warning is logged
    pub payload_warn_bytes: usize,

    /// Defaults applied to every `run()` unless overridden per call
    pub defaults: RunOptions,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            max_parallel_tasks: 4,
            poll_interval_ms: 1,
            payload_warn_bytes: PAYLOAD_WARN_THRESHOLD,
            defaults: RunOptions::default(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_parallel_tasks(mut self, max: usize) -> Self {
        self.max_parallel_tasks = max;
        self
    }

    pub fn poll_interval_ms(mut self, interval: u64) -> Self {
        self.poll_interval_ms = interval;
        self
    }

    pub fn payload_warn_bytes(mut self, bytes: usize) -> Self {
        self.payload_warn_bytes = bytes;
        self
    }

    pub fn defaults(mut self, defaults: RunOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        if self.max_parallel_tasks == 0 {
            return Err(TaskError::InvalidConfiguration(
                "max_parallel_tasks must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(TaskError::InvalidConfiguration(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.payload_warn_bytes == 0 {
            return Err(TaskError::InvalidConfiguration(
                "payload_warn_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
