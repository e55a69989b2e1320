//! Process-wide default runner.
//!
//! The runner is built lazily on the first call to [`runner`], from whatever
//! [`install`] provided (or the default config and an empty registry). It
//! lives for the rest of the process.
//!
//! Known limitation: statics are never dropped, so tasks abandoned on the
//! default runner are not reaped at exit, and there is no ordering
//! guarantee relative to other process-wide state.

use std::sync::{Arc, OnceLock};

use crate::tasks::{config::RunnerConfig, error::TaskError, registry::TaskRegistry, runner::Runner};

static SETUP: OnceLock<(RunnerConfig, Arc<TaskRegistry>)> = OnceLock::new();
static RUNNER: OnceLock<Runner> = OnceLock::new();

/// Sets the configuration and registry of the default runner.
///
/// # Errors
///
/// - [`TaskError::InvalidConfiguration`] if `config` is invalid
/// - [`TaskError::InvalidState`] if called twice or after [`runner`]
pub fn install(config: RunnerConfig, registry: TaskRegistry) -> Result<(), TaskError> {
    config.validate()?;
    config.defaults.validate(&registry)?;
    if RUNNER.get().is_some() {
        return Err(TaskError::InvalidState(
            "default runner is already constructed".to_string(),
        ));
    }
    SETUP
        .set((config, Arc::new(registry)))
        .map_err(|_| TaskError::InvalidState("default runner is already installed".to_string()))
}

/// The default runner, constructed on first access.
pub fn runner() -> &'static Runner {
    RUNNER.get_or_init(|| {
        let (config, registry) = SETUP
            .get()
            .cloned()
            .unwrap_or_else(|| (RunnerConfig::default(), Arc::new(TaskRegistry::new())));
        Runner::from_parts(config, registry)
    })
}

pub fn is_initialized() -> bool {
    RUNNER.get().is_some()
}
