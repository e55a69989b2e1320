//! # tcrm-isolate
//!
//! A Rust library for running units of work in separate operating-system processes.
//! Built for batch workloads that want crash and memory isolation between tasks
//! rather than thread-level concurrency.
//!
//! ## Features
//!
//! - **Process Isolation**: Every task runs in its own forked child process
//! - **Admission Control**: A configurable ceiling on concurrently running tasks
//! - **Handshake**: The parent only proceeds once the child confirms its setup
//! - **Result Transfer**: Return values travel back over a pipe as self-describing JSON
//! - **Error Capture**: Child failures are either captured on the task or fatal to the caller
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tcrm_isolate::tasks::{
//!     config::{RunOptions, RunnerConfig},
//!     registry::TaskRegistry,
//!     runner::{Runner, WorkUnit},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TaskRegistry::new().function("add", |(a, b): (i64, i64)| a + b);
//!     let runner = Runner::new(RunnerConfig::new().max_parallel_tasks(2), registry)?;
//!
//!     let task = runner.run(
//!         WorkUnit::new("add").arg(2).arg(3),
//!         RunOptions::new().scalar(true),
//!     )?;
//!
//!     assert_eq!(task.get()?, serde_json::json!(5));
//!     Ok(())
//! }
//! ```
//!
//! ## Capturing Failures
//!
//! ```rust,no_run
//! use tcrm_isolate::tasks::{
//!     config::{RunOptions, RunnerConfig},
//!     registry::TaskRegistry,
//!     runner::{Runner, WorkUnit},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = TaskRegistry::new().handler("boom", |_call| Err("boom".into()));
//!     let runner = Runner::new(RunnerConfig::default(), registry)?;
//!
//!     let task = runner.run(WorkUnit::new("boom"), RunOptions::new().catch_error(true))?;
//!     assert!(!task.wait());
//!     assert!(task.data().is_err());
//!     Ok(())
//! }
//! ```
//!
//! ## Platform
//!
//! Process creation uses `fork`, so the crate only builds on Unix targets.
//!
//! ## Optional Features
//!
//! - `tokio` (default): async variants of the blocking waits
//! - `tracing`: Enable structured logging integration

#[cfg(not(unix))]
compile_error!("tcrm-isolate requires a Unix target");

pub mod helper;
pub mod tasks;
