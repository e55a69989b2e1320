#[cfg(feature = "tokio")]
pub mod async_tokio;

pub mod codec;
pub mod config;
pub mod error;
pub mod global;
pub mod process;
pub mod registry;
pub mod runner;
pub mod signal;
pub mod state;
pub mod task;
