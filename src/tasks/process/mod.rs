//! Process plumbing: pipes, the child entry point, fork and reap.

pub mod channel;
pub(crate) mod child;
pub(crate) mod descriptor;
pub(crate) mod reap;
pub(crate) mod spawn;
