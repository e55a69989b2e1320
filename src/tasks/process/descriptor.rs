use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tasks::{
    registry::ReturnMode,
    signal::{ProcessSignal, SignalDisposition},
};

/// Everything the child needs to run one task, sent as a single frame
/// over its input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TaskDescriptor {
    pub(crate) task_id: u64,
    pub(crate) handler: String,
    pub(crate) args: Vec<Value>,
    pub(crate) mode: ReturnMode,
    #[serde(default)]
    pub(crate) signals: Vec<(ProcessSignal, SignalDisposition)>,
}
