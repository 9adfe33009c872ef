use serde::{Deserialize, Serialize};

use crate::actions::types::Action;

/// Lifecycle states of one automation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Finished,
    Errored,
}

/// One loop iteration as seen by the hosting process. `action` is absent
/// when the directive could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub thinking: String,
    pub action: Option<Action>,
    pub finished: bool,
    pub message: Option<String>,
}
