use crate::model::FsSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized failure description carried by `crash` results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `E_WORKER`).
    pub code: String,
    /// Human-readable, never empty.
    pub message: String,
    /// Optional machine-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// What a worker host reports when the program finishes on its own.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerExit {
    pub exit_code: i32,
    /// Filesystem as the program left it.
    pub fs: FsSnapshot,
}

/// Fields of a run that ran to natural completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResult {
    pub exit_code: i32,
    pub fs: FsSnapshot,
    pub stdout: String,
    pub stderr: String,
    /// Every input payload forwarded during the run, in order.
    pub stdin: String,
    /// Arrival-ordered interleaving of output and echoed input.
    pub tty: String,
}

/// Terminal value of one `run()` call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resultType", rename_all = "snake_case")]
pub enum RunResult {
    /// The program exited by itself.
    Complete(CompleteResult),
    /// The run was cancelled by `stop()` or superseded by a newer `run()`.
    Terminated,
    /// The worker failed for a reason other than cancellation.
    Crash { error: ErrorInfo },
}

/// Terminal state of the run lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Terminated,
    Crashed,
}

impl RunResult {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            Self::Complete(_) => RunOutcome::Completed,
            Self::Terminated => RunOutcome::Terminated,
            Self::Crash { .. } => RunOutcome::Crashed,
        }
    }

    pub fn as_complete(&self) -> Option<&CompleteResult> {
        match self {
            Self::Complete(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Crash { error } => Some(error),
            _ => None,
        }
    }
}
