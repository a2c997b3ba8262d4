//! Worker host contract: the narrow boundary between the controller and the
//! engine that actually executes a program.
//!
//! A [`WorkerLauncher`] constructs one [`WorkerHost`] per run, handing it the
//! run's [`WorkerSpec`] and an [`OutputSink`] through which the host reports
//! stdout, stderr and debug events. The controller then awaits
//! [`WorkerHost::start`], which resolves once the program exits, fails, or is
//! killed.
//!
//! # Cancellation
//!
//! [`WorkerHost::kill`] is idempotent and only *requests* termination: it must
//! make any in-flight `start` resolve with [`WorkerError::Killed`], but the
//! program itself may take longer to stop. Output the host keeps emitting
//! after a kill is discarded by the sink.

pub mod process;

pub use crate::controller::OutputSink;
pub use process::ProcessLauncher;

use crate::error::{SandtermResult, WorkerError};
use crate::model::{FsSnapshot, Generation, ProgramRef, RunId, WorkerExit};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Everything a worker needs to execute one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerSpec {
    pub run_id: RunId,
    pub generation: Generation,
    pub program: ProgramRef,
    /// Full argument vector, argv[0] first.
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub fs: FsSnapshot,
    /// Whether the program should believe its streams are a terminal.
    pub is_tty: bool,
}

/// Diagnostic event raised by a worker (e.g. a traced system call).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub call: String,
    #[serde(default)]
    pub detail: Value,
}

/// Constructs worker hosts.
pub trait WorkerLauncher: Send + Sync {
    /// Build a host for `spec`. The program must not start before
    /// [`WorkerHost::start`] is awaited.
    ///
    /// # Errors
    /// Any error is reported as a `crash` result of the run.
    fn launch(&self, spec: WorkerSpec, sink: OutputSink) -> SandtermResult<Arc<dyn WorkerHost>>;
}

/// One program execution owned by the controller.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Run the program to completion.
    ///
    /// # Errors
    /// - [`WorkerError::Killed`] when [`kill`](Self::kill) was called
    /// - [`WorkerError::Crashed`] for any other failure
    async fn start(&self) -> Result<WorkerExit, WorkerError>;

    /// Deliver input to the program's stdin.
    async fn push_stdin(&self, data: &str) -> SandtermResult<()>;

    /// Signal end of input.
    async fn push_eof(&self) -> SandtermResult<()>;

    /// Request termination. Idempotent.
    fn kill(&self);
}
