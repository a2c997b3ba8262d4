//! Per-run accumulation of everything crossing the sandbox boundary.
//!
//! A [`SessionTranscript`] is owned by exactly one run. Buffers are
//! append-only, never truncated, and returned verbatim in `complete` results.

use crate::model::{CompleteResult, WorkerExit};
use std::borrow::Cow;

/// Accumulated stdout, stderr, combined tty and stdin history of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionTranscript {
    stdout: String,
    stderr: String,
    tty: String,
    stdin: String,
}

impl SessionTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_stdout(&mut self, chunk: &str) {
        self.stdout.push_str(chunk);
        self.tty.push_str(chunk);
    }

    pub fn record_stderr(&mut self, chunk: &str) {
        self.stderr.push_str(chunk);
        self.tty.push_str(chunk);
    }

    /// Input shown on the display by local echo.
    pub fn record_echo(&mut self, data: &str) {
        self.tty.push_str(data);
    }

    /// Input forwarded to the worker.
    pub fn record_stdin(&mut self, data: &str) {
        self.stdin.push_str(data);
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn tty(&self) -> &str {
        &self.tty
    }

    pub fn stdin(&self) -> &str {
        &self.stdin
    }

    /// Merge the worker's exit report with the measured streams.
    pub fn into_complete(self, exit: WorkerExit) -> CompleteResult {
        CompleteResult {
            exit_code: exit.exit_code,
            fs: exit.fs,
            stdout: self.stdout,
            stderr: self.stderr,
            stdin: self.stdin,
            tty: self.tty,
        }
    }
}

/// Map every carriage return from keyboard input to a newline.
///
/// The mapping is one-for-one, so the result does not depend on how input
/// was split into chunks.
pub fn normalize_input(data: &str) -> Cow<'_, str> {
    if data.contains('\r') {
        Cow::Owned(data.replace('\r', "\n"))
    } else {
        Cow::Borrowed(data)
    }
}
