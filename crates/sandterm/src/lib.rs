//! Sandterm: run lifecycle and streaming I/O controller for sandboxed terminal programs.
//!
//! A [`RunController`] owns a [`RunConfiguration`], launches at most one worker
//! at a time through a [`WorkerLauncher`], streams its output to a
//! [`DisplaySurface`], forwards user input in order, and assembles a
//! [`RunResult`] when the run ends. Starting a new run or calling
//! [`RunController::stop`] supersedes the active worker; anything the old
//! worker still reports afterwards is discarded.

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod model;
pub mod transcript;
pub mod worker;

pub use crate::config::{ConfigAttribute, ConfigUpdate, UpdateEffect};
pub use crate::controller::{OutputSink, RunController, RunPhase};
pub use crate::display::{DisplayEvent, DisplaySurface, KeyChord};
pub use crate::error::{ErrorCode, SandtermError, SandtermResult, WorkerError};
pub use crate::model::*;
pub use crate::worker::{DebugEvent, ProcessLauncher, WorkerHost, WorkerLauncher, WorkerSpec};
