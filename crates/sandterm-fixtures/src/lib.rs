//! Test utilities and fixtures for sandterm integration tests.
//!
//! - [`ScriptedLauncher`] - Worker launcher whose hosts play back a script of
//!   [`Step`]s instead of executing a program
//! - [`wait_until`] - Poll a condition from async tests
//! - [`temp_dir`] / [`write_config`] - Scratch directories and config files
//!
//! # Example
//!
//! ```ignore
//! use sandterm_fixtures::{ScriptedLauncher, Step};
//!
//! let launcher = ScriptedLauncher::new(vec![Step::stdout("hi\n"), Step::Exit(0)]);
//! let controller = RunController::new(config, Arc::new(launcher.clone()), display);
//! let result = controller.run().await;
//! assert_eq!(launcher.launches().len(), 1);
//! ```

pub mod helpers;
pub mod scripted;

pub use helpers::{temp_dir, wait_until, write_config};
pub use scripted::{ScriptedHost, ScriptedLauncher, Step, WorkerEvent};
