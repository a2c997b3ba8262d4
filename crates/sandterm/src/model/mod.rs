pub mod config;
pub mod ids;
pub mod result;
pub mod terminal;

pub use config::{FsSnapshot, ProgramRef, RunConfiguration, DEFAULT_PROGRAM_NAME};
pub use ids::{Generation, RunId};
pub use result::{CompleteResult, ErrorInfo, RunOutcome, RunResult, WorkerExit};
pub use terminal::{Cursor, ScreenSnapshot, TerminalSize};
