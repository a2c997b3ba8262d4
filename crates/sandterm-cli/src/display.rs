//! Display adapters backed by the process's own stdout/stderr.

use crossterm::{
    cursor::MoveTo,
    queue,
    terminal::{Clear, ClearType},
};
use sandterm::display::{convert_eol, DisplaySurface};
use std::io::{self, Write};

/// Writes program output straight through, stderr to stderr.
///
/// Used in headless mode where the host terminal (if any) keeps its own
/// line discipline.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamDisplay;

impl DisplaySurface for StreamDisplay {
    fn write(&self, data: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(data.as_bytes());
        let _ = stdout.flush();
    }

    fn write_stderr(&self, data: &str) {
        let mut stderr = io::stderr().lock();
        let _ = stderr.write_all(data.as_bytes());
        let _ = stderr.flush();
    }

    fn reset(&self) {}
    fn focus(&self) {}
    fn clear(&self) {}
}

/// Display for a terminal in raw mode.
///
/// Raw mode disables output post-processing, so bare `\n` is expanded to
/// `\r\n` here.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawTerminalDisplay;

impl RawTerminalDisplay {
    fn clear_screen() {
        let mut stdout = io::stdout().lock();
        let _ = queue!(stdout, Clear(ClearType::All), MoveTo(0, 0));
        let _ = stdout.flush();
    }
}

impl DisplaySurface for RawTerminalDisplay {
    fn write(&self, data: &str) {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(convert_eol(data).as_bytes());
        let _ = stdout.flush();
    }

    fn reset(&self) {
        Self::clear_screen();
    }

    fn focus(&self) {}

    fn clear(&self) {
        Self::clear_screen();
    }
}
