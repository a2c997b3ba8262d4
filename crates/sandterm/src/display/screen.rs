//! Emulated screen display backed by `vt100`.
//!
//! [`ScreenDisplay`] processes everything the controller writes through an
//! ANSI/VT100 parser so hosts without a real terminal can still inspect what a
//! user would have seen, including cursor movement and clears.
//!
//! # Example
//!
//! ```
//! use sandterm::display::{DisplaySurface, ScreenDisplay};
//! use sandterm::model::TerminalSize;
//!
//! let display = ScreenDisplay::new(TerminalSize { rows: 4, cols: 20 });
//! display.write("Hello, \x1b[1mBold\x1b[0m\nWorld");
//! let snapshot = display.snapshot();
//! assert_eq!(snapshot.lines[0], "Hello, Bold");
//! assert_eq!(snapshot.lines[1], "World");
//! ```

use crate::display::DisplaySurface;
use crate::model::{Cursor, ScreenSnapshot, TerminalSize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use vt100::Parser;

const CLEAR_SCREEN: &[u8] = b"\x1b[H\x1b[2J";

/// Display adapter that renders into an in-memory terminal emulator.
pub struct ScreenDisplay {
    parser: Mutex<Parser>,
    size: TerminalSize,
    convert_eol: bool,
    focused: AtomicBool,
}

impl ScreenDisplay {
    /// Create a screen that converts bare `\n` into `\r\n`, as programs
    /// writing to a cooked terminal expect.
    pub fn new(size: TerminalSize) -> Self {
        Self {
            parser: Mutex::new(Parser::new(size.rows, size.cols, 0)),
            size,
            convert_eol: true,
            focused: AtomicBool::new(false),
        }
    }

    /// Create a screen that feeds bytes to the emulator unchanged.
    pub fn raw(size: TerminalSize) -> Self {
        Self {
            convert_eol: false,
            ..Self::new(size)
        }
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::SeqCst)
    }

    /// Capture the current screen contents.
    pub fn snapshot(&self) -> ScreenSnapshot {
        match self.parser.lock() {
            Ok(parser) => snapshot_of(parser.screen()),
            Err(poisoned) => snapshot_of(poisoned.get_ref().screen()),
        }
    }

    fn process(&self, data: &[u8]) {
        if let Ok(mut parser) = self.parser.lock() {
            parser.process(data);
        }
    }
}

impl DisplaySurface for ScreenDisplay {
    fn write(&self, data: &str) {
        if self.convert_eol {
            self.process(convert_eol(data).as_bytes());
        } else {
            self.process(data.as_bytes());
        }
    }

    fn reset(&self) {
        if let Ok(mut parser) = self.parser.lock() {
            *parser = Parser::new(self.size.rows, self.size.cols, 0);
        }
    }

    fn focus(&self) {
        self.focused.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.process(CLEAR_SCREEN);
    }
}

/// Expand bare `\n` into `\r\n`, leaving existing `\r\n` pairs alone.
pub fn convert_eol(data: &str) -> String {
    let mut out = String::with_capacity(data.len());
    let mut previous = None;
    for ch in data.chars() {
        if ch == '\n' && previous != Some('\r') {
            out.push('\r');
        }
        out.push(ch);
        previous = Some(ch);
    }
    out
}

fn snapshot_of(screen: &vt100::Screen) -> ScreenSnapshot {
    let (rows, cols) = screen.size();
    let (row, col) = screen.cursor_position();
    ScreenSnapshot {
        rows,
        cols,
        cursor: Cursor {
            row,
            col,
            visible: !screen.hide_cursor(),
        },
        lines: screen
            .rows(0, cols)
            .map(|line| line.trim_end().to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> TerminalSize {
        TerminalSize { rows: 5, cols: 20 }
    }

    #[test]
    fn newline_is_converted_for_cooked_output() {
        let display = ScreenDisplay::new(small());
        display.write("ab\ncd");
        let snapshot = display.snapshot();
        assert_eq!(snapshot.lines[0], "ab");
        assert_eq!(snapshot.lines[1], "cd");
    }

    #[test]
    fn raw_screen_keeps_column_on_newline() {
        let display = ScreenDisplay::raw(small());
        display.write("ab\ncd");
        let snapshot = display.snapshot();
        assert_eq!(snapshot.lines[1], "  cd");
    }

    #[test]
    fn reset_and_clear_blank_the_screen() {
        let display = ScreenDisplay::new(small());
        display.write("hello");
        display.clear();
        assert_eq!(display.snapshot().text(), "");

        display.write("again");
        display.reset();
        assert_eq!(display.snapshot().text(), "");
        assert_eq!(display.snapshot().cursor.col, 0);
    }

    #[test]
    fn focus_is_tracked() {
        let display = ScreenDisplay::new(small());
        assert!(!display.is_focused());
        display.focus();
        assert!(display.is_focused());
    }

    #[test]
    fn eol_conversion_keeps_crlf() {
        assert_eq!(convert_eol("a\r\nb\nc"), "a\r\nb\r\nc");
    }
}
