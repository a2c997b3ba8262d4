//! Display adapter contract and bundled adapters.
//!
//! The controller only ever writes text to a display, resets, focuses and
//! clears it. Rendering, line discipline and resizing belong to the adapter.
//! Input flows the other way as [`DisplayEvent`]s that the host hands to
//! [`RunController::handle_display_event`](crate::controller::RunController::handle_display_event).

pub mod screen;

pub use screen::{convert_eol, ScreenDisplay};

use std::sync::Mutex;

/// Visual surface a run writes to.
///
/// Methods take `&self` because the controller shares one surface between the
/// run loop and input handlers; implementations use interior mutability.
pub trait DisplaySurface: Send + Sync {
    /// Write program output or echoed input.
    fn write(&self, data: &str);

    /// Write program stderr output.
    ///
    /// Defaults to [`write`](Self::write), so stderr is indistinguishable
    /// unless the adapter has a way to show it differently.
    fn write_stderr(&self, data: &str) {
        self.write(data);
    }

    /// Drop the previous transcript and restore initial state.
    fn reset(&self);

    /// Give the surface input focus.
    fn focus(&self);

    /// Clear visible contents.
    fn clear(&self);
}

/// Key combination reported by a display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyChord {
    pub key: char,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyChord {
    pub fn plain(key: char) -> Self {
        Self {
            key,
            ctrl: false,
            alt: false,
        }
    }

    pub fn ctrl(key: char) -> Self {
        Self {
            key,
            ctrl: true,
            alt: false,
        }
    }

    /// Ctrl+D signals end of input.
    pub fn is_end_of_input(&self) -> bool {
        self.ctrl && !self.alt && self.key.eq_ignore_ascii_case(&'d')
    }
}

/// Raw input event raised by a display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayEvent {
    /// Typed or pasted text.
    Data(String),
    /// Key combination, used to detect the end-of-input gesture.
    Key(KeyChord),
}

/// Display that discards everything, for headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDisplay;

impl DisplaySurface for NullDisplay {
    fn write(&self, _data: &str) {}
    fn reset(&self) {}
    fn focus(&self) {}
    fn clear(&self) {}
}

/// Operation performed on a [`MemoryDisplay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayOp {
    Write(String),
    WriteStderr(String),
    Reset,
    Focus,
    Clear,
}

/// Display that records every operation in order.
#[derive(Debug, Default)]
pub struct MemoryDisplay {
    ops: Mutex<Vec<DisplayOp>>,
    distinguish_stderr: bool,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record stderr writes as [`DisplayOp::WriteStderr`] instead of plain writes.
    pub fn with_stderr_channel() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            distinguish_stderr: true,
        }
    }

    pub fn ops(&self) -> Vec<DisplayOp> {
        self.ops.lock().map(|ops| ops.clone()).unwrap_or_default()
    }

    /// Concatenation of all text written since the last reset.
    pub fn contents(&self) -> String {
        let ops = self.ops();
        let start = ops
            .iter()
            .rposition(|op| matches!(op, DisplayOp::Reset))
            .map_or(0, |idx| idx + 1);
        ops.iter()
            .skip(start)
            .filter_map(|op| match op {
                DisplayOp::Write(text) | DisplayOp::WriteStderr(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, op: DisplayOp) {
        if let Ok(mut ops) = self.ops.lock() {
            ops.push(op);
        }
    }
}

impl DisplaySurface for MemoryDisplay {
    fn write(&self, data: &str) {
        self.push(DisplayOp::Write(data.to_string()));
    }

    fn write_stderr(&self, data: &str) {
        if self.distinguish_stderr {
            self.push(DisplayOp::WriteStderr(data.to_string()));
        } else {
            self.write(data);
        }
    }

    fn reset(&self) {
        self.push(DisplayOp::Reset);
    }

    fn focus(&self) {
        self.push(DisplayOp::Focus);
    }

    fn clear(&self) {
        self.push(DisplayOp::Clear);
    }
}
