use serde::{Deserialize, Serialize};

/// Terminal dimensions in rows and columns.
///
/// Default is 24 rows by 80 columns (standard VT100 size).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Cursor position (0-based) and visibility.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub row: u16,
    pub col: u16,
    pub visible: bool,
}

/// Text capture of an emulated display surface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    pub rows: u16,
    pub cols: u16,
    pub cursor: Cursor,
    /// One entry per row, trailing blanks trimmed.
    pub lines: Vec<String>,
}

impl ScreenSnapshot {
    /// Screen contents joined with newlines, trailing empty rows dropped.
    pub fn text(&self) -> String {
        let end = self
            .lines
            .iter()
            .rposition(|line| !line.is_empty())
            .map_or(0, |idx| idx + 1);
        self.lines.iter().take(end).cloned().collect::<Vec<_>>().join("\n")
    }
}
