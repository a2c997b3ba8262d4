//! Interactive mode: raw terminal input feeding the run controller.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use miette::{IntoDiagnostic, Result};
use sandterm::controller::RunController;
use sandterm::display::{DisplayEvent, KeyChord};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Restores cooked mode when dropped.
pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        enable_raw_mode().into_diagnostic()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

/// Read terminal events on a background thread until `done` is set.
pub fn spawn_key_reader(controller: RunController, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !done.load(Ordering::SeqCst) {
            match event::poll(POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    tracing::warn!(error = %err, "terminal event polling failed");
                    break;
                }
            }
            let outcome = match event::read() {
                Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => {
                    handle_key(&controller, key)
                }
                Ok(Event::Paste(text)) => controller.push_input(&text),
                Ok(_) => Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to read terminal event");
                    break;
                }
            };
            if let Err(err) = outcome {
                tracing::warn!(error = %err, "failed to handle terminal input");
            }
        }
    })
}

fn handle_key(controller: &RunController, key: KeyEvent) -> sandterm::SandtermResult<()> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => controller.stop(),
        KeyCode::Char(ch) if ctrl => {
            controller.handle_display_event(DisplayEvent::Key(KeyChord::ctrl(ch)))
        }
        code => match key_text(code) {
            Some(text) => controller.handle_display_event(DisplayEvent::Data(text)),
            None => Ok(()),
        },
    }
}

/// Bytes a terminal would send for a key.
fn key_text(code: KeyCode) -> Option<String> {
    let text = match code {
        KeyCode::Char(ch) => return Some(ch.to_string()),
        KeyCode::Enter => "\r",
        KeyCode::Tab => "\t",
        KeyCode::Backspace => "\x7f",
        KeyCode::Esc => "\x1b",
        KeyCode::Up => "\x1b[A",
        KeyCode::Down => "\x1b[B",
        KeyCode::Right => "\x1b[C",
        KeyCode::Left => "\x1b[D",
        KeyCode::Home => "\x1b[H",
        KeyCode::End => "\x1b[F",
        KeyCode::Delete => "\x1b[3~",
        _ => return None,
    };
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_sends_carriage_return() {
        assert_eq!(key_text(KeyCode::Enter).as_deref(), Some("\r"));
        assert_eq!(key_text(KeyCode::Char('x')).as_deref(), Some("x"));
        assert_eq!(key_text(KeyCode::F(1)), None);
    }
}
