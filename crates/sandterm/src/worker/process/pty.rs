//! Terminal mode: the child runs on a pseudo-terminal.
//!
//! The line discipline is configured so the pty is transparent for output
//! (no `\n` to `\r\n` translation) and silent for input (no echo), because
//! the controller and the display adapter already own both. Canonical mode
//! stays on, so end of input is the terminal's EOF character.

use super::{emit, Stream, Utf8Decoder, DEFAULT_TERM, READ_CHUNK_SIZE};
use crate::controller::OutputSink;
use crate::error::{SandtermError, SandtermResult};
use crate::model::TerminalSize;
use crate::worker::WorkerSpec;
use portable_pty::{
    native_pty_system, ChildKiller, CommandBuilder, ExitStatus, MasterPty, PtySize,
};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;

/// Default VEOF character (Ctrl+D).
const EOT: u8 = 0x04;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Write side of the pty master.
pub(super) struct TtyInput {
    writer: SharedWriter,
    /// Bytes written since the last newline.
    line_open: bool,
    eof_sent: bool,
}

impl TtyInput {
    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            line_open: false,
            eof_sent: false,
        }
    }

    pub(super) async fn write(&mut self, data: &[u8]) -> SandtermResult<()> {
        if self.eof_sent {
            return Err(SandtermError::io(
                "failed to write stdin",
                "input already closed",
            ));
        }
        if let Some(last) = data.last() {
            self.line_open = *last != b'\n';
        }
        write_blocking(Arc::clone(&self.writer), data.to_vec()).await
    }

    /// Signal end of input.
    ///
    /// In canonical mode EOF on a partial line only flushes that line, so a
    /// second EOF follows it.
    pub(super) async fn send_eof(&mut self) -> SandtermResult<()> {
        if self.eof_sent {
            return Ok(());
        }
        let bytes = if self.line_open { vec![EOT, EOT] } else { vec![EOT] };
        self.eof_sent = true;
        write_blocking(Arc::clone(&self.writer), bytes).await
    }
}

async fn write_blocking(writer: SharedWriter, data: Vec<u8>) -> SandtermResult<()> {
    tokio::task::spawn_blocking(move || -> io::Result<()> {
        let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&data)?;
        writer.flush()
    })
    .await
    .map_err(|err| SandtermError::internal(format!("pty write task failed: {err}")))?
    .map_err(|err| SandtermError::io("failed to write stdin", err))
}

/// A child spawned on a pty, with its output pump and exit waiter running on
/// blocking tasks.
pub(super) struct TtyChild {
    pub(super) input: TtyInput,
    pub(super) output: JoinHandle<io::Result<()>>,
    pub(super) exit: JoinHandle<io::Result<ExitStatus>>,
    pub(super) pid: Option<u32>,
    pub(super) killer: Box<dyn ChildKiller + Send + Sync>,
    pub(super) master: Box<dyn MasterPty + Send>,
}

/// Spawn the program described by `spec` on a fresh pty in `workdir`.
///
/// argv[0] is the program locator; the pty command builder does not allow
/// overriding it.
///
/// # Errors
/// `E_IO` if the pty cannot be opened or configured, or the program cannot
/// be spawned.
pub(super) fn spawn(
    spec: &WorkerSpec,
    workdir: &Path,
    size: TerminalSize,
    sink: OutputSink,
) -> SandtermResult<TtyChild> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: size.rows,
            cols: size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| SandtermError::io("failed to open pty", err))?;

    #[cfg(unix)]
    configure_line_discipline(pair.master.as_ref())?;

    let mut cmd = CommandBuilder::new(spec.program.as_str());
    cmd.args(spec.argv.iter().skip(1));
    cmd.env_clear();
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    if !spec.env.contains_key("TERM") {
        cmd.env("TERM", DEFAULT_TERM);
    }
    cmd.cwd(workdir);

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| SandtermError::io("failed to spawn program", err))?;
    // The master only reports hangup once no slave descriptor is left open.
    drop(pair.slave);

    let pid = child.process_id();
    let killer = child.clone_killer();
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| SandtermError::io("failed to clone pty reader", err))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| SandtermError::io("failed to take pty writer", err))?;

    let output = tokio::task::spawn_blocking(move || pump_blocking(reader, &sink));
    let exit = tokio::task::spawn_blocking(move || child.wait());

    Ok(TtyChild {
        input: TtyInput::new(writer),
        output,
        exit,
        pid,
        killer,
        master: pair.master,
    })
}

#[cfg(unix)]
fn configure_line_discipline(master: &dyn MasterPty) -> SandtermResult<()> {
    use nix::fcntl::OFlag;
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, OutputFlags, SetArg};
    use std::os::unix::fs::OpenOptionsExt;

    let Some(path) = master.tty_name() else {
        return Ok(());
    };
    let tty = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(OFlag::O_NOCTTY.bits())
        .open(&path)
        .map_err(|err| SandtermError::io("failed to open pty slave", err))?;
    let mut termios = tcgetattr(&tty)
        .map_err(|err| SandtermError::io("failed to read terminal attributes", err))?;
    termios.local_flags.remove(
        LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ECHOK | LocalFlags::ECHONL,
    );
    termios.output_flags.remove(OutputFlags::OPOST);
    tcsetattr(&tty, SetArg::TCSANOW, &termios)
        .map_err(|err| SandtermError::io("failed to set terminal attributes", err))
}

fn pump_blocking(mut reader: Box<dyn Read + Send>, sink: &OutputSink) -> io::Result<()> {
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => emit(
                sink,
                Stream::Stdout,
                &decoder.push(buffer.get(..count).unwrap_or_default()),
            ),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) if is_hangup(&err) => break,
            Err(err) => return Err(err),
        }
    }
    emit(sink, Stream::Stdout, &decoder.finish());
    Ok(())
}

/// Linux reports EIO on the master once the last slave descriptor closes.
#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_hangup(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<u8>>>);

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn eof_after_partial_line_is_doubled() {
        let recorder = Recorder::default();
        let mut input = TtyInput::new(Box::new(recorder.clone()));
        input.write(b"partial").await.unwrap();
        input.send_eof().await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), b"partial\x04\x04".to_vec());
        assert!(input.write(b"late").await.is_err());
    }

    #[tokio::test]
    async fn eof_at_line_start_is_single() {
        let recorder = Recorder::default();
        let mut input = TtyInput::new(Box::new(recorder.clone()));
        input.write(b"line\n").await.unwrap();
        input.send_eof().await.unwrap();
        input.send_eof().await.unwrap();
        assert_eq!(*recorder.0.lock().unwrap(), b"line\n\x04".to_vec());
    }
}
