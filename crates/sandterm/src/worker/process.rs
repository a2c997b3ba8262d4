//! Worker host that runs a local executable as a child process.
//!
//! Each run gets a fresh temporary directory holding the materialized virtual
//! filesystem; it is the child's working directory and is read back into the
//! result snapshot when the program exits. The child sees exactly the
//! configured environment, nothing inherited from the host.
//!
//! In terminal mode (`is_tty`) the child runs on a pseudo-terminal, so
//! `isatty` holds for all three standard streams and stderr arrives on the
//! stdout channel. Otherwise the streams are separate pipes.
//!
//! Termination follows a graceful-then-forceful pattern on Unix: the child's
//! process group receives SIGTERM, and SIGKILL if it has not exited within the
//! grace period.

mod pty;

use crate::controller::OutputSink;
use crate::error::{SandtermError, SandtermResult, WorkerError};
use crate::model::{FsSnapshot, TerminalSize, WorkerExit};
use crate::worker::{WorkerHost, WorkerLauncher, WorkerSpec};
use async_trait::async_trait;
#[cfg(unix)]
use nix::sys::signal::{killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use std::fs;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Default time a killed program gets between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(200);

const READ_CHUNK_SIZE: usize = 8192;
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const EXIT_CODE_SIGNAL_BASE: i32 = 128;
const DEFAULT_TERM: &str = "xterm-256color";

/// Launches [`ProcessHost`]s.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    grace: Duration,
    size: TerminalSize,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_KILL_GRACE,
            size: TerminalSize::default(),
        }
    }

    /// Override the SIGTERM-to-SIGKILL grace period.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Window size reported to programs running in terminal mode.
    #[must_use]
    pub fn with_size(mut self, size: TerminalSize) -> Self {
        self.size = size;
        self
    }
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: WorkerSpec, sink: OutputSink) -> SandtermResult<Arc<dyn WorkerHost>> {
        if spec.program.is_empty() {
            return Err(SandtermError::config("no program configured", None));
        }
        Ok(Arc::new(ProcessHost::new(spec, sink, self.grace, self.size)))
    }
}

enum StdinState {
    /// Child not spawned yet; input is buffered.
    Pending { buffered: Vec<u8>, eof: bool },
    Pipe(ChildStdin),
    Tty(pty::TtyInput),
    Closed,
}

impl StdinState {
    async fn write(&mut self, data: &[u8]) -> SandtermResult<()> {
        match self {
            Self::Pending { buffered, eof: false } => {
                buffered.extend_from_slice(data);
                Ok(())
            }
            Self::Pipe(stdin) => write_stdin(stdin, data).await,
            Self::Tty(tty) => tty.write(data).await,
            Self::Pending { eof: true, .. } | Self::Closed => Err(SandtermError::io(
                "failed to write stdin",
                "input already closed",
            )),
        }
    }

    async fn close(&mut self) -> SandtermResult<()> {
        match self {
            Self::Pending { eof, .. } => *eof = true,
            Self::Pipe(stdin) => {
                let result = stdin.shutdown().await;
                *self = Self::Closed;
                result.map_err(|err| SandtermError::io("failed to close stdin", err))?;
            }
            // The writer stays open until the run ends; dropping it early
            // would inject a stray line into the program's input.
            Self::Tty(tty) => tty.send_eof().await?,
            Self::Closed => {}
        }
        Ok(())
    }
}

/// A single child process execution.
pub struct ProcessHost {
    spec: WorkerSpec,
    sink: OutputSink,
    grace: Duration,
    size: TerminalSize,
    killed: watch::Sender<bool>,
    started: AtomicBool,
    stdin: Mutex<StdinState>,
}

impl ProcessHost {
    pub fn new(spec: WorkerSpec, sink: OutputSink, grace: Duration, size: TerminalSize) -> Self {
        let (killed, _) = watch::channel(false);
        Self {
            spec,
            sink,
            grace,
            size,
            killed,
            started: AtomicBool::new(false),
            stdin: Mutex::new(StdinState::Pending {
                buffered: Vec::new(),
                eof: false,
            }),
        }
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(self.spec.program.as_str());
        let mut argv = self.spec.argv.iter();
        let arg0 = argv.next();
        #[cfg(unix)]
        {
            if let Some(arg0) = arg0 {
                cmd.arg0(arg0);
            }
        }
        #[cfg(not(unix))]
        let _ = arg0;
        cmd.args(argv);
        cmd.env_clear();
        cmd.envs(&self.spec.env);
        cmd.current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Replace the pending buffer with the child's real input, replaying
    /// whatever was pushed before the spawn.
    async fn open_stdin(&self, mut input: StdinState) -> SandtermResult<()> {
        let mut state = self.stdin.lock().await;
        let previous = std::mem::replace(&mut *state, StdinState::Closed);
        let StdinState::Pending { buffered, eof } = previous else {
            return Ok(());
        };
        if !buffered.is_empty() {
            input.write(&buffered).await?;
        }
        if eof {
            input.close().await?;
        }
        *state = input;
        Ok(())
    }

    async fn run_child(&self, workdir: &Path) -> Result<WorkerExit, WorkerError> {
        let mut child = self
            .command(workdir)
            .spawn()
            .map_err(|err| SandtermError::io("failed to spawn program", err))?;
        tracing::debug!(
            generation = %self.spec.generation,
            program = %self.spec.program,
            pid = ?child.id(),
            "spawned program"
        );

        let pumps = [
            child
                .stdout
                .take()
                .map(|out| tokio::spawn(pump(out, self.sink.clone(), Stream::Stdout))),
            child
                .stderr
                .take()
                .map(|err| tokio::spawn(pump(err, self.sink.clone(), Stream::Stderr))),
        ];
        let stdin = child
            .stdin
            .take()
            .map_or(StdinState::Closed, StdinState::Pipe);
        if let Err(err) = self.open_stdin(stdin).await {
            tracing::warn!(error = %err, "failed to deliver buffered input");
        }

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|err| SandtermError::io("failed to wait for program", err))?
            }
            () = kill_requested(self.killed.subscribe()) => {
                terminate(&mut child, self.grace).await;
                for pump in pumps.into_iter().flatten() {
                    pump.abort();
                }
                return Err(WorkerError::Killed);
            }
        };

        drain(pumps).await;
        self.close_stdin().await;

        let fs = read_back(workdir.to_path_buf()).await?;
        Ok(WorkerExit {
            exit_code: exit_code(status),
            fs,
        })
    }

    async fn run_tty_child(&self, workdir: &Path) -> Result<WorkerExit, WorkerError> {
        let child = pty::spawn(&self.spec, workdir, self.size, self.sink.clone())?;
        tracing::debug!(
            generation = %self.spec.generation,
            program = %self.spec.program,
            pid = ?child.pid,
            "spawned program on pty"
        );
        let pty::TtyChild {
            input,
            output,
            mut exit,
            pid,
            killer,
            master,
        } = child;
        if let Err(err) = self.open_stdin(StdinState::Tty(input)).await {
            tracing::warn!(error = %err, "failed to deliver buffered input");
        }

        let status = tokio::select! {
            status = &mut exit => match status {
                Ok(Ok(status)) => status,
                Ok(Err(err)) => {
                    return Err(SandtermError::io("failed to wait for program", err).into());
                }
                Err(err) => {
                    return Err(SandtermError::internal(format!("wait task failed: {err}")).into());
                }
            },
            () = kill_requested(self.killed.subscribe()) => {
                terminate_tty(pid, &mut exit, killer, self.grace).await;
                return Err(WorkerError::Killed);
            }
        };

        drain([Some(output), None]).await;
        self.close_stdin().await;
        drop(master);

        let fs = read_back(workdir.to_path_buf()).await?;
        Ok(WorkerExit {
            exit_code: i32::try_from(status.exit_code()).unwrap_or(-1),
            fs,
        })
    }

    async fn close_stdin(&self) {
        *self.stdin.lock().await = StdinState::Closed;
    }
}

#[async_trait]
impl WorkerHost for ProcessHost {
    async fn start(&self) -> Result<WorkerExit, WorkerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SandtermError::worker("worker already started").into());
        }
        if *self.killed.borrow() {
            return Err(WorkerError::Killed);
        }
        let workdir = tempfile::Builder::new()
            .prefix("sandterm-")
            .tempdir()
            .map_err(|err| SandtermError::io("failed to create working directory", err))?;
        materialize(workdir.path(), &self.spec.fs)?;
        if self.spec.is_tty {
            self.run_tty_child(workdir.path()).await
        } else {
            self.run_child(workdir.path()).await
        }
    }

    async fn push_stdin(&self, data: &str) -> SandtermResult<()> {
        self.stdin.lock().await.write(data.as_bytes()).await
    }

    async fn push_eof(&self) -> SandtermResult<()> {
        self.stdin.lock().await.close().await
    }

    fn kill(&self) {
        self.killed.send_replace(true);
    }
}

async fn kill_requested(mut killed: watch::Receiver<bool>) {
    let _ = killed.wait_for(|killed| *killed).await;
}

async fn write_stdin(stdin: &mut ChildStdin, data: &[u8]) -> SandtermResult<()> {
    stdin
        .write_all(data)
        .await
        .map_err(|err| SandtermError::io("failed to write stdin", err))?;
    stdin
        .flush()
        .await
        .map_err(|err| SandtermError::io("failed to flush stdin", err))
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

async fn pump<R>(mut reader: R, sink: OutputSink, stream: Stream) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];
    let mut decoder = Utf8Decoder::default();
    loop {
        let count = reader.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        emit(&sink, stream, &decoder.push(buffer.get(..count).unwrap_or_default()));
    }
    emit(&sink, stream, &decoder.finish());
    Ok(())
}

fn emit(sink: &OutputSink, stream: Stream, text: &str) {
    if text.is_empty() {
        return;
    }
    match stream {
        Stream::Stdout => sink.stdout(text),
        Stream::Stderr => sink.stderr(text),
    };
}

async fn drain(pumps: [Option<JoinHandle<std::io::Result<()>>>; 2]) {
    for pump in pumps.into_iter().flatten() {
        match tokio::time::timeout(IO_DRAIN_TIMEOUT, pump).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => tracing::warn!(error = %err, "output stream failed"),
            Ok(Err(err)) => tracing::warn!(error = %err, "output reader task failed"),
            // A descendant still holds the pipe open.
            Err(_) => tracing::warn!("timed out draining program output"),
        }
    }
}

/// Incremental UTF-8 decoder that carries incomplete sequences across chunks.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(
                        self.pending.get(..valid).unwrap_or_default(),
                    ));
                    match err.error_len() {
                        // Incomplete trailing sequence: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return;
    };
    // Process IDs are always positive and fit in i32
    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(pid as i32);
    signal_process_group(pgid, Signal::SIGTERM);
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    signal_process_group(pgid, Signal::SIGKILL);
    let _ = child.wait().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) {
    let _ = child.kill().await;
}

/// Stop a pty child whose wait runs on a blocking task.
async fn terminate_tty<F>(
    pid: Option<u32>,
    exited: &mut F,
    mut killer: Box<dyn portable_pty::ChildKiller + Send + Sync>,
    grace: Duration,
) where
    F: Future + Unpin,
{
    #[cfg(unix)]
    if let Some(pid) = pid {
        // Process IDs are always positive and fit in i32
        #[allow(clippy::cast_possible_wrap)]
        let pgid = Pid::from_raw(pid as i32);
        signal_process_group(pgid, Signal::SIGTERM);
        if tokio::time::timeout(grace, &mut *exited).await.is_ok() {
            return;
        }
        signal_process_group(pgid, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = (pid, grace);
    if let Err(err) = killer.kill() {
        tracing::debug!(error = %err, "pty child already gone");
    }
    let _ = exited.await;
}

#[cfg(unix)]
fn signal_process_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        // ESRCH means the group is already gone
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => tracing::warn!(%pgid, ?signal, error = %err, "failed to signal process group"),
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return EXIT_CODE_SIGNAL_BASE + signal;
        }
    }
    -1
}

/// Resolve a virtual path inside `root`, rejecting anything that would escape it.
fn host_path(root: &Path, virtual_path: &str) -> SandtermResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(virtual_path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(SandtermError::config(
                    "virtual path escapes the filesystem root",
                    serde_json::json!({ "path": virtual_path }),
                ));
            }
        }
    }
    if resolved == root {
        return Err(SandtermError::config(
            "virtual path names the filesystem root",
            serde_json::json!({ "path": virtual_path }),
        ));
    }
    Ok(resolved)
}

fn materialize(root: &Path, snapshot: &FsSnapshot) -> SandtermResult<()> {
    for (virtual_path, content) in snapshot.iter() {
        let target = host_path(root, virtual_path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| SandtermError::io("failed to create directory", err))?;
        }
        fs::write(&target, content)
            .map_err(|err| SandtermError::io("failed to write virtual file", err))?;
    }
    Ok(())
}

async fn read_back(root: PathBuf) -> SandtermResult<FsSnapshot> {
    tokio::task::spawn_blocking(move || -> SandtermResult<FsSnapshot> {
        let mut snapshot = FsSnapshot::new();
        collect_files(&root, &root, &mut snapshot)?;
        Ok(snapshot)
    })
    .await
    .map_err(|err| SandtermError::internal(format!("filesystem snapshot task failed: {err}")))?
}

fn collect_files(root: &Path, dir: &Path, snapshot: &mut FsSnapshot) -> SandtermResult<()> {
    let entries =
        fs::read_dir(dir).map_err(|err| SandtermError::io("failed to read directory", err))?;
    for entry in entries {
        let entry = entry.map_err(|err| SandtermError::io("failed to read directory", err))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| SandtermError::io("failed to stat file", err))?;
        if file_type.is_dir() {
            collect_files(root, &path, snapshot)?;
        } else if file_type.is_file() {
            let content =
                fs::read(&path).map_err(|err| SandtermError::io("failed to read file", err))?;
            snapshot.insert(virtual_path(root, &path), content);
        }
    }
    Ok(())
}

fn virtual_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_split_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        let first = decoder.push(&bytes[..2]);
        let second = decoder.push(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{fffd}b");
        decoder.push(b"\xe2\x82");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[test]
    fn host_path_rejects_escapes() {
        let root = Path::new("/tmp/root");
        assert_eq!(
            host_path(root, "/a/b.txt").unwrap(),
            PathBuf::from("/tmp/root/a/b.txt")
        );
        assert_eq!(
            host_path(root, "c.txt").unwrap(),
            PathBuf::from("/tmp/root/c.txt")
        );
        assert!(host_path(root, "/../etc/passwd").is_err());
        assert!(host_path(root, "/").is_err());
    }

    #[test]
    fn materialize_and_collect_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut snapshot = FsSnapshot::new();
        snapshot.insert("/data/input.txt", "42");
        snapshot.insert("/top.bin", vec![1, 2, 3]);
        materialize(dir.path(), &snapshot).unwrap();

        let mut collected = FsSnapshot::new();
        collect_files(dir.path(), dir.path(), &mut collected).unwrap();
        assert_eq!(collected, snapshot);
    }
}
