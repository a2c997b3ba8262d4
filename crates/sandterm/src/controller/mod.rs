//! Run lifecycle controller.
//!
//! [`RunController`] owns the single-active-run invariant. Each call to
//! [`RunController::run`] kills any worker still running, resets the display,
//! launches a fresh worker through the configured [`WorkerLauncher`], streams
//! its output into a per-run [`SessionTranscript`] and the display, and
//! resolves to exactly one [`RunResult`].
//!
//! # Key Operations
//!
//! - [`RunController::run`] - start a run and wait for its outcome
//! - [`RunController::stop`] - cancel the active run (it resolves `terminated`)
//! - [`RunController::push_input`] / [`RunController::push_eof`] - feed stdin
//! - [`RunController::apply_update`] - change configuration, honouring `autorun`
//!
//! # Lifecycle
//!
//! `Idle -> Starting -> Running -> (Completed | Terminated | Crashed) -> Idle`.
//! A `run()` issued while another is starting or running supersedes it: the
//! older call resolves `terminated` and its late output is discarded because
//! every worker is tagged with a [`Generation`] that must match the active one.
//!
//! # Example
//!
//! ```no_run
//! use sandterm::controller::RunController;
//! use sandterm::display::NullDisplay;
//! use sandterm::model::{ProgramRef, RunConfiguration, RunResult};
//! use sandterm::worker::ProcessLauncher;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = RunConfiguration {
//!     src: ProgramRef::new("/bin/echo"),
//!     name: "echo".to_string(),
//!     args: vec!["hello".to_string()],
//!     ..RunConfiguration::default()
//! };
//! let controller = RunController::new(
//!     config,
//!     Arc::new(ProcessLauncher::new()),
//!     Arc::new(NullDisplay),
//! );
//! if let RunResult::Complete(done) = controller.run().await {
//!     assert_eq!(done.stdout, "hello\n");
//! }
//! # }
//! ```

mod sink;

pub use sink::OutputSink;

use crate::config::{ConfigUpdate, UpdateEffect};
use crate::display::{DisplayEvent, DisplaySurface};
use crate::error::{SandtermError, SandtermResult, WorkerError};
use crate::model::{Generation, RunConfiguration, RunId, RunResult, WorkerExit};
use crate::transcript::{normalize_input, SessionTranscript};
use crate::worker::{WorkerHost, WorkerLauncher, WorkerSpec};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Observable lifecycle phase of a controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// No run in progress.
    Idle,
    /// Previous worker being killed and the new one constructed.
    Starting,
    /// A worker is executing the program.
    Running,
}

enum StdinMessage {
    Data(String),
    Eof,
}

/// Live handle to the worker of the active session.
struct WorkerHandle {
    host: Arc<dyn WorkerHost>,
    input: mpsc::UnboundedSender<StdinMessage>,
    forwarder: JoinHandle<()>,
}

impl WorkerHandle {
    fn attach(host: Arc<dyn WorkerHost>, generation: Generation) -> Self {
        let (input, mut queue) = mpsc::unbounded_channel();
        let target = Arc::clone(&host);
        // One forwarder per worker keeps stdin in call order no matter how
        // fast input arrives.
        let forwarder = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                let outcome = match message {
                    StdinMessage::Data(data) => target.push_stdin(&data).await,
                    StdinMessage::Eof => target.push_eof().await,
                };
                if let Err(err) = outcome {
                    tracing::warn!(%generation, error = %err, "failed to forward input to worker");
                }
            }
        });
        Self {
            host,
            input,
            forwarder,
        }
    }

    fn release(self) {
        self.forwarder.abort();
    }

    fn kill(self) {
        self.forwarder.abort();
        self.host.kill();
    }
}

struct ActiveSession {
    run_id: RunId,
    generation: Generation,
    worker: Option<WorkerHandle>,
    transcript: SessionTranscript,
}

struct ControllerState {
    config: RunConfiguration,
    has_run: bool,
    phase: RunPhase,
    next_generation: u64,
    session: Option<ActiveSession>,
}

impl ControllerState {
    /// Remove the session if it still belongs to `generation`.
    fn take_session(&mut self, generation: Generation) -> Option<ActiveSession> {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.generation == generation)
        {
            self.phase = RunPhase::Idle;
            self.session.take()
        } else {
            None
        }
    }
}

pub(crate) struct Shared {
    launcher: Arc<dyn WorkerLauncher>,
    display: Arc<dyn DisplaySurface>,
    state: Mutex<ControllerState>,
}

impl Shared {
    fn lock(&self) -> SandtermResult<MutexGuard<'_, ControllerState>> {
        self.state
            .lock()
            .map_err(|_| SandtermError::internal("controller state lock poisoned"))
    }

    fn is_current(&self, generation: Generation) -> bool {
        self.lock().is_ok_and(|state| {
            state
                .session
                .as_ref()
                .is_some_and(|session| session.generation == generation)
        })
    }
}

/// Clears the session of one run when dropped, whatever path the run took.
struct SessionGuard<'a> {
    shared: &'a Shared,
    generation: Generation,
}

impl SessionGuard<'_> {
    fn finish(&self) -> Option<ActiveSession> {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        state.take_session(self.generation)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.finish() {
            // Only reached when the run future was dropped mid-flight.
            if let Some(worker) = session.worker {
                worker.kill();
            }
        }
    }
}

/// Handle to a run controller. Cloning yields another handle to the same
/// controller.
#[derive(Clone)]
pub struct RunController {
    shared: Arc<Shared>,
}

impl RunController {
    pub fn new(
        config: RunConfiguration,
        launcher: Arc<dyn WorkerLauncher>,
        display: Arc<dyn DisplaySurface>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                launcher,
                display,
                state: Mutex::new(ControllerState {
                    config,
                    has_run: false,
                    phase: RunPhase::Idle,
                    next_generation: 1,
                    session: None,
                }),
            }),
        }
    }

    /// Start a run and wait for its outcome.
    ///
    /// Never fails: worker failures become [`RunResult::Crash`] and
    /// cancellation becomes [`RunResult::Terminated`]. The active session is
    /// cleared before this returns, and also if the returned future is dropped.
    pub async fn run(&self) -> RunResult {
        let (run_id, generation, spec, previous) = match self.begin() {
            Ok(started) => started,
            Err(err) => return self.crash(&err),
        };
        let guard = SessionGuard {
            shared: &self.shared,
            generation,
        };

        if let Some(previous) = previous {
            tracing::info!(%run_id, %generation, "killing previous worker");
            previous.kill();
        }

        self.shared.display.reset();
        self.shared.display.focus();

        let host = match self.attach_worker(spec) {
            Ok(Some(host)) => host,
            Ok(None) => {
                tracing::info!(%run_id, %generation, "run superseded before start");
                return RunResult::Terminated;
            }
            Err(err) => {
                if guard.finish().is_none() {
                    return RunResult::Terminated;
                }
                return self.crash(&err);
            }
        };

        tracing::info!(%run_id, %generation, "run started");
        let outcome = host.start().await;
        let session = guard.finish();
        self.classify(run_id, outcome, session)
    }

    /// Reserve a generation, detach any previous session and snapshot the
    /// configuration.
    fn begin(
        &self,
    ) -> SandtermResult<(RunId, Generation, WorkerSpec, Option<WorkerHandle>)> {
        let mut state = self.shared.lock()?;
        state.has_run = true;
        let previous = state.session.take().and_then(|session| session.worker);
        let generation = Generation::new(state.next_generation);
        state.next_generation += 1;
        let run_id = RunId::new();
        state.phase = RunPhase::Starting;
        state.session = Some(ActiveSession {
            run_id,
            generation,
            worker: None,
            transcript: SessionTranscript::new(),
        });
        let config = &state.config;
        let spec = WorkerSpec {
            run_id,
            generation,
            program: config.src.clone(),
            argv: config.argv(),
            env: config.env.clone(),
            fs: config.fs.clone(),
            is_tty: !config.disable_tty,
        };
        Ok((run_id, generation, spec, previous))
    }

    /// Construct the worker and install it as the active one.
    ///
    /// Returns `Ok(None)` if another run took over in the meantime.
    fn attach_worker(&self, spec: WorkerSpec) -> SandtermResult<Option<Arc<dyn WorkerHost>>> {
        let generation = spec.generation;
        let sink = OutputSink::new(generation, Arc::downgrade(&self.shared));
        let host = self.shared.launcher.launch(spec, sink)?;

        let mut state = self.shared.lock()?;
        let Some(session) = state
            .session
            .as_mut()
            .filter(|session| session.generation == generation)
        else {
            host.kill();
            return Ok(None);
        };
        session.worker = Some(WorkerHandle::attach(Arc::clone(&host), generation));
        state.phase = RunPhase::Running;
        Ok(Some(host))
    }

    fn classify(
        &self,
        run_id: RunId,
        outcome: Result<WorkerExit, WorkerError>,
        session: Option<ActiveSession>,
    ) -> RunResult {
        let Some(session) = session else {
            // Stopped or superseded: whatever the worker reported is moot.
            tracing::info!(%run_id, "run terminated");
            return RunResult::Terminated;
        };
        if let Some(worker) = session.worker {
            worker.release();
        }
        match outcome {
            Ok(exit) => {
                tracing::info!(%run_id, exit_code = exit.exit_code, "run completed");
                RunResult::Complete(session.transcript.into_complete(exit))
            }
            Err(WorkerError::Killed) => {
                tracing::info!(%run_id, "run terminated");
                RunResult::Terminated
            }
            Err(WorkerError::Crashed(err)) => self.crash(&err),
        }
    }

    fn crash(&self, err: &SandtermError) -> RunResult {
        tracing::error!(code = %err.code, error = %err.message, context = ?err.context, "run crashed");
        self.shared
            .display
            .write(&format!("\nsandbox crashed: {}", err.message));
        RunResult::Crash {
            error: err.to_error_info(),
        }
    }

    /// Cancel the active run, if any.
    ///
    /// The pending [`run`](Self::run) call resolves `terminated`; this method
    /// does not wait for it.
    pub fn stop(&self) -> SandtermResult<()> {
        let session = {
            let mut state = self.shared.lock()?;
            let session = state.session.take();
            if session.is_some() {
                state.phase = RunPhase::Idle;
            }
            session
        };
        let Some(session) = session else {
            tracing::debug!("stop ignored: no active run");
            return Ok(());
        };
        tracing::info!(run_id = %session.run_id, generation = %session.generation, "stopping run");
        if let Some(worker) = session.worker {
            worker.kill();
        }
        Ok(())
    }

    /// Forward input to the running program.
    ///
    /// Carriage returns become newlines. Unless echo is disabled the input is
    /// written to the display first. Ignored when no worker is running.
    pub fn push_input(&self, data: &str) -> SandtermResult<()> {
        let data = normalize_input(data);
        let mut state = self.shared.lock()?;
        let echo = !state.config.disable_echo;
        let Some(session) = state.session.as_mut() else {
            tracing::debug!("input ignored: no active run");
            return Ok(());
        };
        let Some(worker) = session.worker.as_ref() else {
            tracing::debug!("input ignored: worker not started");
            return Ok(());
        };
        if echo {
            self.shared.display.write(&data);
            session.transcript.record_echo(&data);
        }
        if worker
            .input
            .send(StdinMessage::Data(data.to_string()))
            .is_err()
        {
            tracing::debug!(generation = %session.generation, "input forwarder closed");
        }
        session.transcript.record_stdin(&data);
        Ok(())
    }

    /// Signal end of input to the running program. Ignored when idle.
    pub fn push_eof(&self) -> SandtermResult<()> {
        let state = self.shared.lock()?;
        match state
            .session
            .as_ref()
            .and_then(|session| session.worker.as_ref())
        {
            Some(worker) => {
                if worker.input.send(StdinMessage::Eof).is_err() {
                    tracing::debug!("input forwarder closed");
                }
            }
            None => tracing::debug!("eof ignored: no active run"),
        }
        Ok(())
    }

    /// Route a raw display event: text becomes input, Ctrl+D becomes EOF.
    pub fn handle_display_event(&self, event: DisplayEvent) -> SandtermResult<()> {
        match event {
            DisplayEvent::Data(data) => self.push_input(&data),
            DisplayEvent::Key(chord) if chord.is_end_of_input() => self.push_eof(),
            DisplayEvent::Key(_) => Ok(()),
        }
    }

    /// Apply a configuration update.
    ///
    /// When the update is the first `autorun` on a controller that never ran,
    /// one run is spawned on the current tokio runtime and its handle returned.
    ///
    /// # Errors
    /// `E_INTERNAL` if a run must be spawned outside a tokio runtime.
    pub fn apply_update(&self, update: ConfigUpdate) -> SandtermResult<Option<JoinHandle<RunResult>>> {
        let effect: UpdateEffect = {
            let mut state = self.shared.lock()?;
            let has_run = state.has_run;
            let effect = state.config.apply(update, has_run);
            if effect.trigger_run {
                state.has_run = true;
            }
            effect
        };
        if effect.trigger_run {
            return self.spawn_run().map(Some);
        }
        Ok(None)
    }

    /// Apply an attribute-style update (`name`, raw `value`).
    pub fn set_attribute(
        &self,
        name: &str,
        value: &str,
    ) -> SandtermResult<Option<JoinHandle<RunResult>>> {
        self.apply_update(ConfigUpdate::from_attribute(name, value)?)
    }

    /// Host attachment: honour an `autorun` flag present from the start.
    pub fn connect(&self) -> SandtermResult<Option<JoinHandle<RunResult>>> {
        let autorun = self.shared.lock()?.config.autorun;
        if autorun {
            return self.apply_update(ConfigUpdate::Autorun);
        }
        Ok(None)
    }

    fn spawn_run(&self) -> SandtermResult<JoinHandle<RunResult>> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            SandtermError::internal(format!("autorun requires a tokio runtime: {err}"))
        })?;
        let controller = self.clone();
        tracing::info!("autorun triggered");
        Ok(runtime.spawn(async move { controller.run().await }))
    }

    /// True while a worker is attached to the active session.
    pub fn is_running(&self) -> bool {
        self.shared.lock().is_ok_and(|state| {
            state
                .session
                .as_ref()
                .is_some_and(|session| session.worker.is_some())
        })
    }

    pub fn phase(&self) -> RunPhase {
        self.shared
            .lock()
            .map_or(RunPhase::Idle, |state| state.phase)
    }

    pub fn has_run(&self) -> bool {
        self.shared.lock().is_ok_and(|state| state.has_run)
    }

    /// Copy of the configuration the next run will use.
    pub fn config(&self) -> SandtermResult<RunConfiguration> {
        Ok(self.shared.lock()?.config.clone())
    }

    pub fn controls_visible(&self) -> bool {
        self.shared.lock().is_ok_and(|state| state.config.controls)
    }

    pub fn focus(&self) {
        self.shared.display.focus();
    }

    pub fn clear(&self) {
        self.shared.display.clear();
    }
}
