//! Scripted worker hosts.
//!
//! A [`ScriptedLauncher`] hands out [`ScriptedHost`]s that play back a list of
//! [`Step`]s when started. Every launch and kill is recorded so tests can
//! assert on the controller's single-active-worker behaviour.

use async_trait::async_trait;
use sandterm::error::{SandtermError, SandtermResult, WorkerError};
use sandterm::model::{Generation, WorkerExit};
use sandterm::worker::{DebugEvent, OutputSink, WorkerHost, WorkerLauncher, WorkerSpec};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// One scripted action.
#[derive(Clone, Debug)]
pub enum Step {
    /// Report a stdout chunk.
    Stdout(String),
    /// Report a stderr chunk.
    Stderr(String),
    /// Report a debug event with the given call name.
    Debug(String),
    /// Block until the accumulated stdin contains the text.
    WaitForInput(String),
    /// Block until EOF is signalled.
    WaitForEof,
    /// Copy stdin to stdout as it arrives, until EOF.
    EchoInput,
    /// Add a file to the filesystem returned on exit.
    WriteFile(String, String),
    /// Pause.
    Sleep(Duration),
    /// Block until killed.
    WaitForKill,
    /// Stop reacting to kill requests, like a program that traps SIGTERM.
    IgnoreKill,
    /// Finish with an exit code.
    Exit(i32),
    /// Finish with a worker error.
    Fail(String),
}

impl Step {
    pub fn stdout(text: &str) -> Self {
        Self::Stdout(text.to_string())
    }

    pub fn stderr(text: &str) -> Self {
        Self::Stderr(text.to_string())
    }

    pub fn wait_for_input(text: &str) -> Self {
        Self::WaitForInput(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(message.to_string())
    }
}

/// Launch or kill observed by a [`ScriptedLauncher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerEvent {
    Launched(Generation),
    Killed(Generation),
}

enum Script {
    Steps(Vec<Step>),
    LaunchFailure(String),
}

#[derive(Default)]
struct Journal {
    launches: Vec<WorkerSpec>,
    hosts: Vec<Arc<ScriptedHost>>,
    events: Vec<WorkerEvent>,
}

struct LauncherState {
    default_script: Vec<Step>,
    queued: Mutex<VecDeque<Script>>,
    journal: Arc<Mutex<Journal>>,
}

/// Launcher producing [`ScriptedHost`]s. Clones share the same script queue
/// and journal.
#[derive(Clone)]
pub struct ScriptedLauncher {
    state: Arc<LauncherState>,
}

impl ScriptedLauncher {
    /// Every launch plays `default_script` unless a queued script is pending.
    pub fn new(default_script: Vec<Step>) -> Self {
        Self {
            state: Arc::new(LauncherState {
                default_script,
                queued: Mutex::new(VecDeque::new()),
                journal: Arc::new(Mutex::new(Journal::default())),
            }),
        }
    }

    /// Play `script` on the next launch that has no earlier queued script.
    #[must_use]
    pub fn then(self, script: Vec<Step>) -> Self {
        self.queue(script);
        self
    }

    pub fn queue(&self, script: Vec<Step>) {
        lock(&self.state.queued).push_back(Script::Steps(script));
    }

    /// Make the next queued launch fail with a worker error.
    pub fn queue_launch_failure(&self, message: &str) {
        lock(&self.state.queued).push_back(Script::LaunchFailure(message.to_string()));
    }

    /// Specs of every launch, in order.
    pub fn launches(&self) -> Vec<WorkerSpec> {
        lock(&self.state.journal).launches.clone()
    }

    /// Generations of hosts that received a kill request, in order.
    pub fn kills(&self) -> Vec<Generation> {
        lock(&self.state.journal)
            .events
            .iter()
            .filter_map(|event| match event {
                WorkerEvent::Killed(generation) => Some(*generation),
                WorkerEvent::Launched(_) => None,
            })
            .collect()
    }

    /// Launches and kills interleaved in the order they happened.
    pub fn events(&self) -> Vec<WorkerEvent> {
        lock(&self.state.journal).events.clone()
    }

    /// Host created by the `index`th successful launch.
    pub fn host(&self, index: usize) -> Option<Arc<ScriptedHost>> {
        lock(&self.state.journal).hosts.get(index).cloned()
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(&self, spec: WorkerSpec, sink: OutputSink) -> SandtermResult<Arc<dyn WorkerHost>> {
        let script = lock(&self.state.queued)
            .pop_front()
            .unwrap_or_else(|| Script::Steps(self.state.default_script.clone()));
        let mut journal = lock(&self.state.journal);
        journal.launches.push(spec.clone());
        journal.events.push(WorkerEvent::Launched(spec.generation));
        let steps = match script {
            Script::Steps(steps) => steps,
            Script::LaunchFailure(message) => return Err(SandtermError::worker(message)),
        };
        let host = Arc::new(ScriptedHost::new(
            spec,
            sink,
            steps,
            Arc::clone(&self.state.journal),
        ));
        journal.hosts.push(Arc::clone(&host));
        Ok(host)
    }
}

#[derive(Clone, Debug, Default)]
struct InputState {
    chunks: Vec<String>,
    eof: bool,
}

impl InputState {
    fn text(&self) -> String {
        self.chunks.concat()
    }
}

/// Worker host that plays back a script.
pub struct ScriptedHost {
    spec: WorkerSpec,
    sink: OutputSink,
    steps: Vec<Step>,
    input: watch::Sender<InputState>,
    killed: watch::Sender<bool>,
    deaf: AtomicBool,
    journal: Arc<Mutex<Journal>>,
}

impl ScriptedHost {
    fn new(
        spec: WorkerSpec,
        sink: OutputSink,
        steps: Vec<Step>,
        journal: Arc<Mutex<Journal>>,
    ) -> Self {
        let (input, _) = watch::channel(InputState::default());
        let (killed, _) = watch::channel(false);
        Self {
            spec,
            sink,
            steps,
            input,
            killed,
            deaf: AtomicBool::new(false),
            journal,
        }
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    /// Stdin chunks received so far, in delivery order.
    pub fn stdin_chunks(&self) -> Vec<String> {
        self.input.borrow().chunks.clone()
    }

    pub fn saw_eof(&self) -> bool {
        self.input.borrow().eof
    }

    pub fn kill_requested(&self) -> bool {
        *self.killed.borrow()
    }

    /// Report stdout through this host's sink, as a late write would.
    pub fn emit_stdout(&self, text: &str) -> bool {
        self.sink.stdout(text)
    }

    fn honours_kill(&self) -> bool {
        !self.deaf.load(Ordering::SeqCst)
    }

    async fn until_killed(&self) {
        if !self.honours_kill() {
            std::future::pending::<()>().await;
        }
        let mut killed = self.killed.subscribe();
        let _ = killed.wait_for(|killed| *killed).await;
    }

    /// Wait for an input condition, or fail with `Killed`.
    async fn wait_input(
        &self,
        condition: impl FnMut(&InputState) -> bool + Send,
    ) -> Result<(), WorkerError> {
        let mut input = self.input.subscribe();
        let ready = async move { input.wait_for(condition).await.is_ok() };
        tokio::select! {
            ok = ready => {
                if ok {
                    Ok(())
                } else {
                    Err(SandtermError::worker("input channel closed").into())
                }
            }
            () = self.until_killed() => Err(WorkerError::Killed),
        }
    }

    async fn echo_input(&self) -> Result<(), WorkerError> {
        let mut echoed = 0;
        loop {
            let target = echoed;
            self.wait_input(move |state| state.chunks.len() > target || state.eof)
                .await?;
            let (fresh, eof) = {
                let state = self.input.borrow();
                let fresh = state.chunks.get(echoed..).unwrap_or_default().concat();
                echoed = state.chunks.len();
                (fresh, state.eof)
            };
            if !fresh.is_empty() {
                self.sink.stdout(&fresh);
            }
            if eof {
                return Ok(());
            }
        }
    }

    async fn play(&self) -> Result<WorkerExit, WorkerError> {
        let mut fs = self.spec.fs.clone();
        for step in &self.steps {
            if self.kill_requested() && self.honours_kill() {
                return Err(WorkerError::Killed);
            }
            match step {
                Step::Stdout(text) => {
                    self.sink.stdout(text);
                }
                Step::Stderr(text) => {
                    self.sink.stderr(text);
                }
                Step::Debug(call) => self.sink.debug(&DebugEvent {
                    call: call.clone(),
                    detail: serde_json::Value::Null,
                }),
                Step::WaitForInput(expected) => {
                    let expected = expected.clone();
                    self.wait_input(move |state| state.text().contains(&expected))
                        .await?;
                }
                Step::WaitForEof => self.wait_input(|state| state.eof).await?,
                Step::EchoInput => self.echo_input().await?,
                Step::WriteFile(path, content) => fs.insert(path.clone(), content.clone()),
                Step::Sleep(duration) => {
                    tokio::select! {
                        () = tokio::time::sleep(*duration) => {}
                        () = self.until_killed() => return Err(WorkerError::Killed),
                    }
                }
                Step::IgnoreKill => self.deaf.store(true, Ordering::SeqCst),
                Step::WaitForKill => {
                    self.until_killed().await;
                    return Err(WorkerError::Killed);
                }
                Step::Exit(exit_code) => {
                    return Ok(WorkerExit {
                        exit_code: *exit_code,
                        fs,
                    })
                }
                Step::Fail(message) => return Err(SandtermError::worker(message.clone()).into()),
            }
        }
        Ok(WorkerExit { exit_code: 0, fs })
    }
}

#[async_trait]
impl WorkerHost for ScriptedHost {
    async fn start(&self) -> Result<WorkerExit, WorkerError> {
        self.play().await
    }

    async fn push_stdin(&self, data: &str) -> SandtermResult<()> {
        if self.input.borrow().eof {
            return Err(SandtermError::worker("stdin already closed"));
        }
        self.input
            .send_modify(|state| state.chunks.push(data.to_string()));
        Ok(())
    }

    async fn push_eof(&self) -> SandtermResult<()> {
        self.input.send_modify(|state| state.eof = true);
        Ok(())
    }

    fn kill(&self) {
        lock(&self.journal)
            .events
            .push(WorkerEvent::Killed(self.spec.generation));
        self.killed.send_replace(true);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
