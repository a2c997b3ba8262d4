use crate::controller::Shared;
use crate::model::Generation;
use crate::worker::DebugEvent;
use std::fmt;
use std::sync::Weak;

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// Callback handle a worker host uses to report output.
///
/// Each sink is bound to the generation of the worker it was created for.
/// Once that worker is no longer the controller's active one (stopped,
/// superseded, or finished), everything reported through the sink is dropped.
#[derive(Clone)]
pub struct OutputSink {
    generation: Generation,
    shared: Weak<Shared>,
}

impl OutputSink {
    pub(crate) fn new(generation: Generation, shared: Weak<Shared>) -> Self {
        Self { generation, shared }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Report a stdout chunk. Returns `false` if the chunk was discarded.
    pub fn stdout(&self, chunk: &str) -> bool {
        self.deliver(Stream::Stdout, chunk)
    }

    /// Report a stderr chunk. Returns `false` if the chunk was discarded.
    pub fn stderr(&self, chunk: &str) -> bool {
        self.deliver(Stream::Stderr, chunk)
    }

    /// Report a debug event; logged only.
    pub fn debug(&self, event: &DebugEvent) {
        if self.is_current() {
            tracing::debug!(
                generation = %self.generation,
                call = %event.call,
                detail = %event.detail,
                "worker debug event"
            );
        }
    }

    fn is_current(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.is_current(self.generation))
    }

    fn deliver(&self, stream: Stream, chunk: &str) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };
        let Ok(mut state) = shared.lock() else {
            return false;
        };
        let Some(session) = state
            .session
            .as_mut()
            .filter(|session| session.generation == self.generation)
        else {
            tracing::debug!(
                generation = %self.generation,
                ?stream,
                bytes = chunk.len(),
                "dropping output from inactive worker"
            );
            return false;
        };
        match stream {
            Stream::Stdout => {
                session.transcript.record_stdout(chunk);
                shared.display.write(chunk);
            }
            Stream::Stderr => {
                session.transcript.record_stderr(chunk);
                shared.display.write_stderr(chunk);
            }
        }
        true
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
