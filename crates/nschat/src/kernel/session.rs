use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::KernelBackend;
use crate::errors::{SessionError, SessionResult};
use crate::models::output::OutputItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
}

pub type OutputCallback = Box<dyn FnMut(OutputItem) + Send>;

/// Drives one execution session: `idle -> starting -> running -> idle`
pub struct SessionClient {
    backend: Box<dyn KernelBackend>,
    state: SessionState,
    connected: bool,
    on_output: Option<OutputCallback>,
}

impl SessionClient {
    pub fn new(backend: Box<dyn KernelBackend>) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            connected: false,
            on_output: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Register the sink invoked once per output item, in emission order
    pub fn on_output_item<F>(&mut self, callback: F)
    where
        F: FnMut(OutputItem) + Send + 'static,
    {
        self.on_output = Some(Box::new(callback));
    }

    pub async fn initiate(&mut self) -> SessionResult<()> {
        self.state = SessionState::Starting;
        match self.backend.connect().await {
            Ok(()) => {
                self.connected = true;
                self.state = SessionState::Running;
                debug!("code execution session started");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Run a script. Every item it emits has been handed to the sink by the
    /// time this resolves.
    pub async fn run_code(&mut self, script: &str) -> SessionResult<()> {
        if !self.connected {
            return Err(SessionError::NotStarted);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = &mut self.on_output;
        let execution = self.backend.execute(script, tx);
        tokio::pin!(execution);

        let result = loop {
            tokio::select! {
                biased;
                Some(item) = rx.recv() => deliver(sink, item),
                result = &mut execution => break result,
            }
        };
        // the sender went away with the finished execution; flush what is left
        while let Ok(item) = rx.try_recv() {
            deliver(sink, item);
        }
        result
    }

    /// Run a script, racing it against `cancel`. When the cancellation wins
    /// the execution is dropped and `SessionError::Cancelled` is returned.
    pub async fn run_code_until_cancelled(
        &mut self,
        script: &str,
        cancel: &CancellationToken,
    ) -> SessionResult<()> {
        tokio::select! {
            result = self.run_code(script) => result,
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
        }
    }

    /// Release the session. Calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if self.connected {
            self.backend.disconnect().await;
            self.connected = false;
            debug!("code execution session shut down");
        }
        self.state = SessionState::Idle;
    }
}

fn deliver(sink: &mut Option<OutputCallback>, item: OutputItem) {
    if let Some(callback) = sink.as_mut() {
        callback(item);
    }
}
