//! Code execution sessions
//!
//! A `KernelBackend` is one remote (or local) execution sandbox. The
//! `SessionClient` drives a backend through its lifecycle and relays output
//! items, and the `ScriptRunner` is the `executeScript` capability handed to
//! tools: one fresh session per script, with a user-triggered cancel.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::SessionResult;
use crate::models::output::OutputItem;

pub mod local;
pub mod runner;
pub mod session;

#[cfg(test)]
pub mod mock;

/// A sandbox that accepts scripts and streams structured output
#[async_trait]
pub trait KernelBackend: Send {
    /// Establish the session, failing with `SessionError::Unreachable` when
    /// the sandbox cannot be reached
    async fn connect(&mut self) -> SessionResult<()>;

    /// Run a script, sending every output item to `output` in emission order.
    /// Resolves once the execution has completed.
    async fn execute(
        &mut self,
        script: &str,
        output: mpsc::UnboundedSender<OutputItem>,
    ) -> SessionResult<()>;

    /// Release the session
    async fn disconnect(&mut self);
}

/// Creates a fresh backend for every script execution
pub trait KernelFactory: Send + Sync {
    fn create(&self) -> Box<dyn KernelBackend>;
}
