use std::sync::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::errors::ConfirmationError;

/// What the view layer should show for the gate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfirmationStatus {
    #[default]
    None,
    Waiting { script: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Confirm,
    Cancel,
}

/// Holds a script until the user approves or rejects it. At most one script
/// waits at a time.
pub struct ConfirmationGate {
    pending: Mutex<Option<oneshot::Sender<bool>>>,
    status: watch::Sender<ConfirmationStatus>,
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationGate {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConfirmationStatus::None);
        Self {
            pending: Mutex::new(None),
            status,
        }
    }

    /// Publish `script` for review and wait for the decision. Resolves to
    /// `true` for approval and `false` for rejection.
    pub async fn confirm_okay_to_run(&self, script: &str) -> Result<bool, ConfirmationError> {
        let rx = {
            let mut pending = self.lock_pending();
            if pending.as_ref().is_some_and(|tx| !tx.is_closed()) {
                return Err(ConfirmationError::AlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            *pending = Some(tx);
            rx
        };
        self.status.send_replace(ConfirmationStatus::Waiting {
            script: script.to_string(),
        });
        debug!("script waiting for confirmation");
        let _clear = ClearOnDrop(&self.status);

        // Dropping the gate without a decision counts as a rejection
        Ok(rx.await.unwrap_or(false))
    }

    /// Deliver the user's decision. Returns false if nothing was waiting.
    pub fn resolve(&self, decision: ConfirmationDecision) -> bool {
        let Some(tx) = self.lock_pending().take() else {
            return false;
        };
        let approved = decision == ConfirmationDecision::Confirm;
        info!(approved, "script confirmation resolved");
        tx.send(approved).is_ok()
    }

    pub fn confirm(&self) -> bool {
        self.resolve(ConfirmationDecision::Confirm)
    }

    pub fn cancel(&self) -> bool {
        self.resolve(ConfirmationDecision::Cancel)
    }

    pub fn status(&self) -> ConfirmationStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConfirmationStatus> {
        self.status.subscribe()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<oneshot::Sender<bool>>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Takes the script off display however the wait ends
struct ClearOnDrop<'a>(&'a watch::Sender<ConfirmationStatus>);

impl Drop for ClearOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(ConfirmationStatus::None);
    }
}
