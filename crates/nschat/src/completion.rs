use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::chat::{Chat, ChatAction};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::providers::base::{CompletionRequest, Provider};
use crate::status::StatusBoard;
use crate::store::ConversationStore;

#[derive(Default)]
struct DriverState {
    /// Revision of the tail the last request was issued for
    requested: Option<u64>,
    task: Option<JoinHandle<()>>,
}

/// Issues one completion request per conversation tail that ends in a user
/// or tool message, and appends the answer unless the tail moved on.
pub struct CompletionDriver {
    provider: Arc<dyn Provider>,
    store: Arc<ConversationStore>,
    status: StatusBoard,
    system_message: String,
    tools: Vec<Tool>,
    credentials: Option<String>,
    model_name: Mutex<String>,
    state: Mutex<DriverState>,
}

impl CompletionDriver {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<ConversationStore>,
        status: StatusBoard,
        system_message: String,
        tools: Vec<Tool>,
        model_name: String,
        credentials: Option<String>,
    ) -> Self {
        Self {
            provider,
            store,
            status,
            system_message,
            tools,
            credentials,
            model_name: Mutex::new(model_name),
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn model_name(&self) -> String {
        lock(&self.model_name).clone()
    }

    pub fn set_model_name<S: Into<String>>(&self, model_name: S) {
        *lock(&self.model_name) = model_name.into();
    }

    /// Whether a request is currently awaiting the completion service
    pub fn in_flight(&self) -> bool {
        lock(&self.state)
            .task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// React to the current conversation state. Called after every store
    /// transition.
    pub fn evaluate(self: &Arc<Self>) {
        let snapshot = self.store.snapshot();
        let mut state = lock(&self.state);

        if !snapshot.chat.completion_due() {
            if let Some(task) = state.task.take() {
                task.abort();
            }
            state.requested = None;
            return;
        }
        if state.requested == Some(snapshot.revision) {
            return;
        }

        // the tail changed under a pending request; its answer is stale
        if let Some(task) = state.task.take() {
            if !task.is_finished() {
                debug!("superseding in-flight completion request");
            }
            task.abort();
        }

        let revision = snapshot.revision;
        let request = self.build_request(&snapshot.chat);
        state.requested = Some(revision);
        self.status.update(|s| s.completion_failed = false);

        let driver = Arc::clone(self);
        state.task = Some(tokio::spawn(async move {
            driver.run(revision, request).await;
        }));
    }

    /// Re-arm the driver against the current tail after a failure. The log
    /// is not touched.
    pub fn retry(self: &Arc<Self>) {
        {
            let mut state = lock(&self.state);
            if state.task.as_ref().is_some_and(|t| !t.is_finished()) {
                return;
            }
            state.requested = None;
        }
        info!("retrying completion");
        self.evaluate();
    }

    /// Drop any in-flight request
    pub fn abort(&self) {
        let mut state = lock(&self.state);
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    fn build_request(&self, chat: &Chat) -> CompletionRequest {
        let mut messages = Vec::with_capacity(chat.messages.len() + 1);
        messages.push(Message::system(self.system_message.clone()));
        messages.extend(chat.non_ephemeral_messages().cloned());
        CompletionRequest {
            messages,
            model_name: self.model_name(),
            credentials: self.credentials.clone(),
            tools: self.tools.clone(),
        }
    }

    async fn run(&self, revision: u64, request: CompletionRequest) {
        debug!(revision, model = %request.model_name, "requesting completion");
        let message = self
            .provider
            .complete(&request)
            .await
            .and_then(|completion| completion.into_message());
        match message {
            Ok(message) => {
                if message.has_tool_calls() {
                    info!(count = message.tool_calls().len(), "completion requested tool calls");
                }
                if !self
                    .store
                    .dispatch_at(revision, ChatAction::AddMessage(message))
                {
                    warn!(revision, "discarding completion for a superseded conversation");
                }
            }
            Err(e) => {
                if self.store.snapshot().revision == revision {
                    warn!(error = %e, "completion failed");
                    self.status.update(|s| s.completion_failed = true);
                } else {
                    debug!(error = %e, "ignoring failure of a superseded completion");
                }
            }
        }
    }
}

impl Drop for CompletionDriver {
    fn drop(&mut self) {
        self.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
