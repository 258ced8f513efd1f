//! Composition root
//!
//! The `Orchestrator` owns the conversation store and hands explicit handles
//! to the completion driver, the tool dispatcher and the script runner. A
//! reactor task re-evaluates both drivers after every store transition.
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionDriver;
use crate::confirm::{ConfirmationGate, ConfirmationStatus};
use crate::dispatch::ToolDispatcher;
use crate::errors::{AgentError, AgentResult};
use crate::kernel::runner::ScriptRunner;
use crate::kernel::KernelFactory;
use crate::models::chat::{Chat, ChatAction, BASE64_FILE_PREFIX};
use crate::models::message::{Message, ToolCallRequest};
use crate::models::output::StreamKind;
use crate::persist;
use crate::prompt_template::{system_prompt, DEFAULT_SYSTEM_MESSAGE};
use crate::providers::base::Provider;
use crate::providers::configs::DEFAULT_MODEL;
use crate::status::{AgentStatus, StatusBoard};
use crate::store::{ChatSnapshot, ConversationStore};
use crate::tools::data_url::png_base64_from_data_url;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub model_name: String,
    pub credentials: Option<String>,
    /// Base system prompt; tool descriptions are appended to it
    pub system_message: String,
    /// Ask the confirmation gate before a capability runs a script
    pub confirm_scripts: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_MODEL.to_string(),
            credentials: None,
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            confirm_scripts: true,
        }
    }
}

#[derive(Default)]
struct BatchState {
    /// Revision of the assistant message the last batch was started for
    revision: Option<u64>,
    running: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<ConversationStore>,
    status: StatusBoard,
    gate: Arc<ConfirmationGate>,
    runner: Arc<ScriptRunner>,
    dispatcher: ToolDispatcher,
    driver: Arc<CompletionDriver>,
    credentials: Option<String>,
    confirm_scripts: bool,
    batch: Mutex<BatchState>,
}

/// The agent behind one chat page
pub struct Orchestrator {
    inner: Arc<Inner>,
    reactor: JoinHandle<()>,
}

impl Orchestrator {
    /// Build the orchestrator and start reacting to the conversation. Must be
    /// called from within a tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        kernels: Arc<dyn KernelFactory>,
    ) -> AgentResult<Self> {
        Self::with_chat(config, provider, registry, kernels, Chat::default())
    }

    /// Like `new`, starting from a restored conversation
    pub fn with_chat(
        config: OrchestratorConfig,
        provider: Arc<dyn Provider>,
        registry: ToolRegistry,
        kernels: Arc<dyn KernelFactory>,
        chat: Chat,
    ) -> AgentResult<Self> {
        let system_message = system_prompt(&config.system_message, registry.items())
            .map_err(|e| AgentError::Prompt(e.to_string()))?;

        let store = Arc::new(ConversationStore::new(chat));
        let status = StatusBoard::new();
        let driver = Arc::new(CompletionDriver::new(
            provider,
            Arc::clone(&store),
            status.clone(),
            system_message,
            registry.schemas(),
            config.model_name,
            config.credentials.clone(),
        ));

        let inner = Arc::new(Inner {
            runner: Arc::new(ScriptRunner::new(kernels, status.clone())),
            dispatcher: ToolDispatcher::new(Arc::new(registry)),
            gate: Arc::new(ConfirmationGate::new()),
            credentials: config.credentials,
            confirm_scripts: config.confirm_scripts,
            batch: Mutex::new(BatchState::default()),
            store,
            status,
            driver,
        });

        let reactor = tokio::spawn(react(Arc::clone(&inner)));
        Ok(Self { inner, reactor })
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.store.snapshot()
    }

    pub fn chat(&self) -> Arc<Chat> {
        self.inner.store.chat()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.store.subscribe()
    }

    pub fn status(&self) -> AgentStatus {
        self.inner.status.get()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AgentStatus> {
        self.inner.status.subscribe()
    }

    pub fn confirmation_status(&self) -> ConfirmationStatus {
        self.inner.gate.status()
    }

    pub fn subscribe_confirmation(&self) -> watch::Receiver<ConfirmationStatus> {
        self.inner.gate.subscribe()
    }

    pub fn model_name(&self) -> String {
        self.inner.driver.model_name()
    }

    /// Takes effect from the next completion request
    pub fn set_model_name<S: Into<String>>(&self, model_name: S) {
        let model_name = model_name.into();
        info!(model = %model_name, "switching model");
        self.inner.driver.set_model_name(model_name);
    }

    /// False while the assistant is still answering: a completion is due
    /// and has not failed, or tool calls are waiting for their responses
    pub fn can_submit(&self) -> bool {
        let chat = self.inner.store.chat();
        let awaiting_completion =
            chat.completion_due() && !self.inner.status.get().completion_failed;
        !awaiting_completion && chat.pending_tool_calls().is_none()
    }

    pub fn submit_message<S: Into<String>>(&self, content: S) -> AgentResult<()> {
        if !self.can_submit() {
            return Err(AgentError::Busy);
        }
        self.inner
            .store
            .dispatch(ChatAction::AddMessage(Message::user(content)));
        Ok(())
    }

    /// Informational transcript line that is never sent upstream
    pub fn add_client_side_message<S: Into<String>>(&self, content: S) {
        self.inner
            .store
            .dispatch(ChatAction::AddMessage(Message::client_side_only(content)));
    }

    /// Request a new completion for the current tail after a failure
    pub fn retry_completion(&self) {
        self.inner.driver.retry();
    }

    /// Cancel the running script. Returns false when no script is running.
    pub fn cancel_script(&self) -> bool {
        self.inner.runner.cancel()
    }

    pub fn confirm_script(&self) -> bool {
        self.inner.gate.confirm()
    }

    pub fn reject_script(&self) -> bool {
        self.inner.gate.cancel()
    }

    /// Keep messages up to and including `last_message`; `None` empties the log
    pub fn truncate_messages(&self, last_message: Option<usize>) -> AgentResult<()> {
        if let Some(index) = last_message {
            if index >= self.inner.store.chat().messages.len() {
                return Err(AgentError::NoSuchMessage(index));
            }
        }
        self.inner
            .store
            .dispatch(ChatAction::TruncateMessages { last_message });
        Ok(())
    }

    /// Delete the message at `index` and everything after it
    pub fn truncate_at(&self, index: usize) -> AgentResult<()> {
        if index >= self.inner.store.chat().messages.len() {
            return Err(AgentError::NoSuchMessage(index));
        }
        self.truncate_messages(index.checked_sub(1))
    }

    /// Remove the last user message and everything after it, returning its
    /// text so it can be edited and submitted again
    pub fn back_up_and_erase_last_user_message(&self) -> Option<String> {
        let chat = self.inner.store.chat();
        let index = chat.last_user_message_index()?;
        let content = chat.messages[index].text().unwrap_or_default().to_string();
        self.truncate_at(index).ok()?;
        Some(content)
    }

    pub fn clear_messages(&self) {
        self.inner.store.dispatch(ChatAction::ClearMessages);
    }

    /// Replace the whole conversation
    pub fn set_chat(&self, chat: Chat) {
        self.inner.store.dispatch(ChatAction::Set(chat));
    }

    pub fn export_chat(&self) -> AgentResult<String> {
        Ok(persist::serialize_chat(&self.inner.store.chat())?)
    }

    pub fn import_chat(&self, data: &str) -> AgentResult<()> {
        self.set_chat(persist::deserialize_chat(data)?);
        Ok(())
    }

    pub fn save_chat(&self, path: &Path) -> AgentResult<()> {
        persist::save_chat(path, &self.inner.store.chat())?;
        info!(path = %path.display(), "chat saved");
        Ok(())
    }

    pub fn load_chat(&self, path: &Path) -> AgentResult<()> {
        let chat = persist::load_chat(path)?;
        info!(path = %path.display(), messages = chat.messages.len(), "chat loaded");
        self.set_chat(chat);
        Ok(())
    }

    /// True when nothing is in flight and nothing will start without user
    /// input (a confirmation, a new message or a retry)
    pub fn is_settled(&self) -> bool {
        self.inner.is_settled()
    }

    /// Wait until the orchestrator is settled
    pub async fn settled(&self) {
        let mut chat_rx = self.subscribe();
        let mut status_rx = self.subscribe_status();
        let mut gate_rx = self.subscribe_confirmation();
        while !self.is_settled() {
            tokio::select! {
                _ = chat_rx.changed() => {}
                _ = status_rx.changed() => {}
                _ = gate_rx.changed() => {}
                // stale results change nothing observable
                _ = tokio::time::sleep(Duration::from_millis(20)) => {}
            }
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.reactor.abort();
        if let Some(task) = lock(&self.inner.batch).task.take() {
            task.abort();
        }
        self.inner.driver.abort();
        self.inner.runner.cancel();
    }
}

async fn react(inner: Arc<Inner>) {
    let mut rx = inner.store.subscribe();
    loop {
        rx.borrow_and_update();
        inner.driver.evaluate();
        inner.maybe_run_tool_calls();
        if rx.changed().await.is_err() {
            break;
        }
    }
}

impl Inner {
    fn is_settled(&self) -> bool {
        if self.driver.in_flight() || self.gate.status() != ConfirmationStatus::None {
            return false;
        }
        let snapshot = self.store.snapshot();
        if snapshot.chat.completion_due() && !self.status.get().completion_failed {
            return false;
        }
        let batch = lock(&self.batch);
        if batch.running {
            return false;
        }
        snapshot.chat.pending_tool_calls().is_none() || batch.revision == Some(snapshot.revision)
    }

    /// Start a batch for a trailing assistant tool-call message, once per
    /// message and never while another batch runs
    fn maybe_run_tool_calls(self: &Arc<Self>) {
        let snapshot = self.store.snapshot();
        let Some(calls) = snapshot.chat.pending_tool_calls() else {
            return;
        };
        let mut batch = lock(&self.batch);
        if batch.running || batch.revision == Some(snapshot.revision) {
            return;
        }
        batch.revision = Some(snapshot.revision);
        batch.running = true;
        self.status.update(|s| s.last_batch_error = None);

        let calls = calls.to_vec();
        let revision = snapshot.revision;
        let inner = Arc::clone(self);
        batch.task = Some(tokio::spawn(async move {
            inner.run_batch(revision, calls).await;
        }));
    }

    async fn run_batch(self: Arc<Self>, revision: u64, calls: Vec<ToolCallRequest>) {
        let ctx = self.tool_context(revision);
        match self.dispatcher.run_batch(&calls, &ctx, &self.status).await {
            Ok(responses) => {
                debug!(revision, count = responses.len(), "tool call batch finished");
                if !self
                    .store
                    .dispatch_at(revision, ChatAction::AddMessages(responses))
                {
                    warn!(revision, "discarding tool responses for a superseded conversation");
                }
            }
            Err(e) => {
                error!(error = %e, "tool call batch failed");
                self.status
                    .update(|s| s.last_batch_error = Some(e.to_string()));
            }
        }

        lock(&self.batch).running = false;
        // the tail may have moved on to another tool-call message meanwhile
        self.maybe_run_tool_calls();
    }

    /// Files written by a batch only land while the log is still at the
    /// revision the batch was started for.
    fn tool_context(&self, revision: u64) -> ToolContext {
        let images = Arc::clone(&self.store);
        let figures = Arc::clone(&self.store);
        let stdout = self.status.clone();
        let stderr = self.status.clone();

        ToolContext {
            model_name: self.driver.model_name(),
            credentials: self.credentials.clone(),
            execute_script: Some(Arc::clone(&self.runner)),
            on_add_image: Some(Arc::new(move |name: &str, data_url: &str| {
                let data = png_base64_from_data_url(data_url)?;
                let content = format!("{}{}", BASE64_FILE_PREFIX, data);
                set_file_at(&images, revision, name, content);
                Ok(())
            })),
            on_add_figure_data: Some(Arc::new(move |name: &str, content: &str| {
                set_file_at(&figures, revision, name, content.to_string());
                Ok(())
            })),
            on_stdout: Some(Arc::new(move |message: &str| {
                stdout.add_progress(StreamKind::Stdout, message)
            })),
            on_stderr: Some(Arc::new(move |message: &str| {
                stderr.add_progress(StreamKind::Stderr, message)
            })),
            confirm_okay_to_run: self.confirm_scripts.then(|| Arc::clone(&self.gate)),
        }
    }
}

fn set_file_at(store: &ConversationStore, revision: u64, name: &str, content: String) {
    let action = ChatAction::SetFile {
        name: name.to_string(),
        content,
    };
    if !store.dispatch_at(revision, action) {
        debug!(revision, name, "dropping file from a superseded tool call batch");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
