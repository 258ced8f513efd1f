use thiserror::Error;

/// Errors returned by orchestrator commands
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("The assistant is still working on the previous message")]
    Busy,

    #[error("No message at index {0}")]
    NoSuchMessage(usize),

    #[error("Failed to render system prompt: {0}")]
    Prompt(String),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

pub type AgentResult<T> = Result<T, AgentError>;

/// Fatal tool batch errors. Capability failures never end up here, they are
/// reported back to the model as tool responses instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("A tool call batch is already running")]
    BatchInProgress,
}

/// Errors raised while registering capabilities
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool name '{0}' must match [a-zA-Z0-9_-]+")]
    InvalidName(String),

    #[error("Duplicate tool name: {0}")]
    Duplicate(String),

    #[error("Tool '{name}' has an invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Errors from a code execution session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Code execution kernel is unreachable: {0}")]
    Unreachable(String),

    #[error("Script execution failed: {0}")]
    Execution(String),

    #[error("Script execution cancelled by user")]
    Cancelled,

    #[error("Code execution session has not been initiated")]
    NotStarted,
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationError {
    #[error("Another script is already waiting for confirmation")]
    AlreadyPending,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to access chat file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chat file: {0}")]
    Json(#[from] serde_json::Error),
}
