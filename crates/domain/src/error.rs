//! Shared error type used across all run-engine crates.

/// Error taxonomy for the run engine and its collaborators.
///
/// Matched on by kind rather than string-sniffed, so the engine can decide
/// retry/finish/limitation behaviour from the variant alone.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    /// Invalid JSON from the LLM after exhausting `runMaxJsonRetries`.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A command is disallowed for the run's role (e.g. coordinator tool_call).
    #[error("role violation: {0}")]
    RoleViolation(String),

    /// `runIterationLimit` exhausted with no accepted extension.
    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    /// A tool call failed more than its configured `max_retries`.
    #[error("tool failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// A loop detector fired (duplicate tool calls, duplicate spawns, pointless loop).
    #[error("loop detected: {0}")]
    LoopDetected(String),

    /// The output validator itself errored; treated as `decision=send`.
    #[error("validator error: {0}")]
    ValidatorError(String),

    /// Denied by the policy engine.
    #[error("denied by policy: {0}")]
    PolicyDenied(String),

    /// The run (or an ancestor) was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The store rejected a write (duplicate idempotency key, stale claim, etc).
    #[error("store: {0}")]
    Store(String),

    /// The queue could not enqueue or fetch a job.
    #[error("queue: {0}")]
    Queue(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors the Memory Writer can return without failing its enclosing job.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryWriterSkip {
    #[error("memory disabled for user")]
    MemoryDisabled,
    #[error("missing API key")]
    MissingApiKey,
    #[error("invalid API key")]
    InvalidApiKey,
}
