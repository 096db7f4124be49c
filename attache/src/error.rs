//! Error types for the runtime.
//!
//! Each subsystem has its own thiserror enum; [`AgentError`] is the umbrella
//! the orchestrator loop reports. Transient tool failures never surface here:
//! they are folded into tool_result text so the model can recover (see
//! `engine`). The orchestrator loop is the supervisor; nothing escapes it.

use thiserror::Error;

/// Tool-level failure classification carried inside a `ToolOutcome`.
///
/// **Interaction**: produced by `ToolRegistry::execute` and the engine's
/// loop guard; rendered into tool_result text, never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ToolErrorKind {
    /// Name not present in the registry.
    UnknownTool,
    /// Same call signature already failed twice this turn.
    LoopBlocked,
    /// Tool exceeded its per-call timeout.
    Timeout,
    /// User refused the approval request.
    ApprovalDenied,
    /// Approval request expired without an answer.
    ApprovalTimeout,
    /// Extension server is not connected.
    ServerUnavailable,
    /// Arguments failed validation.
    InvalidArgs,
    /// Any other execution failure.
    Failed,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnknownTool => "unknown_tool",
            Self::LoopBlocked => "tool_loop_blocked",
            Self::Timeout => "tool_timeout",
            Self::ApprovalDenied => "approval_denied",
            Self::ApprovalTimeout => "approval_timeout",
            Self::ServerUnavailable => "server_unavailable",
            Self::InvalidArgs => "invalid_args",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Persistence store errors. Corrupt entity files are *not* errors: they are
/// reported as missing so one bad file cannot take down the store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("always-on table: {0}")]
    AlwaysOn(#[from] rusqlite::Error),
}

/// Extension transport errors (spawn, handshake, framing, per-request).
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("server `{0}` exited before initialize completed")]
    PrematureExit(String),
    #[error("fatal server output: {0}")]
    FatalStderr(String),
    #[error("initialize: {0}")]
    Initialize(String),
    #[error("request timeout after {0:?}")]
    RequestTimeout(std::time::Duration),
    #[error("protocol: {0}")]
    Protocol(String),
    #[error("server `{0}` is not connected")]
    ServerUnavailable(String),
    #[error("invalid server config: {0}")]
    InvalidServer(String),
    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),
}

/// LLM provider errors. `OutputLimit` triggers the engine's adaptive
/// max-tokens doubling; `Timeout` propagates as a turn-level failure.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("llm timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error("llm output limit reached")]
    OutputLimit,
    #[error("provider does not support native tool calls")]
    NativeToolsUnsupported,
    #[error("llm transport: {0}")]
    Transport(String),
    #[error("llm response malformed: {0}")]
    Malformed(String),
}

/// Engine turn-level errors. Tool failures do not appear here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("turn timed out after {0:?}")]
    TurnTimeout(std::time::Duration),
}

/// Scheduler errors (task validation only; invalid cron is silent by design).
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("task `{0}` not found")]
    TaskNotFound(String),
}

/// Orchestrator-level umbrella error.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("daily budget exhausted")]
    BudgetExhausted,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("channel send: {0}")]
    Channel(String),
    #[error("agent is stopped")]
    Stopped,
}
