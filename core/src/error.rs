use foreman_protocol::ConversationId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForemanErr>;

/// Error taxonomy of the runtime.
///
/// Failures intrinsic to one tool call (policy violations, sandbox
/// unavailability, execution failures, timeouts) are recovered locally by the
/// dispatcher and folded into a tool result the model can react to. Failures
/// intrinsic to a turn's control flow end the turn and surface as an `Error`
/// event. Configuration failures are fatal before any session exists.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ForemanErr {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("command rejected by policy: {0}")]
    PolicyViolation(String),

    #[error("no sandbox available: {0}")]
    SandboxUnavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    #[error("conversation {0} has a turn in flight")]
    SessionActive(ConversationId),

    #[error("rollout is empty")]
    EmptyRollout,

    #[error("rollout is corrupted: {0}")]
    CorruptedRollout(String),

    #[error("turn interrupted")]
    Interrupted,

    #[error("agent loop died unexpectedly")]
    InternalAgentDied,

    #[error("model stream error: {0}")]
    ModelStream(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
