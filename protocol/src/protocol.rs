//! Defines the protocol for a Foreman session between a client and an agent.
//!
//! Uses a SQ (Submission Queue) / EQ (Event Queue) pattern to asynchronously
//! communicate between user and agent: submissions flow in, events flow out,
//! and events for one conversation are totally ordered.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::ConversationId;

/// Submission Queue Entry - requests from the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Unique id for this Submission to correlate with Events.
    pub id: String,
    /// Payload.
    pub op: Op,
}

/// Submission operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum Op {
    /// Abort the current turn, if any. The agent replies with
    /// [`EventMsg::TurnAborted`]; when no turn is active this is a no-op.
    Interrupt,

    /// User input. Starts a turn when the conversation is idle; otherwise the
    /// input is queued FIFO into the running turn.
    UserInput { items: Vec<InputItem> },

    /// Resolve a pending command approval request. `id` must match the
    /// `call_id` carried by the corresponding
    /// [`EventMsg::ExecApprovalRequest`].
    ExecApproval { id: String, decision: ReviewDecision },

    /// Stop the submission loop and release the session.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Text { text: String },
}

/// Response to a command approval request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewDecision {
    /// User has approved this command; execute it once, sandboxed.
    Approved,

    /// User has approved this command and wants to automatically approve any
    /// future identical instance (`command` and `cwd` match exactly) for the
    /// remainder of the session.
    ApprovedForSession,

    /// User has denied this command. The agent sees a denial result and may
    /// try something else.
    #[default]
    Denied,

    /// User has denied this command and wants the whole turn aborted.
    Abort,
}

/// When the agent escalates a command to the user for approval.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AskForApproval {
    /// Escalate anything the policy does not classify `Safe`, including
    /// commands that would otherwise run sandboxed without a prompt.
    UnlessTrusted,

    /// Escalate only commands the policy cannot classify (`Unverified`).
    #[default]
    OnRequest,

    /// Never prompt. Unclassified commands run under mandatory sandboxing;
    /// if no sandbox is available the call fails instead.
    Never,
}

/// Determines execution restrictions for model shell commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum SandboxPolicy {
    /// No restrictions whatsoever. Use with caution.
    #[serde(rename = "danger-full-access")]
    DangerFullAccess,

    /// Read-only access to the entire file-system.
    #[serde(rename = "read-only")]
    ReadOnly,

    /// Same as `ReadOnly` but additionally grants write access to the current
    /// working directory ("workspace").
    #[serde(rename = "workspace-write")]
    WorkspaceWrite {
        /// Additional folders (beyond cwd and possibly TMPDIR) that should be
        /// writable from within the sandbox.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        writable_roots: Vec<PathBuf>,

        /// When `true`, outbound network access is allowed. `false` by
        /// default.
        #[serde(default)]
        network_access: bool,

        /// When `true`, the per-user `TMPDIR` is NOT included among the
        /// default writable roots. Defaults to `false`.
        #[serde(default)]
        exclude_tmpdir_env_var: bool,

        /// When `true`, `/tmp` is NOT included among the default writable
        /// roots on UNIX. Defaults to `false`.
        #[serde(default)]
        exclude_slash_tmp: bool,
    },
}

/// A writable root path accompanied by subpaths that should remain read-only
/// even though the root is writable. Primarily used to keep version-control
/// metadata (notably `.git`) out of reach of sandboxed commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritableRoot {
    pub root: PathBuf,
    /// By construction, these subpaths are all under `root`.
    pub read_only_subpaths: Vec<PathBuf>,
}

impl WritableRoot {
    pub fn is_path_writable(&self, path: &Path) -> bool {
        if !path.starts_with(&self.root) {
            return false;
        }
        !self
            .read_only_subpaths
            .iter()
            .any(|subpath| path.starts_with(subpath))
    }
}

impl SandboxPolicy {
    /// A policy for reading the entire file-system while being able to write
    /// only to cwd and the platform temp dirs.
    pub fn new_workspace_write_policy() -> Self {
        Self::WorkspaceWrite {
            writable_roots: Vec::new(),
            network_access: false,
            exclude_tmpdir_env_var: false,
            exclude_slash_tmp: false,
        }
    }

    pub fn has_full_disk_read_access(&self) -> bool {
        true
    }

    pub fn has_full_disk_write_access(&self) -> bool {
        match self {
            Self::DangerFullAccess => true,
            Self::ReadOnly | Self::WorkspaceWrite { .. } => false,
        }
    }

    pub fn has_full_network_access(&self) -> bool {
        match self {
            Self::DangerFullAccess => true,
            Self::ReadOnly => false,
            Self::WorkspaceWrite { network_access, .. } => *network_access,
        }
    }

    /// Returns the writable roots (tailored to the given working directory)
    /// together with subpaths that should remain read-only under each root.
    /// The result is deterministic for a given policy, cwd and environment.
    pub fn get_writable_roots_with_cwd(&self, cwd: &Path) -> Vec<WritableRoot> {
        match self {
            Self::DangerFullAccess | Self::ReadOnly => Vec::new(),
            Self::WorkspaceWrite {
                writable_roots,
                exclude_tmpdir_env_var,
                exclude_slash_tmp,
                network_access: _,
            } => {
                let mut roots = writable_roots.clone();
                roots.push(cwd.to_path_buf());

                if !exclude_slash_tmp && cfg!(unix) {
                    let slash_tmp = PathBuf::from("/tmp");
                    if slash_tmp.is_dir() {
                        roots.push(slash_tmp);
                    }
                }

                if !exclude_tmpdir_env_var
                    && let Some(tmpdir) = std::env::var_os("TMPDIR")
                    && !tmpdir.is_empty()
                {
                    roots.push(PathBuf::from(tmpdir));
                }

                roots
                    .into_iter()
                    .map(|root| {
                        // Never let the sandbox rewrite version-control state
                        // under a writable root.
                        let git_dir = root.join(".git");
                        let read_only_subpaths = if git_dir.is_dir() {
                            vec![git_dir]
                        } else {
                            Vec::new()
                        };
                        WritableRoot {
                            root,
                            read_only_subpaths,
                        }
                    })
                    .collect()
            }
        }
    }
}

/// Event Queue Entry - notifications from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Submission id that triggered this event (empty for session-initiated
    /// events such as `session_configured`).
    pub id: String,
    /// Conversation this event belongs to.
    pub conversation_id: ConversationId,
    /// Payload.
    pub msg: EventMsg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[non_exhaustive]
pub enum EventMsg {
    /// Error while executing a submission. The turn (if any) has ended.
    Error(ErrorEvent),

    /// Ack that the session is constructed and ready for submissions.
    SessionConfigured(SessionConfiguredEvent),

    /// A turn has started in response to user input.
    TaskStarted(TaskStartedEvent),

    /// The turn finished with no further tool calls.
    TaskComplete(TaskCompleteEvent),

    /// Agent text output.
    AgentMessage(AgentMessageEvent),

    /// A command execution tool call is starting.
    ExecCommandBegin(ExecCommandBeginEvent),

    /// A command execution tool call finished (success, failure or timeout).
    ExecCommandEnd(ExecCommandEndEvent),

    /// The agent needs a user decision before a command can run.
    ExecApprovalRequest(ExecApprovalRequestEvent),

    /// A patch application tool call is starting.
    PatchApplyBegin(PatchApplyBeginEvent),

    /// A patch application tool call finished.
    PatchApplyEnd(PatchApplyEndEvent),

    /// The agent updated its plan.
    PlanUpdate(PlanUpdateEvent),

    /// The current turn was aborted before completion.
    TurnAborted(TurnAbortedEvent),

    /// Ack of [`Op::Shutdown`]; no further events will be emitted.
    ShutdownComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfiguredEvent {
    /// Unique id for this session.
    pub conversation_id: ConversationId,
    /// The model in effect for the session.
    pub model: String,
    /// Number of history items recovered from a rollout, zero for a fresh
    /// conversation.
    pub history_entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStartedEvent {
    /// Sequence number of the turn within its conversation, starting at 1.
    pub turn_index: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleteEvent {
    pub last_agent_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessageEvent {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecCommandBeginEvent {
    /// Identifier for the associated exec call, from the model.
    pub call_id: String,
    /// The command to be executed.
    pub command: Vec<String>,
    /// The command's working directory.
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecCommandEndEvent {
    pub call_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// The wall time of the command in milliseconds.
    pub duration_ms: u64,
    pub timed_out: bool,
    /// Output exceeded the size cap and was truncated.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecApprovalRequestEvent {
    /// Identifier for the associated exec call, from the model.
    pub call_id: String,
    /// The command awaiting a decision.
    pub command: Vec<String>,
    /// The command's working directory.
    pub cwd: PathBuf,
    /// Why the command was escalated (e.g. the policy classification).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchApplyBeginEvent {
    pub call_id: String,
    /// Paths touched by the patch.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchApplyEndEvent {
    pub call_id: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdateEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub plan: Vec<PlanItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub step: String,
    pub status: PlanItemStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanItemStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnAbortedEvent {
    pub reason: TurnAbortReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnAbortReason {
    /// The user sent [`Op::Interrupt`].
    Interrupted,
    /// The session is shutting down.
    Replaced,
    /// The turn failed and could not continue.
    Error,
}

/// Renders a command for display in events and error messages.
pub fn render_command(command: &[String]) -> String {
    shlex::try_join(command.iter().map(String::as_str))
        .unwrap_or_else(|_| command.join(" "))
}
