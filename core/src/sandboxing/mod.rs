//! Sandbox placement and command transformation.
//!
//! Owns the decision of which platform sandbox wraps a command and turns a
//! portable [`CommandSpec`] into a ready-to-spawn [`ExecRequest`]. The
//! transformation is deterministic: the same spec, policy and decision always
//! produce the same request, so callers can rely on it for replay and tests.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use foreman_execpolicy::PolicyDecision;
use foreman_protocol::protocol::SandboxPolicy;

use crate::landlock::create_linux_sandbox_command_args;
use crate::seatbelt::MACOS_PATH_TO_SEATBELT_EXECUTABLE;
use crate::seatbelt::create_seatbelt_command_args;
use crate::spawn::FOREMAN_SANDBOX_ENV_VAR;
use crate::spawn::FOREMAN_SANDBOX_NETWORK_DISABLED_ENV_VAR;

/// Environment variables inherited from the parent process when building a
/// child environment. Everything else is dropped before overrides apply.
const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TMPDIR", "USER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxType {
    None,
    MacosSeatbelt,
    LinuxSandbox,
}

/// Platform sandbox for this build target, if one exists. Windows currently
/// has none; commands that require containment there are refused rather than
/// run unsandboxed.
pub fn get_platform_sandbox() -> Option<SandboxType> {
    if cfg!(target_os = "macos") {
        Some(SandboxType::MacosSeatbelt)
    } else if cfg!(target_os = "linux") {
        Some(SandboxType::LinuxSandbox)
    } else {
        None
    }
}

/// Portable description of a command before sandbox placement.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env_overrides: HashMap<String, String>,
    /// Extra writable roots requested by the tool call, already resolved to
    /// absolute paths.
    pub extra_write_roots: Vec<PathBuf>,
    pub network_allowed: bool,
    pub timeout: Duration,
}

/// Fully resolved spawn plan. `command[0]` is the program to execute, which
/// is the sandbox wrapper when `sandbox` is not [`SandboxType::None`].
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
    pub sandbox: SandboxType,
    pub sandbox_policy: SandboxPolicy,
    pub timeout: Duration,
    pub arg0: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SandboxTransformError {
    #[error("missing foreman-linux-sandbox executable path")]
    MissingLinuxSandboxExecutable,
    #[error("no sandbox backend is available on this platform")]
    NoPlatformSandbox,
    #[error("failed to build sandbox invocation: {0}")]
    CommandBuild(String),
}

pub(crate) struct SandboxTransformRequest<'a> {
    pub spec: CommandSpec,
    pub decision: PolicyDecision,
    pub policy: &'a SandboxPolicy,
    pub sandbox_policy_cwd: &'a Path,
    pub linux_sandbox_exe: Option<&'a PathBuf>,
}

#[derive(Default)]
pub struct SandboxManager;

impl SandboxManager {
    pub fn new() -> Self {
        Self
    }

    /// Picks the sandbox for a command given its policy decision. `Safe`
    /// commands and full-access sessions run unsandboxed; everything else
    /// requires the platform sandbox and is refused when none exists.
    pub(crate) fn select(
        &self,
        decision: PolicyDecision,
        policy: &SandboxPolicy,
    ) -> Result<SandboxType, SandboxTransformError> {
        debug_assert!(decision != PolicyDecision::Forbidden);
        if !decision.requires_sandbox() || matches!(policy, SandboxPolicy::DangerFullAccess) {
            return Ok(SandboxType::None);
        }
        get_platform_sandbox().ok_or(SandboxTransformError::NoPlatformSandbox)
    }

    pub(crate) fn transform(
        &self,
        request: SandboxTransformRequest<'_>,
    ) -> Result<ExecRequest, SandboxTransformError> {
        let SandboxTransformRequest {
            mut spec,
            decision,
            policy,
            sandbox_policy_cwd,
            linux_sandbox_exe,
        } = request;

        let sandbox = self.select(decision, policy)?;
        let effective_policy = effective_sandbox_policy(policy, &spec);

        let mut env = build_child_env(&spec.env_overrides);
        if !effective_policy.has_full_network_access() {
            env.insert(
                FOREMAN_SANDBOX_NETWORK_DISABLED_ENV_VAR.to_string(),
                "1".to_string(),
            );
        }

        let mut command = Vec::with_capacity(1 + spec.args.len());
        command.push(spec.program);
        command.append(&mut spec.args);

        let (command, sandbox_env, arg0) = match sandbox {
            SandboxType::None => (command, HashMap::new(), None),
            SandboxType::MacosSeatbelt => {
                let mut seatbelt_env = HashMap::new();
                seatbelt_env.insert(FOREMAN_SANDBOX_ENV_VAR.to_string(), "seatbelt".to_string());
                let mut args =
                    create_seatbelt_command_args(command, &effective_policy, sandbox_policy_cwd);
                let mut full_command = Vec::with_capacity(1 + args.len());
                full_command.push(MACOS_PATH_TO_SEATBELT_EXECUTABLE.to_string());
                full_command.append(&mut args);
                (full_command, seatbelt_env, None)
            }
            SandboxType::LinuxSandbox => {
                let exe = linux_sandbox_exe
                    .ok_or(SandboxTransformError::MissingLinuxSandboxExecutable)?;
                let mut sandbox_env = HashMap::new();
                sandbox_env.insert(FOREMAN_SANDBOX_ENV_VAR.to_string(), "landlock".to_string());
                let mut args = create_linux_sandbox_command_args(
                    command,
                    &effective_policy,
                    sandbox_policy_cwd,
                )
                .map_err(|err| SandboxTransformError::CommandBuild(err.to_string()))?;
                let mut full_command = Vec::with_capacity(1 + args.len());
                full_command.push(exe.to_string_lossy().to_string());
                full_command.append(&mut args);
                (
                    full_command,
                    sandbox_env,
                    Some("foreman-linux-sandbox".to_string()),
                )
            }
        };

        env.extend(sandbox_env);

        Ok(ExecRequest {
            command,
            cwd: spec.cwd,
            env,
            sandbox,
            sandbox_policy: effective_policy,
            timeout: spec.timeout,
            arg0,
        })
    }
}

/// Folds per-call grants into the session policy: extra writable roots are
/// appended, and network stays enabled only when both the session policy and
/// the call allow it.
fn effective_sandbox_policy(policy: &SandboxPolicy, spec: &CommandSpec) -> SandboxPolicy {
    match policy {
        SandboxPolicy::DangerFullAccess => SandboxPolicy::DangerFullAccess,
        SandboxPolicy::ReadOnly => SandboxPolicy::ReadOnly,
        SandboxPolicy::WorkspaceWrite {
            writable_roots,
            network_access,
            exclude_tmpdir_env_var,
            exclude_slash_tmp,
        } => {
            let mut roots = writable_roots.clone();
            for root in &spec.extra_write_roots {
                if !roots.contains(root) {
                    roots.push(root.clone());
                }
            }
            SandboxPolicy::WorkspaceWrite {
                writable_roots: roots,
                network_access: *network_access && spec.network_allowed,
                exclude_tmpdir_env_var: *exclude_tmpdir_env_var,
                exclude_slash_tmp: *exclude_slash_tmp,
            }
        }
    }
}

fn build_child_env(overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for key in INHERITED_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            env.insert((*key).to_string(), value);
        }
    }
    env.extend(overrides.clone());
    env
}
