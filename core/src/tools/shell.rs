//! The `shell` tool: classify, authorize, sandbox, execute.
//!
//! Authorization pipeline per call:
//!
//! 1. the execpolicy classifies the command;
//! 2. `Forbidden` is refused without executing anything;
//! 3. `Safe` runs unsandboxed without a prompt (unless the session escalates
//!    everything);
//! 4. `Match` runs sandboxed, prompting only under `UnlessTrusted`;
//! 5. `Unverified` prompts unless the session previously approved the exact
//!    command in the exact cwd, or the approval policy is `Never`, in which
//!    case it runs under a mandatory sandbox or fails.
//!
//! A command that needs a sandbox when no backend exists is refused; there is
//! no silent fallback to unsandboxed execution.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use foreman_execpolicy::CommandEffects;
use foreman_execpolicy::PolicyDecision;
use foreman_protocol::models::FunctionCallOutputPayload;
use foreman_protocol::protocol::AskForApproval;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::ExecCommandBeginEvent;
use foreman_protocol::protocol::ExecCommandEndEvent;
use foreman_protocol::protocol::ReviewDecision;
use foreman_protocol::protocol::render_command;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ForemanErr;
use crate::error::Result;
use crate::exec::ExecutionResult;
use crate::exec::execute;
use crate::sandboxing::CommandSpec;
use crate::sandboxing::SandboxTransformRequest;
use crate::session::Session;
use crate::tools::invalid_arguments;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ShellToolCallParams {
    pub command: Vec<String>,
    /// Working directory, resolved against the session cwd when relative.
    pub workdir: Option<String>,
    pub timeout_ms: Option<u64>,
    /// The command wants outbound network access.
    #[serde(default)]
    pub network: bool,
    /// Extra writable roots the command wants, absolute paths.
    #[serde(default)]
    pub write_roots: Vec<PathBuf>,
}

pub(crate) async fn handle_shell_call(
    session: &Arc<Session>,
    sub_id: &str,
    call_id: &str,
    arguments: &str,
    token: &CancellationToken,
) -> Result<FunctionCallOutputPayload> {
    let params: ShellToolCallParams = match serde_json::from_str(arguments) {
        Ok(params) => params,
        Err(err) => return Ok(invalid_arguments("shell", &err)),
    };
    if params.command.is_empty() {
        return Ok(FunctionCallOutputPayload::failure("command must not be empty"));
    }
    if let Some(root) = params.write_roots.iter().find(|root| !root.is_absolute()) {
        return Ok(FunctionCallOutputPayload::failure(format!(
            "write_roots must be absolute, got {}",
            root.display()
        )));
    }

    let config = &session.config;
    let cwd = resolve_workdir(&config.cwd, params.workdir.as_deref());

    let effects = CommandEffects {
        network: params.network,
        writes_outside_declared_roots: params
            .write_roots
            .iter()
            .any(|root| !root.starts_with(&config.cwd)),
    };
    let decision = config.exec_policy.classify(&params.command, effects);
    debug!(
        "classified {} as {decision:?}",
        render_command(&params.command)
    );

    if decision == PolicyDecision::Forbidden {
        return Ok(FunctionCallOutputPayload::failure(
            ForemanErr::PolicyViolation(render_command(&params.command)).to_string(),
        ));
    }

    if needs_approval(decision, config.approval_policy, session, &params.command, &cwd).await {
        let reason = escalation_reason(decision);
        let review = session
            .request_command_approval(
                sub_id,
                call_id,
                params.command.clone(),
                cwd.clone(),
                Some(reason.to_string()),
            )
            .await;
        match review {
            ReviewDecision::Approved => {}
            ReviewDecision::ApprovedForSession => {
                session
                    .add_approved_command(params.command.clone(), cwd.clone())
                    .await;
            }
            ReviewDecision::Denied => {
                return Ok(FunctionCallOutputPayload::failure(
                    "command denied by the user",
                ));
            }
            ReviewDecision::Abort => return Err(ForemanErr::Interrupted),
        }
    }

    let timeout = params
        .timeout_ms
        .map_or(config.command_timeout, Duration::from_millis);
    let spec = CommandSpec {
        program: params.command[0].clone(),
        args: params.command[1..].to_vec(),
        cwd: cwd.clone(),
        env_overrides: HashMap::new(),
        extra_write_roots: params.write_roots,
        network_allowed: params.network,
        timeout,
    };

    let request = match session.sandbox_manager.transform(SandboxTransformRequest {
        spec,
        decision,
        policy: &config.sandbox_policy,
        sandbox_policy_cwd: &cwd,
        linux_sandbox_exe: config.linux_sandbox_exe.as_ref(),
    }) {
        Ok(request) => request,
        Err(err) => {
            // Never run a command that required containment without it.
            return Ok(FunctionCallOutputPayload::failure(
                ForemanErr::SandboxUnavailable(err.to_string()).to_string(),
            ));
        }
    };

    session
        .send_event(
            sub_id,
            EventMsg::ExecCommandBegin(ExecCommandBeginEvent {
                call_id: call_id.to_string(),
                command: params.command.clone(),
                cwd: cwd.clone(),
            }),
        )
        .await;

    let result = match execute(request, token, config.max_output_bytes).await {
        Ok(result) => result,
        Err(ForemanErr::Interrupted) => return Err(ForemanErr::Interrupted),
        Err(err) => {
            session
                .send_event(
                    sub_id,
                    EventMsg::ExecCommandEnd(ExecCommandEndEvent {
                        call_id: call_id.to_string(),
                        stdout: String::new(),
                        stderr: err.to_string(),
                        exit_code: -1,
                        duration_ms: 0,
                        timed_out: false,
                        truncated: false,
                    }),
                )
                .await;
            return Ok(FunctionCallOutputPayload::failure(err.to_string()));
        }
    };

    session
        .send_event(
            sub_id,
            EventMsg::ExecCommandEnd(ExecCommandEndEvent {
                call_id: call_id.to_string(),
                stdout: result.stdout.clone(),
                stderr: result.stderr.clone(),
                exit_code: result.exit_code,
                duration_ms: result.duration.as_millis() as u64,
                timed_out: result.timed_out,
                truncated: result.truncated,
            }),
        )
        .await;

    Ok(format_exec_output(&result))
}

/// Whether this call must block on a user decision.
async fn needs_approval(
    decision: PolicyDecision,
    approval_policy: AskForApproval,
    session: &Session,
    command: &[String],
    cwd: &Path,
) -> bool {
    match (decision, approval_policy) {
        (PolicyDecision::Safe, _) => false,
        // Never prompting means mandatory sandboxing instead.
        (_, AskForApproval::Never) => false,
        (PolicyDecision::Match, AskForApproval::OnRequest) => false,
        (PolicyDecision::Match, AskForApproval::UnlessTrusted)
        | (PolicyDecision::Unverified, _) => {
            !session.is_command_approved(command, cwd).await
        }
        (PolicyDecision::Forbidden, _) => false,
    }
}

fn escalation_reason(decision: PolicyDecision) -> &'static str {
    match decision {
        PolicyDecision::Match => "command partially matches a trusted pattern",
        PolicyDecision::Unverified => "command is not covered by any policy rule",
        PolicyDecision::Safe | PolicyDecision::Forbidden => "command requires confirmation",
    }
}

fn resolve_workdir(session_cwd: &Path, workdir: Option<&str>) -> PathBuf {
    match workdir {
        Some(dir) => {
            let path = Path::new(dir);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                session_cwd.join(path)
            }
        }
        None => session_cwd.to_path_buf(),
    }
}

fn format_exec_output(result: &ExecutionResult) -> FunctionCallOutputPayload {
    let mut content = String::new();
    if result.timed_out {
        content.push_str("command timed out\n");
    }
    content.push_str(&result.stdout);
    if !result.stderr.is_empty() {
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&result.stderr);
    }
    if result.truncated {
        content.push_str("\n[output truncated]");
    }
    if result.success() {
        FunctionCallOutputPayload::success(content)
    } else {
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&format!("exit code: {}", result.exit_code));
        FunctionCallOutputPayload::failure(content)
    }
}
