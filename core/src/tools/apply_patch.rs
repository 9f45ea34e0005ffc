//! The `apply_patch` tool: structured file edits inside the workspace.
//!
//! Writes go through the same containment rules as sandboxed commands: every
//! touched path must be writable under the session sandbox policy, and `.git`
//! stays read-only even inside a writable root.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use foreman_protocol::models::FunctionCallOutputPayload;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::PatchApplyBeginEvent;
use foreman_protocol::protocol::PatchApplyEndEvent;
use foreman_protocol::protocol::SandboxPolicy;
use serde::Deserialize;
use tokio::fs;

use crate::session::Session;
use crate::tools::invalid_arguments;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum FileChange {
    Add { path: PathBuf, content: String },
    Update { path: PathBuf, content: String },
    Delete { path: PathBuf },
}

impl FileChange {
    fn path(&self) -> &Path {
        match self {
            Self::Add { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplyPatchParams {
    pub changes: Vec<FileChange>,
}

pub(crate) async fn handle_apply_patch(
    session: &Arc<Session>,
    sub_id: &str,
    call_id: &str,
    arguments: &str,
) -> FunctionCallOutputPayload {
    let params: ApplyPatchParams = match serde_json::from_str(arguments) {
        Ok(params) => params,
        Err(err) => return invalid_arguments("apply_patch", &err),
    };
    if params.changes.is_empty() {
        return FunctionCallOutputPayload::failure("patch contains no changes");
    }

    let config = &session.config;
    let resolved: Vec<(FileChange, PathBuf)> = params
        .changes
        .into_iter()
        .map(|change| {
            let path = resolve(&config.cwd, change.path());
            (change, path)
        })
        .collect();

    if let Some((_, path)) = resolved
        .iter()
        .find(|(_, path)| !is_writable(&config.sandbox_policy, &config.cwd, path))
    {
        return FunctionCallOutputPayload::failure(format!(
            "path is not writable under the current sandbox policy: {}",
            path.display()
        ));
    }

    session
        .send_event(
            sub_id,
            EventMsg::PatchApplyBegin(PatchApplyBeginEvent {
                call_id: call_id.to_string(),
                paths: resolved.iter().map(|(_, path)| path.clone()).collect(),
            }),
        )
        .await;

    let outcome = apply_changes(&resolved).await;
    let (success, message) = match outcome {
        Ok(applied) => (true, format!("applied {applied} changes")),
        Err(err) => (false, err),
    };

    session
        .send_event(
            sub_id,
            EventMsg::PatchApplyEnd(PatchApplyEndEvent {
                call_id: call_id.to_string(),
                success,
                message: message.clone(),
            }),
        )
        .await;

    if success {
        FunctionCallOutputPayload::success(message)
    } else {
        FunctionCallOutputPayload::failure(message)
    }
}

async fn apply_changes(changes: &[(FileChange, PathBuf)]) -> Result<usize, String> {
    let mut applied = 0;
    for (change, path) in changes {
        match change {
            FileChange::Add { content, .. } => {
                if path.exists() {
                    return Err(format!("file already exists: {}", path.display()));
                }
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
                }
                fs::write(path, content)
                    .await
                    .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
            }
            FileChange::Update { content, .. } => {
                if !path.exists() {
                    return Err(format!("file does not exist: {}", path.display()));
                }
                fs::write(path, content)
                    .await
                    .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
            }
            FileChange::Delete { .. } => {
                fs::remove_file(path)
                    .await
                    .map_err(|err| format!("failed to delete {}: {err}", path.display()))?;
            }
        }
        applied += 1;
    }
    Ok(applied)
}

fn resolve(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn is_writable(policy: &SandboxPolicy, cwd: &Path, path: &Path) -> bool {
    if policy.has_full_disk_write_access() {
        return true;
    }
    policy
        .get_writable_roots_with_cwd(cwd)
        .iter()
        .any(|root| root.is_path_writable(path))
}
