//! Tool dispatch for one model iteration.
//!
//! Calls run concurrently up to the configured limit, but their outputs are
//! returned in model order so the recorded history stays deterministic.

mod apply_patch;
mod plan;
mod read_file;
mod shell;

use std::sync::Arc;

use foreman_protocol::models::FunctionCallOutputPayload;
use foreman_protocol::models::ResponseItem;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ForemanErr;
use crate::error::Result;
use crate::session::Session;

#[derive(Debug, Clone)]
pub(crate) struct ToolCall {
    pub name: String,
    pub arguments: String,
    pub call_id: String,
}

/// Runs every call and returns one `FunctionCallOutput` per call, in the
/// order the model issued them. Per-call failures become failure payloads the
/// model can react to; only a turn abort escapes as `Err`.
pub(crate) async fn dispatch_tool_calls(
    session: &Arc<Session>,
    sub_id: &str,
    calls: Vec<ToolCall>,
    token: &CancellationToken,
) -> Result<Vec<ResponseItem>> {
    let semaphore = Arc::new(Semaphore::new(session.config.tool_concurrency));

    let futures = calls.into_iter().map(|call| {
        let session = Arc::clone(session);
        let sub_id = sub_id.to_string();
        let token = token.clone();
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| ForemanErr::Interrupted)?;
            handle_tool_call(&session, &sub_id, call, &token).await
        }
    });

    join_all(futures).await.into_iter().collect()
}

async fn handle_tool_call(
    session: &Arc<Session>,
    sub_id: &str,
    call: ToolCall,
    token: &CancellationToken,
) -> Result<ResponseItem> {
    let call_id = call.call_id.clone();
    let payload = match call.name.as_str() {
        "shell" => shell::handle_shell_call(session, sub_id, &call_id, &call.arguments, token).await?,
        "apply_patch" => apply_patch::handle_apply_patch(session, sub_id, &call_id, &call.arguments).await,
        "read_file" => read_file::handle_read_file(session, &call.arguments).await,
        "update_plan" => plan::handle_update_plan(session, sub_id, &call.arguments).await,
        other => {
            warn!("model requested unsupported tool {other}");
            FunctionCallOutputPayload::failure(format!("unsupported tool: {other}"))
        }
    };
    Ok(ResponseItem::FunctionCallOutput {
        call_id,
        output: payload,
    })
}

/// Shared helper for tools whose arguments failed to parse.
fn invalid_arguments(tool: &str, err: &serde_json::Error) -> FunctionCallOutputPayload {
    FunctionCallOutputPayload::failure(format!("invalid arguments for {tool}: {err}"))
}
