//! One turn of the conversation: feed the model, run the tool calls it
//! requests, repeat until it stops asking.

use std::sync::Arc;

use foreman_protocol::models::ResponseItem;
use foreman_protocol::models::message_text;
use foreman_protocol::protocol::AgentMessageEvent;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::TaskStartedEvent;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::Prompt;
use crate::client::ResponseEvent;
use crate::error::ForemanErr;
use crate::session::Session;
use crate::tools::ToolCall;
use crate::tools::dispatch_tool_calls;

/// Body of the spawned turn task. Terminal events are emitted before the
/// active-turn slot is cleared; when the token was cancelled the interrupt
/// path owns both.
pub(crate) async fn run_turn(
    session: Arc<Session>,
    sub_id: String,
    input: Vec<ResponseItem>,
    token: CancellationToken,
    turn_index: u64,
) {
    session
        .send_event(
            &sub_id,
            EventMsg::TaskStarted(TaskStartedEvent { turn_index }),
        )
        .await;
    session.record_items(&input).await;

    match turn_loop(&session, &sub_id, &token).await {
        Ok(last_agent_message) => {
            session.emit_turn_complete(&sub_id, last_agent_message).await;
            session.end_turn(turn_index).await;
        }
        Err(ForemanErr::Interrupted) => {
            if !token.is_cancelled() {
                // Aborted from inside the turn (approval decision), not by
                // Op::Interrupt; this path emits its own abort event.
                session.emit_turn_interrupted(&sub_id).await;
                session.end_turn(turn_index).await;
            }
        }
        Err(err) => {
            debug!("turn {turn_index} failed: {err}");
            session.emit_turn_failed(&sub_id, err.to_string()).await;
            session.end_turn(turn_index).await;
        }
    }
}

async fn turn_loop(
    session: &Arc<Session>,
    sub_id: &str,
    token: &CancellationToken,
) -> crate::error::Result<Option<String>> {
    let mut last_agent_message: Option<String> = None;

    loop {
        if token.is_cancelled() {
            return Err(ForemanErr::Interrupted);
        }

        let prompt = Prompt {
            input: session.history_snapshot().await,
        };
        let client = session.client();
        let mut stream = tokio::select! {
            stream = client.stream(prompt) => stream?,
            _ = token.cancelled() => return Err(ForemanErr::Interrupted),
        };

        let mut tool_calls: Vec<ToolCall> = Vec::new();
        loop {
            let event = tokio::select! {
                event = stream.next_event() => event,
                _ = token.cancelled() => return Err(ForemanErr::Interrupted),
            };
            match event {
                Some(Ok(ResponseEvent::OutputItemDone(item))) => {
                    match &item {
                        ResponseItem::Message { .. } => {
                            if let Some(text) = message_text(&item) {
                                last_agent_message = Some(text.clone());
                                session
                                    .send_event(
                                        sub_id,
                                        EventMsg::AgentMessage(AgentMessageEvent { message: text }),
                                    )
                                    .await;
                            }
                        }
                        ResponseItem::FunctionCall {
                            name,
                            arguments,
                            call_id,
                        } => {
                            tool_calls.push(ToolCall {
                                name: name.clone(),
                                arguments: arguments.clone(),
                                call_id: call_id.clone(),
                            });
                        }
                        ResponseItem::FunctionCallOutput { .. } => {
                            // Outputs are produced locally, never by the model.
                        }
                    }
                    session.record_items(std::slice::from_ref(&item)).await;
                }
                Some(Ok(ResponseEvent::Completed)) | None => break,
                Some(Err(err)) => return Err(err),
            }
        }

        if tool_calls.is_empty() {
            // Fold in anything the user sent while the model was streaming;
            // if there is any, the turn continues with it.
            let pending = session.take_pending_input().await;
            if pending.is_empty() {
                return Ok(last_agent_message);
            }
            session.record_items(&pending).await;
            continue;
        }

        let outputs = dispatch_tool_calls(session, sub_id, tool_calls, token).await?;
        session.record_items(&outputs).await;

        let pending = session.take_pending_input().await;
        if !pending.is_empty() {
            session.record_items(&pending).await;
        }
    }
}
