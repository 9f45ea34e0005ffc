//! The `update_plan` tool. Pure bookkeeping: the plan is forwarded to the
//! client as an event, nothing is executed.

use std::sync::Arc;

use foreman_protocol::models::FunctionCallOutputPayload;
use foreman_protocol::protocol::EventMsg;
use foreman_protocol::protocol::PlanUpdateEvent;

use crate::session::Session;
use crate::tools::invalid_arguments;

pub(crate) async fn handle_update_plan(
    session: &Arc<Session>,
    sub_id: &str,
    arguments: &str,
) -> FunctionCallOutputPayload {
    let update: PlanUpdateEvent = match serde_json::from_str(arguments) {
        Ok(update) => update,
        Err(err) => return invalid_arguments("update_plan", &err),
    };
    if update.plan.is_empty() {
        return FunctionCallOutputPayload::failure("plan must contain at least one step");
    }

    session.send_event(sub_id, EventMsg::PlanUpdate(update)).await;
    FunctionCallOutputPayload::success("plan updated")
}
