use foreman_core::protocol::models::ResponseItem;
use foreman_core::protocol::protocol::EventMsg;
use pretty_assertions::assert_eq;

use crate::common::submit_text;
use crate::common::test_foreman;
use crate::common::wait_for_event;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_configured_reports_model_and_empty_history() {
    let test = test_foreman().build().await;
    assert_eq!(test.session_configured.model, "default");
    assert_eq!(test.session_configured.history_entry_count, 0);
    assert_eq!(test.session_configured.conversation_id, test.conversation_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_message_turn_completes_with_last_agent_message() {
    let test = test_foreman()
        .turn(vec![ResponseItem::assistant_message("hello there")])
        .build()
        .await;

    submit_text(&test.conversation, "hi").await;

    let started =
        wait_for_event(&test.conversation, |msg| matches!(msg, EventMsg::TaskStarted(_))).await;
    let EventMsg::TaskStarted(started) = started else {
        unreachable!()
    };
    assert_eq!(started.turn_index, 1);

    let message = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::AgentMessage(_))
    })
    .await;
    let EventMsg::AgentMessage(message) = message else {
        unreachable!()
    };
    assert_eq!(message.message, "hello there");

    let complete = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    let EventMsg::TaskComplete(complete) = complete else {
        unreachable!()
    };
    assert_eq!(complete.last_agent_message.as_deref(), Some("hello there"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn turn_indices_increase_across_turns() {
    let test = test_foreman()
        .turn(vec![ResponseItem::assistant_message("one")])
        .turn(vec![ResponseItem::assistant_message("two")])
        .build()
        .await;

    submit_text(&test.conversation, "first").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;

    submit_text(&test.conversation, "second").await;
    let started =
        wait_for_event(&test.conversation, |msg| matches!(msg, EventMsg::TaskStarted(_))).await;
    let EventMsg::TaskStarted(started) = started else {
        unreachable!()
    };
    assert_eq!(started.turn_index, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_user_input_is_rejected_with_an_error_event() {
    let test = test_foreman().build().await;
    test.conversation
        .submit(foreman_core::protocol::protocol::Op::UserInput { items: vec![] })
        .await
        .expect("submit");

    let error = wait_for_event(&test.conversation, |msg| matches!(msg, EventMsg::Error(_))).await;
    let EventMsg::Error(error) = error else {
        unreachable!()
    };
    assert!(error.message.contains("empty"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn model_transport_failure_ends_the_turn_with_error() {
    let test = test_foreman().failing_client().build().await;

    submit_text(&test.conversation, "hi").await;

    let events = crate::common::collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TurnAborted(_))
    })
    .await;
    assert!(
        events.iter().any(|msg| matches!(msg, EventMsg::Error(_))),
        "expected an Error event before the abort: {events:?}"
    );
    let Some(EventMsg::TurnAborted(aborted)) = events.last() else {
        unreachable!()
    };
    assert_eq!(
        aborted.reason,
        foreman_core::protocol::protocol::TurnAbortReason::Error
    );
}
