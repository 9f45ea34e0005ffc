use foreman_core::protocol::models::ResponseItem;
use foreman_core::protocol::protocol::EventMsg;
use foreman_core::protocol::protocol::TurnAbortReason;
use pretty_assertions::assert_eq;

use crate::common::collect_until;
use crate::common::submit_text;
use crate::common::test_foreman;
use crate::common::wait_for_event;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_aborts_a_hanging_turn() {
    let test = test_foreman().hanging_turn().build().await;

    submit_text(&test.conversation, "think forever").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskStarted(_))
    })
    .await;

    test.conversation.interrupt().await.expect("interrupt");

    let aborted = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TurnAborted(_))
    })
    .await;
    let EventMsg::TurnAborted(aborted) = aborted else {
        unreachable!()
    };
    assert_eq!(aborted.reason, TurnAbortReason::Interrupted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupt_without_a_turn_is_a_no_op() {
    let test = test_foreman()
        .turn(vec![ResponseItem::assistant_message("later")])
        .build()
        .await;

    test.conversation.interrupt().await.expect("interrupt");

    // The session is still fully operational afterwards.
    submit_text(&test.conversation, "hello").await;
    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::TurnAborted(_))),
        "idle interrupt must not abort anything: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_turn_can_be_followed_by_a_fresh_one() {
    let test = test_foreman()
        .hanging_turn()
        .turn(vec![ResponseItem::assistant_message("second answer")])
        .build()
        .await;

    submit_text(&test.conversation, "first").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskStarted(_))
    })
    .await;
    test.conversation.interrupt().await.expect("interrupt");
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TurnAborted(_))
    })
    .await;

    submit_text(&test.conversation, "try again").await;
    let started = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskStarted(_))
    })
    .await;
    let EventMsg::TaskStarted(started) = started else {
        unreachable!()
    };
    assert_eq!(started.turn_index, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn input_during_a_turn_joins_it_instead_of_starting_another() {
    let test = test_foreman()
        .policy(
            r#"
            [[rule]]
            program = "sleep"
            classification = "safe"
            args = [{ wildcard = true }]
            "#,
        )
        .turn(vec![ResponseItem::FunctionCall {
            name: "shell".to_string(),
            arguments: r#"{"command":["sleep","0.5"]}"#.to_string(),
            call_id: "call-1".to_string(),
        }])
        .turn(vec![ResponseItem::assistant_message("done")])
        .build()
        .await;

    submit_text(&test.conversation, "long job").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandBegin(_))
    })
    .await;

    // Lands while the sleep is still running, so it must be folded into the
    // active turn.
    submit_text(&test.conversation, "extra context").await;

    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::TaskStarted(_))),
        "queued input must not start a second turn: {events:?}"
    );
}
