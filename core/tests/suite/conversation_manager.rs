//! Conversation bookkeeping: lookup, removal and rollout resume.

use std::sync::Arc;
use std::time::Duration;

use foreman_core::ForemanErr;
use foreman_core::config::Config;
use foreman_core::protocol::ConversationId;
use foreman_core::protocol::models::ResponseItem;
use foreman_core::protocol::protocol::EventMsg;
use foreman_core::protocol::protocol::InputItem;
use foreman_core::protocol::protocol::Op;
use foreman_core::rollout::InMemoryRollout;
use foreman_core::rollout::JsonlRollout;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::common::submit_text;
use crate::common::test_foreman;
use crate::common::wait_for_event;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_conversation_id_is_not_found() {
    let test = test_foreman().build().await;
    let bogus = ConversationId::new();
    assert!(matches!(
        test.manager.get_conversation(bogus).await,
        Err(ForemanErr::ConversationNotFound(id)) if id == bogus
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_conversation_is_no_longer_addressable() {
    let test = test_foreman().build().await;

    test.manager
        .remove_conversation(test.conversation_id)
        .await
        .expect("remove idle conversation");
    assert!(matches!(
        test.manager.get_conversation(test.conversation_id).await,
        Err(ForemanErr::ConversationNotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removal_is_refused_while_a_turn_is_running() {
    let test = test_foreman().hanging_turn().build().await;

    submit_text(&test.conversation, "think forever").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskStarted(_))
    })
    .await;

    assert!(matches!(
        test.manager.remove_conversation(test.conversation_id).await,
        Err(ForemanErr::SessionActive(_))
    ));

    // Once the turn is aborted the same removal goes through.
    test.conversation.interrupt().await.expect("interrupt");
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TurnAborted(_))
    })
    .await;
    test.manager
        .remove_conversation(test.conversation_id)
        .await
        .expect("remove after interrupt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_replays_recorded_history() {
    let dir = TempDir::new().expect("tempdir");
    let rollout = Arc::new(JsonlRollout::new(dir.path().join("rollout.jsonl")));

    let test = test_foreman()
        .turn(vec![ResponseItem::assistant_message("recorded answer")])
        .build()
        .await;

    let recorded = test
        .manager
        .new_conversation_with_rollout(
            Config::new(dir.path().to_path_buf()),
            Arc::clone(&rollout) as Arc<dyn foreman_core::rollout::RolloutRecorder>,
        )
        .await
        .expect("conversation with jsonl rollout");
    recorded
        .conversation
        .submit(Op::UserInput {
            items: vec![InputItem::Text {
                text: "remember this".to_string(),
            }],
        })
        .await
        .expect("submit");
    wait_for_event(&recorded.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    recorded.conversation.shutdown().await.expect("shutdown");
    wait_for_event(&recorded.conversation, |msg| {
        matches!(msg, EventMsg::ShutdownComplete)
    })
    .await;

    let resumed = test
        .manager
        .resume_conversation_from_rollout(Config::new(dir.path().to_path_buf()), rollout)
        .await
        .expect("resume");
    assert_eq!(resumed.session_configured.history_entry_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resuming_an_empty_rollout_is_an_error() {
    let test = test_foreman().build().await;
    let result = test
        .manager
        .resume_conversation_from_rollout(
            Config::new(test.cwd.path().to_path_buf()),
            Arc::new(InMemoryRollout::default()),
        )
        .await;
    assert!(matches!(result, Err(ForemanErr::EmptyRollout)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_completes_and_closes_the_submission_queue() {
    let test = test_foreman().build().await;

    test.conversation.shutdown().await.expect("shutdown");
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ShutdownComplete)
    })
    .await;

    // The submission loop exits right after emitting the event; submissions
    // start failing as soon as the queue's receiver is gone.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match test.conversation.submit(Op::Interrupt).await {
            Err(ForemanErr::InternalAgentDied) => break,
            Ok(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            other => panic!("expected the agent to be gone, got {other:?}"),
        }
    }
}
