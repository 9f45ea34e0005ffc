//! Approval-gate behavior: prompting, session-wide approvals, denials and
//! aborts.

#![cfg(unix)]

use foreman_core::protocol::protocol::AskForApproval;
use foreman_core::protocol::protocol::EventMsg;
use foreman_core::protocol::protocol::Op;
use foreman_core::protocol::protocol::ReviewDecision;
use foreman_core::protocol::protocol::SandboxPolicy;
use foreman_core::protocol::protocol::TurnAbortReason;
use pretty_assertions::assert_eq;

use crate::common::TestForeman;
use crate::common::collect_until;
use crate::common::shell_call;
use crate::common::submit_text;
use crate::common::test_foreman;
use crate::common::wait_for_event;

/// Full-access sandbox policy so approved commands can run on hosts without
/// a sandbox helper; the approval pipeline itself is what is under test.
async fn approval_fixture(turns: Vec<Vec<foreman_core::protocol::models::ResponseItem>>) -> TestForeman {
    let mut builder = test_foreman().configure(|config| {
        config.sandbox_policy = SandboxPolicy::DangerFullAccess;
    });
    for turn in turns {
        builder = builder.turn(turn);
    }
    builder.build().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unverified_command_prompts_and_runs_after_approval() {
    let test = approval_fixture(vec![
        vec![shell_call("call-1", &["echo", "approved run"])],
        vec![],
    ])
    .await;

    submit_text(&test.conversation, "run it").await;

    let request = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;
    let EventMsg::ExecApprovalRequest(request) = request else {
        unreachable!()
    };
    assert_eq!(request.call_id, "call-1");
    assert_eq!(request.command, vec!["echo", "approved run"]);
    assert!(request.reason.is_some());

    test.conversation
        .submit(Op::ExecApproval {
            id: request.call_id,
            decision: ReviewDecision::Approved,
        })
        .await
        .expect("submit approval");

    let end = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandEnd(_))
    })
    .await;
    let EventMsg::ExecCommandEnd(end) = end else {
        unreachable!()
    };
    assert_eq!(end.exit_code, 0);
    assert_eq!(end.stdout, "approved run\n");

    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn denied_command_never_executes_and_turn_continues() {
    let test = approval_fixture(vec![
        vec![shell_call("call-1", &["echo", "nope"])],
        vec![],
    ])
    .await;

    submit_text(&test.conversation, "run it").await;

    let request = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;
    let EventMsg::ExecApprovalRequest(request) = request else {
        unreachable!()
    };
    test.conversation
        .submit(Op::ExecApproval {
            id: request.call_id,
            decision: ReviewDecision::Denied,
        })
        .await
        .expect("submit denial");

    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecCommandBegin(_))),
        "denied command must not execute: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn approve_for_session_skips_the_second_prompt() {
    let test = approval_fixture(vec![
        vec![shell_call("call-1", &["echo", "same command"])],
        vec![],
        vec![shell_call("call-2", &["echo", "same command"])],
        vec![],
    ])
    .await;

    submit_text(&test.conversation, "first").await;
    let request = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;
    let EventMsg::ExecApprovalRequest(request) = request else {
        unreachable!()
    };
    test.conversation
        .submit(Op::ExecApproval {
            id: request.call_id,
            decision: ReviewDecision::ApprovedForSession,
        })
        .await
        .expect("submit approval");
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;

    submit_text(&test.conversation, "again").await;
    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecApprovalRequest(_))),
        "session-approved command must not prompt again: {events:?}"
    );
    assert!(
        events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecCommandEnd(_))),
        "session-approved command must execute: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abort_decision_aborts_the_whole_turn() {
    let test = approval_fixture(vec![vec![shell_call("call-1", &["echo", "no"])]]).await;

    submit_text(&test.conversation, "run it").await;
    let request = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;
    let EventMsg::ExecApprovalRequest(request) = request else {
        unreachable!()
    };
    test.conversation
        .submit(Op::ExecApproval {
            id: request.call_id,
            decision: ReviewDecision::Abort,
        })
        .await
        .expect("submit abort");

    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TurnAborted(_))
    })
    .await;
    let Some(EventMsg::TurnAborted(aborted)) = events.last() else {
        unreachable!()
    };
    assert_eq!(aborted.reason, TurnAbortReason::Interrupted);
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::TaskComplete(_))),
        "aborted turn must not complete: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn approval_for_unknown_call_id_reports_an_error() {
    let test = approval_fixture(vec![
        vec![shell_call("call-1", &["echo", "hi"])],
        vec![],
    ])
    .await;

    submit_text(&test.conversation, "run it").await;
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;

    test.conversation
        .submit(Op::ExecApproval {
            id: "no-such-call".to_string(),
            decision: ReviewDecision::Approved,
        })
        .await
        .expect("submit bogus approval");
    let error = wait_for_event(&test.conversation, |msg| matches!(msg, EventMsg::Error(_))).await;
    let EventMsg::Error(error) = error else {
        unreachable!()
    };
    assert!(error.message.contains("no-such-call"));

    // The real approval still works afterwards.
    test.conversation
        .submit(Op::ExecApproval {
            id: "call-1".to_string(),
            decision: ReviewDecision::Approved,
        })
        .await
        .expect("submit real approval");
    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn never_policy_runs_without_prompting() {
    let test = test_foreman()
        .configure(|config| {
            config.approval_policy = AskForApproval::Never;
            config.sandbox_policy = SandboxPolicy::DangerFullAccess;
        })
        .turn(vec![shell_call("call-1", &["echo", "untrusted"])])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "run it").await;

    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecApprovalRequest(_))),
        "never-prompt sessions must not prompt: {events:?}"
    );
    assert!(
        events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecCommandEnd(_))),
        "command should have run: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unless_trusted_escalates_partial_matches() {
    let test = test_foreman()
        .policy(
            r#"
            [[rule]]
            program = "git"
            classification = "safe"
            args = [{ literal = "status" }]
            "#,
        )
        .configure(|config| {
            config.approval_policy = AskForApproval::UnlessTrusted;
            config.sandbox_policy = SandboxPolicy::DangerFullAccess;
        })
        .turn(vec![shell_call("call-1", &["git", "status", "--porcelain"]) ])
        .build()
        .await;

    submit_text(&test.conversation, "check git").await;

    let request = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecApprovalRequest(_))
    })
    .await;
    let EventMsg::ExecApprovalRequest(request) = request else {
        unreachable!()
    };
    assert_eq!(request.command, vec!["git", "status", "--porcelain"]);
}
