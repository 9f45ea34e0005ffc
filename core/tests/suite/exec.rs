//! Shell tool calls driven through the full turn loop.

#![cfg(unix)]

use foreman_core::protocol::protocol::EventMsg;
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::collect_until;
use crate::common::shell_call;
use crate::common::shell_call_json;
use crate::common::submit_text;
use crate::common::test_foreman;
use crate::common::wait_for_event;

const ECHO_SAFE_POLICY: &str = r#"
    [[rule]]
    program = "echo"
    classification = "safe"
    args = [{ wildcard = true }]

    [[rule]]
    program = "sh"
    classification = "safe"
    args = [{ literal = "-c" }, { wildcard = true }]

    [[rule]]
    program = "sleep"
    classification = "safe"
    args = [{ wildcard = true }]

    [[rule]]
    program = "rm"
    classification = "forbidden"
    args = [{ literal = "-rf" }, { literal = "/" }]
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn safe_command_executes_and_reports_output() {
    let test = test_foreman()
        .policy(ECHO_SAFE_POLICY)
        .turn(vec![shell_call("call-1", &["echo", "hello"])])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "run echo").await;

    let begin = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandBegin(_))
    })
    .await;
    let EventMsg::ExecCommandBegin(begin) = begin else {
        unreachable!()
    };
    assert_eq!(begin.call_id, "call-1");
    assert_eq!(begin.command, vec!["echo", "hello"]);

    let end = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandEnd(_))
    })
    .await;
    let EventMsg::ExecCommandEnd(end) = end else {
        unreachable!()
    };
    assert_eq!(end.exit_code, 0);
    assert_eq!(end.stdout, "hello\n");
    assert!(!end.timed_out);

    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn forbidden_command_is_refused_without_executing() {
    let test = test_foreman()
        .policy(ECHO_SAFE_POLICY)
        .turn(vec![shell_call("call-1", &["rm", "-rf", "/"])])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "please wipe the disk").await;

    let events = collect_until(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
    assert!(
        !events
            .iter()
            .any(|msg| matches!(msg, EventMsg::ExecCommandBegin(_))),
        "forbidden command must never begin executing: {events:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_command_reports_timeout_exit_code() {
    let test = test_foreman()
        .policy(ECHO_SAFE_POLICY)
        .turn(vec![shell_call_json(
            "call-1",
            json!({
                "command": ["sleep", "5"],
                "timeout_ms": 200,
            }),
        )])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "sleep").await;

    let end = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandEnd(_))
    })
    .await;
    let EventMsg::ExecCommandEnd(end) = end else {
        unreachable!()
    };
    assert!(end.timed_out);
    assert_eq!(end.exit_code, 124);

    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn nonzero_exit_code_flows_into_exec_end_event() {
    let test = test_foreman()
        .policy(ECHO_SAFE_POLICY)
        .turn(vec![shell_call("call-1", &["sh", "-c", "exit 7"])])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "fail").await;

    let end = wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::ExecCommandEnd(_))
    })
    .await;
    let EventMsg::ExecCommandEnd(end) = end else {
        unreachable!()
    };
    assert_eq!(end.exit_code, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsupported_tool_yields_failure_output_not_a_crash() {
    let test = test_foreman()
        .turn(vec![
            foreman_core::protocol::models::ResponseItem::FunctionCall {
                name: "format_disk".to_string(),
                arguments: "{}".to_string(),
                call_id: "call-1".to_string(),
            },
        ])
        .turn(vec![])
        .build()
        .await;

    submit_text(&test.conversation, "do something odd").await;

    wait_for_event(&test.conversation, |msg| {
        matches!(msg, EventMsg::TaskComplete(_))
    })
    .await;
}
