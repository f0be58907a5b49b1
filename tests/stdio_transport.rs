// ABOUTME: Integration tests for the stdio transport against echo subprocesses
// ABOUTME: Uses cat as a trivial server: every request line echoes back as its own reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::time::Duration;

use mcp_stress::transport::stdio::StdioTransport;
use mcp_stress::transport::Transport;
use mcp_stress::ErrorCategory;

fn cat_transport(timeout_ms: u64) -> StdioTransport {
    StdioTransport::new(
        "cat".to_owned(),
        vec![],
        HashMap::new(),
        Duration::from_millis(timeout_ms),
    )
}

#[tokio::test]
async fn request_gets_exactly_one_completion() {
    let transport = cat_transport(5_000);
    transport.connect().await.expect("connect");

    // cat echoes the request line; the echoed object carries our id, so
    // it parses as the matching (null-result) reply
    let reply = transport.request("ping", None).await.expect("reply");
    assert!(reply.result.is_null());
    assert!(reply.latency_ms >= 0.0);

    transport.close().await;
}

#[tokio::test]
async fn concurrent_requests_match_by_id() {
    let transport = std::sync::Arc::new(cat_transport(5_000));
    transport.connect().await.expect("connect");

    let mut handles = Vec::new();
    for i in 0..20 {
        let transport = std::sync::Arc::clone(&transport);
        handles.push(tokio::spawn(async move {
            transport
                .request("ping", Some(serde_json::json!({ "n": i })))
                .await
        }));
    }
    for handle in handles {
        let reply = handle.await.expect("join").expect("reply");
        assert!(reply.result.is_null());
    }

    transport.close().await;
}

#[tokio::test]
async fn notifications_echo_back_to_the_handler() {
    let transport = cat_transport(5_000);
    let mut notifications = transport.take_notifications().expect("first take");
    assert!(transport.take_notifications().is_none(), "single receiver");

    transport.connect().await.expect("connect");
    transport
        .notify("notifications/progress", Some(serde_json::json!({"p": 1})))
        .await
        .expect("notify");

    // The echoed notification has a method but no id
    let note = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timely")
        .expect("notification");
    assert_eq!(note.method, "notifications/progress");

    transport.close().await;
}

#[tokio::test]
async fn garbage_stdout_lines_are_skipped() {
    // A startup banner precedes the echo loop
    let transport = StdioTransport::new(
        "sh".to_owned(),
        vec![
            "-c".to_owned(),
            "echo 'starting up, not json'; exec cat".to_owned(),
        ],
        HashMap::new(),
        Duration::from_millis(5_000),
    );
    transport.connect().await.expect("connect");

    let reply = transport.request("ping", None).await.expect("reply");
    assert!(reply.result.is_null());

    transport.close().await;
}

#[tokio::test]
async fn silent_server_times_out() {
    // sleep never answers; the request must time out, not hang
    let transport = StdioTransport::new(
        "sleep".to_owned(),
        vec!["30".to_owned()],
        HashMap::new(),
        Duration::from_millis(100),
    );
    transport.connect().await.expect("connect");

    let err = transport.request("ping", None).await.expect_err("timeout");
    assert_eq!(err.category, ErrorCategory::Timeout);
    assert_eq!(err.code, -1);

    transport.close().await;
}

#[tokio::test]
async fn close_rejects_pending_and_is_idempotent() {
    let transport = std::sync::Arc::new(StdioTransport::new(
        "sleep".to_owned(),
        vec!["30".to_owned()],
        HashMap::new(),
        Duration::from_secs(30),
    ));
    transport.connect().await.expect("connect");

    let pending = {
        let transport = std::sync::Arc::clone(&transport);
        tokio::spawn(async move { transport.request("ping", None).await })
    };
    // Let the request reach the pending table before closing
    tokio::time::sleep(Duration::from_millis(100)).await;

    transport.close().await;
    assert!(transport.is_closed());

    let err = pending.await.expect("join").expect_err("closing error");
    assert_eq!(err.category, ErrorCategory::Client);

    // Second close is a no-op
    transport.close().await;
    assert!(transport.is_closed());

    // Requests after close fail fast
    let err = transport.request("ping", None).await.expect_err("closed");
    assert_eq!(err.category, ErrorCategory::Client);
}

#[tokio::test]
async fn spawn_failure_is_a_client_error() {
    let transport = StdioTransport::new(
        "definitely-not-a-real-binary-mcp".to_owned(),
        vec![],
        HashMap::new(),
        Duration::from_secs(1),
    );
    let err = transport.connect().await.expect_err("spawn failure");
    assert_eq!(err.category, ErrorCategory::Client);
}

#[tokio::test]
async fn extra_env_reaches_the_child() {
    // sh prints the env var as a JSON-RPC notification we can observe
    let transport = StdioTransport::new(
        "sh".to_owned(),
        vec![
            "-c".to_owned(),
            r#"printf '{"jsonrpc":"2.0","method":"env","params":{"v":"%s"}}\n' "$STRESS_PROBE"; exec cat"#
                .to_owned(),
        ],
        HashMap::from([("STRESS_PROBE".to_owned(), "visible".to_owned())]),
        Duration::from_secs(5),
    );
    let mut notifications = transport.take_notifications().expect("receiver");
    transport.connect().await.expect("connect");

    let note = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timely")
        .expect("notification");
    assert_eq!(note.method, "env");
    assert_eq!(note.params.expect("params")["v"], "visible");

    transport.close().await;
}
