// ABOUTME: Integration tests for the SSE and streamable-HTTP transports against in-process servers
// ABOUTME: Small axum apps emulate both MCP HTTP dialects, including inline SSE replies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use mcp_stress::transport::sse::SseTransport;
use mcp_stress::transport::streamable::StreamableHttpTransport;
use mcp_stress::transport::Transport;
use mcp_stress::ErrorCategory;

/// Reply payload for an echoed request
fn reply_for(request: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": { "echo": request["method"] },
    })
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

// ============================================================================
// Streamable HTTP server fixture
// ============================================================================

async fn streamable_json(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    // Notifications carry no id and get no body
    if body.get("id").is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let mut response = Json(reply_for(&body)).into_response();
    response
        .headers_mut()
        .insert("Mcp-Session-Id", "sess-123".parse().expect("header"));
    // Echo back whether the client replayed the session header
    if headers.contains_key("Mcp-Session-Id") {
        response
            .headers_mut()
            .insert("X-Session-Seen", "1".parse().expect("header"));
    }
    response
}

/// Inline SSE body: a notification frame, then the matching reply
async fn streamable_sse(Json(body): Json<Value>) -> Response {
    if body.get("id").is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let note = json!({
        "jsonrpc": "2.0",
        "method": "notifications/progress",
        "params": { "progress": 1 },
    });
    let reply = reply_for(&body);
    let frames = format!(
        "event: message\ndata: {note}\n\nevent: message\ndata: {reply}\n\n",
    );
    Response::builder()
        .header("content-type", "text/event-stream")
        .body(axum::body::Body::from(frames))
        .expect("response")
}

async fn streamable_text() -> Response {
    Response::builder()
        .header("content-type", "text/plain")
        .body(axum::body::Body::from("nope"))
        .expect("response")
}

#[tokio::test]
async fn streamable_json_reply_round_trips() {
    let addr = serve(
        Router::new()
            .route("/mcp", post(streamable_json).delete(|| async { StatusCode::OK })),
    )
    .await;

    let transport = StreamableHttpTransport::new(
        format!("http://{addr}/mcp"),
        vec![],
        Duration::from_secs(5),
    )
    .expect("transport");
    transport.connect().await.expect("connect");

    let reply = transport.request("ping", None).await.expect("reply");
    assert_eq!(reply.result["echo"], "ping");
    assert!(reply.latency_ms > 0.0);

    // Session id captured on the first response is replayed afterwards
    let reply = transport.request("tools/list", None).await.expect("reply");
    assert_eq!(reply.result["echo"], "tools/list");

    transport.close().await;
    assert!(transport.is_closed());
}

#[tokio::test]
async fn streamable_inline_sse_reply_and_notification() {
    let addr = serve(Router::new().route("/mcp", post(streamable_sse))).await;

    let transport = StreamableHttpTransport::new(
        format!("http://{addr}/mcp"),
        vec![],
        Duration::from_secs(5),
    )
    .expect("transport");
    let mut notifications = transport.take_notifications().expect("receiver");
    transport.connect().await.expect("connect");

    let reply = transport.request("ping", None).await.expect("reply");
    assert_eq!(reply.result["echo"], "ping");

    // The extra frame on the stream arrived as a server notification
    let note = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
        .await
        .expect("timely")
        .expect("notification");
    assert_eq!(note.method, "notifications/progress");

    transport.close().await;
}

#[tokio::test]
async fn streamable_unexpected_content_type_is_protocol_error() {
    let addr = serve(Router::new().route("/mcp", post(streamable_text))).await;

    let transport = StreamableHttpTransport::new(
        format!("http://{addr}/mcp"),
        vec![],
        Duration::from_secs(5),
    )
    .expect("transport");
    transport.connect().await.expect("connect");

    let err = transport.request("ping", None).await.expect_err("protocol");
    assert_eq!(err.category, ErrorCategory::Protocol);

    transport.close().await;
}

#[tokio::test]
async fn streamable_connection_refused_is_network_error() {
    // Nothing listens on this port
    let transport = StreamableHttpTransport::new(
        "http://127.0.0.1:1/mcp".to_owned(),
        vec![],
        Duration::from_secs(2),
    )
    .expect("transport");
    transport.connect().await.expect("connect");

    let err = transport.request("ping", None).await.expect_err("network");
    assert_eq!(err.category, ErrorCategory::Network);

    transport.close().await;
}

// ============================================================================
// Legacy SSE server fixture
// ============================================================================

#[derive(Clone)]
struct SseServer {
    replies: broadcast::Sender<String>,
}

async fn sse_subscribe(State(server): State<SseServer>) -> Response {
    let rx = server.replies.subscribe();
    let endpoint =
        futures::stream::once(async { Ok::<_, Infallible>(Event::default()
            .event("endpoint")
            .data("/messages?sessionId=abc123")) });
    let replies = BroadcastStream::new(rx).filter_map(|item| {
        item.ok()
            .map(|data| Ok::<_, Infallible>(Event::default().event("message").data(data)))
    });
    Sse::new(endpoint.chain(replies)).into_response()
}

async fn sse_messages(State(server): State<SseServer>, Json(body): Json<Value>) -> Response {
    if body.get("id").is_some() {
        let _ = server.replies.send(reply_for(&body).to_string());
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn sse_app() -> SocketAddr {
    let (replies, _) = broadcast::channel(64);
    let server = SseServer { replies };
    serve(
        Router::new()
            .route("/sse", get(sse_subscribe))
            .route("/messages", post(sse_messages))
            .with_state(server),
    )
    .await
}

#[tokio::test]
async fn legacy_sse_discovers_endpoint_and_round_trips() {
    let addr = sse_app().await;

    let transport = SseTransport::new(
        format!("http://{addr}/sse"),
        vec![],
        Duration::from_secs(5),
    )
    .expect("transport");
    transport.connect().await.expect("connect");

    let reply = transport.request("ping", None).await.expect("reply");
    assert_eq!(reply.result["echo"], "ping");

    // Several requests share the one stream and match by id
    for method in ["tools/list", "resources/list", "prompts/list"] {
        let reply = transport.request(method, None).await.expect("reply");
        assert_eq!(reply.result["echo"], method);
    }

    transport.close().await;
    assert!(transport.is_closed());
}

#[tokio::test]
async fn legacy_sse_notifications_are_dropped_posts() {
    let addr = sse_app().await;

    let transport = SseTransport::new(
        format!("http://{addr}/sse"),
        vec![],
        Duration::from_secs(5),
    )
    .expect("transport");
    transport.connect().await.expect("connect");

    // No reply travels back for a notification; the call itself succeeds
    transport
        .notify("notifications/initialized", None)
        .await
        .expect("notify");

    transport.close().await;
}

#[tokio::test]
async fn legacy_sse_rejects_wrong_content_type() {
    // A plain JSON endpoint is not an SSE subscription
    let addr = serve(Router::new().route(
        "/sse",
        get(|| async { Json(json!({"not": "sse"})) }),
    ))
    .await;

    let transport = SseTransport::new(
        format!("http://{addr}/sse"),
        vec![],
        Duration::from_secs(2),
    )
    .expect("transport");

    let err = transport.connect().await.expect_err("protocol");
    assert_eq!(err.category, ErrorCategory::Protocol);
}
