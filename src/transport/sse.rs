// ABOUTME: Legacy HTTP+SSE transport: a long-lived event stream carries replies to POSTed requests
// ABOUTME: Discovers the POST endpoint from the stream and enforces same-origin on it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::TransportError;
use crate::jsonrpc::{IncomingMessage, JsonRpcNotification, JsonRpcRequest};
use crate::transport::pending::PendingTable;
use crate::transport::sse_codec::{SseEvent, SseParser};
use crate::transport::{
    NotificationReceiver, Reply, ServerNotification, Transport, NOTIFICATION_CHANNEL_CAPACITY,
};

/// Legacy two-URL MCP transport
///
/// A GET on the configured URL opens the SSE channel; the first
/// `event: endpoint` frame names the POST URL. Requests go out as POSTs
/// and their responses come back on the SSE stream, matched by id.
pub struct SseTransport {
    url: Url,
    client: reqwest::Client,
    timeout: Duration,
    pending: Arc<PendingTable>,
    endpoint: StdMutex<Option<Url>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    notification_rx: StdMutex<Option<NotificationReceiver>>,
    notification_tx: mpsc::Sender<ServerNotification>,
}

impl SseTransport {
    /// Create an unconnected legacy SSE transport
    ///
    /// # Errors
    ///
    /// Returns an error when the URL or a header is malformed.
    pub fn new(
        url: String,
        headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let url = Url::parse(&url)
            .map_err(|e| TransportError::client(format!("invalid SSE URL '{url}': {e}")))?;
        let client = build_http_client(&headers)?;
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Ok(Self {
            url,
            client,
            timeout,
            pending: Arc::new(PendingTable::new()),
            endpoint: StdMutex::new(None),
            reader_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            notification_rx: StdMutex::new(Some(notification_rx)),
            notification_tx,
        })
    }

    fn endpoint_url(&self) -> Result<Url, TransportError> {
        self.endpoint
            .lock()
            .ok()
            .and_then(|e| e.clone())
            .ok_or_else(|| TransportError::client("transport is not connected"))
    }

    async fn post_body(&self, body: String) -> Result<(), TransportError> {
        let endpoint = self.endpoint_url()?;
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status();
        // The real reply travels on the SSE stream; this body is drained
        let _ = response.bytes().await;

        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::protocol(
                -1,
                format!("POST to message endpoint returned {status}"),
            ))
        }
    }
}

/// Resolve the endpoint reference against the SSE URL and verify origin
fn resolve_endpoint(base: &Url, reference: &str) -> Result<Url, TransportError> {
    let endpoint = base
        .join(reference)
        .map_err(|e| TransportError::protocol(-1, format!("invalid endpoint '{reference}': {e}")))?;

    let same_origin = endpoint.scheme() == base.scheme()
        && endpoint.host_str() == base.host_str()
        && endpoint.port_or_known_default() == base.port_or_known_default();
    if !same_origin {
        return Err(TransportError::protocol(
            -1,
            format!("endpoint origin {endpoint} does not match SSE origin {base}"),
        ));
    }
    Ok(endpoint)
}

/// Dispatch one `event: message` frame to the pending table or handler
fn dispatch_message(
    event: &SseEvent,
    pending: &PendingTable,
    notifications: &mpsc::Sender<ServerNotification>,
) {
    let value: Value = match serde_json::from_str(&event.data) {
        Ok(value) => value,
        Err(e) => {
            debug!("Malformed JSON on SSE stream: {e}");
            return;
        }
    };

    match IncomingMessage::from_value(&value) {
        Some(IncomingMessage::Response { id, result, error }) => {
            pending.complete(id, result, error);
        }
        Some(IncomingMessage::Notification { method, params }) => {
            let note = ServerNotification { method, params };
            if notifications.try_send(note).is_err() {
                debug!("Notification channel full or closed, dropping");
            }
        }
        None => debug!("SSE message is not JSON-RPC, skipping"),
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        if !response.status().is_success() {
            return Err(TransportError::network(format!(
                "SSE subscription returned {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();
        if !content_type.starts_with("text/event-stream") {
            return Err(TransportError::protocol(
                -1,
                format!("expected text/event-stream, got '{content_type}'"),
            ));
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();

        // Read until the endpoint frame arrives; anything else this early
        // is unexpected but harmless.
        let endpoint = tokio::time::timeout(self.timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| TransportError::from_reqwest(&e))?;
                for event in parser.feed(&chunk) {
                    if event.event_type() == "endpoint" {
                        return resolve_endpoint(&self.url, event.data.trim());
                    }
                    debug!(event = %event.event_type(), "SSE frame before endpoint, skipping");
                }
            }
            Err(TransportError::protocol(
                -1,
                "SSE stream ended before an endpoint event",
            ))
        })
        .await
        .map_err(|_| {
            TransportError::timeout("no endpoint event within the request timeout", 0.0)
        })??;

        debug!(endpoint = %endpoint, "SSE endpoint discovered");
        if let Ok(mut slot) = self.endpoint.lock() {
            *slot = Some(endpoint);
        }

        // Keep consuming the same stream for replies and notifications
        let pending = Arc::clone(&self.pending);
        let notifications = self.notification_tx.clone();
        let task = tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let Ok(chunk) = chunk else {
                    break;
                };
                for event in parser.feed(&chunk) {
                    if event.event_type() == "message" {
                        dispatch_message(&event, &pending, &notifications);
                    } else {
                        debug!(event = %event.event_type(), "Ignoring SSE frame");
                    }
                }
            }
            debug!("SSE stream closed");
            pending.fail_all("server closed the connection");
        });
        *self.reader_task.lock().await = Some(task);

        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Reply, TransportError> {
        if self.is_closed() {
            return Err(TransportError::client("transport is closed"));
        }

        let id = self.pending.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request)
            .map_err(|e| TransportError::client(format!("request serialization failed: {e}")))?;

        let rx = self.pending.register(id);
        if let Err(err) = self.post_body(body).await {
            self.pending.abandon(id);
            return Err(err);
        }

        self.pending.await_reply(id, rx, self.timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::client("transport is closed"));
        }
        let note = JsonRpcNotification::new(method, params);
        let body = serde_json::to_string(&note)
            .map_err(|e| TransportError::client(format!("notification serialization failed: {e}")))?;
        self.post_body(body).await
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        self.notification_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pending.fail_all("transport closing");
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        debug!("SSE transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Build a reqwest client carrying the user-supplied headers on every request
pub(crate) fn build_http_client(
    headers: &[(String, String)],
) -> Result<reqwest::Client, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::client(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::client(format!("invalid header value: {e}")))?;
        map.insert(name, value);
    }

    reqwest::Client::builder()
        .default_headers(map)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| TransportError::client(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://localhost:8080/sse").expect("url")
    }

    #[test]
    fn relative_endpoint_resolves_against_base() {
        let endpoint =
            resolve_endpoint(&base(), "/messages?sessionId=abc123").expect("resolve");
        assert_eq!(
            endpoint.as_str(),
            "http://localhost:8080/messages?sessionId=abc123"
        );
    }

    #[test]
    fn absolute_same_origin_endpoint_is_accepted() {
        let endpoint =
            resolve_endpoint(&base(), "http://localhost:8080/messages").expect("resolve");
        assert_eq!(endpoint.path(), "/messages");
    }

    #[test]
    fn cross_origin_endpoint_is_rejected() {
        let err = resolve_endpoint(&base(), "http://evil.example.com/messages")
            .expect_err("origin mismatch");
        assert_eq!(err.category, crate::error::ErrorCategory::Protocol);
    }

    #[test]
    fn cross_port_endpoint_is_rejected() {
        let err =
            resolve_endpoint(&base(), "http://localhost:9999/messages").expect_err("port mismatch");
        assert_eq!(err.category, crate::error::ErrorCategory::Protocol);
    }

    #[test]
    fn invalid_headers_fail_client_construction() {
        let result = build_http_client(&[("bad header".to_owned(), "x".to_owned())]);
        assert!(result.is_err());
    }
}
