// ABOUTME: Streamable-HTTP transport: each POST returns JSON or an inline SSE stream
// ABOUTME: Captures the Mcp-Session-Id header and replays it on every subsequent request
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::jsonrpc::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, PARSE_ERROR};
use crate::transport::pending::PendingTable;
use crate::transport::sse::build_http_client;
use crate::transport::sse_codec::SseParser;
use crate::transport::{
    NotificationReceiver, Reply, ServerNotification, Transport, NOTIFICATION_CHANNEL_CAPACITY,
};

/// Session header defined by MCP protocol revision 2025-03-26
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Modern single-URL MCP transport
///
/// Every request is a POST; the response is either a JSON body or an
/// inline SSE stream whose `event: message` frames carry the reply and
/// any server notifications.
pub struct StreamableHttpTransport {
    url: Url,
    client: reqwest::Client,
    timeout: Duration,
    pending: Arc<PendingTable>,
    session_id: StdMutex<Option<String>>,
    closed: AtomicBool,
    notification_rx: StdMutex<Option<NotificationReceiver>>,
    notification_tx: mpsc::Sender<ServerNotification>,
}

impl StreamableHttpTransport {
    /// Create an unconnected streamable-HTTP transport
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
            .map_err(|e| TransportError::client(format!("invalid URL '{url}': {e}")))?;
        let client = build_http_client(&headers)?;
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Ok(Self {
            url,
            client,
            timeout,
            pending: Arc::new(PendingTable::new()),
            session_id: StdMutex::new(None),
            closed: AtomicBool::new(false),
            notification_rx: StdMutex::new(Some(notification_rx)),
            notification_tx,
        })
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn capture_session_id(&self, response: &reqwest::Response) {
        let Some(value) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        if let Ok(mut slot) = self.session_id.lock() {
            if slot.is_none() {
                debug!(session = %value, "Captured MCP session id");
                *slot = Some(value.to_owned());
            }
        }
    }

    async fn post(&self, body: String) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;
        self.capture_session_id(&response);
        Ok(response)
    }

    /// Consume an inline SSE body until the reply for `id` arrives
    async fn scan_sse_body(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<(), TransportError> {
        let mut stream = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();
        let mut found = false;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::from_reqwest(&e))?;
            for event in parser.feed(&chunk) {
                if event.event_type() != "message" {
                    debug!(event = %event.event_type(), "Ignoring SSE frame");
                    continue;
                }
                if self.dispatch(&event.data, id) {
                    found = true;
                }
            }
            if found {
                // Reply delivered; drain no further
                return Ok(());
            }
        }

        if let Some(event) = parser.finish() {
            if event.event_type() == "message" && self.dispatch(&event.data, id) {
                return Ok(());
            }
        }

        Err(TransportError::protocol(
            -1,
            "SSE response stream ended without a matching reply",
        ))
    }

    /// Route one message; returns true when it completed request `id`
    fn dispatch(&self, data: &str, id: u64) -> bool {
        let value: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                debug!("Malformed JSON in SSE response: {e}");
                return false;
            }
        };
        match IncomingMessage::from_value(&value) {
            Some(IncomingMessage::Response {
                id: reply_id,
                result,
                error,
            }) => {
                self.pending.complete(reply_id, result, error);
                reply_id == id
            }
            Some(IncomingMessage::Notification { method, params }) => {
                let note = ServerNotification { method, params };
                if self.notification_tx.try_send(note).is_err() {
                    debug!("Notification channel full or closed, dropping");
                }
                false
            }
            None => false,
        }
    }

    /// Execute the POST-and-parse flow for one request
    async fn request_flow(&self, id: u64, body: String) -> Result<(), TransportError> {
        let response = self.post(body).await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        if !status.is_success() {
            let _ = response.bytes().await;
            return Err(TransportError::protocol(
                -1,
                format!("POST returned {status}"),
            ));
        }

        if content_type.starts_with("application/json") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| TransportError::from_reqwest(&e))?;
            let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
                TransportError::protocol(PARSE_ERROR, format!("invalid JSON response: {e}"))
            })?;
            match IncomingMessage::from_value(&value) {
                Some(IncomingMessage::Response {
                    id: reply_id,
                    result,
                    error,
                }) => {
                    self.pending.complete(reply_id, result, error);
                    Ok(())
                }
                _ => Err(TransportError::protocol(
                    PARSE_ERROR,
                    "response body is not a JSON-RPC reply",
                )),
            }
        } else if content_type.starts_with("text/event-stream") {
            self.scan_sse_body(response, id).await
        } else {
            let _ = response.bytes().await;
            Err(TransportError::protocol(
                -1,
                format!("unexpected content type '{content_type}'"),
            ))
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // Session state is established lazily by the first POST; nothing
        // to do here beyond validating construction succeeded.
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
        let flow = tokio::time::timeout(self.timeout, self.request_flow(id, body)).await;
        match flow {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let latency = self.pending.abandon(id).unwrap_or(0.0);
                return Err(err.with_latency(latency));
            }
            Err(_) => {
                let latency = self.pending.abandon(id).unwrap_or(0.0);
                return Err(TransportError::timeout(
                    format!("no response within {}ms", self.timeout.as_millis()),
                    latency,
                ));
            }
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

        let response = self.post(body).await?;
        let status = response.status();
        let _ = response.bytes().await;
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::protocol(
                -1,
                format!("notification POST returned {status}"),
            ))
        }
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        self.notification_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pending.fail_all("transport closing");

        // Best-effort session teardown; servers may reject DELETE
        let mut request = self.client.delete(self.url.clone());
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }
        match request.timeout(Duration::from_secs(5)).send().await {
            Ok(response) => debug!(status = %response.status(), "Session DELETE sent"),
            Err(e) => debug!("Session DELETE failed: {e}"),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
