// ABOUTME: Transport abstraction carrying JSON-RPC over stdio, legacy SSE, or streamable HTTP
// ABOUTME: Defines the Transport trait, reply type, and construction from a target spec
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

pub mod pending;
pub mod sse;
pub mod sse_codec;
pub mod stdio;
pub mod streamable;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the notification channel between reader task and handler
pub(crate) const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// A successful JSON-RPC reply with its transport-measured latency
#[derive(Debug, Clone)]
pub struct Reply {
    /// The `result` member of the reply
    pub result: Value,
    /// Milliseconds from outbound write to matching-id parse
    pub latency_ms: f64,
}

/// A server-initiated notification delivered to the registered handler
#[derive(Debug, Clone)]
pub struct ServerNotification {
    /// Notification method name
    pub method: String,
    /// Notification parameters
    pub params: Option<Value>,
}

/// Receiver half of the notification channel
pub type NotificationReceiver = mpsc::Receiver<ServerNotification>;

/// Transport carrying JSON-RPC requests to one MCP session
///
/// A transport connects once, carries many requests, and closes once.
/// Latency is measured at this boundary so the engine never measures
/// itself.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish per-session state; must precede any request
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send a request with a fresh id and await its matching response
    async fn request(&self, method: &str, params: Option<Value>)
        -> Result<Reply, TransportError>;

    /// Send a notification; no response is expected
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    /// Take the channel on which server-initiated notifications arrive
    ///
    /// At most one receiver exists per transport; later calls return `None`.
    fn take_notifications(&self) -> Option<NotificationReceiver>;

    /// Terminate the session and reject all pending requests; idempotent
    async fn close(&self);

    /// True once the transport is closed
    fn is_closed(&self) -> bool;
}

/// Which transport a run should construct
#[derive(Debug, Clone)]
pub enum TransportSpec {
    /// Subprocess with line-delimited JSON on stdin/stdout
    Stdio {
        /// Program to spawn
        command: String,
        /// Program arguments
        args: Vec<String>,
        /// Extra environment entries layered over the parent environment
        env: HashMap<String, String>,
    },
    /// Legacy HTTP with a long-lived SSE response channel
    Sse {
        /// SSE subscription URL
        url: String,
        /// Extra request headers
        headers: Vec<(String, String)>,
    },
    /// Modern single-URL streamable HTTP
    StreamableHttp {
        /// MCP endpoint URL
        url: String,
        /// Extra request headers
        headers: Vec<(String, String)>,
    },
}

impl TransportSpec {
    /// Short name used in logs and the run meta
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamable-http",
        }
    }

    /// Construct an unconnected transport for this spec
    ///
    /// # Errors
    ///
    /// Returns an error when an HTTP client cannot be built for the
    /// configured headers or timeout.
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn Transport>, TransportError> {
        match self {
            Self::Stdio { command, args, env } => Ok(Arc::new(stdio::StdioTransport::new(
                command.clone(),
                args.clone(),
                env.clone(),
                timeout,
            ))),
            Self::Sse { url, headers } => Ok(Arc::new(sse::SseTransport::new(
                url.clone(),
                headers.clone(),
                timeout,
            )?)),
            Self::StreamableHttp { url, headers } => Ok(Arc::new(
                streamable::StreamableHttpTransport::new(url.clone(), headers.clone(), timeout)?,
            )),
        }
    }
}

/// Round a latency to two decimals; the file format assumes this exact form
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_is_stable() {
        assert!((round2(1.005) - 1.01).abs() < 1e-9 || (round2(1.005) - 1.0).abs() < 1e-9);
        assert!((round2(3.14159) - 3.14).abs() < 1e-9);
        assert!((round2(0.0) - 0.0).abs() < f64::EPSILON);
        // Idempotent: rounding a rounded value changes nothing
        let once = round2(7.23456);
        assert!((round2(once) - once).abs() < f64::EPSILON);
    }

    #[test]
    fn spec_kind_names() {
        let stdio = TransportSpec::Stdio {
            command: "server".to_owned(),
            args: vec![],
            env: HashMap::new(),
        };
        assert_eq!(stdio.kind(), "stdio");

        let sse = TransportSpec::Sse {
            url: "http://localhost/sse".to_owned(),
            headers: vec![],
        };
        assert_eq!(sse.kind(), "sse");

        let streamable = TransportSpec::StreamableHttp {
            url: "http://localhost/mcp".to_owned(),
            headers: vec![],
        };
        assert_eq!(streamable.kind(), "streamable-http");
    }
}
