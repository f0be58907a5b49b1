// ABOUTME: Error taxonomy for transport and engine failures with JSON-RPC codes
// ABOUTME: Classifies wire errors into timeout, protocol, server, network, and client buckets
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde_json::Value;

/// Category of a failed request, recorded as a small integer on the hot path
///
/// `as_int` values are part of the NDJSON file contract: 0 is reserved for
/// success, failures are 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Per-request deadline exceeded; the request is abandoned
    Timeout,
    /// Malformed JSON, unexpected content type, or a stream that ended early
    Protocol,
    /// JSON-RPC reply carrying an `error` member
    Server,
    /// TCP / DNS / TLS connection failure
    Network,
    /// All other local failures, including misuse
    Client,
}

impl ErrorCategory {
    /// Integer form stored in raw records (success is 0)
    #[must_use]
    pub const fn as_int(&self) -> u8 {
        match self {
            Self::Timeout => 1,
            Self::Protocol => 2,
            Self::Server => 3,
            Self::Network => 4,
            Self::Client => 5,
        }
    }

    /// Reverse of [`as_int`](Self::as_int); `None` for 0 and unknown values
    #[must_use]
    pub const fn from_int(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Timeout),
            2 => Some(Self::Protocol),
            3 => Some(Self::Server),
            4 => Some(Self::Network),
            5 => Some(Self::Client),
            _ => None,
        }
    }

    /// Stable string form used in serialized events
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::Server => "server",
            Self::Network => "network",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by a transport operation
///
/// Carries the classification category, a machine code (JSON-RPC code for
/// server and protocol errors, -1 otherwise), and whatever latency the
/// transport observed before the failure.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// Failure classification
    pub category: ErrorCategory,
    /// JSON-RPC error code where applicable, -1 otherwise
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured data from a JSON-RPC error object
    pub data: Option<Value>,
    /// Latency observed up to the failure, in milliseconds
    pub latency_ms: f64,
}

impl TransportError {
    /// Per-request deadline exceeded
    pub fn timeout(message: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            category: ErrorCategory::Timeout,
            code: -1,
            message: message.into(),
            data: None,
            latency_ms,
        }
    }

    /// Malformed JSON or framing violation; `code` is usually -32700
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Protocol,
            code,
            message: message.into(),
            data: None,
            latency_ms: 0.0,
        }
    }

    /// JSON-RPC error reply, code carried through from the server
    pub fn server(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            category: ErrorCategory::Server,
            code,
            message: message.into(),
            data,
            latency_ms: 0.0,
        }
    }

    /// Connection-level failure (TCP, DNS, TLS, reset)
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Network,
            code: -1,
            message: message.into(),
            data: None,
            latency_ms: 0.0,
        }
    }

    /// Local failure that fits no other bucket
    pub fn client(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Client,
            code: -1,
            message: message.into(),
            data: None,
            latency_ms: 0.0,
        }
    }

    /// Attach an observed latency to this error
    #[must_use]
    pub const fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Classify a reqwest failure into the transport taxonomy
    ///
    /// Timeouts map to `timeout`, connection-level failures to `network`,
    /// body-decode failures to `protocol`, anything else to `client`.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string(), 0.0)
        } else if err.is_connect() {
            Self::network(err.to_string())
        } else if err.is_decode() {
            Self::protocol(crate::jsonrpc::PARSE_ERROR, err.to_string())
        } else {
            let msg = err.to_string().to_ascii_lowercase();
            if msg.contains("connection reset")
                || msg.contains("connection refused")
                || msg.contains("connection closed")
                || msg.contains("broken pipe")
                || msg.contains("dns")
            {
                Self::network(err.to_string())
            } else {
                Self::client(err.to_string())
            }
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {}): {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Fatal engine-level error that surfaces to the caller
///
/// Per-request failures never become an `EngineError`; only bad
/// configuration, handshake failure, and output I/O do.
#[derive(Debug)]
pub enum EngineError {
    /// Invalid run configuration
    Config(String),
    /// MCP handshake failed; the run is aborted
    Handshake(TransportError),
    /// Output file I/O failure after open
    Io(std::io::Error),
}

impl EngineError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Handshake(err) => write!(f, "handshake failed: {err}"),
            Self::Io(err) => write!(f, "output error: {err}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
