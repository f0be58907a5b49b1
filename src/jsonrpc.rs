// ABOUTME: JSON-RPC 2.0 wire types for the MCP client side of the protocol
// ABOUTME: Defines outgoing requests, incoming message triage, and the frozen handshake params
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version this driver speaks
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Client name reported during the MCP handshake
pub const CLIENT_NAME: &str = "mcp-stress";

/// Client version reported during the MCP handshake
pub const CLIENT_VERSION: &str = "0.1.0";

// ============================================================================
// JSON-RPC Error Codes
// ============================================================================

/// JSON-RPC parse error: invalid JSON received
pub const PARSE_ERROR: i64 = -32_700;

/// JSON-RPC method not found; diagnose treats this as "capability absent"
pub const METHOD_NOT_FOUND: i64 = -32_601;

/// JSON-RPC internal error
pub const INTERNAL_ERROR: i64 = -32_603;

// ============================================================================
// Outgoing Messages
// ============================================================================

/// Outgoing JSON-RPC request
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Monotonic per-transport request id
    pub id: u64,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request with the given id, method, and params
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outgoing JSON-RPC notification (no id, no response expected)
#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    /// Always "2.0"
    pub jsonrpc: &'static str,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Build a notification with the given method and params
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Incoming Messages
// ============================================================================

/// JSON-RPC error object from a server reply
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable error message
    pub message: String,
    /// Additional error data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A message received from the server, already triaged
///
/// Servers send two kinds of traffic back: replies to our requests
/// (carrying an `id`) and server-initiated notifications (a `method`
/// without an `id`).
#[derive(Debug)]
pub enum IncomingMessage {
    /// Reply to a request we sent
    Response {
        /// The id of the request being answered
        id: u64,
        /// Success payload (`None` when `error` is set)
        result: Option<Value>,
        /// Error payload (`None` on success)
        error: Option<JsonRpcError>,
    },
    /// Server-initiated notification
    Notification {
        /// Notification method name
        method: String,
        /// Notification parameters
        params: Option<Value>,
    },
}

impl IncomingMessage {
    /// Triage a parsed JSON value into a response or notification
    ///
    /// Returns `None` for values that are neither (no usable `id` and no
    /// `method`), which callers skip at protocol level.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let error = value
                .get("error")
                .cloned()
                .and_then(|e| serde_json::from_value::<JsonRpcError>(e).ok());
            return Some(Self::Response {
                id,
                result: value.get("result").cloned(),
                error,
            });
        }

        if let Some(method) = value.get("method").and_then(Value::as_str) {
            return Some(Self::Notification {
                method: method.to_owned(),
                params: value.get("params").cloned(),
            });
        }

        None
    }
}

/// Frozen `initialize` request parameters for the MCP handshake
#[must_use]
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": CLIENT_NAME,
            "version": CLIENT_VERSION,
        },
    })
}
