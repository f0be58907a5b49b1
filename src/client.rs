// ABOUTME: Thin MCP client exposing typed operations over any Transport
// ABOUTME: Owns the initialize handshake and the tools/call isError convention
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::{Arc, Mutex};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::jsonrpc::{initialize_params, PROTOCOL_VERSION};
use crate::transport::Transport;

/// A value returned by an MCP operation, with its transport latency
#[derive(Debug, Clone)]
pub struct Timed<T> {
    /// The operation result
    pub value: T,
    /// Transport-measured latency in milliseconds
    pub latency_ms: f64,
}

/// Tool definition returned by `tools/list`
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable tool description
    #[serde(default)]
    pub description: Option<String>,
    /// JSON Schema describing the tool's input
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// Server identity and capabilities captured during the handshake
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    /// Protocol version the server reported
    pub protocol_version: String,
    /// `serverInfo` object as returned
    pub server_info: Value,
    /// `capabilities` object as returned
    pub capabilities: Value,
}

/// MCP client: typed operations on top of a [`Transport`]
pub struct McpClient {
    transport: Arc<dyn Transport>,
    handshake: Mutex<Option<ServerHandshake>>,
}

impl McpClient {
    /// Wrap a transport; the handshake has not run yet
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            handshake: Mutex::new(None),
        }
    }

    /// The underlying transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Server details captured by [`initialize`](Self::initialize)
    #[must_use]
    pub fn handshake(&self) -> Option<ServerHandshake> {
        self.handshake.lock().ok().and_then(|h| h.clone())
    }

    /// Run the MCP handshake: `initialize` then `notifications/initialized`
    ///
    /// A protocol-version mismatch is logged and tolerated.
    ///
    /// # Errors
    ///
    /// Returns the transport error when either message fails.
    pub async fn initialize(&self) -> Result<Timed<ServerHandshake>, TransportError> {
        let reply = self
            .transport
            .request("initialize", Some(initialize_params()))
            .await?;

        let protocol_version = reply
            .result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %protocol_version,
                client = PROTOCOL_VERSION,
                "Protocol version mismatch, proceeding anyway"
            );
        }

        let handshake = ServerHandshake {
            protocol_version,
            server_info: reply.result.get("serverInfo").cloned().unwrap_or(Value::Null),
            capabilities: reply
                .result
                .get("capabilities")
                .cloned()
                .unwrap_or(Value::Null),
        };

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        debug!(server = %handshake.server_info, "MCP handshake complete");
        if let Ok(mut slot) = self.handshake.lock() {
            *slot = Some(handshake.clone());
        }

        Ok(Timed {
            value: handshake,
            latency_ms: reply.latency_ms,
        })
    }

    /// `ping`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn ping(&self) -> Result<Timed<Value>, TransportError> {
        let reply = self.transport.request("ping", None).await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `tools/list`
    ///
    /// # Errors
    ///
    /// Returns the transport error, or `protocol` when the payload shape
    /// is not a tool list.
    pub async fn list_tools(&self) -> Result<Timed<Vec<ToolDefinition>>, TransportError> {
        let reply = self.transport.request("tools/list", None).await?;
        let tools: Vec<ToolDefinition> = reply
            .result
            .get("tools")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                TransportError::protocol(-1, format!("invalid tools/list payload: {e}"))
                    .with_latency(reply.latency_ms)
            })?
            .unwrap_or_default();
        Ok(Timed {
            value: tools,
            latency_ms: reply.latency_ms,
        })
    }

    /// `tools/call`
    ///
    /// A result with `isError: true` is a logical failure: the returned
    /// error preserves the measured latency so the recorder sees it.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or a `server` error for an
    /// `isError: true` tool result.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Timed<Value>, TransportError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let reply = self.transport.request("tools/call", Some(params)).await?;

        if reply
            .result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let message = first_text_content(&reply.result)
                .unwrap_or_else(|| format!("tool {name} reported an error"));
            return Err(
                TransportError::server(-1, message, None).with_latency(reply.latency_ms)
            );
        }

        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `resources/list`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn list_resources(&self) -> Result<Timed<Value>, TransportError> {
        let reply = self.transport.request("resources/list", None).await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `resources/read`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn read_resource(&self, uri: &str) -> Result<Timed<Value>, TransportError> {
        let params = serde_json::json!({ "uri": uri });
        let reply = self.transport.request("resources/read", Some(params)).await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `resources/templates/list`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn list_resource_templates(&self) -> Result<Timed<Value>, TransportError> {
        let reply = self
            .transport
            .request("resources/templates/list", None)
            .await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `prompts/list`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn list_prompts(&self) -> Result<Timed<Value>, TransportError> {
        let reply = self.transport.request("prompts/list", None).await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }

    /// `prompts/get`
    ///
    /// # Errors
    ///
    /// Returns the transport error on failure.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<Timed<Value>, TransportError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let reply = self.transport.request("prompts/get", Some(params)).await?;
        Ok(Timed {
            value: reply.result,
            latency_ms: reply.latency_ms,
        })
    }
}

/// First `type: "text"` content item in a tool result, for error messages
fn first_text_content(result: &Value) -> Option<String> {
    result
        .get("content")
        .and_then(Value::as_array)?
        .iter()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|item| item.get("text").and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_text_content_picks_text_items() {
        let result = serde_json::json!({
            "content": [
                {"type": "image", "data": "…"},
                {"type": "text", "text": "boom"},
            ],
            "isError": true,
        });
        assert_eq!(first_text_content(&result).as_deref(), Some("boom"));
    }

    #[test]
    fn first_text_content_handles_missing_content() {
        assert!(first_text_content(&serde_json::json!({})).is_none());
    }

    #[test]
    fn tool_definition_deserializes_input_schema() {
        let tool: ToolDefinition = serde_json::from_value(serde_json::json!({
            "name": "search_docs",
            "description": "Search the docs",
            "inputSchema": {"type": "object", "properties": {}},
        }))
        .expect("deserialize");
        assert_eq!(tool.name, "search_docs");
        assert_eq!(tool.input_schema["type"], "object");
    }
}
