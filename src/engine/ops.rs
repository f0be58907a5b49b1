// ABOUTME: Prepared operation set: weighted round-robin dispatch over typed MCP operations
// ABOUTME: Binds tools/call to discovered tools with per-tool interned method ids
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use crate::client::{McpClient, ToolDefinition};
use crate::error::TransportError;
use crate::recorder::Recorder;
use crate::sampler::SchemaSampler;
use crate::workload::{expand_weights, RunOptions, WorkloadProfile};

/// One resolved operation in the dispatch slice
#[derive(Debug)]
enum ResolvedOp {
    Ping { method_id: u32 },
    ListTools { method_id: u32 },
    /// `None` round-robins over every discovered tool
    CallTool { bound: Option<usize> },
    ListResources { method_id: u32 },
    ReadResource { method_id: u32 },
    ListResourceTemplates { method_id: u32 },
    ListPrompts { method_id: u32 },
    GetPrompt { method_id: u32 },
}

/// Prepared operations for one session
///
/// Built once after the handshake: discovers tools, resources, and
/// prompts as the mix requires, interns every method id up front, and
/// hands out operations round-robin.
pub struct OpSet {
    client: Arc<McpClient>,
    recorder: Arc<Recorder>,
    sampler: Mutex<SchemaSampler>,
    ops: Vec<ResolvedOp>,
    slots: Vec<usize>,
    cursor: AtomicUsize,
    tools: Vec<ToolDefinition>,
    tool_method_ids: Vec<u32>,
    tool_cursor: AtomicUsize,
    resource_uris: Vec<String>,
    resource_cursor: AtomicUsize,
    prompt_names: Vec<String>,
    prompt_cursor: AtomicUsize,
    notices: Vec<String>,
}

impl OpSet {
    /// Discover what the mix needs and resolve every operation
    pub async fn prepare(
        profile: &WorkloadProfile,
        options: &RunOptions,
        client: Arc<McpClient>,
        recorder: Arc<Recorder>,
    ) -> Self {
        let mut notices = Vec::new();

        let needs_tools = profile.operations.iter().any(|op| op.method == "tools/call");
        let needs_resources = profile
            .operations
            .iter()
            .any(|op| op.method == "resources/read");
        let needs_prompts = profile.operations.iter().any(|op| op.method == "prompts/get");

        let mut tools = Vec::new();
        if needs_tools {
            match client.list_tools().await {
                Ok(timed) => tools = timed.value,
                Err(e) => warn!("tools/list during setup failed: {e}"),
            }
            if let Some(filter) = options.tool.as_deref().or(profile
                .operations
                .iter()
                .find_map(|op| op.tool.as_deref()))
            {
                tools.retain(|t| t.name == filter);
                if tools.is_empty() {
                    notices.push(format!(
                        "tool '{filter}' not found on the server, falling back to ping"
                    ));
                }
            }
        }

        let mut resource_uris = Vec::new();
        if needs_resources {
            match client.list_resources().await {
                Ok(timed) => {
                    resource_uris = timed
                        .value
                        .get("resources")
                        .and_then(Value::as_array)
                        .map(|resources| {
                            resources
                                .iter()
                                .filter_map(|r| r.get("uri").and_then(Value::as_str))
                                .map(ToOwned::to_owned)
                                .collect()
                        })
                        .unwrap_or_default();
                }
                Err(e) => warn!("resources/list during setup failed: {e}"),
            }
        }

        let mut prompt_names = Vec::new();
        if needs_prompts {
            match client.list_prompts().await {
                Ok(timed) => {
                    prompt_names = timed
                        .value
                        .get("prompts")
                        .and_then(Value::as_array)
                        .map(|prompts| {
                            prompts
                                .iter()
                                .filter_map(|p| p.get("name").and_then(Value::as_str))
                                .map(ToOwned::to_owned)
                                .collect()
                        })
                        .unwrap_or_default();
                }
                Err(e) => warn!("prompts/list during setup failed: {e}"),
            }
        }

        // Each tool gets its own interned method id so per-method
        // statistics stay meaningful.
        let tool_method_ids: Vec<u32> = tools
            .iter()
            .map(|tool| recorder.register_method(&format!("tools/call:{}", tool.name)))
            .collect();

        let mut ops = Vec::with_capacity(profile.operations.len());
        for entry in &profile.operations {
            let op = match entry.method.as_str() {
                "ping" => ResolvedOp::Ping {
                    method_id: recorder.register_method("ping"),
                },
                "tools/list" => ResolvedOp::ListTools {
                    method_id: recorder.register_method("tools/list"),
                },
                "tools/call" => {
                    if tools.is_empty() {
                        notices.push(
                            "no tools available for tools/call, falling back to ping".to_owned(),
                        );
                        ResolvedOp::Ping {
                            method_id: recorder.register_method("ping"),
                        }
                    } else if tools.len() == 1 {
                        ResolvedOp::CallTool { bound: Some(0) }
                    } else {
                        ResolvedOp::CallTool { bound: None }
                    }
                }
                "resources/list" => ResolvedOp::ListResources {
                    method_id: recorder.register_method("resources/list"),
                },
                "resources/read" => {
                    if resource_uris.is_empty() {
                        notices.push(
                            "no resources available for resources/read, using resources/list"
                                .to_owned(),
                        );
                        ResolvedOp::ListResources {
                            method_id: recorder.register_method("resources/list"),
                        }
                    } else {
                        ResolvedOp::ReadResource {
                            method_id: recorder.register_method("resources/read"),
                        }
                    }
                }
                "resources/templates/list" => ResolvedOp::ListResourceTemplates {
                    method_id: recorder.register_method("resources/templates/list"),
                },
                "prompts/list" => ResolvedOp::ListPrompts {
                    method_id: recorder.register_method("prompts/list"),
                },
                "prompts/get" => {
                    if prompt_names.is_empty() {
                        notices.push(
                            "no prompts available for prompts/get, using prompts/list".to_owned(),
                        );
                        ResolvedOp::ListPrompts {
                            method_id: recorder.register_method("prompts/list"),
                        }
                    } else {
                        ResolvedOp::GetPrompt {
                            method_id: recorder.register_method("prompts/get"),
                        }
                    }
                }
                other => {
                    warn!(method = other, "Unknown method in mix, substituting ping");
                    ResolvedOp::Ping {
                        method_id: recorder.register_method("ping"),
                    }
                }
            };
            ops.push(op);
        }

        let slots = expand_weights(&profile.operations);

        Self {
            client,
            recorder,
            sampler: Mutex::new(SchemaSampler::new(options.seed)),
            ops,
            slots,
            cursor: AtomicUsize::new(0),
            tools,
            tool_method_ids,
            tool_cursor: AtomicUsize::new(0),
            resource_uris,
            resource_cursor: AtomicUsize::new(0),
            prompt_names,
            prompt_cursor: AtomicUsize::new(0),
            notices,
        }
    }

    /// Setup notices worth surfacing (fallbacks, missing tools)
    #[must_use]
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    /// Dispatch the next operation in the mix and record its outcome
    pub async fn run_next(&self) {
        if self.slots.is_empty() {
            return;
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let op = &self.ops[self.slots[slot]];

        let (method_id, outcome) = self.execute(op).await;
        match outcome {
            Ok(latency_ms) => self.recorder.success(method_id, latency_ms),
            Err(err) => self.recorder.error(method_id, &err),
        }
    }

    async fn execute(&self, op: &ResolvedOp) -> (u32, Result<f64, TransportError>) {
        match op {
            ResolvedOp::Ping { method_id } => {
                (*method_id, self.client.ping().await.map(|t| t.latency_ms))
            }
            ResolvedOp::ListTools { method_id } => (
                *method_id,
                self.client.list_tools().await.map(|t| t.latency_ms),
            ),
            ResolvedOp::CallTool { bound } => {
                let index = bound.unwrap_or_else(|| {
                    self.tool_cursor.fetch_add(1, Ordering::Relaxed) % self.tools.len()
                });
                let tool = &self.tools[index];
                let method_id = self.tool_method_ids[index];
                let args = self
                    .sampler
                    .lock()
                    .map(|mut sampler| sampler.generate_random_args(&tool.input_schema))
                    .unwrap_or(Value::Null);
                (
                    method_id,
                    self.client
                        .call_tool(&tool.name, args)
                        .await
                        .map(|t| t.latency_ms),
                )
            }
            ResolvedOp::ListResources { method_id } => (
                *method_id,
                self.client.list_resources().await.map(|t| t.latency_ms),
            ),
            ResolvedOp::ReadResource { method_id } => {
                let index =
                    self.resource_cursor.fetch_add(1, Ordering::Relaxed) % self.resource_uris.len();
                (
                    *method_id,
                    self.client
                        .read_resource(&self.resource_uris[index])
                        .await
                        .map(|t| t.latency_ms),
                )
            }
            ResolvedOp::ListResourceTemplates { method_id } => (
                *method_id,
                self.client
                    .list_resource_templates()
                    .await
                    .map(|t| t.latency_ms),
            ),
            ResolvedOp::ListPrompts { method_id } => (
                *method_id,
                self.client.list_prompts().await.map(|t| t.latency_ms),
            ),
            ResolvedOp::GetPrompt { method_id } => {
                let index =
                    self.prompt_cursor.fetch_add(1, Ordering::Relaxed) % self.prompt_names.len();
                let args = Value::Object(serde_json::Map::new());
                (
                    *method_id,
                    self.client
                        .get_prompt(&self.prompt_names[index], args)
                        .await
                        .map(|t| t.latency_ms),
                )
            }
        }
    }
}
