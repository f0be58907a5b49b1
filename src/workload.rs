// ABOUTME: Workload profiles, operation mixes, and the resolved options for one run
// ABOUTME: Weights expand into a flat round-robin slice the engine dispatches from
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::shapes::LoadShape;
use crate::transport::TransportSpec;

/// One entry in an operations mix
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMix {
    /// MCP method, e.g. `ping` or `tools/call`
    pub method: String,
    /// Bind `tools/call` to a single tool instead of round-robin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Relative weight in the mix
    pub weight: u32,
}

impl OperationMix {
    /// Convenience constructor
    pub fn new(method: impl Into<String>, weight: u32) -> Self {
        Self {
            method: method.into(),
            tool: None,
            weight,
        }
    }
}

/// Configuration for the find-ceiling phase controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindCeilingConfig {
    /// Requested seconds per phase, clamped by the engine
    #[serde(rename = "phaseDurationSec")]
    pub phase_duration_sec: u64,
    /// Stop stepping once concurrency would exceed this
    #[serde(rename = "maxConcurrency")]
    pub max_concurrency: u32,
    /// Minimum relative rps gain that still counts as progress
    #[serde(rename = "plateauThreshold")]
    pub plateau_threshold: f64,
}

impl Default for FindCeilingConfig {
    fn default() -> Self {
        Self {
            phase_duration_sec: 10,
            max_concurrency: 100,
            plateau_threshold: 0.05,
        }
    }
}

/// A named workload template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadProfile {
    /// Profile name
    pub name: String,
    /// One-line description for the `profiles` listing
    pub description: String,
    /// Operations mix with weights
    pub operations: Vec<OperationMix>,
    /// Default load shape
    pub shape: LoadShape,
    /// Run the find-ceiling controller instead of shaped execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub find_ceiling: Option<FindCeilingConfig>,
    /// Run the connection-churn controller instead of shaped execution
    #[serde(default)]
    pub connection_churn: bool,
}

impl WorkloadProfile {
    fn simple(name: &str, description: &str, operations: Vec<OperationMix>) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            operations,
            shape: LoadShape::Constant,
            find_ceiling: None,
            connection_churn: false,
        }
    }
}

/// Every built-in profile, in display order
#[must_use]
pub fn builtin_profiles() -> Vec<WorkloadProfile> {
    vec![
        WorkloadProfile::simple(
            "ping",
            "pure ping round trips, the lightest possible load",
            vec![OperationMix::new("ping", 1)],
        ),
        WorkloadProfile::simple(
            "tools",
            "hammer tools/call on the target tool (or all discovered tools)",
            vec![OperationMix::new("tools/call", 1)],
        ),
        WorkloadProfile::simple(
            "read-heavy",
            "listing and reading resources with occasional pings",
            vec![
                OperationMix::new("resources/list", 3),
                OperationMix::new("resources/read", 3),
                OperationMix::new("ping", 1),
            ],
        ),
        WorkloadProfile::simple(
            "mixed",
            "a blend of every common operation",
            vec![
                OperationMix::new("ping", 2),
                OperationMix::new("tools/list", 2),
                OperationMix::new("tools/call", 4),
                OperationMix::new("resources/list", 1),
                OperationMix::new("prompts/list", 1),
            ],
        ),
        WorkloadProfile {
            name: "find-ceiling".to_owned(),
            description: "step concurrency upward until throughput plateaus".to_owned(),
            operations: vec![OperationMix::new("ping", 1)],
            shape: LoadShape::Constant,
            find_ceiling: Some(FindCeilingConfig::default()),
            connection_churn: false,
        },
        WorkloadProfile {
            name: "connection-churn".to_owned(),
            description: "open, handshake, ping, and close fresh sessions in a loop".to_owned(),
            operations: vec![OperationMix::new("ping", 1)],
            shape: LoadShape::Constant,
            find_ceiling: None,
            connection_churn: true,
        },
    ]
}

/// Look up a built-in profile by name
#[must_use]
pub fn resolve_profile(name: &str) -> Option<WorkloadProfile> {
    builtin_profiles().into_iter().find(|p| p.name == name)
}

/// Expand weighted entries into a flat round-robin index slice
///
/// Entry `i` appears `weight` times; the dispatcher walks the slice
/// modulo its length.
#[must_use]
pub fn expand_weights(operations: &[OperationMix]) -> Vec<usize> {
    let mut slots = Vec::new();
    for (index, op) in operations.iter().enumerate() {
        for _ in 0..op.weight {
            slots.push(index);
        }
    }
    slots
}

/// Fully resolved options for one run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Profile name to resolve
    pub profile: String,
    /// Run duration in seconds (ignored when `requests` caps the run)
    pub duration_secs: u64,
    /// Total request cap; `None` runs for the duration
    pub requests: Option<u64>,
    /// Peak concurrency fed to the shape
    pub concurrency: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Bind `tools/call` operations to this tool
    pub tool: Option<String>,
    /// Override the profile's load shape
    pub shape: Option<LoadShape>,
    /// NDJSON output path
    pub output: Option<PathBuf>,
    /// PRNG seed; zero derives one from the clock
    pub seed: u32,
    /// Stand up the live dashboard
    pub live: bool,
    /// Print the summary object instead of the table
    pub json: bool,
    /// Assertion expressions evaluated against the summary
    pub assertions: Vec<String>,
    /// Number of repetitions of the same profile
    pub repeat: u32,
    /// Transport to construct for each session
    pub transport: TransportSpec,
}

impl RunOptions {
    /// Options with defaults for everything but the transport
    #[must_use]
    pub fn new(transport: TransportSpec) -> Self {
        Self {
            profile: "ping".to_owned(),
            duration_secs: 30,
            requests: None,
            concurrency: 10,
            timeout: crate::transport::DEFAULT_REQUEST_TIMEOUT,
            tool: None,
            shape: None,
            output: None,
            seed: 0,
            live: false,
            json: false,
            assertions: Vec::new(),
            repeat: 1,
            transport,
        }
    }

    /// Set the profile name
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Set the run duration in seconds
    #[must_use]
    pub const fn with_duration_secs(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    /// Cap the run at a total request count
    #[must_use]
    pub const fn with_requests(mut self, requests: u64) -> Self {
        self.requests = Some(requests);
        self
    }

    /// Set the peak concurrency
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the per-request timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the load shape
    #[must_use]
    pub const fn with_shape(mut self, shape: LoadShape) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Set the NDJSON output path
    #[must_use]
    pub fn with_output(mut self, path: PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    /// Set the PRNG seed
    #[must_use]
    pub const fn with_seed(mut self, seed: u32) -> Self {
        self.seed = seed;
        self
    }

    /// The effective shape: the override, or the profile's default
    #[must_use]
    pub fn effective_shape(&self, profile: &WorkloadProfile) -> LoadShape {
        self.shape.unwrap_or(profile.shape)
    }

    /// Serialize the configuration for the NDJSON meta line
    #[must_use]
    pub fn meta_config(&self) -> Value {
        serde_json::json!({
            "profile": self.profile,
            "transport": self.transport.kind(),
            "durationSec": self.duration_secs,
            "requests": self.requests,
            "concurrency": self.concurrency,
            "timeoutMs": self.timeout.as_millis() as u64,
            "tool": self.tool,
            "shape": self.shape.map(|s| s.name()),
            "seed": self.seed,
            "repeat": self.repeat,
        })
    }

    /// Command line that reproduces this run
    #[must_use]
    pub fn reproduction_command(&self) -> String {
        let mut parts = vec![
            "mcp-stress".to_owned(),
            "run".to_owned(),
            format!("--profile {}", self.profile),
            format!("--concurrency {}", self.concurrency),
            format!("--seed {}", self.seed),
        ];
        match self.requests {
            Some(cap) => parts.push(format!("--requests {cap}")),
            None => parts.push(format!("--duration {}", self.duration_secs)),
        }
        if let Some(shape) = self.shape {
            parts.push(format!("--shape {}", shape.name()));
        }
        if let Some(tool) = &self.tool {
            parts.push(format!("--tool {tool}"));
        }
        if self.repeat > 1 {
            parts.push(format!("--repeat {}", self.repeat));
        }
        match &self.transport {
            TransportSpec::Stdio { command, args, .. } => {
                parts.push("--".to_owned());
                parts.push(command.clone());
                parts.extend(args.iter().cloned());
            }
            TransportSpec::Sse { url, .. } => {
                parts.push(format!("--url {url}"));
                parts.push("--sse".to_owned());
            }
            TransportSpec::StreamableHttp { url, .. } => {
                parts.push(format!("--url {url}"));
            }
        }
        parts.join(" ")
    }
}

/// Stdio transport spec helper used by tests and the CLI
#[must_use]
pub fn stdio_spec(command: &str, args: &[&str]) -> TransportSpec {
    TransportSpec::Stdio {
        command: command.to_owned(),
        args: args.iter().map(|s| (*s).to_owned()).collect(),
        env: HashMap::new(),
    }
}
