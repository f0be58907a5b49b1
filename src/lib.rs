// ABOUTME: Stress-testing driver library for MCP servers over stdio, SSE, and streamable HTTP
// ABOUTME: Re-exports the engine, transports, recorder/aggregator pipeline, and statistics
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # mcp-stress — MCP Server Stress Driver
//!
//! Opens one or many Model Context Protocol sessions, drives a workload
//! against them under a chosen load shape, records per-request outcomes,
//! and persists an NDJSON record of the run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcp_stress::engine::Engine;
//! use mcp_stress::workload::{stdio_spec, RunOptions};
//!
//! # async fn example() -> Result<(), mcp_stress::error::EngineError> {
//! let options = RunOptions::new(stdio_spec("my-mcp-server", &[]))
//!     .with_profile("mixed")
//!     .with_duration_secs(30)
//!     .with_concurrency(20);
//! let result = Engine::new(options).run().await?;
//! println!("{} requests", result.runs[0].summary.total_requests);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`transport`] — stdio, legacy SSE, and streamable-HTTP transports
//! - [`client`] — typed MCP operations and the initialize handshake
//! - [`recorder`] — hot-path request accounting
//! - [`aggregator`] — NDJSON serialization and the final summary
//! - [`sampler`] — JSON-Schema argument generation with a seeded PRNG
//! - [`engine`] — shaped execution, find-ceiling, connection churn
//! - [`stats`] — percentiles, windows, assertions, multi-run aggregates
//! - [`dashboard`] — live-run SSE dashboard server
//! - [`history`] — named-run library on disk

/// NDJSON serialization worker and summary computation
pub mod aggregator;
/// Typed MCP client operations
pub mod client;
/// Live-dashboard HTTP server
pub mod dashboard;
/// Execution engine and its controllers
pub mod engine;
/// Error taxonomy for transports and the engine
pub mod error;
/// NDJSON event types and the run-file reader
pub mod events;
/// Named-run library under the home directory
pub mod history;
/// JSON-RPC wire types
pub mod jsonrpc;
/// Hot-path request recorder
pub mod recorder;
/// Schema-driven argument generation
pub mod sampler;
/// Load-shape functions
pub mod shapes;
/// Statistics: percentiles, windows, assertions, aggregates
pub mod stats;
/// Transport trait and implementations
pub mod transport;
/// Workload profiles and run options
pub mod workload;

pub use client::McpClient;
pub use engine::{Engine, MultiRunResult, RunResult};
pub use error::{EngineError, ErrorCategory, TransportError};
pub use events::{LatencyStats, MetaEvent, RequestEvent, SummaryEvent};
pub use recorder::Recorder;
pub use sampler::{Mulberry32, SchemaSampler};
pub use shapes::LoadShape;
pub use stats::{Assertion, RunAggregate};
pub use transport::{Transport, TransportSpec};
pub use workload::{RunOptions, WorkloadProfile};
