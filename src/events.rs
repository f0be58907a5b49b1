// ABOUTME: NDJSON event types for the persistent run record (meta, request, summary)
// ABOUTME: Includes the reader that parses a written file back for aggregation and charts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Latency distribution statistics in milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Smallest observed latency
    pub min: f64,
    /// Largest observed latency
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// Median
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
}

/// Per-method request counts and latency distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodStats {
    /// Resolved method name (e.g. `tools/call:search_docs`)
    pub method: String,
    /// Requests attempted for this method
    pub count: u64,
    /// Failed requests for this method
    pub errors: u64,
    /// Latency distribution over this method's requests
    #[serde(flatten)]
    pub latency: LatencyStats,
}

/// First line of every NDJSON file: the run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEvent {
    /// Always "meta"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Full run configuration, serialized as written
    pub config: Value,
    /// Command line that reproduces this run
    pub command: String,
    /// Set on cross-run aggregate files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<bool>,
    /// Number of runs combined into an aggregate file
    #[serde(rename = "runCount", default, skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u32>,
}

impl MetaEvent {
    /// Build a single-run meta line
    pub fn new(config: Value, command: impl Into<String>) -> Self {
        Self {
            event_type: "meta".to_owned(),
            config,
            command: command.into(),
            aggregate: None,
            run_count: None,
        }
    }

    /// Build an aggregate meta line combining `run_count` runs
    pub fn aggregate(config: Value, command: impl Into<String>, run_count: u32) -> Self {
        Self {
            event_type: "meta".to_owned(),
            config,
            command: command.into(),
            aggregate: Some(true),
            run_count: Some(run_count),
        }
    }
}

/// One per-request event; these lines carry no `type` field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    /// Milliseconds since run start, truncated to integer
    pub t: u64,
    /// Resolved method name
    pub method: String,
    /// Observed latency in milliseconds, rounded to two decimals
    #[serde(rename = "latencyMs")]
    pub latency_ms: f64,
    /// Outcome
    pub ok: bool,
    /// Last observed message for this (category, code) pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error category name, absent on success
    #[serde(
        rename = "errorCategory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_category: Option<String>,
    /// JSON-RPC error code or -1, absent on success
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
    /// Target concurrency in force when the request was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Find-ceiling phase index, absent outside phased runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<i32>,
}

/// Last line of a completed run: totals and derived statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryEvent {
    /// Always "summary"
    #[serde(rename = "type")]
    pub event_type: String,
    /// Total requests attempted
    #[serde(rename = "totalRequests")]
    pub total_requests: u64,
    /// Total failed requests
    #[serde(rename = "totalErrors")]
    pub total_errors: u64,
    /// Run duration: the `t` of the last record, not wall clock
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    /// `totalRequests / durationMs * 1000`
    #[serde(rename = "requestsPerSecond")]
    pub requests_per_second: f64,
    /// `totalErrors / totalRequests * 100`
    #[serde(rename = "errorRate")]
    pub error_rate: f64,
    /// Latency distribution over every request
    pub overall: LatencyStats,
    /// Per-method breakdown
    #[serde(rename = "byMethod")]
    pub by_method: Vec<MethodStats>,
    /// Failure counts keyed by category name
    #[serde(rename = "errorCategories")]
    pub error_categories: BTreeMap<String, u64>,
}

impl SummaryEvent {
    /// All-zero summary for a run that recorded nothing
    #[must_use]
    pub fn empty() -> Self {
        Self {
            event_type: "summary".to_owned(),
            total_requests: 0,
            total_errors: 0,
            duration_ms: 0,
            requests_per_second: 0.0,
            error_rate: 0.0,
            overall: LatencyStats::default(),
            by_method: Vec::new(),
            error_categories: BTreeMap::new(),
        }
    }
}

/// A parsed NDJSON line
#[derive(Debug, Clone)]
pub enum NdjsonLine {
    /// `type: "meta"` line
    Meta(MetaEvent),
    /// Per-request line (no `type` field)
    Request(RequestEvent),
    /// `type: "summary"` line
    Summary(SummaryEvent),
}

/// A fully parsed run file
#[derive(Debug, Clone)]
pub struct RunFile {
    /// The meta line
    pub meta: MetaEvent,
    /// Every per-request event, in file order
    pub events: Vec<RequestEvent>,
    /// The summary line, absent when the run did not complete
    pub summary: Option<SummaryEvent>,
}

/// Parse one NDJSON line by its `type` discriminator
///
/// # Errors
///
/// Returns the serde error when the line is not valid JSON or does not
/// match the expected event shape.
pub fn parse_line(line: &str) -> Result<NdjsonLine, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    match value.get("type").and_then(Value::as_str) {
        Some("meta") => Ok(NdjsonLine::Meta(serde_json::from_value(value)?)),
        Some("summary") => Ok(NdjsonLine::Summary(serde_json::from_value(value)?)),
        _ => Ok(NdjsonLine::Request(serde_json::from_value(value)?)),
    }
}

/// Read a whole NDJSON run file back into memory
///
/// # Errors
///
/// Returns an error when the file cannot be read, a line fails to parse,
/// or the first line is not a `meta` event.
pub fn read_run(path: &Path) -> Result<RunFile, std::io::Error> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut meta = None;
    let mut events = Vec::new();
    let mut summary = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = parse_line(&line).map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("line {}: {e}", index + 1),
            )
        })?;
        match parsed {
            NdjsonLine::Meta(m) => {
                if index != 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "meta event is only valid on the first line",
                    ));
                }
                meta = Some(m);
            }
            NdjsonLine::Request(event) => events.push(event),
            NdjsonLine::Summary(s) => summary = Some(s),
        }
    }

    let meta = meta.ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "file does not start with a meta event",
        )
    })?;

    Ok(RunFile {
        meta,
        events,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_event_omits_absent_fields() {
        let event = RequestEvent {
            t: 12,
            method: "ping".to_owned(),
            latency_ms: 1.25,
            ok: true,
            error: None,
            error_category: None,
            error_code: None,
            concurrency: Some(4),
            phase: None,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(!json.contains("error"));
        assert!(!json.contains("phase"));
        assert!(!json.contains("\"type\""));
        assert!(json.contains("\"latencyMs\":1.25"));
        assert!(json.contains("\"concurrency\":4"));
    }

    #[test]
    fn parse_line_discriminates_by_type() {
        let meta = r#"{"type":"meta","config":{},"command":"mcp-stress run"}"#;
        assert!(matches!(
            parse_line(meta).expect("meta"),
            NdjsonLine::Meta(_)
        ));

        let request = r#"{"t":5,"method":"ping","latencyMs":0.5,"ok":true}"#;
        assert!(matches!(
            parse_line(request).expect("request"),
            NdjsonLine::Request(_)
        ));

        let summary = concat!(
            r#"{"type":"summary","totalRequests":1,"totalErrors":0,"durationMs":5,"#,
            r#""requestsPerSecond":200.0,"errorRate":0.0,"#,
            r#""overall":{"min":0.5,"max":0.5,"mean":0.5,"p50":0.5,"p95":0.5,"p99":0.5},"#,
            r#""byMethod":[],"errorCategories":{}}"#,
        );
        assert!(matches!(
            parse_line(summary).expect("summary"),
            NdjsonLine::Summary(_)
        ));
    }

    #[test]
    fn parse_line_rejects_garbage() {
        assert!(parse_line("not json").is_err());
    }

    #[test]
    fn method_stats_flatten_latency() {
        let stats = MethodStats {
            method: "ping".to_owned(),
            count: 3,
            errors: 1,
            latency: LatencyStats {
                min: 1.0,
                max: 3.0,
                mean: 2.0,
                p50: 2.0,
                p95: 3.0,
                p99: 3.0,
            },
        };
        let json = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(json["p99"], 3.0);
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn aggregate_meta_carries_run_count() {
        let meta = MetaEvent::aggregate(serde_json::json!({}), "mcp-stress aggregate", 3);
        let json = serde_json::to_value(&meta).expect("serialize");
        assert_eq!(json["aggregate"], true);
        assert_eq!(json["runCount"], 3);
    }
}
