// ABOUTME: End-to-end engine runs against a cat echo subprocess as the MCP server
// ABOUTME: Covers request caps, NDJSON output, repeat aggregation, and churn
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use mcp_stress::engine::Engine;
use mcp_stress::workload::{stdio_spec, RunOptions};

// cat echoes every request line back with our id intact, which parses as
// a null-result reply: a minimal, always-available MCP "server"
fn cat_options() -> RunOptions {
    RunOptions::new(stdio_spec("cat", &[]))
}

#[tokio::test]
async fn shaped_run_honors_the_request_cap() {
    let options = cat_options()
        .with_profile("ping")
        .with_duration_secs(30)
        .with_requests(50)
        .with_concurrency(4);

    let result = Engine::new(options).run().await.expect("run");
    assert_eq!(result.runs.len(), 1);

    let summary = &result.runs[0].summary;
    assert_eq!(summary.total_requests, 50);
    assert_eq!(summary.total_errors, 0);
    assert_eq!(summary.by_method.len(), 1);
    assert_eq!(summary.by_method[0].method, "ping");
    assert_eq!(summary.by_method[0].count, 50);
    assert!(result.aggregate.is_none());
}

#[tokio::test]
async fn shaped_run_writes_a_complete_ndjson_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("run.ndjson");

    let mut options = cat_options()
        .with_profile("ping")
        .with_requests(25)
        .with_concurrency(5)
        .with_output(path.clone());
    options.duration_secs = 30;

    let result = Engine::new(options).run().await.expect("run");
    assert_eq!(result.runs[0].output_path.as_ref(), Some(&path));

    let file = mcp_stress::events::read_run(&path).expect("read back");
    assert_eq!(file.meta.config["profile"], "ping");
    assert_eq!(file.events.len(), 25);
    let summary = file.summary.expect("summary line");
    assert_eq!(summary.total_requests, 25);

    // Every event carries the concurrency in force for shaped runs
    assert!(file.events.iter().all(|e| e.concurrency.is_some()));
    assert!(file.events.iter().all(|e| e.phase.is_none()));
}

#[tokio::test]
async fn repeat_produces_per_run_files_and_an_aggregate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("out.ndjson");

    let mut options = cat_options()
        .with_profile("ping")
        .with_requests(10)
        .with_concurrency(2)
        .with_output(path.clone());
    options.repeat = 3;

    let result = Engine::new(options).run().await.expect("run");
    assert_eq!(result.runs.len(), 3);

    let aggregate = result.aggregate.expect("aggregate");
    assert_eq!(aggregate.run_count, 3);
    assert!((aggregate.total_requests.mean - 10.0).abs() < f64::EPSILON);
    assert!((aggregate.total_requests.stddev - 0.0).abs() < f64::EPSILON);

    for run in 1..=3 {
        let run_path = dir.path().join(format!("out-run{run}.ndjson"));
        let file = mcp_stress::events::read_run(&run_path).expect("per-run file");
        assert_eq!(file.events.len(), 10);
    }

    // The base path holds the aggregate: meta + summary, no request events
    let aggregate_file = mcp_stress::events::read_run(&path).expect("aggregate file");
    assert_eq!(aggregate_file.meta.aggregate, Some(true));
    assert_eq!(aggregate_file.meta.run_count, Some(3));
    assert!(aggregate_file.events.is_empty());
    let summary = aggregate_file.summary.expect("aggregate summary");
    assert_eq!(summary.total_requests, 10);
}

#[tokio::test]
async fn unknown_profile_is_a_config_error() {
    let options = cat_options().with_profile("does-not-exist");
    let err = Engine::new(options).run().await.expect_err("config error");
    assert!(err.to_string().contains("unknown profile"));
}

#[tokio::test]
async fn handshake_failure_aborts_but_flushes_meta() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("partial.ndjson");

    // `false` exits immediately: stdout closes before any reply arrives
    let mut options = RunOptions::new(stdio_spec("false", &[]))
        .with_profile("ping")
        .with_output(path.clone());
    options.timeout = std::time::Duration::from_millis(500);

    let err = Engine::new(options).run().await.expect_err("handshake");
    assert!(matches!(err, mcp_stress::EngineError::Handshake(_)));

    // Partial file: meta only, no summary line
    let file = mcp_stress::events::read_run(&path).expect("partial file");
    assert!(file.summary.is_none());
}

#[tokio::test]
async fn connection_churn_records_initialize_and_ping() {
    let options = cat_options()
        .with_profile("connection-churn")
        .with_duration_secs(1)
        .with_concurrency(2);

    let result = Engine::new(options).run().await.expect("run");
    let summary = &result.runs[0].summary;

    assert!(summary.total_requests > 0);
    let methods: Vec<&str> = summary
        .by_method
        .iter()
        .map(|m| m.method.as_str())
        .collect();
    assert!(methods.contains(&"initialize"));
    assert!(methods.contains(&"ping"));
}

#[tokio::test]
async fn linear_ramp_run_finishes_within_its_duration() {
    let options = cat_options()
        .with_profile("ping")
        .with_duration_secs(1)
        .with_concurrency(8)
        .with_shape(mcp_stress::LoadShape::LinearRamp);

    let result = Engine::new(options).run().await.expect("run");
    let summary = &result.runs[0].summary;
    assert!(summary.total_requests > 0);
    // Ramp means early ticks run below peak
    let max_concurrency = result.runs[0]
        .events
        .iter()
        .filter_map(|e| e.concurrency)
        .max()
        .unwrap_or(0);
    assert!(max_concurrency <= 8);
}
