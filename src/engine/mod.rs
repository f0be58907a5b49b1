// ABOUTME: Execution engine: resolves a workload, drives it under a load shape, collects results
// ABOUTME: Dispatches to the find-ceiling and connection-churn controllers for phased profiles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

pub mod ceiling;
pub mod churn;

mod ops;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::aggregator::{self, AggregatorMsg};
use crate::client::McpClient;
use crate::dashboard::{DashboardHandle, DashboardServer};
use crate::error::EngineError;
use crate::events::{MetaEvent, RequestEvent, SummaryEvent};
use crate::recorder::Recorder;
use crate::shapes::LoadShape;
use crate::stats::{self, RunAggregate};
use crate::workload::{resolve_profile, RunOptions, WorkloadProfile};

pub use ceiling::{CeilingOutcome, CeilingReport, PhaseReport};
pub use ops::OpSet;

/// Outcome of one run
#[derive(Debug)]
pub struct RunResult {
    /// The computed summary
    pub summary: SummaryEvent,
    /// Every request event, in arrival order
    pub events: Vec<RequestEvent>,
    /// Phase report when the profile ran the find-ceiling controller
    pub ceiling: Option<CeilingReport>,
    /// Where the NDJSON landed, when output was enabled
    pub output_path: Option<PathBuf>,
}

/// Outcome of a full invocation, covering `--repeat`
#[derive(Debug)]
pub struct MultiRunResult {
    /// Each individual run, in order
    pub runs: Vec<RunResult>,
    /// Cross-run aggregate; present when more than one run happened
    pub aggregate: Option<RunAggregate>,
    /// Where the aggregate NDJSON landed
    pub aggregate_path: Option<PathBuf>,
    /// Dashboard URL, when the live flag was set
    pub dashboard_url: Option<String>,
}

/// Execution engine for one resolved set of run options
pub struct Engine {
    options: RunOptions,
}

impl Engine {
    /// Create an engine for the given options
    #[must_use]
    pub const fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Execute the workload, honoring the repeat count
    ///
    /// # Errors
    ///
    /// Returns an error for unknown profiles, handshake failures, and
    /// fatal output I/O. Per-request failures never surface here.
    pub async fn run(&self) -> Result<MultiRunResult, EngineError> {
        let profile = resolve_profile(&self.options.profile).ok_or_else(|| {
            EngineError::config(format!("unknown profile '{}'", self.options.profile))
        })?;

        let dashboard = if self.options.live {
            match DashboardServer::start().await {
                Ok(server) => {
                    info!(url = %server.url(), "Live dashboard ready");
                    Some(server)
                }
                Err(e) => {
                    warn!("Dashboard failed to start, continuing without: {e}");
                    None
                }
            }
        } else {
            None
        };
        let handle = dashboard.as_ref().map(DashboardServer::handle);
        let dashboard_url = dashboard.as_ref().map(DashboardServer::url);

        let repeat = self.options.repeat.max(1);
        let mut runs = Vec::with_capacity(repeat as usize);

        for index in 0..repeat {
            if repeat > 1 {
                if let Some(handle) = &handle {
                    handle.emit(
                        "new-run",
                        serde_json::json!({ "index": index, "total": repeat }),
                    );
                }
            }

            let result = self.run_once(&profile, index, handle.as_ref()).await?;

            if let Some(handle) = &handle {
                let prepared = prepared_chart(&result);
                if repeat > 1 {
                    handle.emit(
                        "run-complete",
                        serde_json::json!({ "index": index, "prepared": prepared }),
                    );
                } else {
                    handle.emit("complete", prepared);
                }
            }
            runs.push(result);
        }

        let (aggregate, aggregate_path) = if repeat > 1 {
            let summaries: Vec<SummaryEvent> =
                runs.iter().map(|r| r.summary.clone()).collect();
            let aggregate = RunAggregate::from_summaries(&summaries);
            let path = match &self.options.output {
                Some(base) => {
                    self.write_aggregate_file(base, &aggregate)?;
                    Some(base.clone())
                }
                None => None,
            };
            if let Some(handle) = &handle {
                handle.emit(
                    "all-complete",
                    serde_json::json!({
                        "summary": aggregate.to_summary_event(),
                    }),
                );
            }
            (Some(aggregate), path)
        } else {
            (None, None)
        };

        Ok(MultiRunResult {
            runs,
            aggregate,
            aggregate_path,
            dashboard_url,
        })
    }

    /// Execute one run of the resolved profile
    async fn run_once(
        &self,
        profile: &WorkloadProfile,
        index: u32,
        dashboard: Option<&DashboardHandle>,
    ) -> Result<RunResult, EngineError> {
        let options = &self.options;
        let repeat = options.repeat.max(1);
        let output_path = options
            .output
            .as_ref()
            .map(|base| run_output_path(base, index, repeat));

        let (agg_handle, agg_join) = aggregator::spawn();
        let meta = MetaEvent::new(options.meta_config(), options.reproduction_command());
        agg_handle.send(AggregatorMsg::Init {
            output: output_path.clone(),
            meta: meta.clone(),
        });
        if let Some(handle) = dashboard {
            handle.emit(
                "meta",
                serde_json::to_value(&meta).unwrap_or(Value::Null),
            );
        }

        let recorder = Recorder::start(Some(agg_handle.clone()));
        drop(agg_handle);

        let stop_windows = Arc::new(AtomicBool::new(false));
        if let Some(handle) = dashboard {
            spawn_window_ticker(
                Arc::clone(&recorder),
                handle.clone(),
                Arc::clone(&stop_windows),
            );
        }

        let body = self
            .run_body(profile, &recorder, dashboard)
            .await;
        stop_windows.store(true, Ordering::Release);

        let ceiling = match body {
            Ok(ceiling) => ceiling,
            Err(err) => {
                // Handshake failures abort the run, but whatever was
                // recorded (usually just meta) still flushes to disk.
                recorder.abort();
                drop(recorder);
                let _ = agg_join.await;
                return Err(err);
            }
        };

        recorder.complete();
        drop(recorder);

        let output = agg_join
            .await
            .map_err(|e| EngineError::config(format!("aggregator task failed: {e}")))??;

        Ok(RunResult {
            summary: output.summary.unwrap_or_else(SummaryEvent::empty),
            events: output.events,
            ceiling,
            output_path,
        })
    }

    /// Connect, handshake, and drive the selected controller
    async fn run_body(
        &self,
        profile: &WorkloadProfile,
        recorder: &Arc<Recorder>,
        dashboard: Option<&DashboardHandle>,
    ) -> Result<Option<CeilingReport>, EngineError> {
        let options = &self.options;

        if profile.connection_churn {
            churn::run(options, recorder).await;
            return Ok(None);
        }

        let transport = options
            .transport
            .build(options.timeout)
            .map_err(|e| EngineError::config(e.to_string()))?;
        transport
            .connect()
            .await
            .map_err(EngineError::Handshake)?;

        let client = Arc::new(McpClient::new(Arc::clone(&transport)));
        match client.initialize().await {
            Ok(handshake) => {
                debug!(
                    server = %handshake.value.server_info,
                    latency_ms = handshake.latency_ms,
                    "Session established"
                );
            }
            Err(err) => {
                transport.close().await;
                return Err(EngineError::Handshake(err));
            }
        }

        let opset = Arc::new(
            ops::OpSet::prepare(profile, options, Arc::clone(&client), Arc::clone(recorder))
                .await,
        );
        for notice in opset.notices() {
            info!("{notice}");
            if let Some(handle) = dashboard {
                handle.emit("message", serde_json::json!({ "text": notice }));
            }
        }

        let ceiling = if let Some(config) = &profile.find_ceiling {
            let report =
                ceiling::run(config, options, &opset, recorder, dashboard).await;
            Some(report)
        } else {
            let shape = options.effective_shape(profile);
            self.run_shaped(shape, &opset, recorder).await;
            None
        };

        transport.close().await;
        Ok(ceiling)
    }

    /// Shaped execution: one batch of `target` parallel operations per tick
    async fn run_shaped(&self, shape: LoadShape, opset: &Arc<OpSet>, recorder: &Arc<Recorder>) {
        let options = &self.options;
        let start = Instant::now();
        let duration = Duration::from_secs(options.duration_secs);
        let duration_f = duration.as_secs_f64();
        let peak = options.concurrency.max(1);

        loop {
            let elapsed = start.elapsed();
            if elapsed >= duration {
                break;
            }
            let total = recorder.total();
            if let Some(cap) = options.requests {
                if total >= cap {
                    break;
                }
            }

            let mut target = shape.target(elapsed.as_secs_f64(), duration_f, peak);
            if let Some(cap) = options.requests {
                let remaining = cap - total;
                target = target.min(remaining.min(u64::from(u32::MAX)) as u32);
            }
            if target == 0 {
                break;
            }
            recorder.set_concurrency(target);

            let batch: Vec<_> = (0..target).map(|_| opset.run_next()).collect();
            futures::future::join_all(batch).await;
        }

        debug!(
            total = recorder.total(),
            errors = recorder.errors(),
            "Shaped execution finished"
        );
    }

    /// Write the aggregate NDJSON: meta line plus the cross-run summary
    fn write_aggregate_file(
        &self,
        path: &Path,
        aggregate: &RunAggregate,
    ) -> Result<(), EngineError> {
        let meta = MetaEvent::aggregate(
            self.options.meta_config(),
            self.options.reproduction_command(),
            aggregate.run_count,
        );
        let mut lines = serde_json::to_string(&meta)
            .map_err(|e| EngineError::config(format!("meta serialization failed: {e}")))?;
        lines.push('\n');
        lines.push_str(
            &serde_json::to_string(&aggregate.to_summary_event())
                .map_err(|e| EngineError::config(format!("summary serialization failed: {e}")))?,
        );
        lines.push('\n');
        std::fs::write(path, lines)?;
        Ok(())
    }
}

/// Per-run output path: `out.ndjson` stays put for single runs, repeats
/// get `out-run1.ndjson`, `out-run2.ndjson`, … (the base path is then the
/// aggregate file)
fn run_output_path(base: &Path, index: u32, repeat: u32) -> PathBuf {
    if repeat <= 1 {
        return base.to_path_buf();
    }
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    let extension = base
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("ndjson");
    let name = format!("{stem}-run{}.{extension}", index + 1);
    base.with_file_name(name)
}

/// Chart payload for the dashboard `complete` event
fn prepared_chart(result: &RunResult) -> Value {
    let window_ms = stats::window_ms_for(result.summary.duration_ms);
    let windows = stats::build_windows(&result.events, window_ms);
    let anomalies = stats::detect_anomalies(&windows);
    serde_json::json!({
        "windowMs": window_ms,
        "windows": windows,
        "anomalies": anomalies,
        "summary": result.summary,
    })
}

/// Emit one dashboard `window` event per second while the run is live
fn spawn_window_ticker(
    recorder: Arc<Recorder>,
    dashboard: DashboardHandle,
    stop: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await;
        let mut last_total = 0u64;
        let mut last_errors = 0u64;
        let mut last_idx = 0usize;

        loop {
            interval.tick().await;
            if stop.load(Ordering::Acquire) {
                break;
            }

            let total = recorder.total();
            let errors = recorder.errors();
            let latencies = recorder.latencies_since(last_idx);
            last_idx += latencies.len();

            let window = stats::latency_stats(&latencies);
            dashboard.emit(
                "window",
                serde_json::json!({
                    "t": recorder.elapsed().as_millis() as u64,
                    "count": total - last_total,
                    "errors": errors - last_errors,
                    "p50": window.p50,
                    "p95": window.p95,
                    "p99": window.p99,
                    "concurrency": recorder.concurrency(),
                }),
            );
            last_total = total;
            last_errors = errors;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_run_keeps_base_output_path() {
        let base = PathBuf::from("/tmp/out.ndjson");
        assert_eq!(run_output_path(&base, 0, 1), base);
    }

    #[test]
    fn repeated_runs_get_indexed_paths() {
        let base = PathBuf::from("/tmp/out.ndjson");
        assert_eq!(
            run_output_path(&base, 0, 3),
            PathBuf::from("/tmp/out-run1.ndjson")
        );
        assert_eq!(
            run_output_path(&base, 2, 3),
            PathBuf::from("/tmp/out-run3.ndjson")
        );
    }
}
