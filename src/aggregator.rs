// ABOUTME: Off-path aggregation worker: NDJSON serialization, derived counters, final summary
// ABOUTME: Message-passing inbox fed by the recorder; flushes its writer on size or a 100ms timer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ErrorCategory;
use crate::events::{MetaEvent, MethodStats, RequestEvent, SummaryEvent};
use crate::recorder::RawRecord;
use crate::stats::latency_stats;

/// Writer buffer size; the writer also flushes on a 100ms timer
const WRITER_CAPACITY: usize = 64 * 1024;

/// Flush cadence for the NDJSON writer
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Messages accepted by the aggregation worker
#[derive(Debug)]
pub enum AggregatorMsg {
    /// Open the output file (when set) and write the meta line
    Init {
        /// NDJSON output path; `None` disables file output
        output: Option<PathBuf>,
        /// The meta event written as the first line
        meta: MetaEvent,
    },
    /// A newly interned method handle
    Method {
        /// Interned id
        id: u32,
        /// Resolved method name
        name: String,
    },
    /// First-seen message for an error (category, code) pair
    ErrorMsg {
        /// Category integer per [`ErrorCategory`]
        category: u8,
        /// JSON-RPC code or -1
        code: i64,
        /// Last observed message
        message: String,
    },
    /// A batch of raw records from the recorder
    Batch(Vec<RawRecord>),
    /// Flush, write the summary, and finish
    Complete,
}

/// Sender half of the aggregator inbox
#[derive(Clone)]
pub struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorMsg>,
}

impl AggregatorHandle {
    /// Post a message; a closed worker drops it silently
    pub fn send(&self, msg: AggregatorMsg) {
        let _ = self.tx.send(msg);
    }
}

/// Everything the worker hands back when it finishes
#[derive(Debug)]
pub struct RunOutput {
    /// The computed summary; `None` when the run never completed
    pub summary: Option<SummaryEvent>,
    /// Every request event, in arrival order
    pub events: Vec<RequestEvent>,
}

/// Spawn the aggregation worker
///
/// The worker runs until `Complete` arrives or every handle is dropped;
/// its join handle yields the run output, or the I/O error that killed
/// the writer (output-file errors after open are fatal).
#[must_use]
pub fn spawn() -> (AggregatorHandle, JoinHandle<Result<RunOutput, std::io::Error>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = AggregatorHandle { tx };
    let join = tokio::spawn(worker(rx));
    (handle, join)
}

struct MethodAccum {
    count: u64,
    errors: u64,
    latencies: Vec<f64>,
}

struct Worker {
    methods: HashMap<u32, String>,
    error_msgs: HashMap<(u8, i64), String>,
    events: Vec<RequestEvent>,
    per_method: BTreeMap<u32, MethodAccum>,
    overall_latencies: Vec<f64>,
    categories: BTreeMap<String, u64>,
    total: u64,
    errors: u64,
    last_t: u64,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl Worker {
    fn new() -> Self {
        Self {
            methods: HashMap::new(),
            error_msgs: HashMap::new(),
            events: Vec::new(),
            per_method: BTreeMap::new(),
            overall_latencies: Vec::new(),
            categories: BTreeMap::new(),
            total: 0,
            errors: 0,
            last_t: 0,
            writer: None,
        }
    }

    async fn init(
        &mut self,
        output: Option<PathBuf>,
        meta: &MetaEvent,
    ) -> Result<(), std::io::Error> {
        let Some(path) = output else {
            return Ok(());
        };
        let file = tokio::fs::File::create(&path).await?;
        let mut writer = BufWriter::with_capacity(WRITER_CAPACITY, file);
        let line = serde_json::to_string(meta)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        self.writer = Some(writer);
        debug!(path = %path.display(), "NDJSON output open");
        Ok(())
    }

    fn method_name(&self, id: u32) -> String {
        debug_assert!(
            self.methods.contains_key(&id),
            "record references unregistered method {id}"
        );
        self.methods
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("method-{id}"))
    }

    fn to_event(&self, record: &RawRecord) -> RequestEvent {
        let (error, error_category, error_code) = if record.ok {
            (None, None, None)
        } else {
            let message = self
                .error_msgs
                .get(&(record.error_category, record.error_code))
                .cloned();
            let category = ErrorCategory::from_int(record.error_category)
                .map(|c| c.as_str().to_owned());
            (message, category, Some(record.error_code))
        };

        RequestEvent {
            t: record.t,
            method: self.method_name(record.method_id),
            latency_ms: record.latency_ms,
            ok: record.ok,
            error,
            error_category,
            error_code,
            concurrency: (record.concurrency > 0).then_some(record.concurrency),
            phase: (record.phase >= 0).then_some(record.phase),
        }
    }

    async fn ingest(&mut self, batch: Vec<RawRecord>) -> Result<(), std::io::Error> {
        for record in batch {
            let event = self.to_event(&record);

            self.total += 1;
            self.last_t = self.last_t.max(record.t);
            self.overall_latencies.push(record.latency_ms);

            let accum = self
                .per_method
                .entry(record.method_id)
                .or_insert_with(|| MethodAccum {
                    count: 0,
                    errors: 0,
                    latencies: Vec::new(),
                });
            accum.count += 1;
            accum.latencies.push(record.latency_ms);

            if !record.ok {
                self.errors += 1;
                accum.errors += 1;
                if let Some(category) = ErrorCategory::from_int(record.error_category) {
                    *self
                        .categories
                        .entry(category.as_str().to_owned())
                        .or_insert(0) += 1;
                }
            }

            if let Some(writer) = &mut self.writer {
                let line = serde_json::to_string(&event)?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            self.events.push(event);
        }
        Ok(())
    }

    fn summarize(&self) -> SummaryEvent {
        if self.total == 0 {
            return SummaryEvent::empty();
        }

        let by_method: Vec<MethodStats> = self
            .per_method
            .iter()
            .map(|(id, accum)| MethodStats {
                method: self.method_name(*id),
                count: accum.count,
                errors: accum.errors,
                latency: latency_stats(&accum.latencies),
            })
            .collect();

        let duration_ms = self.last_t;
        let requests_per_second = if duration_ms > 0 {
            self.total as f64 / duration_ms as f64 * 1000.0
        } else {
            0.0
        };

        SummaryEvent {
            event_type: "summary".to_owned(),
            total_requests: self.total,
            total_errors: self.errors,
            duration_ms,
            requests_per_second,
            error_rate: self.errors as f64 / self.total as f64 * 100.0,
            overall: latency_stats(&self.overall_latencies),
            by_method,
            error_categories: self.categories.clone(),
        }
    }

    async fn finish(
        mut self,
        completed: bool,
    ) -> Result<RunOutput, std::io::Error> {
        let summary = completed.then(|| self.summarize());

        if let Some(writer) = &mut self.writer {
            if let Some(summary) = &summary {
                let line = serde_json::to_string(summary)?;
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
            }
            writer.flush().await?;
        }

        Ok(RunOutput {
            summary,
            events: self.events,
        })
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<AggregatorMsg>,
) -> Result<RunOutput, std::io::Error> {
    let mut worker = Worker::new();
    let mut flush_timer = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(AggregatorMsg::Init { output, meta }) => {
                    worker.init(output, &meta).await?;
                }
                Some(AggregatorMsg::Method { id, name }) => {
                    worker.methods.insert(id, name);
                }
                Some(AggregatorMsg::ErrorMsg { category, code, message }) => {
                    worker.error_msgs.insert((category, code), message);
                }
                Some(AggregatorMsg::Batch(batch)) => {
                    worker.ingest(batch).await?;
                }
                Some(AggregatorMsg::Complete) => {
                    return worker.finish(true).await;
                }
                // Every handle dropped without Complete: the run aborted.
                // Keep whatever was written, without a summary line.
                None => {
                    return worker.finish(false).await;
                }
            },
            _ = flush_timer.tick() => {
                if let Some(writer) = &mut worker.writer {
                    writer.flush().await?;
                }
            }
        }
    }
}
