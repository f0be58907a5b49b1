// ABOUTME: Hot-path request accounting: interning, latency vector, pending record batches
// ABOUTME: A 50ms ticker drains batches to the aggregator so recording stays O(1) amortised
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::aggregator::{AggregatorHandle, AggregatorMsg};
use crate::error::TransportError;
use crate::transport::round2;

/// Batch hand-off cadence to the aggregator
const BATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Pending-buffer size above which a backlog warning fires
const BACKLOG_WARN_THRESHOLD: usize = 10_000;

/// One request outcome as written on the hot path
///
/// Strings never appear here; the method and any error message live on
/// the aggregator side, keyed by the integer fields.
#[derive(Debug, Clone, Copy)]
pub struct RawRecord {
    /// Milliseconds since run start, truncated to integer
    pub t: u64,
    /// Interned method handle
    pub method_id: u32,
    /// Latency in milliseconds, rounded to two decimals
    pub latency_ms: f64,
    /// Outcome
    pub ok: bool,
    /// 0 for success, 1..=5 per [`ErrorCategory`](crate::error::ErrorCategory)
    pub error_category: u8,
    /// JSON-RPC error code or -1; 0 for success
    pub error_code: i64,
    /// Target concurrency in force when the request was issued; 0 if untracked
    pub concurrency: u32,
    /// Find-ceiling phase index; -1 outside phased runs
    pub phase: i32,
}

struct Inner {
    methods: HashMap<String, u32>,
    next_method_id: u32,
    pending: Vec<RawRecord>,
    latencies: Vec<f64>,
    seen_errors: HashSet<(u8, i64)>,
    backlog_warned: bool,
}

/// Per-run request recorder
///
/// Lives on the hot path: one mutex acquisition, one vector push, one
/// latency append per request. Serialization happens elsewhere.
pub struct Recorder {
    inner: Mutex<Inner>,
    start: Instant,
    total: AtomicU64,
    errors: AtomicU64,
    concurrency: AtomicU32,
    phase: AtomicI32,
    done: AtomicBool,
    aggregator: Option<AggregatorHandle>,
}

impl Recorder {
    /// Create a recorder and spawn its batch ticker
    ///
    /// When an aggregator handle is given, buffered records are handed
    /// off every 50ms and on [`complete`](Self::complete).
    #[must_use]
    pub fn start(aggregator: Option<AggregatorHandle>) -> Arc<Self> {
        let recorder = Arc::new(Self {
            inner: Mutex::new(Inner {
                methods: HashMap::new(),
                next_method_id: 0,
                pending: Vec::with_capacity(1024),
                latencies: Vec::with_capacity(4096),
                seen_errors: HashSet::new(),
                backlog_warned: false,
            }),
            start: Instant::now(),
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            concurrency: AtomicU32::new(0),
            phase: AtomicI32::new(-1),
            done: AtomicBool::new(false),
            aggregator,
        });

        if recorder.aggregator.is_some() {
            let ticker = Arc::clone(&recorder);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(BATCH_INTERVAL);
                loop {
                    interval.tick().await;
                    if ticker.done.load(Ordering::Acquire) {
                        break;
                    }
                    ticker.flush_pending();
                }
            });
        }

        recorder
    }

    /// Intern a method name; idempotent
    ///
    /// The aggregator learns the mapping before any record references it.
    pub fn register_method(&self, name: &str) -> u32 {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        if let Some(&id) = inner.methods.get(name) {
            return id;
        }
        let id = inner.next_method_id;
        inner.next_method_id += 1;
        inner.methods.insert(name.to_owned(), id);
        drop(inner);

        if let Some(aggregator) = &self.aggregator {
            aggregator.send(AggregatorMsg::Method {
                id,
                name: name.to_owned(),
            });
        }
        id
    }

    /// Publish the target concurrency stamped onto subsequent records
    pub fn set_concurrency(&self, level: u32) {
        self.concurrency.store(level, Ordering::Relaxed);
    }

    /// The most recently published target concurrency
    #[must_use]
    pub fn concurrency(&self) -> u32 {
        self.concurrency.load(Ordering::Relaxed)
    }

    /// Publish the phase index stamped onto subsequent records
    pub fn set_phase(&self, phase: i32) {
        self.phase.store(phase, Ordering::Relaxed);
    }

    /// Record a successful request
    pub fn success(&self, method_id: u32, latency_ms: f64) {
        self.push(RawRecord {
            t: self.start.elapsed().as_millis() as u64,
            method_id,
            latency_ms: round2(latency_ms),
            ok: true,
            error_category: 0,
            error_code: 0,
            concurrency: self.concurrency.load(Ordering::Relaxed),
            phase: self.phase.load(Ordering::Relaxed),
        });
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed request, classifying the error
    ///
    /// The first sighting of a (category, code) pair forwards its message
    /// to the aggregator's dictionary.
    pub fn error(&self, method_id: u32, err: &TransportError) {
        let category = err.category.as_int();
        let code = err.code;

        let first_sighting = self
            .inner
            .lock()
            .map(|mut inner| inner.seen_errors.insert((category, code)))
            .unwrap_or(false);
        if first_sighting {
            if let Some(aggregator) = &self.aggregator {
                aggregator.send(AggregatorMsg::ErrorMsg {
                    category,
                    code,
                    message: err.message.clone(),
                });
            }
        }

        self.push(RawRecord {
            t: self.start.elapsed().as_millis() as u64,
            method_id,
            latency_ms: round2(err.latency_ms),
            ok: false,
            error_category: category,
            error_code: code,
            concurrency: self.concurrency.load(Ordering::Relaxed),
            phase: self.phase.load(Ordering::Relaxed),
        });
        self.total.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn push(&self, record: RawRecord) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.latencies.push(record.latency_ms);
        inner.pending.push(record);
        if inner.pending.len() > BACKLOG_WARN_THRESHOLD && !inner.backlog_warned {
            inner.backlog_warned = true;
            warn!(
                pending = inner.pending.len(),
                "Recorder batch backlog growing; aggregator may be stalled"
            );
        }
    }

    /// Copy of the latency vector from `start_idx` to the current end
    ///
    /// Used by the engine for per-phase percentiles without touching the
    /// record stream.
    #[must_use]
    pub fn latencies_since(&self, start_idx: usize) -> Vec<f64> {
        self.inner
            .lock()
            .map(|inner| inner.latencies.get(start_idx..).unwrap_or(&[]).to_vec())
            .unwrap_or_default()
    }

    /// Number of latencies recorded so far; pairs with `latencies_since`
    #[must_use]
    pub fn latency_count(&self) -> usize {
        self.inner.lock().map(|inner| inner.latencies.len()).unwrap_or(0)
    }

    /// Drain pending records into a batch message
    ///
    /// The lock is held through the send so a drain can never be
    /// reordered after a later `Complete` on the aggregator channel.
    fn flush_pending(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.pending.is_empty() {
            return;
        }
        inner.backlog_warned = false;
        let batch = std::mem::take(&mut inner.pending);
        if let Some(aggregator) = &self.aggregator {
            aggregator.send(AggregatorMsg::Batch(batch));
        }
    }

    /// Flush buffered records and signal the aggregator; idempotent
    pub fn complete(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush_pending();
        if let Some(aggregator) = &self.aggregator {
            aggregator.send(AggregatorMsg::Complete);
        }
    }

    /// Stop the ticker without signalling completion
    ///
    /// Used when a run aborts before producing a summary: buffered
    /// records flush, but no `Complete` message is sent, so the NDJSON
    /// keeps its meta line and nothing else claims the run finished.
    pub fn abort(&self) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush_pending();
    }

    /// Total requests recorded
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Total failed requests recorded
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Wall time since the recorder started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interning_is_idempotent() {
        let recorder = Recorder::start(None);
        let a = recorder.register_method("ping");
        let b = recorder.register_method("tools/list");
        let again = recorder.register_method("ping");
        assert_eq!(a, again);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn success_and_error_update_counters() {
        let recorder = Recorder::start(None);
        let id = recorder.register_method("ping");

        recorder.success(id, 1.234);
        let err = TransportError::timeout("deadline", 30.0);
        recorder.error(id, &err);

        assert_eq!(recorder.total(), 2);
        assert_eq!(recorder.errors(), 1);
    }

    #[tokio::test]
    async fn latencies_since_returns_suffix() {
        let recorder = Recorder::start(None);
        let id = recorder.register_method("ping");
        for latency in [1.0, 2.0, 3.0, 4.0] {
            recorder.success(id, latency);
        }

        assert_eq!(recorder.latencies_since(2), vec![3.0, 4.0]);
        assert_eq!(recorder.latencies_since(0).len(), 4);
        assert!(recorder.latencies_since(99).is_empty());
        assert_eq!(recorder.latency_count(), 4);
    }

    #[tokio::test]
    async fn latency_is_rounded_at_record_time() {
        let recorder = Recorder::start(None);
        let id = recorder.register_method("ping");
        recorder.success(id, 1.23456);
        assert_eq!(recorder.latencies_since(0), vec![1.23]);
    }

    #[tokio::test]
    async fn concurrency_and_phase_are_stamped() {
        let recorder = Recorder::start(None);
        let id = recorder.register_method("ping");
        recorder.set_concurrency(8);
        recorder.set_phase(2);
        recorder.success(id, 1.0);

        let inner = recorder.inner.lock().expect("lock");
        let record = inner.pending.last().expect("record");
        assert_eq!(record.concurrency, 8);
        assert_eq!(record.phase, 2);
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let recorder = Recorder::start(None);
        recorder.complete();
        recorder.complete();
        assert_eq!(recorder.total(), 0);
    }
}
