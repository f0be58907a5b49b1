// ABOUTME: Latency statistics: percentiles, chart windows, anomaly marks, assertions
// ABOUTME: Also computes cross-run mean and sample stddev for repeated workloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::{LatencyStats, RequestEvent, SummaryEvent};

/// Linear-interpolation percentile over a pre-sorted slice
///
/// `q` is a fraction in `[0, 1]`. Empty input yields 0; a single element
/// yields itself.
#[must_use]
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let idx = q * (n - 1) as f64;
            let i = idx.floor() as usize;
            let frac = idx - i as f64;
            if i + 1 >= n {
                sorted[n - 1]
            } else {
                sorted[i] + (sorted[i + 1] - sorted[i]) * frac
            }
        }
    }
}

/// Full latency distribution for a set of observations
///
/// Sorts a copy internally; callers holding already-sorted data can use
/// [`latency_stats_sorted`].
#[must_use]
pub fn latency_stats(values: &[f64]) -> LatencyStats {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    latency_stats_sorted(&sorted)
}

/// Latency distribution over an already-sorted slice
#[must_use]
pub fn latency_stats_sorted(sorted: &[f64]) -> LatencyStats {
    if sorted.is_empty() {
        return LatencyStats::default();
    }
    let sum: f64 = sorted.iter().sum();
    LatencyStats {
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        mean: sum / sorted.len() as f64,
        p50: percentile(sorted, 0.50),
        p95: percentile(sorted, 0.95),
        p99: percentile(sorted, 0.99),
    }
}

// ============================================================================
// Windows
// ============================================================================

/// Pick a chart window size targeting roughly 30-60 buckets
///
/// The thresholds are part of the file contract: a chart rebuilt from the
/// NDJSON must bucket identically.
#[must_use]
pub const fn window_ms_for(duration_ms: u64) -> u64 {
    if duration_ms <= 60_000 {
        1_000
    } else if duration_ms <= 300_000 {
        5_000
    } else if duration_ms <= 600_000 {
        10_000
    } else {
        30_000
    }
}

/// One chart window: counts and latency percentiles for a fixed slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    /// Window start, milliseconds since run start
    pub t: u64,
    /// Requests that completed in this window
    pub count: u64,
    /// Failed requests in this window
    pub errors: u64,
    /// Median latency (0 when the window is empty)
    pub p50: f64,
    /// 95th percentile latency
    pub p95: f64,
    /// 99th percentile latency
    pub p99: f64,
    /// Last-observed target concurrency, carried into empty windows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
    /// Mean latency in this window, used for the rolling anomaly baseline
    #[serde(skip)]
    pub mean: f64,
}

/// Bucket request events into uniform windows of `window_ms`
///
/// Every slot from 0 through the last event is emitted, empties included,
/// so chart bars stay uniform. Empty windows inherit the most recent
/// concurrency value.
#[must_use]
pub fn build_windows(events: &[RequestEvent], window_ms: u64) -> Vec<Window> {
    if events.is_empty() || window_ms == 0 {
        return Vec::new();
    }

    let last_t = events.iter().map(|e| e.t).max().unwrap_or(0);
    let slots = (last_t / window_ms) + 1;
    let mut buckets: Vec<Vec<&RequestEvent>> = vec![Vec::new(); slots as usize];
    for event in events {
        let slot = (event.t / window_ms) as usize;
        buckets[slot].push(event);
    }

    let mut windows = Vec::with_capacity(slots as usize);
    let mut carried_concurrency = None;
    for (slot, bucket) in buckets.iter().enumerate() {
        let mut latencies: Vec<f64> = bucket.iter().map(|e| e.latency_ms).collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(last) = bucket.last() {
            if last.concurrency.is_some() {
                carried_concurrency = last.concurrency;
            }
        }

        let sum: f64 = latencies.iter().sum();
        windows.push(Window {
            t: slot as u64 * window_ms,
            count: bucket.len() as u64,
            errors: bucket.iter().filter(|e| !e.ok).count() as u64,
            p50: percentile(&latencies, 0.50),
            p95: percentile(&latencies, 0.95),
            p99: percentile(&latencies, 0.99),
            concurrency: carried_concurrency,
            mean: if latencies.is_empty() {
                0.0
            } else {
                sum / latencies.len() as f64
            },
        });
    }
    windows
}

/// Indexes of windows whose p99 spikes above the rolling baseline
///
/// A window past the 10th is anomalous when its p99 exceeds three times
/// the mean latency of the previous 10 windows and that baseline is
/// positive.
#[must_use]
pub fn detect_anomalies(windows: &[Window]) -> Vec<usize> {
    let mut anomalies = Vec::new();
    for idx in 10..windows.len() {
        let prev = &windows[idx - 10..idx];
        let samples: u64 = prev.iter().map(|w| w.count).sum();
        if samples == 0 {
            continue;
        }
        let weighted: f64 = prev.iter().map(|w| w.mean * w.count as f64).sum();
        let rolling_mean = weighted / samples as f64;
        if rolling_mean > 0.0 && windows[idx].p99 > 3.0 * rolling_mean {
            anomalies.push(idx);
        }
    }
    anomalies
}

// ============================================================================
// Assertions
// ============================================================================

/// Comparison operator in an assertion expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl AssertOp {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            _ => None,
        }
    }

    const fn apply(self, actual: f64, expected: f64) -> bool {
        match self {
            Self::Lt => actual < expected,
            Self::Gt => actual > expected,
            Self::Le => actual <= expected,
            Self::Ge => actual >= expected,
            Self::Eq => actual == expected,
            Self::Ne => actual != expected,
        }
    }
}

impl fmt::Display for AssertOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        };
        f.write_str(text)
    }
}

/// A parsed `"<metric> <op> <value>[<unit>]"` assertion
#[derive(Debug, Clone)]
pub struct Assertion {
    /// Metric name, e.g. `p99` or `error_rate`
    pub metric: String,
    /// Comparison operator
    pub op: AssertOp,
    /// Expected value after unit conversion (seconds become ms)
    pub value: f64,
    /// Unit as written: empty, `ms`, `%`, or `s`
    pub unit: String,
    /// The original expression, kept for reporting
    pub raw: String,
}

/// Metric names an assertion may reference
const KNOWN_METRICS: &[&str] = &[
    "rps",
    "p50",
    "p95",
    "p99",
    "min",
    "max",
    "mean",
    "error_rate",
    "errors",
    "requests",
];

impl Assertion {
    /// Parse an assertion expression
    ///
    /// # Errors
    ///
    /// Returns a message when the expression does not have exactly three
    /// tokens, the operator is unknown, or the value does not parse.
    pub fn parse(input: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = input.split_whitespace().collect();
        let [metric, op_token, value_token] = tokens.as_slice() else {
            return Err(format!(
                "invalid assertion '{input}': expected '<metric> <op> <value>'"
            ));
        };

        let op = AssertOp::parse(op_token)
            .ok_or_else(|| format!("invalid assertion '{input}': unknown operator '{op_token}'"))?;

        let (number, unit) = split_unit(value_token);
        let mut value: f64 = number
            .parse()
            .map_err(|_| format!("invalid assertion '{input}': bad value '{value_token}'"))?;
        if unit == "s" {
            value *= 1000.0;
        }

        Ok(Self {
            metric: (*metric).to_owned(),
            op,
            value,
            unit: unit.to_owned(),
            raw: input.to_owned(),
        })
    }

    /// Evaluate against a run summary
    ///
    /// An unrecognised metric evaluates against NaN, which fails every
    /// comparison.
    #[must_use]
    pub fn evaluate(&self, summary: &SummaryEvent) -> AssertionResult {
        let actual = metric_value(&self.metric, summary);
        AssertionResult {
            assertion: self.clone(),
            actual,
            passed: self.op.apply(actual, self.value),
        }
    }
}

/// Outcome of evaluating one assertion
#[derive(Debug, Clone)]
pub struct AssertionResult {
    /// The assertion evaluated
    pub assertion: Assertion,
    /// Observed metric value (NaN when the metric is unknown)
    pub actual: f64,
    /// Whether the comparison held
    pub passed: bool,
}

/// Resolve a metric name against a summary; unknown names yield NaN
fn metric_value(metric: &str, summary: &SummaryEvent) -> f64 {
    if !KNOWN_METRICS.contains(&metric) {
        return f64::NAN;
    }
    match metric {
        "rps" => summary.requests_per_second,
        "p50" => summary.overall.p50,
        "p95" => summary.overall.p95,
        "p99" => summary.overall.p99,
        "min" => summary.overall.min,
        "max" => summary.overall.max,
        "mean" => summary.overall.mean,
        "error_rate" => summary.error_rate,
        "errors" => summary.total_errors as f64,
        "requests" => summary.total_requests as f64,
        _ => f64::NAN,
    }
}

/// Split a value token into its numeric part and unit suffix
fn split_unit(token: &str) -> (&str, &str) {
    for unit in ["ms", "s", "%"] {
        if let Some(number) = token.strip_suffix(unit) {
            return (number, unit);
        }
    }
    (token, "")
}

// ============================================================================
// Multi-Run Aggregation
// ============================================================================

/// Mean and sample standard deviation of one metric across runs
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MeanStd {
    /// Arithmetic mean across runs
    pub mean: f64,
    /// Sample standard deviation (`n - 1` denominator; 0 for one run)
    pub stddev: f64,
}

/// Compute mean and sample stddev of a series
#[must_use]
pub fn mean_std(values: &[f64]) -> MeanStd {
    if values.is_empty() {
        return MeanStd::default();
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return MeanStd { mean, stddev: 0.0 };
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    MeanStd {
        mean,
        stddev: variance.sqrt(),
    }
}

/// Cross-run latency aggregate, one `MeanStd` per overall statistic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregateLatency {
    pub min: MeanStd,
    pub max: MeanStd,
    pub mean: MeanStd,
    pub p50: MeanStd,
    pub p95: MeanStd,
    pub p99: MeanStd,
}

/// Aggregate of N run summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAggregate {
    /// Number of runs combined
    #[serde(rename = "runCount")]
    pub run_count: u32,
    #[serde(rename = "durationMs")]
    pub duration_ms: MeanStd,
    #[serde(rename = "totalRequests")]
    pub total_requests: MeanStd,
    #[serde(rename = "requestsPerSecond")]
    pub requests_per_second: MeanStd,
    #[serde(rename = "totalErrors")]
    pub total_errors: MeanStd,
    /// Per-run `totalErrors / totalRequests * 100`, aggregated
    #[serde(rename = "errorRate")]
    pub error_rate: MeanStd,
    pub overall: AggregateLatency,
}

impl RunAggregate {
    /// Combine run summaries into cross-run mean/stddev statistics
    #[must_use]
    pub fn from_summaries(summaries: &[SummaryEvent]) -> Self {
        let pick = |f: fn(&SummaryEvent) -> f64| {
            let values: Vec<f64> = summaries.iter().map(f).collect();
            mean_std(&values)
        };

        Self {
            run_count: summaries.len() as u32,
            duration_ms: pick(|s| s.duration_ms as f64),
            total_requests: pick(|s| s.total_requests as f64),
            requests_per_second: pick(|s| s.requests_per_second),
            total_errors: pick(|s| s.total_errors as f64),
            error_rate: pick(|s| s.error_rate),
            overall: AggregateLatency {
                min: pick(|s| s.overall.min),
                max: pick(|s| s.overall.max),
                mean: pick(|s| s.overall.mean),
                p50: pick(|s| s.overall.p50),
                p95: pick(|s| s.overall.p95),
                p99: pick(|s| s.overall.p99),
            },
        }
    }

    /// Project the aggregate into a summary line for the aggregate NDJSON
    ///
    /// Count fields are the integer-rounded cross-run means.
    #[must_use]
    pub fn to_summary_event(&self) -> SummaryEvent {
        SummaryEvent {
            event_type: "summary".to_owned(),
            total_requests: self.total_requests.mean.round() as u64,
            total_errors: self.total_errors.mean.round() as u64,
            duration_ms: self.duration_ms.mean.round() as u64,
            requests_per_second: self.requests_per_second.mean,
            error_rate: self.error_rate.mean,
            overall: LatencyStats {
                min: self.overall.min.mean,
                max: self.overall.max.mean,
                mean: self.overall.mean.mean,
                p50: self.overall.p50.mean,
                p95: self.overall.p95.mean,
                p99: self.overall.p99.mean,
            },
            by_method: Vec::new(),
            error_categories: std::collections::BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_edges() {
        assert!((percentile(&[], 0.5) - 0.0).abs() < f64::EPSILON);
        assert!((percentile(&[42.0], 0.99) - 42.0).abs() < f64::EPSILON);
        assert!((percentile(&[1.0, 2.0, 3.0, 4.0], 0.5) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn percentile_is_monotone_in_q() {
        let sorted: Vec<f64> = (1..=50).map(f64::from).collect();
        let mut last = f64::MIN;
        for step in 0..=100 {
            let q = f64::from(step) / 100.0;
            let value = percentile(&sorted, q);
            assert!(value >= last, "p({q}) = {value} < {last}");
            last = value;
        }
    }

    #[test]
    fn latency_stats_basic() {
        let stats = latency_stats(&[3.0, 1.0, 2.0]);
        assert!((stats.min - 1.0).abs() < f64::EPSILON);
        assert!((stats.max - 3.0).abs() < f64::EPSILON);
        assert!((stats.mean - 2.0).abs() < 1e-9);
        assert!((stats.p50 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn window_ms_thresholds() {
        assert_eq!(window_ms_for(30_000), 1_000);
        assert_eq!(window_ms_for(60_000), 1_000);
        assert_eq!(window_ms_for(60_001), 5_000);
        assert_eq!(window_ms_for(300_000), 5_000);
        assert_eq!(window_ms_for(400_000), 10_000);
        assert_eq!(window_ms_for(900_000), 30_000);
    }

    fn event(t: u64, latency: f64, ok: bool, concurrency: Option<u32>) -> RequestEvent {
        RequestEvent {
            t,
            method: "ping".to_owned(),
            latency_ms: latency,
            ok,
            error: None,
            error_category: None,
            error_code: None,
            concurrency,
            phase: None,
        }
    }

    #[test]
    fn windows_include_empty_slots_and_carry_concurrency() {
        let events = vec![
            event(100, 5.0, true, Some(2)),
            event(4_500, 7.0, false, Some(4)),
        ];
        let windows = build_windows(&events, 1_000);
        assert_eq!(windows.len(), 5);
        assert_eq!(windows[0].count, 1);
        assert_eq!(windows[1].count, 0);
        assert_eq!(windows[1].concurrency, Some(2));
        assert_eq!(windows[4].count, 1);
        assert_eq!(windows[4].errors, 1);
        assert_eq!(windows[4].concurrency, Some(4));
    }

    #[test]
    fn anomaly_detection_flags_spikes() {
        let mut events: Vec<RequestEvent> = (0..12)
            .map(|i| event(i * 1_000, 10.0, true, None))
            .collect();
        // Spike in the 12th window
        events.push(event(11_500, 500.0, true, None));
        let windows = build_windows(&events, 1_000);
        let anomalies = detect_anomalies(&windows);
        assert!(anomalies.contains(&11), "anomalies: {anomalies:?}");
    }

    #[test]
    fn anomaly_detection_quiet_on_flat_traffic() {
        let events: Vec<RequestEvent> = (0..30)
            .map(|i| event(i * 1_000, 10.0, true, None))
            .collect();
        let windows = build_windows(&events, 1_000);
        assert!(detect_anomalies(&windows).is_empty());
    }

    #[test]
    fn assertion_parse_with_ms_unit() {
        let a = Assertion::parse("p99 < 500ms").expect("parse");
        assert_eq!(a.metric, "p99");
        assert_eq!(a.op, AssertOp::Lt);
        assert!((a.value - 500.0).abs() < f64::EPSILON);
        assert_eq!(a.unit, "ms");
    }

    #[test]
    fn assertion_parse_seconds_convert_to_ms() {
        let a = Assertion::parse("p50 < 2s").expect("parse");
        assert!((a.value - 2_000.0).abs() < f64::EPSILON);
        assert_eq!(a.unit, "s");
    }

    #[test]
    fn assertion_parse_percent() {
        let a = Assertion::parse("error_rate < 1%").expect("parse");
        assert!((a.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(a.unit, "%");
    }

    #[test]
    fn assertion_parse_rejects_garbage() {
        assert!(Assertion::parse("garbage").is_err());
        assert!(Assertion::parse("p99 < abc").is_err());
        assert!(Assertion::parse("p99 ~ 5").is_err());
    }

    fn summary_with_p99(p99: f64) -> SummaryEvent {
        let mut summary = SummaryEvent::empty();
        summary.overall.p99 = p99;
        summary.total_requests = 100;
        summary.requests_per_second = 50.0;
        summary
    }

    #[test]
    fn assertion_evaluation() {
        let summary = summary_with_p99(450.0);
        let result = Assertion::parse("p99 < 500ms")
            .expect("parse")
            .evaluate(&summary);
        assert!(result.passed);
        assert!((result.actual - 450.0).abs() < f64::EPSILON);

        let result = Assertion::parse("p99 > 500ms")
            .expect("parse")
            .evaluate(&summary);
        assert!(!result.passed);
    }

    #[test]
    fn unknown_metric_fails_with_nan() {
        let summary = summary_with_p99(450.0);
        let result = Assertion::parse("p42 < 500")
            .expect("parse")
            .evaluate(&summary);
        assert!(!result.passed);
        assert!(result.actual.is_nan());
    }

    #[test]
    fn mean_std_sample_denominator() {
        let stats = mean_std(&[100.0, 200.0, 150.0]);
        assert!((stats.mean - 150.0).abs() < 1e-9);
        assert!((stats.stddev - 50.0).abs() < 1e-9);
    }

    #[test]
    fn mean_std_single_value_has_zero_stddev() {
        let stats = mean_std(&[7.0]);
        assert!((stats.mean - 7.0).abs() < f64::EPSILON);
        assert!((stats.stddev - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn run_aggregate_over_three_runs() {
        let summaries: Vec<SummaryEvent> = [100.0, 200.0, 150.0]
            .iter()
            .map(|&p99| summary_with_p99(p99))
            .collect();
        let aggregate = RunAggregate::from_summaries(&summaries);
        assert_eq!(aggregate.run_count, 3);
        assert!((aggregate.overall.p99.mean - 150.0).abs() < 1e-9);
        assert!((aggregate.overall.p99.stddev - 50.0).abs() < 1e-9);

        let event = aggregate.to_summary_event();
        assert_eq!(event.total_requests, 100);
    }
}
