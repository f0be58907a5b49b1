// ABOUTME: Find-ceiling controller: steps concurrency upward until throughput plateaus
// ABOUTME: Each phase runs a tight worker loop, then throughput and latency gains are judged
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dashboard::DashboardHandle;
use crate::engine::ops::OpSet;
use crate::recorder::Recorder;
use crate::stats::percentile;
use crate::workload::{FindCeilingConfig, RunOptions};

/// Measurements for one concurrency step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Phase index, 0-based
    pub phase: usize,
    /// Worker count during this phase
    pub concurrency: u32,
    /// Requests completed in this phase
    pub total: u64,
    /// Failed requests in this phase
    pub errors: u64,
    /// Requests per second over the phase
    pub rps: f64,
    /// Median latency over the phase
    pub p50: f64,
    /// 99th percentile latency over the phase
    pub p99: f64,
    /// Wall seconds the phase actually ran
    #[serde(rename = "elapsedSec")]
    pub elapsed_sec: f64,
}

/// Why the controller stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum CeilingOutcome {
    /// Throughput stopped improving; the ceiling is the previous step
    Plateau {
        /// Concurrency of the last productive phase
        concurrency: u32,
    },
    /// Throughput regressed outright at this step
    Degradation {
        /// Concurrency where throughput fell
        concurrency: u32,
    },
    /// More than a tenth of the phase's requests failed
    ErrorSaturation {
        /// Concurrency where errors saturated
        concurrency: u32,
    },
    /// The configured maximum was reached without a verdict
    NoPlateau,
}

/// Full find-ceiling result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeilingReport {
    /// Every phase, in execution order (strictly increasing concurrency)
    pub phases: Vec<PhaseReport>,
    /// Terminal verdict
    pub outcome: CeilingOutcome,
}

/// The stepping sequence: +1 up to 5, +5 up to 20, then +10
fn next_concurrency(current: u32) -> u32 {
    if current < 5 {
        current + 1
    } else if current < 20 {
        current + 5
    } else {
        current + 10
    }
}

/// Run the find-ceiling controller
pub async fn run(
    config: &FindCeilingConfig,
    options: &RunOptions,
    opset: &Arc<OpSet>,
    recorder: &Arc<Recorder>,
    dashboard: Option<&DashboardHandle>,
) -> CeilingReport {
    let phase_duration = Duration::from_secs(
        config
            .phase_duration_sec
            .min(options.duration_secs / 5)
            .max(5),
    );

    let mut phases: Vec<PhaseReport> = Vec::new();
    let mut concurrency = 1u32;
    let mut phase_index = 0usize;

    let outcome = loop {
        if concurrency > config.max_concurrency {
            break CeilingOutcome::NoPlateau;
        }

        recorder.set_phase(phase_index as i32);
        recorder.set_concurrency(concurrency);

        let phase = run_phase(phase_index, concurrency, phase_duration, opset, recorder).await;
        info!(
            phase = phase.phase,
            concurrency = phase.concurrency,
            rps = format!("{:.1}", phase.rps),
            p50 = format!("{:.2}", phase.p50),
            p99 = format!("{:.2}", phase.p99),
            "Phase complete"
        );
        if let Some(handle) = dashboard {
            handle.emit(
                "message",
                serde_json::json!({
                    "text": format!(
                        "phase {} @ {}: {:.1} rps, p50 {:.2}ms",
                        phase.phase, phase.concurrency, phase.rps, phase.p50
                    ),
                }),
            );
        }

        if let Some(previous) = phases.last() {
            if let Some(outcome) = judge(previous, &phase, config.plateau_threshold) {
                phases.push(phase);
                break outcome;
            }
        }

        phases.push(phase);
        concurrency = next_concurrency(concurrency);
        phase_index += 1;
    };

    if outcome == CeilingOutcome::NoPlateau {
        info!(
            max = config.max_concurrency,
            "No plateau detected within the concurrency ceiling"
        );
    }

    CeilingReport { phases, outcome }
}

/// Run `concurrency` workers in a tight loop for the phase duration
async fn run_phase(
    phase_index: usize,
    concurrency: u32,
    duration: Duration,
    opset: &Arc<OpSet>,
    recorder: &Arc<Recorder>,
) -> PhaseReport {
    let start_total = recorder.total();
    let start_errors = recorder.errors();
    let start_idx = recorder.latency_count();
    let started = Instant::now();
    let deadline = started + duration;

    let workers: Vec<_> = (0..concurrency)
        .map(|_| {
            let opset = Arc::clone(opset);
            async move {
                while Instant::now() < deadline {
                    opset.run_next().await;
                }
            }
        })
        .collect();
    futures::future::join_all(workers).await;

    let elapsed_sec = started.elapsed().as_secs_f64();
    let total = recorder.total() - start_total;
    let errors = recorder.errors() - start_errors;

    let mut latencies = recorder.latencies_since(start_idx);
    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    PhaseReport {
        phase: phase_index,
        concurrency,
        total,
        errors,
        rps: if elapsed_sec > 0.0 {
            total as f64 / elapsed_sec
        } else {
            0.0
        },
        p50: percentile(&latencies, 0.50),
        p99: percentile(&latencies, 0.99),
        elapsed_sec,
    }
}

/// Apply the plateau rules, in order; `None` means keep stepping
fn judge(
    previous: &PhaseReport,
    current: &PhaseReport,
    plateau_threshold: f64,
) -> Option<CeilingOutcome> {
    let rps_gain = if previous.rps > 0.0 {
        (current.rps - previous.rps) / previous.rps
    } else {
        0.0
    };
    let p50_gain = if previous.p50 > 0.0 {
        (current.p50 - previous.p50) / previous.p50
    } else {
        0.0
    };

    if rps_gain < plateau_threshold && p50_gain > 0.2 {
        debug!(rps_gain, p50_gain, "Plateau rule fired");
        return Some(CeilingOutcome::Plateau {
            concurrency: previous.concurrency,
        });
    }

    if current.rps < 0.9 * previous.rps {
        return Some(CeilingOutcome::Degradation {
            concurrency: current.concurrency,
        });
    }

    if current.total > 0 && current.errors as f64 > 0.1 * current.total as f64 {
        return Some(CeilingOutcome::ErrorSaturation {
            concurrency: current.concurrency,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(index: usize, concurrency: u32, rps: f64, p50: f64, total: u64, errors: u64) -> PhaseReport {
        PhaseReport {
            phase: index,
            concurrency,
            total,
            errors,
            rps,
            p50,
            p99: p50 * 2.0,
            elapsed_sec: 5.0,
        }
    }

    #[test]
    fn stepping_sequence_matches_contract() {
        let mut sequence = vec![1u32];
        while *sequence.last().expect("nonempty") < 60 {
            sequence.push(next_concurrency(*sequence.last().expect("nonempty")));
        }
        assert_eq!(sequence, vec![1, 2, 3, 4, 5, 10, 15, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn plateau_fires_at_previous_concurrency() {
        let previous = phase(3, 10, 100.0, 10.0, 500, 0);
        // Barely more rps, sharply worse p50
        let current = phase(4, 15, 102.0, 15.0, 510, 0);
        let outcome = judge(&previous, &current, 0.05);
        assert_eq!(outcome, Some(CeilingOutcome::Plateau { concurrency: 10 }));
    }

    #[test]
    fn degradation_fires_at_current_concurrency() {
        let previous = phase(3, 10, 100.0, 10.0, 500, 0);
        let current = phase(4, 15, 80.0, 10.5, 400, 0);
        let outcome = judge(&previous, &current, 0.05);
        assert_eq!(
            outcome,
            Some(CeilingOutcome::Degradation { concurrency: 15 })
        );
    }

    #[test]
    fn error_saturation_fires_after_the_other_rules() {
        let previous = phase(3, 10, 100.0, 10.0, 500, 0);
        let current = phase(4, 15, 105.0, 10.5, 500, 80);
        let outcome = judge(&previous, &current, 0.05);
        assert_eq!(
            outcome,
            Some(CeilingOutcome::ErrorSaturation { concurrency: 15 })
        );
    }

    #[test]
    fn healthy_gain_keeps_stepping() {
        let previous = phase(3, 10, 100.0, 10.0, 500, 0);
        let current = phase(4, 15, 140.0, 10.5, 700, 5);
        assert!(judge(&previous, &current, 0.05).is_none());
    }
}
