// ABOUTME: Console rendering for run summaries, assertions, and cross-run aggregates
// ABOUTME: Tabular output on stdout; suppressed entirely by --json
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use mcp_stress::engine::{CeilingOutcome, CeilingReport};
use mcp_stress::stats::{AssertionResult, MeanStd, RunAggregate};
use mcp_stress::SummaryEvent;

/// Print the run summary table
pub fn print_summary(summary: &SummaryEvent) {
    println!();
    println!("  requests      {}", summary.total_requests);
    println!(
        "  errors        {} ({:.2}%)",
        summary.total_errors, summary.error_rate
    );
    println!("  duration      {} ms", summary.duration_ms);
    println!("  throughput    {:.1} req/s", summary.requests_per_second);
    println!(
        "  latency       min {:.2}  mean {:.2}  p50 {:.2}  p95 {:.2}  p99 {:.2}  max {:.2}",
        summary.overall.min,
        summary.overall.mean,
        summary.overall.p50,
        summary.overall.p95,
        summary.overall.p99,
        summary.overall.max,
    );

    if !summary.error_categories.is_empty() {
        println!();
        println!("  errors by category");
        for (category, count) in &summary.error_categories {
            println!("    {category:<10} {count}");
        }
    }

    if !summary.by_method.is_empty() {
        println!();
        println!(
            "  {:<28} {:>8} {:>8} {:>9} {:>9} {:>9}",
            "method", "count", "errors", "p50", "p95", "p99"
        );
        for method in &summary.by_method {
            println!(
                "  {:<28} {:>8} {:>8} {:>9.2} {:>9.2} {:>9.2}",
                method.method,
                method.count,
                method.errors,
                method.latency.p50,
                method.latency.p95,
                method.latency.p99,
            );
        }
    }
    println!();
}

/// Print one PASS/FAIL line per assertion; true when all passed
pub fn print_assertions(results: &[AssertionResult]) -> bool {
    let mut all_passed = true;
    for result in results {
        let verdict = if result.passed { "PASS" } else { "FAIL" };
        println!(
            "  {verdict}  {}  (observed {:.2})",
            result.assertion.raw, result.actual
        );
        all_passed &= result.passed;
    }
    all_passed
}

/// Print the find-ceiling phase table and verdict
pub fn print_ceiling(report: &CeilingReport) {
    println!();
    println!(
        "  {:>5} {:>12} {:>9} {:>8} {:>9} {:>9}",
        "phase", "concurrency", "rps", "errors", "p50", "p99"
    );
    for phase in &report.phases {
        println!(
            "  {:>5} {:>12} {:>9.1} {:>8} {:>9.2} {:>9.2}",
            phase.phase, phase.concurrency, phase.rps, phase.errors, phase.p50, phase.p99,
        );
    }
    println!();
    match &report.outcome {
        CeilingOutcome::Plateau { concurrency } => {
            println!("  plateau at concurrency {concurrency}");
        }
        CeilingOutcome::Degradation { concurrency } => {
            println!("  throughput degraded at concurrency {concurrency}");
        }
        CeilingOutcome::ErrorSaturation { concurrency } => {
            println!("  error saturation at concurrency {concurrency}");
        }
        CeilingOutcome::NoPlateau => println!("  no plateau detected"),
    }
    println!();
}

fn fmt_mean_std(stat: &MeanStd) -> String {
    format!("{:.2} ± {:.2}", stat.mean, stat.stddev)
}

/// Print the cross-run aggregate table
pub fn print_aggregate(aggregate: &RunAggregate) {
    println!();
    println!("  aggregate of {} runs", aggregate.run_count);
    println!("  requests      {}", fmt_mean_std(&aggregate.total_requests));
    println!("  errors        {}", fmt_mean_std(&aggregate.total_errors));
    println!("  error rate    {} %", fmt_mean_std(&aggregate.error_rate));
    println!("  duration      {} ms", fmt_mean_std(&aggregate.duration_ms));
    println!(
        "  throughput    {} req/s",
        fmt_mean_std(&aggregate.requests_per_second)
    );
    println!(
        "  latency p50   {}    p95 {}    p99 {}",
        fmt_mean_std(&aggregate.overall.p50),
        fmt_mean_std(&aggregate.overall.p95),
        fmt_mean_std(&aggregate.overall.p99),
    );
    println!();
}
