// ABOUTME: The run subcommand: build RunOptions from flags, drive the engine, render results
// ABOUTME: Evaluates assertions against the summary and maps failures to exit code 1
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use tracing::{info, warn};

use mcp_stress::engine::Engine;
use mcp_stress::shapes::LoadShape;
use mcp_stress::stats::{Assertion, AssertionResult};
use mcp_stress::workload::RunOptions;
use mcp_stress::{history, SummaryEvent};

use crate::console;
use crate::target;

/// Duration used when only a request cap bounds the run
const UNCAPPED_DURATION_SECS: u64 = 86_400;

/// Options for the `run` subcommand
#[derive(Args)]
pub struct RunArgs {
    /// Workload profile name (see `profiles`)
    #[arg(long, default_value = "ping")]
    profile: String,

    /// Run duration in seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Stop after this many requests instead of a duration
    #[arg(long)]
    requests: Option<u64>,

    /// Peak concurrency fed to the load shape
    #[arg(long, default_value_t = 10)]
    concurrency: u32,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    timeout: u64,

    /// Bind tools/call to a single tool
    #[arg(long)]
    tool: Option<String>,

    /// Load shape override (see `shapes`)
    #[arg(long)]
    shape: Option<String>,

    /// NDJSON output path
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// PRNG seed for reproducible workloads (0 derives one)
    #[arg(long, default_value_t = 0)]
    seed: u32,

    /// Serve a live dashboard for this run
    #[arg(long)]
    live: bool,

    /// Print the summary object as JSON instead of the table
    #[arg(long)]
    json: bool,

    /// Assertion such as "p99 < 500ms"; repeatable
    #[arg(long = "assert")]
    assertions: Vec<String>,

    /// Repeat the run this many times and aggregate
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Save the output NDJSON into the named-run library
    #[arg(long)]
    save: Option<String>,

    /// HTTP MCP endpoint (streamable HTTP unless --sse)
    #[arg(long)]
    url: Option<String>,

    /// Use the legacy SSE transport for --url
    #[arg(long)]
    sse: bool,

    /// Extra HTTP header "Name: value"; repeatable
    #[arg(long = "header")]
    headers: Vec<String>,

    /// Extra subprocess environment "KEY=value"; repeatable
    #[arg(long = "env")]
    env: Vec<String>,

    /// Stdio server command (everything after --)
    #[arg(last = true)]
    command: Vec<String>,
}

/// Execute the run subcommand
pub async fn execute(args: RunArgs) -> ExitCode {
    // Bad assertions are configuration errors; fail before connecting
    let assertions = match args
        .assertions
        .iter()
        .map(|a| Assertion::parse(a))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(assertions) => assertions,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let shape = match args.shape.as_deref() {
        None => None,
        Some(name) => match LoadShape::parse(name) {
            Some(shape) => Some(shape),
            None => {
                eprintln!("error: unknown shape '{name}' (see `mcp-stress shapes`)");
                return ExitCode::FAILURE;
            }
        },
    };

    let spec = match target::build_spec(
        args.url.as_deref(),
        args.sse,
        &args.headers,
        &args.env,
        &args.command,
    ) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let duration_secs = args.duration.unwrap_or(if args.requests.is_some() {
        UNCAPPED_DURATION_SECS
    } else {
        30
    });

    let mut options = RunOptions::new(spec)
        .with_profile(&args.profile)
        .with_duration_secs(duration_secs)
        .with_concurrency(args.concurrency)
        .with_timeout(Duration::from_millis(args.timeout))
        .with_seed(args.seed);
    options.requests = args.requests;
    options.tool = args.tool.clone();
    options.shape = shape;
    options.output = args.output.clone();
    options.live = args.live;
    options.json = args.json;
    options.assertions = args.assertions.clone();
    options.repeat = args.repeat.max(1);

    let result = match Engine::new(options).run().await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(url) = &result.dashboard_url {
        info!(url, "Dashboard served this run");
    }

    // The summary assertions judge: the aggregate for --repeat, the
    // single run otherwise
    let judged_summary: SummaryEvent = match &result.aggregate {
        Some(aggregate) => aggregate.to_summary_event(),
        None => result.runs[0].summary.clone(),
    };

    if args.json {
        let payload = match &result.aggregate {
            Some(aggregate) => serde_json::to_string_pretty(aggregate),
            None => serde_json::to_string_pretty(&result.runs[0].summary),
        };
        match payload {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        for (index, run) in result.runs.iter().enumerate() {
            if result.runs.len() > 1 {
                println!("── run {} of {} ──", index + 1, result.runs.len());
            }
            console::print_summary(&run.summary);
            if let Some(ceiling) = &run.ceiling {
                console::print_ceiling(ceiling);
            }
        }
        if let Some(aggregate) = &result.aggregate {
            console::print_aggregate(aggregate);
        }
    }

    let assertion_results: Vec<AssertionResult> = assertions
        .iter()
        .map(|a| a.evaluate(&judged_summary))
        .collect();
    let assertions_passed = if assertion_results.is_empty() {
        true
    } else {
        console::print_assertions(&assertion_results)
    };

    if let Some(name) = &args.save {
        let source = result
            .aggregate_path
            .as_deref()
            .or_else(|| result.runs.last().and_then(|r| r.output_path.as_deref()));
        match source {
            Some(path) => match history::save(name, path) {
                Ok(target) => info!(path = %target.display(), "Run saved"),
                Err(e) => warn!("Could not save run '{name}': {e}"),
            },
            None => warn!("--save needs --output; nothing was written to disk"),
        }
    }

    if assertions_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
