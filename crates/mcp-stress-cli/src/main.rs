// ABOUTME: CLI entry point for the mcp-stress binary: subcommand parsing and exit codes
// ABOUTME: Dispatches to run, aggregate, diagnose, discover, history, profiles, and shapes
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

mod console;
mod probe;
mod run;
mod target;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use mcp_stress::shapes::ALL_SHAPES;
use mcp_stress::workload::builtin_profiles;
use mcp_stress::{history, RunAggregate, SummaryEvent};

/// mcp-stress — stress-testing driver for MCP servers
#[derive(Parser)]
#[command(name = "mcp-stress", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workload against an MCP server
    Run(run::RunArgs),

    /// Combine existing NDJSON run files into an aggregate
    Aggregate {
        /// Run files to combine
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Where to write the aggregate NDJSON
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the aggregate as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Probe a server step by step and report each capability
    Diagnose(probe::TargetArgs),

    /// Connect once and enumerate everything the server exposes
    Discover(probe::TargetArgs),

    /// Manage the named-run library
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },

    /// List the built-in workload profiles
    Profiles,

    /// List the built-in load shapes
    Shapes,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List saved runs
    List,
    /// Remove a saved run by name
    Rm {
        /// Name of the run to remove
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays clean for --json output and pipes
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Aggregate {
            files,
            output,
            json,
        } => execute_aggregate(&files, output.as_deref(), json),
        Command::Diagnose(args) => probe::diagnose(args).await,
        Command::Discover(args) => probe::discover(args).await,
        Command::History { action } => execute_history(action),
        Command::Profiles => {
            for profile in builtin_profiles() {
                println!("{:<18} {}", profile.name, profile.description);
            }
            ExitCode::SUCCESS
        }
        Command::Shapes => {
            for shape in ALL_SHAPES {
                println!("{:<14} {}", shape.name(), shape.description());
            }
            ExitCode::SUCCESS
        }
    }
}

/// `aggregate RUN1 RUN2 …`: read summaries back and combine them
fn execute_aggregate(
    files: &[PathBuf],
    output: Option<&std::path::Path>,
    json: bool,
) -> ExitCode {
    let mut summaries: Vec<SummaryEvent> = Vec::with_capacity(files.len());
    for path in files {
        match mcp_stress::events::read_run(path) {
            Ok(file) => match file.summary {
                Some(summary) => summaries.push(summary),
                None => {
                    eprintln!(
                        "error: {} has no summary line (incomplete run)",
                        path.display()
                    );
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                eprintln!("error: cannot read {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        }
    }

    let aggregate = RunAggregate::from_summaries(&summaries);

    if let Some(path) = output {
        let meta = mcp_stress::MetaEvent::aggregate(
            serde_json::json!({ "sources": files }),
            format!("mcp-stress aggregate ({} files)", files.len()),
            aggregate.run_count,
        );
        let mut lines = match serde_json::to_string(&meta) {
            Ok(line) => line,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        };
        lines.push('\n');
        match serde_json::to_string(&aggregate.to_summary_event()) {
            Ok(line) => lines.push_str(&line),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
        lines.push('\n');
        if let Err(e) = std::fs::write(path, lines) {
            eprintln!("error: cannot write {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    }

    if json {
        match serde_json::to_string_pretty(&aggregate) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        console::print_aggregate(&aggregate);
    }
    ExitCode::SUCCESS
}

/// `history [list | rm NAME]`
fn execute_history(action: Option<HistoryAction>) -> ExitCode {
    match action.unwrap_or(HistoryAction::List) {
        HistoryAction::List => match history::list() {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        HistoryAction::Rm { name } => match history::remove(&name) {
            Ok(()) => {
                println!("removed {name}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
    }
}
