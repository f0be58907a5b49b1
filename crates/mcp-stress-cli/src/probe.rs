// ABOUTME: diagnose and discover subcommands: step-by-step probes of a target server
// ABOUTME: Treats JSON-RPC -32601 as "capability absent", not a failure
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use serde_json::Value;

use mcp_stress::client::McpClient;
use mcp_stress::jsonrpc::METHOD_NOT_FOUND;
use mcp_stress::sampler::SchemaSampler;
use mcp_stress::{ErrorCategory, TransportError};

use crate::target;

/// Target options shared by diagnose and discover
#[derive(Args)]
pub struct TargetArgs {
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

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    timeout: u64,

    /// Stdio server command (everything after --)
    #[arg(last = true)]
    command: Vec<String>,
}

/// Outcome of one probe step
enum Step {
    Ok(f64),
    Skipped,
    Failed(String),
}

fn print_step(name: &str, step: &Step) {
    match step {
        Step::Ok(latency) => println!("  ok       {name} ({latency:.1} ms)"),
        Step::Skipped => println!("  skipped  {name} (method not found)"),
        Step::Failed(message) => println!("  FAILED   {name}: {message}"),
    }
}

/// A server that answers -32601 lacks the capability; that is not a failure
fn classify<T>(result: Result<mcp_stress::client::Timed<T>, TransportError>) -> (Step, Option<T>) {
    match result {
        Ok(timed) => (Step::Ok(timed.latency_ms), Some(timed.value)),
        Err(err)
            if err.category == ErrorCategory::Server && err.code == METHOD_NOT_FOUND =>
        {
            (Step::Skipped, None)
        }
        Err(err) => (Step::Failed(err.to_string()), None),
    }
}

/// `diagnose`: probe each capability in order and report per-step results
pub async fn diagnose(args: TargetArgs) -> ExitCode {
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

    let transport = match spec.build(Duration::from_millis(args.timeout)) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    println!("diagnosing {} target", spec.kind());

    match transport.connect().await {
        Ok(()) => println!("  ok       connect"),
        Err(e) => {
            println!("  FAILED   connect: {e}");
            return ExitCode::FAILURE;
        }
    }

    let client = McpClient::new(Arc::clone(&transport));

    match client.initialize().await {
        Ok(handshake) => {
            println!(
                "  ok       initialize ({:.1} ms, protocol {})",
                handshake.latency_ms, handshake.value.protocol_version
            );
        }
        Err(e) => {
            println!("  FAILED   initialize: {e}");
            transport.close().await;
            return ExitCode::FAILURE;
        }
    }

    let (step, _) = classify(client.ping().await);
    failed |= matches!(step, Step::Failed(_));
    print_step("ping", &step);

    let (step, tools) = classify(client.list_tools().await);
    failed |= matches!(step, Step::Failed(_));
    print_step("tools/list", &step);

    if let Some(tool) = tools.as_deref().and_then(<[_]>::first) {
        let args_value = SchemaSampler::generate_args(&tool.input_schema);
        let (step, _) = classify(client.call_tool(&tool.name, args_value).await);
        failed |= matches!(step, Step::Failed(_));
        print_step(&format!("tools/call ({})", tool.name), &step);
    } else {
        println!("  skipped  tools/call (no tools)");
    }

    let (step, _) = classify(client.list_resources().await);
    failed |= matches!(step, Step::Failed(_));
    print_step("resources/list", &step);

    let (step, _) = classify(client.list_resource_templates().await);
    failed |= matches!(step, Step::Failed(_));
    print_step("resources/templates/list", &step);

    let (step, _) = classify(client.list_prompts().await);
    failed |= matches!(step, Step::Failed(_));
    print_step("prompts/list", &step);

    transport.close().await;

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// `discover`: handshake once and enumerate everything the server exposes
pub async fn discover(args: TargetArgs) -> ExitCode {
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

    let transport = match spec.build(Duration::from_millis(args.timeout)) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = transport.connect().await {
        eprintln!("error: connect failed: {e}");
        return ExitCode::FAILURE;
    }

    let client = McpClient::new(Arc::clone(&transport));
    let handshake = match client.initialize().await {
        Ok(handshake) => handshake.value,
        Err(e) => {
            eprintln!("error: handshake failed: {e}");
            transport.close().await;
            return ExitCode::FAILURE;
        }
    };

    println!("server    {}", compact(&handshake.server_info));
    println!("protocol  {}", handshake.protocol_version);

    match client.list_tools().await {
        Ok(timed) => {
            println!("tools ({})", timed.value.len());
            for tool in &timed.value {
                println!(
                    "  {:<28} {}",
                    tool.name,
                    tool.description.as_deref().unwrap_or("")
                );
            }
        }
        Err(_) => println!("tools: not supported"),
    }

    print_listing(&client.list_resources().await.map(|t| t.value), "resources", "uri");
    print_listing(
        &client.list_resource_templates().await.map(|t| t.value),
        "resourceTemplates",
        "uriTemplate",
    );
    print_listing(&client.list_prompts().await.map(|t| t.value), "prompts", "name");

    transport.close().await;
    ExitCode::SUCCESS
}

/// Print the names under `key` from a listing result, or "not supported"
fn print_listing(result: &Result<Value, TransportError>, key: &str, field: &str) {
    match result {
        Ok(value) => {
            let items = value.get(key).and_then(Value::as_array);
            let count = items.map_or(0, Vec::len);
            println!("{key} ({count})");
            if let Some(items) = items {
                for item in items {
                    if let Some(name) = item.get(field).and_then(Value::as_str) {
                        println!("  {name}");
                    }
                }
            }
        }
        Err(_) => println!("{key}: not supported"),
    }
}

/// Render `{"name": "x", "version": "y"}` as `x y`
fn compact(info: &Value) -> String {
    let name = info.get("name").and_then(Value::as_str).unwrap_or("unknown");
    let version = info.get("version").and_then(Value::as_str).unwrap_or("");
    format!("{name} {version}").trim().to_owned()
}
