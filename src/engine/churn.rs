// ABOUTME: Connection-churn controller: workers loop fresh-session handshakes for the run duration
// ABOUTME: Each iteration records the initialize latency and one ping before closing the session
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::client::McpClient;
use crate::recorder::Recorder;
use crate::workload::RunOptions;

/// Run the connection-churn controller
///
/// `options.concurrency` workers each loop: build a transport, connect,
/// handshake (recorded as an `initialize` outcome), ping, close. Failed
/// handshakes are recorded per-request and never abort the run.
pub async fn run(options: &RunOptions, recorder: &Arc<Recorder>) {
    let initialize_id = recorder.register_method("initialize");
    let ping_id = recorder.register_method("ping");

    let workers = options.concurrency.max(1);
    recorder.set_concurrency(workers);
    let deadline = Instant::now() + Duration::from_secs(options.duration_secs);

    let tasks: Vec<_> = (0..workers)
        .map(|worker| {
            let options = options.clone();
            let recorder = Arc::clone(recorder);
            async move {
                while Instant::now() < deadline {
                    churn_once(&options, &recorder, initialize_id, ping_id).await;
                }
                debug!(worker, "Churn worker finished");
            }
        })
        .collect();
    futures::future::join_all(tasks).await;
}

/// One open-handshake-ping-close cycle
async fn churn_once(
    options: &RunOptions,
    recorder: &Arc<Recorder>,
    initialize_id: u32,
    ping_id: u32,
) {
    let transport = match options.transport.build(options.timeout) {
        Ok(transport) => transport,
        Err(err) => {
            recorder.error(initialize_id, &err);
            return;
        }
    };

    if let Err(err) = transport.connect().await {
        recorder.error(initialize_id, &err);
        transport.close().await;
        return;
    }

    let client = McpClient::new(Arc::clone(&transport));
    match client.initialize().await {
        Ok(handshake) => recorder.success(initialize_id, handshake.latency_ms),
        Err(err) => {
            recorder.error(initialize_id, &err);
            transport.close().await;
            return;
        }
    }

    match client.ping().await {
        Ok(timed) => recorder.success(ping_id, timed.latency_ms),
        Err(err) => recorder.error(ping_id, &err),
    }

    transport.close().await;
}
