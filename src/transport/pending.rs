// ABOUTME: Pending-request table mapping JSON-RPC ids to response waiters
// ABOUTME: Allocates monotonic ids, measures latency, and drains every waiter on close
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::TransportError;
use crate::jsonrpc::JsonRpcError;
use crate::transport::{round2, Reply};

/// A registered request awaiting its response
struct Waiter {
    tx: oneshot::Sender<Result<Reply, TransportError>>,
    started: Instant,
}

/// Table of in-flight requests for one transport instance
///
/// Ids are monotonically increasing positive integers. Each waiter is
/// completed at most once: by a matching response, by its timeout, or by
/// the drain on close.
pub struct PendingTable {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, Waiter>>,
}

impl PendingTable {
    /// Create an empty table; the first allocated id is 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a waiter for `id`, starting its latency clock
    ///
    /// Call immediately before the outbound write so latency covers the
    /// full wire round trip.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Result<Reply, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            tx,
            started: Instant::now(),
        };
        if let Ok(mut waiters) = self.waiters.lock() {
            waiters.insert(id, waiter);
        }
        rx
    }

    /// Complete the waiter for `id` with a response
    ///
    /// Returns false when no waiter exists (late responses after a timeout
    /// land here and are dropped).
    pub fn complete(&self, id: u64, result: Option<serde_json::Value>, error: Option<JsonRpcError>) -> bool {
        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&id),
            Err(_) => None,
        };
        let Some(waiter) = waiter else {
            debug!(id, "Response for unknown request id, dropping");
            return false;
        };

        let latency_ms = round2(waiter.started.elapsed().as_secs_f64() * 1000.0);
        let outcome = match error {
            Some(err) => Err(
                TransportError::server(err.code, err.message, err.data).with_latency(latency_ms)
            ),
            None => Ok(Reply {
                result: result.unwrap_or(serde_json::Value::Null),
                latency_ms,
            }),
        };
        let _ = waiter.tx.send(outcome);
        true
    }

    /// Remove the waiter for `id` after its deadline expired
    ///
    /// Returns the elapsed latency for the timeout record, or `None` when
    /// a response won the race.
    pub fn abandon(&self, id: u64) -> Option<f64> {
        let waiter = match self.waiters.lock() {
            Ok(mut waiters) => waiters.remove(&id),
            Err(_) => None,
        };
        waiter.map(|w| round2(w.started.elapsed().as_secs_f64() * 1000.0))
    }

    /// Reject every outstanding waiter with a closing error
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<(u64, Waiter)> = match self.waiters.lock() {
            Ok(mut waiters) => waiters.drain().collect(),
            Err(_) => Vec::new(),
        };
        for (id, waiter) in drained {
            let latency_ms = round2(waiter.started.elapsed().as_secs_f64() * 1000.0);
            debug!(id, "Rejecting pending request: {reason}");
            let _ = waiter
                .tx
                .send(Err(TransportError::client(reason).with_latency(latency_ms)));
        }
    }

    /// Number of requests currently in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// True when nothing is in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Await a registered waiter, racing it against the request timeout
    ///
    /// # Errors
    ///
    /// Returns `timeout` when the deadline passes first, the server error
    /// carried by an error reply, or a closing error when the transport
    /// shut down underneath the request.
    pub async fn await_reply(
        &self,
        id: u64,
        rx: oneshot::Receiver<Result<Reply, TransportError>>,
        timeout: Duration,
    ) -> Result<Reply, TransportError> {
        tokio::select! {
            outcome = rx => match outcome {
                Ok(reply) => reply,
                // Sender dropped without completing: the reader died
                Err(_) => Err(TransportError::client("transport closed while waiting")),
            },
            () = tokio::time::sleep(timeout) => {
                let latency = self.abandon(id).unwrap_or(0.0);
                Err(TransportError::timeout(
                    format!("no response within {}ms", timeout.as_millis()),
                    latency,
                ))
            }
        }
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_from_one() {
        let table = PendingTable::new();
        assert_eq!(table.next_id(), 1);
        assert_eq!(table.next_id(), 2);
        assert_eq!(table.next_id(), 3);
    }

    #[tokio::test]
    async fn complete_delivers_reply_with_latency() {
        let table = PendingTable::new();
        let id = table.next_id();
        let rx = table.register(id);

        assert!(table.complete(id, Some(serde_json::json!({"ok": true})), None));
        let reply = rx.await.expect("channel").expect("reply");
        assert_eq!(reply.result["ok"], true);
        assert!(reply.latency_ms >= 0.0);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn error_reply_becomes_server_error() {
        let table = PendingTable::new();
        let id = table.next_id();
        let rx = table.register(id);

        let err = JsonRpcError {
            code: -32603,
            message: "internal".to_owned(),
            data: None,
        };
        assert!(table.complete(id, None, Some(err)));

        let outcome = rx.await.expect("channel");
        let err = outcome.expect_err("server error");
        assert_eq!(err.code, -32603);
        assert_eq!(err.category, crate::error::ErrorCategory::Server);
    }

    #[tokio::test]
    async fn complete_unknown_id_is_dropped() {
        let table = PendingTable::new();
        assert!(!table.complete(99, Some(serde_json::Value::Null), None));
    }

    #[tokio::test]
    async fn completion_happens_at_most_once() {
        let table = PendingTable::new();
        let id = table.next_id();
        let rx = table.register(id);

        assert!(table.complete(id, Some(serde_json::Value::Null), None));
        assert!(!table.complete(id, Some(serde_json::Value::Null), None));
        let _ = rx.await;
    }

    #[tokio::test]
    async fn fail_all_drains_every_waiter() {
        let table = PendingTable::new();
        let rx1 = table.register(table.next_id());
        let rx2 = table.register(table.next_id());
        assert_eq!(table.len(), 2);

        table.fail_all("transport closing");
        assert!(table.is_empty());

        for rx in [rx1, rx2] {
            let err = rx.await.expect("channel").expect_err("closing error");
            assert_eq!(err.category, crate::error::ErrorCategory::Client);
            assert!(err.message.contains("closing"));
        }
    }

    #[tokio::test]
    async fn await_reply_times_out_and_clears_entry() {
        let table = PendingTable::new();
        let id = table.next_id();
        let rx = table.register(id);

        let err = table
            .await_reply(id, rx, Duration::from_millis(20))
            .await
            .expect_err("timeout");
        assert_eq!(err.category, crate::error::ErrorCategory::Timeout);
        assert_eq!(err.code, -1);
        assert!(table.is_empty());

        // A late response is dropped, not double-completed
        assert!(!table.complete(id, Some(serde_json::Value::Null), None));
    }
}
