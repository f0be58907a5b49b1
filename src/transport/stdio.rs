// ABOUTME: Subprocess transport speaking line-delimited JSON-RPC over piped stdin/stdout
// ABOUTME: A reader task matches responses by id; stderr is drained for diagnostics only
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::jsonrpc::{IncomingMessage, JsonRpcNotification, JsonRpcRequest};
use crate::transport::pending::PendingTable;
use crate::transport::{
    NotificationReceiver, Reply, ServerNotification, Transport, NOTIFICATION_CHANNEL_CAPACITY,
};

/// Lines of stderr kept for post-mortem diagnosis
const STDERR_RING_CAPACITY: usize = 64;

/// MCP transport over a spawned subprocess
///
/// One JSON object per line on stdin; stdout is read line-by-line on a
/// background task. Non-JSON stdout lines (startup banners and the like)
/// are skipped at protocol level.
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    extra_env: HashMap<String, String>,
    timeout: Duration,
    pending: Arc<PendingTable>,
    stdin: Mutex<Option<ChildStdin>>,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
    notification_rx: StdMutex<Option<NotificationReceiver>>,
    notification_tx: mpsc::Sender<ServerNotification>,
    stderr_ring: Arc<StdMutex<VecDeque<String>>>,
}

struct Session {
    child: Child,
    reader_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl StdioTransport {
    /// Create an unconnected stdio transport for the given command line
    #[must_use]
    pub fn new(
        command: String,
        args: Vec<String>,
        extra_env: HashMap<String, String>,
        timeout: Duration,
    ) -> Self {
        let (notification_tx, notification_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        Self {
            command,
            args,
            extra_env,
            timeout,
            pending: Arc::new(PendingTable::new()),
            stdin: Mutex::new(None),
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
            notification_rx: StdMutex::new(Some(notification_rx)),
            notification_tx,
            stderr_ring: Arc::new(StdMutex::new(VecDeque::new())),
        }
    }

    /// Recent stderr output from the child, oldest first
    #[must_use]
    pub fn stderr_tail(&self) -> Vec<String> {
        self.stderr_ring
            .lock()
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    async fn write_line(&self, line: String) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| TransportError::client("transport is not connected"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::client(format!("stdin write failed: {e}")))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::client(format!("stdin write failed: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::client(format!("stdin flush failed: {e}")))?;
        Ok(())
    }
}

/// Read stdout lines, completing pending requests and forwarding notifications
async fn read_stdout(
    mut lines: Lines<BufReader<ChildStdout>>,
    pending: Arc<PendingTable>,
    notifications: mpsc::Sender<ServerNotification>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }

        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(_) => {
                // Startup banners and other non-protocol noise
                debug!(line = %line, "Skipping non-JSON stdout line");
                continue;
            }
        };

        match IncomingMessage::from_value(&value) {
            Some(IncomingMessage::Response { id, result, error }) => {
                pending.complete(id, result, error);
            }
            Some(IncomingMessage::Notification { method, params }) => {
                let note = ServerNotification { method, params };
                if notifications.try_send(note).is_err() {
                    debug!("Notification channel full or closed, dropping");
                }
            }
            None => {
                debug!(line = %line, "Skipping JSON stdout line that is not JSON-RPC");
            }
        }
    }

    debug!("Child stdout closed");
    pending.fail_all("server closed the connection");
}

/// Drain stderr into a bounded ring for diagnosis
async fn read_stderr(stderr: ChildStderr, ring: Arc<StdMutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(stderr = %line, "Child stderr");
        if let Ok(mut ring) = ring.lock() {
            if ring.len() >= STDERR_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(line);
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.extra_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::client(format!("failed to spawn {}: {e}", self.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::client("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::client("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::client("failed to capture child stderr"))?;

        let reader_task = tokio::spawn(read_stdout(
            BufReader::new(stdout).lines(),
            Arc::clone(&self.pending),
            self.notification_tx.clone(),
        ));
        let stderr_task = tokio::spawn(read_stderr(stderr, Arc::clone(&self.stderr_ring)));

        *self.stdin.lock().await = Some(stdin);
        *self.session.lock().await = Some(Session {
            child,
            reader_task,
            stderr_task,
        });

        debug!(command = %self.command, "Stdio transport connected");
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Reply, TransportError> {
        if self.is_closed() {
            return Err(TransportError::client("transport is closed"));
        }

        let id = self.pending.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)
            .map_err(|e| TransportError::client(format!("request serialization failed: {e}")))?;

        let rx = self.pending.register(id);
        if let Err(err) = self.write_line(line).await {
            self.pending.abandon(id);
            return Err(err);
        }

        self.pending.await_reply(id, rx, self.timeout).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::client("transport is closed"));
        }
        let note = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&note)
            .map_err(|e| TransportError::client(format!("notification serialization failed: {e}")))?;
        self.write_line(line).await
    }

    fn take_notifications(&self) -> Option<NotificationReceiver> {
        self.notification_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pending.fail_all("transport closing");
        *self.stdin.lock().await = None;

        let session = self.session.lock().await.take();
        if let Some(mut session) = session {
            if let Err(e) = session.child.start_kill() {
                debug!("Failed to signal child: {e}");
            }
            match tokio::time::timeout(Duration::from_secs(2), session.child.wait()).await {
                Ok(Ok(status)) => debug!(?status, "Child exited"),
                Ok(Err(e)) => warn!("Failed to reap child: {e}"),
                Err(_) => warn!("Child did not exit within grace period"),
            }
            let _ = tokio::time::timeout(Duration::from_secs(1), session.reader_task).await;
            session.stderr_task.abort();
        }

        debug!("Stdio transport closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
