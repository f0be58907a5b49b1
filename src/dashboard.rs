// ABOUTME: Live-dashboard HTTP server: an embedded page at / and an SSE feed at /events
// ABOUTME: Run progress fans out over a broadcast channel; streams end after the complete event
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{extract::State, Router};
use futures::{future, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Broadcast capacity; slow dashboard clients may drop window events
const CHANNEL_CAPACITY: usize = 256;

/// Minimal page that subscribes to the event feed and renders run progress
const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// One dashboard event: an SSE event name plus a JSON payload
#[derive(Debug, Clone)]
pub struct DashboardEvent {
    /// SSE event name (`meta`, `window`, `complete`, …)
    pub name: &'static str,
    /// JSON payload
    pub payload: Value,
}

/// Names that terminate a dashboard stream
const TERMINAL_EVENTS: &[&str] = &["complete", "all-complete"];

/// Handle for publishing events to connected dashboards
#[derive(Clone)]
pub struct DashboardHandle {
    tx: broadcast::Sender<DashboardEvent>,
}

impl DashboardHandle {
    /// Publish an event; dropped silently when no dashboard is connected
    pub fn emit(&self, name: &'static str, payload: Value) {
        let _ = self.tx.send(DashboardEvent { name, payload });
    }
}

/// A running dashboard server
pub struct DashboardServer {
    /// Address the server actually bound (ephemeral port resolved)
    pub addr: SocketAddr,
    handle: DashboardHandle,
}

impl DashboardServer {
    /// Bind an ephemeral port and start serving
    ///
    /// Dashboard failures never abort a run; callers log and continue
    /// without a dashboard when this errors.
    ///
    /// # Errors
    ///
    /// Returns the bind error when no port is available.
    pub async fn start() -> Result<Self, std::io::Error> {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let handle = DashboardHandle { tx: tx.clone() };

        let app = router(handle.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("Dashboard server error: {e}");
            }
        });

        debug!(%addr, "Dashboard listening");
        Ok(Self { addr, handle })
    }

    /// Publishing handle for the engine
    #[must_use]
    pub fn handle(&self) -> DashboardHandle {
        self.handle.clone()
    }

    /// Browser URL for the dashboard page
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Build the dashboard router; separated for tests
#[must_use]
pub fn router(handle: DashboardHandle) -> Router {
    Router::new()
        .route("/", get(serve_page))
        .route("/events", get(serve_events))
        .with_state(handle)
}

async fn serve_page() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// Stream dashboard events as SSE until a terminal event passes through
async fn serve_events(State(handle): State<DashboardHandle>) -> Response {
    let rx = handle.tx.subscribe();

    let stream = BroadcastStream::new(rx)
        .filter_map(|item| {
            future::ready(match item {
                Ok(event) => {
                    let data = serde_json::to_string(&event.payload).unwrap_or_default();
                    Some((
                        TERMINAL_EVENTS.contains(&event.name),
                        Event::default().event(event.name).data(data),
                    ))
                }
                // Lagged receivers skip missed window events and continue
                Err(_) => None,
            })
        })
        .scan(false, |done, (terminal, event)| {
            if *done {
                return future::ready(None);
            }
            *done = terminal;
            future::ready(Some(Ok::<_, Infallible>(event)))
        });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
