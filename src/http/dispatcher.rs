//! Connection dispatcher.
//!
//! # Data Flow
//! ```text
//! ConnectionContext (from acceptor)
//!     → log line + local endpoint to diagnostics sink
//!     → WebSocket upgrade?  → spawn HandshakeHandler
//!     → empty target?       → nothing to do
//!     → otherwise           → spawn RequestHandler, observed by FaultFunnel
//! ```
//!
//! `dispatch` never awaits handler work, so a slow host cannot stall accepts.

use std::panic::AssertUnwindSafe;

use axum::http::HeaderMap;
use tokio::task::JoinHandle;

use crate::http::callbacks::{Callbacks, DiagnosticsSink, RequestHandler};
use crate::http::context::ConnectionContext;
use crate::http::fault::FaultFunnel;
use crate::http::request::RequestView;
use crate::http::websocket::{HandshakeHandler, HandshakeOutcome};
use crate::net::connection::ConnectionTracker;
use crate::observability::metrics;

/// Headers never written to the connection log.
const REDACTED_HEADERS: [&str; 2] = ["cookie", "referer"];

/// What `dispatch` started for a connection.
#[derive(Debug)]
pub enum Dispatched {
    WebSocket(JoinHandle<HandshakeOutcome>),
    Http(JoinHandle<()>),
    /// Empty request target; nothing was started.
    Ignored,
}

/// Routes accepted connections to the handshake handler or the host.
pub struct Dispatcher {
    request: RequestHandler,
    local_endpoint: Option<DiagnosticsSink>,
    handshake: HandshakeHandler,
    funnel: FaultFunnel,
    tracker: ConnectionTracker,
}

impl Dispatcher {
    pub fn new(callbacks: Callbacks) -> Self {
        Self {
            request: callbacks.request,
            local_endpoint: callbacks.local_endpoint,
            handshake: HandshakeHandler::new(callbacks.websocket_connecting, callbacks.websocket_connected),
            funnel: FaultFunnel::new(callbacks.error),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Connections whose dispatched work is still running.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Classify and hand off one connection. Must run inside a Tokio runtime.
    pub fn dispatch(&self, context: ConnectionContext) -> Dispatched {
        let request = context.request();
        let kind = if request.is_websocket {
            "Web Socket".to_string()
        } else {
            request.method.to_string()
        };

        tracing::info!(
            connection_id = %context.id(),
            remote = %request.remote_endpoint,
            headers = %header_summary(&request.headers),
            kind = %kind,
            target = %request.raw_target,
            "Connection accepted"
        );

        self.report_local_endpoint(&request.local_endpoint);

        if request.is_websocket {
            metrics::record_connection("websocket");
            let guard = self.tracker.track(context.id());
            let handshake = self.handshake.clone();
            return Dispatched::WebSocket(tokio::spawn(async move {
                let outcome = handshake.handle(context).await;
                drop(guard);
                outcome
            }));
        }

        if request.raw_target.is_empty() {
            tracing::debug!(connection_id = %context.id(), "Empty request target; nothing to dispatch");
            return Dispatched::Ignored;
        }

        metrics::record_connection("http");
        let guard = self.tracker.track(context.id());
        let handler = self.request.clone();
        let view = RequestView::new(context.clone());
        let url = request.url.clone();
        let work = tokio::spawn(async move { handler(view, url).await });

        let funnel = self.funnel.clone();
        Dispatched::Http(tokio::spawn(async move {
            funnel.observe(work, context).await;
            drop(guard);
        }))
    }

    fn report_local_endpoint(&self, endpoint: &str) {
        let Some(sink) = &self.local_endpoint else {
            return;
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| sink(endpoint))).is_err() {
            tracing::debug!(endpoint = %endpoint, "Diagnostics sink panicked; ignoring");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("active", &self.tracker.active_count())
            .finish()
    }
}

/// `name=value` pairs for logging, without cookie or referer headers.
pub fn header_summary(headers: &HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| {
            !REDACTED_HEADERS
                .iter()
                .any(|redacted| name.as_str().eq_ignore_ascii_case(redacted))
        })
        .map(|(name, value)| format!("{}={}", name, String::from_utf8_lossy(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(", ")
}
