//! WebSocket handshake handling.
//!
//! # Responsibilities
//! - Ask the host whether an upgrade request is admitted
//! - Complete the upgrade through the transport when it is
//! - Hand the open channel to the host
//!
//! # Per-connection states
//! ```text
//! Pending ─┬─ denied ──────────────→ Rejected (401)
//!          ├─ upgraded ─┬──────────→ Upgraded (no connected callback)
//!          │            └─ notify ─→ Connected
//!          └─ error / panic ───────→ Failed (500)
//! ```
//!
//! # Design Decisions
//! - Admission is deny-by-default: only an explicit `allow_connection = true`
//!   upgrades
//! - Each event gets its own copy of the query parameters
//! - Nothing escapes the handler; a failed handshake only affects its own
//!   connection

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use axum::http::StatusCode;
use futures_util::FutureExt;

use crate::http::callbacks::{WebSocketConnected, WebSocketConnecting};
use crate::http::channel::WebSocketChannel;
use crate::http::context::{ConnectionContext, UpgradeError};
use crate::http::panic_message;
use crate::observability::metrics;

/// Raised before every upgrade decision. Set `allow_connection` to admit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConnectingEvent {
    pub url: String,
    pub query_params: HashMap<String, String>,
    pub remote_endpoint: String,
    pub allow_connection: bool,
}

impl WebSocketConnectingEvent {
    pub fn new(url: String, query_params: HashMap<String, String>, remote_endpoint: String) -> Self {
        Self {
            url,
            query_params,
            remote_endpoint,
            allow_connection: false,
        }
    }
}

/// Raised once an admitted connection has been upgraded.
#[derive(Debug)]
pub struct WebSocketConnectEvent {
    pub url: String,
    pub query_params: HashMap<String, String>,
    pub remote_endpoint: String,
    pub channel: WebSocketChannel,
}

/// Terminal state of one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Rejected,
    Upgraded,
    Connected,
    Failed,
}

impl HandshakeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeOutcome::Rejected => "rejected",
            HandshakeOutcome::Upgraded => "upgraded",
            HandshakeOutcome::Connected => "connected",
            HandshakeOutcome::Failed => "failed",
        }
    }
}

/// Runs the connecting / upgrade / connected sequence for one connection.
#[derive(Clone, Default)]
pub struct HandshakeHandler {
    connecting: Option<WebSocketConnecting>,
    connected: Option<WebSocketConnected>,
}

impl HandshakeHandler {
    pub fn new(connecting: Option<WebSocketConnecting>, connected: Option<WebSocketConnected>) -> Self {
        Self {
            connecting,
            connected,
        }
    }

    /// Process a WebSocket upgrade request. Never panics or returns an error.
    pub async fn handle(&self, context: ConnectionContext) -> HandshakeOutcome {
        let outcome = match AssertUnwindSafe(self.negotiate(&context)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(
                    connection_id = %context.id(),
                    remote = %context.request().remote_endpoint,
                    error = %e,
                    "WebSocket handshake failed"
                );
                fail(&context)
            }
            Err(panic) => {
                tracing::error!(
                    connection_id = %context.id(),
                    remote = %context.request().remote_endpoint,
                    panic = %panic_message(panic.as_ref()),
                    "WebSocket callback panicked"
                );
                fail(&context)
            }
        };

        metrics::record_handshake(outcome.as_str());
        outcome
    }

    async fn negotiate(&self, context: &ConnectionContext) -> Result<HandshakeOutcome, UpgradeError> {
        let request = context.request();
        let remote_endpoint = request.remote_endpoint.clone();
        let url = request.url.clone();
        let query_params = request.query_params.clone();

        let mut connecting =
            WebSocketConnectingEvent::new(url.clone(), query_params.clone(), remote_endpoint.clone());
        if let Some(callback) = &self.connecting {
            callback(&mut connecting);
        }

        if !connecting.allow_connection {
            tracing::info!(
                connection_id = %context.id(),
                remote = %remote_endpoint,
                url = %url,
                "WebSocket connection rejected"
            );
            context.response().set_status(StatusCode::UNAUTHORIZED);
            context.response().close();
            return Ok(HandshakeOutcome::Rejected);
        }

        let channel = context.upgrade().await?;
        tracing::debug!(connection_id = %context.id(), remote = %remote_endpoint, "WebSocket upgraded");

        let Some(callback) = &self.connected else {
            return Ok(HandshakeOutcome::Upgraded);
        };
        callback(WebSocketConnectEvent {
            url,
            query_params,
            remote_endpoint,
            channel,
        });
        Ok(HandshakeOutcome::Connected)
    }
}

fn fail(context: &ConnectionContext) -> HandshakeOutcome {
    context.response().set_status(StatusCode::INTERNAL_SERVER_ERROR);
    context.response().close();
    HandshakeOutcome::Failed
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::http::channel::Message;
    use crate::http::testing::{websocket_context, FailingUpgrader, PairUpgrader};

    fn allow_all() -> WebSocketConnecting {
        Arc::new(|event: &mut WebSocketConnectingEvent| event.allow_connection = true)
    }

    fn recording() -> (WebSocketConnected, Arc<Mutex<Vec<WebSocketConnectEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: WebSocketConnected = Arc::new(move |event| sink.lock().unwrap().push(event));
        (callback, seen)
    }

    #[tokio::test]
    async fn admitted_connection_reaches_connected_callback_once() {
        let (upgrader, peer) = PairUpgrader::new();
        let (context, rx) = websocket_context("/socket?api_key=abc", Box::new(upgrader));
        let (connected, seen) = recording();
        let handler = HandshakeHandler::new(Some(allow_all()), Some(connected));

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Connected);
        assert_eq!(rx.await.unwrap().status(), StatusCode::SWITCHING_PROTOCOLS);

        let mut events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = events.pop().unwrap();
        assert_eq!(event.url, "http://localhost:8096/socket?api_key=abc");
        assert_eq!(event.remote_endpoint, "127.0.0.1:50000");
        assert_eq!(event.query_params["api_key"], "abc");

        let mut peer = peer.lock().unwrap().take().unwrap();
        event.channel.send(Message::Text("welcome".into())).await.unwrap();
        assert_eq!(peer.recv().await, Some(Message::Text("welcome".into())));
    }

    #[tokio::test]
    async fn denied_connection_gets_401() {
        let (upgrader, peer) = PairUpgrader::new();
        let (context, rx) = websocket_context("/socket", Box::new(upgrader));
        let (connected, seen) = recording();
        let deny: WebSocketConnecting = Arc::new(|event: &mut WebSocketConnectingEvent| {
            event.allow_connection = event.query_params.contains_key("api_key");
        });
        let handler = HandshakeHandler::new(Some(deny), Some(connected));

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Rejected);
        assert_eq!(rx.await.unwrap().status(), StatusCode::UNAUTHORIZED);
        assert!(seen.lock().unwrap().is_empty());
        assert!(peer.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn no_connecting_callback_rejects() {
        let (upgrader, _peer) = PairUpgrader::new();
        let (context, rx) = websocket_context("/socket", Box::new(upgrader));
        let (connected, seen) = recording();
        let handler = HandshakeHandler::new(None, Some(connected));

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Rejected);
        assert_eq!(rx.await.unwrap().status(), StatusCode::UNAUTHORIZED);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upgrade_without_connected_callback() {
        let (upgrader, _peer) = PairUpgrader::new();
        let (context, _rx) = websocket_context("/socket", Box::new(upgrader));
        let handler = HandshakeHandler::new(Some(allow_all()), None);
        assert_eq!(handler.handle(context).await, HandshakeOutcome::Upgraded);
    }

    #[tokio::test]
    async fn upgrade_failure_becomes_500() {
        let (context, rx) = websocket_context("/socket", Box::new(FailingUpgrader));
        let (connected, seen) = recording();
        let handler = HandshakeHandler::new(Some(allow_all()), Some(connected));

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Failed);
        assert_eq!(rx.await.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panicking_callback_becomes_500() {
        let (upgrader, _peer) = PairUpgrader::new();
        let (context, rx) = websocket_context("/socket", Box::new(upgrader));
        let explode: WebSocketConnecting = Arc::new(|_: &mut WebSocketConnectingEvent| panic!("host bug"));
        let handler = HandshakeHandler::new(Some(explode), None);

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Failed);
        assert_eq!(rx.await.unwrap().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn query_params_are_independent_copies() {
        let (upgrader, _peer) = PairUpgrader::new();
        let (context, _rx) = websocket_context("/socket?api_key=abc", Box::new(upgrader));
        let original = context.clone();
        let (connected, seen) = recording();
        let tamper: WebSocketConnecting = Arc::new(|event: &mut WebSocketConnectingEvent| {
            event.query_params.insert("api_key".into(), "changed".into());
            event.query_params.insert("extra".into(), "1".into());
            event.allow_connection = true;
        });
        let handler = HandshakeHandler::new(Some(tamper), Some(connected));

        assert_eq!(handler.handle(context).await, HandshakeOutcome::Connected);

        let mut events = seen.lock().unwrap();
        let event = &mut events[0];
        assert_eq!(event.query_params["api_key"], "abc");
        assert!(!event.query_params.contains_key("extra"));

        event.query_params.clear();
        assert_eq!(original.request().query_params["api_key"], "abc");
    }
}
