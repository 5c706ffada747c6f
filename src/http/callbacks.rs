//! Host-supplied extension points.
//!
//! Every callback except the request handler is optional. Each is set once
//! while composing the server and invoked only when present.

use std::future::Future;
use std::sync::Arc;

use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::request::RequestView;
use crate::http::websocket::{WebSocketConnectEvent, WebSocketConnectingEvent};

/// Error produced by a host request handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Outcome of a host request handler.
pub type HandlerResult = Result<Response, HandlerError>;

/// Handles every non-WebSocket request: `(request, absolute url)`.
pub type RequestHandler = Arc<dyn Fn(RequestView, String) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Receives faults from request handler work.
pub type ErrorHandler = Arc<dyn Fn(&HandlerError, &RequestView) + Send + Sync>;

/// Decides whether an upgrade is admitted by setting `allow_connection`.
pub type WebSocketConnecting = Arc<dyn Fn(&mut WebSocketConnectingEvent) + Send + Sync>;

/// Receives each successfully upgraded connection.
pub type WebSocketConnected = Arc<dyn Fn(WebSocketConnectEvent) + Send + Sync>;

/// Receives the local endpoint of every accepted connection.
pub type DiagnosticsSink = Arc<dyn Fn(&str) + Send + Sync>;

/// The full set of host callbacks.
#[derive(Clone)]
pub struct Callbacks {
    pub request: RequestHandler,
    pub error: Option<ErrorHandler>,
    pub websocket_connecting: Option<WebSocketConnecting>,
    pub websocket_connected: Option<WebSocketConnected>,
    pub local_endpoint: Option<DiagnosticsSink>,
}

impl Callbacks {
    /// Callbacks with only the required request handler set.
    pub fn new(request: RequestHandler) -> Self {
        Self {
            request,
            error: None,
            websocket_connecting: None,
            websocket_connected: None,
            local_endpoint: None,
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("error", &self.error.is_some())
            .field("websocket_connecting", &self.websocket_connecting.is_some())
            .field("websocket_connected", &self.websocket_connected.is_some())
            .field("local_endpoint", &self.local_endpoint.is_some())
            .finish()
    }
}

/// Box an async closure into a [`RequestHandler`].
pub fn request_handler<F, Fut>(handler: F) -> RequestHandler
where
    F: Fn(RequestView, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |view, url| handler(view, url).boxed())
}
