//! Per-connection context handed from the transport to the dispatcher.
//!
//! # Responsibilities
//! - Snapshot the request (method, target, headers, endpoints, query)
//! - Own the one-shot request body and the response sink
//! - Carry the transport's upgrade hook for WebSocket requests

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::http::channel::WebSocketChannel;
use crate::util::lock;
use crate::http::response::ResponseSink;
use crate::net::connection::ConnectionId;

/// Read-only view of what the client sent.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub method: Method,
    /// Request target as received (path and query).
    pub raw_target: String,
    /// Absolute URL: scheme, host and raw target.
    pub url: String,
    pub headers: HeaderMap,
    pub remote_endpoint: String,
    pub local_endpoint: String,
    pub query_params: HashMap<String, String>,
    pub is_websocket: bool,
}

impl RequestSnapshot {
    /// Build a snapshot from request parts accepted on `local` from `remote`.
    pub fn from_parts(
        parts: &Parts,
        scheme: &str,
        remote: SocketAddr,
        local: SocketAddr,
        is_websocket: bool,
    ) -> Self {
        let raw_target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| local.to_string());

        Self {
            method: parts.method.clone(),
            url: format!("{}://{}{}", scheme, host, raw_target),
            raw_target,
            headers: parts.headers.clone(),
            remote_endpoint: remote.to_string(),
            local_endpoint: local.to_string(),
            query_params: parse_query(parts.uri.query()),
            is_websocket,
        }
    }
}

/// Decode a query string. Repeated keys keep every value, comma-joined.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    let mut params: HashMap<String, String> = HashMap::new();
    let Some(query) = query else {
        return params;
    };

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match params.entry(key.into_owned()) {
            Entry::Occupied(mut existing) => {
                let joined = existing.get_mut();
                joined.push(',');
                joined.push_str(&value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value.into_owned());
            }
        }
    }
    params
}

/// Failure while turning a connection into a WebSocket channel.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("connection has no upgrade available")]
    Unavailable,

    #[error("upgrade aborted before the socket opened")]
    Aborted,

    #[error("upgrade failed: {0}")]
    Failed(String),
}

/// Transport hook that performs the protocol-level upgrade.
///
/// Implementations deliver the switching-protocols response through the
/// sink and resolve once the channel is open.
pub trait Upgrader: Send {
    fn upgrade(
        self: Box<Self>,
        response: ResponseSink,
    ) -> BoxFuture<'static, Result<WebSocketChannel, UpgradeError>>;
}

/// Handle for one accepted connection. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    id: ConnectionId,
    request: RequestSnapshot,
    body: Mutex<Option<Body>>,
    response: ResponseSink,
    upgrader: Mutex<Option<Box<dyn Upgrader>>>,
}

impl ConnectionContext {
    pub fn new(request: RequestSnapshot, body: Body, response: ResponseSink) -> Self {
        Self::build(request, body, response, None)
    }

    /// A context whose transport can upgrade it to a WebSocket.
    pub fn with_upgrader(
        request: RequestSnapshot,
        body: Body,
        response: ResponseSink,
        upgrader: Box<dyn Upgrader>,
    ) -> Self {
        Self::build(request, body, response, Some(upgrader))
    }

    fn build(
        request: RequestSnapshot,
        body: Body,
        response: ResponseSink,
        upgrader: Option<Box<dyn Upgrader>>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id: ConnectionId::new(),
                request,
                body: Mutex::new(Some(body)),
                response,
                upgrader: Mutex::new(upgrader),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.inner.request
    }

    pub fn response(&self) -> &ResponseSink {
        &self.inner.response
    }

    pub fn is_websocket(&self) -> bool {
        self.inner.request.is_websocket
    }

    /// Take the request body. Only the first caller gets it.
    pub fn take_body(&self) -> Option<Body> {
        lock(&self.inner.body).take()
    }

    /// Upgrade to a WebSocket channel. Succeeds at most once.
    pub async fn upgrade(&self) -> Result<WebSocketChannel, UpgradeError> {
        let upgrader = lock(&self.inner.upgrader)
            .take()
            .ok_or(UpgradeError::Unavailable)?;
        upgrader.upgrade(self.inner.response.clone()).await
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("id", &self.inner.id)
            .field("method", &self.inner.request.method)
            .field("raw_target", &self.inner.request.raw_target)
            .field("remote_endpoint", &self.inner.request.remote_endpoint)
            .field("is_websocket", &self.inner.request.is_websocket)
            .finish()
    }
}
