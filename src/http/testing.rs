//! Test fixtures for building connection contexts without a network.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::http::channel::WebSocketChannel;
use crate::http::context::{parse_query, ConnectionContext, RequestSnapshot, UpgradeError, Upgrader};
use crate::http::response::{status_response, ResponseSink};

pub fn snapshot(target: &str, is_websocket: bool) -> RequestSnapshot {
    let mut headers = HeaderMap::new();
    headers.insert("host", "localhost:8096".parse().unwrap());
    RequestSnapshot {
        method: Method::GET,
        raw_target: target.to_string(),
        url: format!("http://localhost:8096{}", target),
        headers,
        remote_endpoint: "127.0.0.1:50000".into(),
        local_endpoint: "127.0.0.1:8096".into(),
        query_params: parse_query(target.split_once('?').map(|(_, q)| q)),
        is_websocket,
    }
}

pub fn http_context(target: &str) -> (ConnectionContext, oneshot::Receiver<Response>) {
    let (sink, rx) = ResponseSink::channel();
    (ConnectionContext::new(snapshot(target, false), Body::empty(), sink), rx)
}

pub fn websocket_context(
    target: &str,
    upgrader: Box<dyn Upgrader>,
) -> (ConnectionContext, oneshot::Receiver<Response>) {
    let (sink, rx) = ResponseSink::channel();
    let context = ConnectionContext::with_upgrader(snapshot(target, true), Body::empty(), sink, upgrader);
    (context, rx)
}

/// Upgrades into an in-memory channel pair and keeps the client end.
pub struct PairUpgrader {
    peer: Arc<Mutex<Option<WebSocketChannel>>>,
}

impl PairUpgrader {
    pub fn new() -> (Self, Arc<Mutex<Option<WebSocketChannel>>>) {
        let peer = Arc::new(Mutex::new(None));
        (Self { peer: peer.clone() }, peer)
    }
}

impl Upgrader for PairUpgrader {
    fn upgrade(self: Box<Self>, response: ResponseSink) -> BoxFuture<'static, Result<WebSocketChannel, UpgradeError>> {
        async move {
            response.send(status_response(StatusCode::SWITCHING_PROTOCOLS));
            let (host, client) = WebSocketChannel::pair();
            *self.peer.lock().unwrap() = Some(client);
            Ok(host)
        }
        .boxed()
    }
}

/// Upgrader whose negotiation always fails.
pub struct FailingUpgrader;

impl Upgrader for FailingUpgrader {
    fn upgrade(self: Box<Self>, _response: ResponseSink) -> BoxFuture<'static, Result<WebSocketChannel, UpgradeError>> {
        async { Err(UpgradeError::Failed("client went away".into())) }.boxed()
    }
}
