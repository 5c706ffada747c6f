//! HTTP acceptor on axum, with TLS through axum-server.
//!
//! # Responsibilities
//! - Bind one listener per distinct prefix host:port
//! - Answer 404 for paths outside every registered prefix
//! - Detect WebSocket upgrades and bridge upgraded sockets to channels
//! - Turn each request into a [`ConnectionContext`] for the dispatcher

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, OnceCell};
use tower_http::trace::TraceLayer;

use crate::config::TlsConfig;
use crate::http::channel::WebSocketChannel;
use crate::http::context::{ConnectionContext, RequestSnapshot, UpgradeError, Upgrader};
use crate::http::dispatcher::Dispatcher;
use crate::util::lock;
use crate::http::response::ResponseSink;
use crate::lifecycle::Shutdown;
use crate::net::acceptor::{Acceptor, AcceptorError};
use crate::net::prefix::{BindKey, Prefix};
use crate::net::tls::load_tls_config;

/// How long TLS listeners wait for in-flight requests on close.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct BoundListener {
    local_addr: SocketAddr,
    secure: bool,
}

/// Prefix-registered HTTP(S) acceptor.
pub struct HttpAcceptor {
    tls: Option<TlsConfig>,
    rustls: OnceCell<RustlsConfig>,
    prefixes: Arc<Mutex<Vec<Prefix>>>,
    listeners: Mutex<HashMap<BindKey, BoundListener>>,
    listen_lock: tokio::sync::Mutex<()>,
    shutdown: Shutdown,
}

impl HttpAcceptor {
    pub fn new(tls: Option<TlsConfig>) -> Self {
        Self {
            tls,
            rustls: OnceCell::new(),
            prefixes: Arc::new(Mutex::new(Vec::new())),
            listeners: Mutex::new(HashMap::new()),
            listen_lock: tokio::sync::Mutex::new(()),
            shutdown: Shutdown::new(),
        }
    }

    /// Addresses of the listeners currently serving.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        let mut addrs: Vec<SocketAddr> = lock(&self.listeners).values().map(|l| l.local_addr).collect();
        addrs.sort();
        addrs
    }

    /// Listeners still needed for the registered prefixes.
    fn pending_binds(&self) -> Result<Vec<(BindKey, bool)>, AcceptorError> {
        let prefixes = lock(&self.prefixes);
        let bound = lock(&self.listeners);

        let mut wanted: Vec<(BindKey, bool)> = Vec::new();
        for prefix in prefixes.iter() {
            let key = prefix.bind_key();
            let existing = bound
                .get(&key)
                .map(|l| l.secure)
                .or_else(|| wanted.iter().find(|(k, _)| *k == key).map(|(_, secure)| *secure));
            match existing {
                Some(secure) if secure != prefix.is_secure() => {
                    return Err(AcceptorError::SchemeConflict(key.to_string()));
                }
                Some(_) => {}
                None => wanted.push((key, prefix.is_secure())),
            }
        }
        Ok(wanted)
    }

    /// Router state plus the sender that publishes the bound address.
    fn listener_state(
        &self,
        key: &BindKey,
        secure: bool,
        dispatcher: Arc<Dispatcher>,
    ) -> (ListenerState, watch::Sender<Option<SocketAddr>>) {
        let (publish, local) = watch::channel(None);
        let state = ListenerState {
            key: key.clone(),
            scheme: if secure { "https" } else { "http" },
            local: LocalEndpoint(local),
            prefixes: Arc::clone(&self.prefixes),
            dispatcher,
        };
        (state, publish)
    }

    async fn bind_plain(&self, key: &BindKey, dispatcher: Arc<Dispatcher>) -> Result<SocketAddr, AcceptorError> {
        let listener = TcpListener::bind(key.authority())
            .await
            .map_err(|source| bind_error(key, source))?;
        let local_addr = listener.local_addr().map_err(|source| bind_error(key, source))?;

        let (state, publish) = self.listener_state(key, false, dispatcher);
        publish.send_replace(Some(local_addr));
        let app = router(state);
        let stopped = self.shutdown.signal();

        tokio::spawn(async move {
            let served = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .with_graceful_shutdown(stopped)
                .await;
            if let Err(e) = served {
                tracing::error!(address = %local_addr, error = %e, "Listener failed");
            }
            tracing::info!(address = %local_addr, "Listener stopped");
        });

        Ok(local_addr)
    }

    async fn bind_tls(&self, key: &BindKey, dispatcher: Arc<Dispatcher>) -> Result<SocketAddr, AcceptorError> {
        let tls = self
            .tls
            .as_ref()
            .ok_or_else(|| AcceptorError::TlsNotConfigured(key.to_string()))?;
        let rustls = self
            .rustls
            .get_or_try_init(|| load_tls_config(tls))
            .await
            .map_err(AcceptorError::Tls)?
            .clone();

        let addr = tokio::net::lookup_host(key.authority())
            .await
            .map_err(|source| bind_error(key, source))?
            .next()
            .ok_or_else(|| {
                bind_error(
                    key,
                    std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host resolved to no address"),
                )
            })?;

        // Connections accepted before `listening()` resolves wait on `publish`.
        let (state, publish) = self.listener_state(key, true, dispatcher);
        let app = router(state);
        let handle = axum_server::Handle::new();
        let server = axum_server::bind_rustls(addr, rustls).handle(handle.clone());

        tokio::spawn(async move {
            if let Err(e) = server
                .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                .await
            {
                tracing::error!(address = %addr, error = %e, "TLS listener failed");
            }
            tracing::info!(address = %addr, "TLS listener stopped");
        });

        let local_addr = handle.listening().await.ok_or_else(|| {
            bind_error(
                key,
                std::io::Error::new(std::io::ErrorKind::AddrInUse, "TLS listener did not start"),
            )
        })?;
        publish.send_replace(Some(local_addr));

        let stopped = self.shutdown.signal();
        tokio::spawn(async move {
            stopped.await;
            handle.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
        });

        Ok(local_addr)
    }
}

impl Acceptor for HttpAcceptor {
    fn add_prefix(&self, prefix: &str) -> Result<(), AcceptorError> {
        if self.is_closed() {
            return Err(AcceptorError::Closed);
        }
        let parsed = Prefix::parse(prefix).map_err(|source| AcceptorError::InvalidPrefix {
            prefix: prefix.to_string(),
            source,
        })?;
        lock(&self.prefixes).push(parsed);
        tracing::debug!(prefix = %prefix, "Prefix registered");
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> bool {
        let mut prefixes = lock(&self.prefixes);
        match prefixes.iter().position(|p| p.as_str() == prefix) {
            Some(index) => {
                prefixes.remove(index);
                true
            }
            None => false,
        }
    }

    fn prefixes(&self) -> Vec<String> {
        lock(&self.prefixes).iter().map(|p| p.as_str().to_string()).collect()
    }

    async fn listen(&self, dispatcher: Arc<Dispatcher>) -> Result<(), AcceptorError> {
        if self.is_closed() {
            return Err(AcceptorError::Closed);
        }
        let _serialized = self.listen_lock.lock().await;

        for (key, secure) in self.pending_binds()? {
            let local_addr = if secure {
                self.bind_tls(&key, Arc::clone(&dispatcher)).await?
            } else {
                self.bind_plain(&key, Arc::clone(&dispatcher)).await?
            };
            tracing::info!(address = %local_addr, secure, "Listener bound");
            lock(&self.listeners).insert(key, BoundListener { local_addr, secure });
        }
        Ok(())
    }

    fn close(&self) {
        if !self.shutdown.trigger() {
            return;
        }
        let stopped = std::mem::take(&mut *lock(&self.listeners));
        tracing::info!(listeners = stopped.len(), "Acceptor closed");
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

fn bind_error(key: &BindKey, source: std::io::Error) -> AcceptorError {
    AcceptorError::Bind {
        address: key.to_string(),
        source,
    }
}

/// State shared by every request on one listener.
#[derive(Clone)]
struct ListenerState {
    key: BindKey,
    scheme: &'static str,
    local: LocalEndpoint,
    prefixes: Arc<Mutex<Vec<Prefix>>>,
    dispatcher: Arc<Dispatcher>,
}

impl ListenerState {
    fn owns(&self, path: &str) -> bool {
        lock(&self.prefixes)
            .iter()
            .any(|p| p.bind_key() == self.key && p.matches_path(path))
    }
}

/// A listener's bound address, known once the socket is listening.
#[derive(Clone)]
struct LocalEndpoint(watch::Receiver<Option<SocketAddr>>);

impl LocalEndpoint {
    /// Waits for the address. `None` if the listener never came up.
    async fn resolved(&self) -> Option<SocketAddr> {
        let mut local = self.0.clone();
        local.wait_for(Option::is_some).await.ok().and_then(|addr| *addr)
    }
}

fn router(state: ListenerState) -> Router {
    Router::new()
        .fallback(accept_connection)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn accept_connection(
    State(state): State<ListenerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (mut parts, body) = request.into_parts();
    if !state.owns(parts.uri.path()) {
        tracing::debug!(path = %parts.uri.path(), listener = %state.key, "No registered prefix matches");
        return StatusCode::NOT_FOUND.into_response();
    }

    let upgrade = if wants_websocket(&parts.headers) {
        match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => Some(ws),
            Err(rejection) => return rejection.into_response(),
        }
    } else {
        None
    };

    let Some(local) = state.local.resolved().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let snapshot = RequestSnapshot::from_parts(&parts, state.scheme, remote, local, upgrade.is_some());
    let (sink, response) = ResponseSink::channel();
    let context = match upgrade {
        Some(ws) => ConnectionContext::with_upgrader(snapshot, body, sink, Box::new(AxumUpgrader { ws })),
        None => ConnectionContext::new(snapshot, body, sink),
    };

    state.dispatcher.dispatch(context);

    response
        .await
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn wants_websocket(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Completes an upgrade with axum and bridges the socket to a channel.
struct AxumUpgrader {
    ws: WebSocketUpgrade,
}

impl Upgrader for AxumUpgrader {
    fn upgrade(self: Box<Self>, response: ResponseSink) -> BoxFuture<'static, Result<WebSocketChannel, UpgradeError>> {
        let (opened_tx, opened_rx) = oneshot::channel();
        let switching = self
            .ws
            .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
            .on_upgrade(move |socket| async move {
                let (channel, pump) = WebSocketChannel::bridge(socket);
                if opened_tx.send(channel).is_ok() {
                    pump.await;
                }
            });
        response.send(switching);

        async move { opened_rx.await.map_err(|_| UpgradeError::Aborted) }.boxed()
    }
}
