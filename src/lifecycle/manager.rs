//! Server lifecycle: start, stop and dispose over an acceptor.
//!
//! # Responsibilities
//! - Build the dispatcher from host callbacks
//! - Create the acceptor lazily on the first start, and again after a stop
//! - Make dispose idempotent and safe from any number of threads

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::config::TlsConfig;
use crate::http::callbacks::{
    request_handler, Callbacks, DiagnosticsSink, ErrorHandler, HandlerError, HandlerResult, RequestHandler,
    WebSocketConnected, WebSocketConnecting,
};
use crate::http::dispatcher::Dispatcher;
use crate::util::lock;
use crate::http::request::RequestView;
use crate::http::websocket::{WebSocketConnectEvent, WebSocketConnectingEvent};
use crate::net::acceptor::{Acceptor, AcceptorError};
use crate::net::listener::HttpAcceptor;

/// Error type for server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("a request handler is required")]
    MissingRequestHandler,

    #[error("server has been disposed")]
    Disposed,

    #[error(transparent)]
    Acceptor(#[from] AcceptorError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Started,
    Stopped,
}

type AcceptorFactory<A> = Box<dyn Fn() -> A + Send + Sync>;

/// The accept-and-dispatch server.
pub struct Server<A: Acceptor = HttpAcceptor> {
    dispatcher: Arc<Dispatcher>,
    factory: AcceptorFactory<A>,
    acceptor: Mutex<Option<Arc<A>>>,
    state: Mutex<LifecycleState>,
    disposed: AtomicBool,
    dispose_lock: Mutex<()>,
}

impl Server<HttpAcceptor> {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Addresses the HTTP acceptor is currently bound to.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        lock(&self.acceptor)
            .as_ref()
            .map(|acceptor| acceptor.local_addrs())
            .unwrap_or_default()
    }
}

impl<A: Acceptor> Server<A> {
    /// Register `prefixes` and begin accepting on them.
    ///
    /// Prefixes accumulate across calls.
    pub async fn start<S: AsRef<str>>(&self, prefixes: &[S]) -> Result<(), ServerError> {
        if self.is_disposed() {
            return Err(ServerError::Disposed);
        }

        let acceptor = self.current_acceptor();
        for prefix in prefixes {
            acceptor.add_prefix(prefix.as_ref())?;
        }
        acceptor.listen(Arc::clone(&self.dispatcher)).await?;

        {
            // Serialized with dispose so a concurrent dispose cannot miss this acceptor.
            let _guard = lock(&self.dispose_lock);
            if self.is_disposed() {
                acceptor.close();
                return Err(ServerError::Disposed);
            }
            *lock(&self.state) = LifecycleState::Started;
        }
        info!(prefixes = ?acceptor.prefixes(), "Server started");
        Ok(())
    }

    /// Unregister every prefix and close the acceptor, if one was created.
    pub fn stop(&self) {
        if let Some(acceptor) = lock(&self.acceptor).clone() {
            for prefix in acceptor.prefixes() {
                acceptor.remove_prefix(&prefix);
            }
            acceptor.close();
        }

        let mut state = lock(&self.state);
        if *state != LifecycleState::Stopped {
            *state = LifecycleState::Stopped;
            info!("Server stopped");
        }
    }

    /// Stop the server exactly once. Safe to call from any thread, any number of times.
    pub fn dispose(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let _guard = lock(&self.dispose_lock);
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.stop();
        debug!("Server disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    /// Prefixes registered with the live acceptor.
    pub fn prefixes(&self) -> Vec<String> {
        lock(&self.acceptor)
            .as_ref()
            .map(|acceptor| acceptor.prefixes())
            .unwrap_or_default()
    }

    /// Connections whose dispatched work is still running.
    pub fn active_connections(&self) -> u64 {
        self.dispatcher.tracker().active_count()
    }

    /// The open acceptor, replacing a closed one.
    fn current_acceptor(&self) -> Arc<A> {
        let mut slot = lock(&self.acceptor);
        match slot.as_ref() {
            Some(acceptor) if !acceptor.is_closed() => Arc::clone(acceptor),
            _ => {
                let fresh = Arc::new((self.factory)());
                *slot = Some(Arc::clone(&fresh));
                fresh
            }
        }
    }
}

impl<A: Acceptor> Drop for Server<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Composes a [`Server`] from host callbacks.
#[derive(Default)]
pub struct ServerBuilder {
    request: Option<RequestHandler>,
    error: Option<ErrorHandler>,
    websocket_connecting: Option<WebSocketConnecting>,
    websocket_connected: Option<WebSocketConnected>,
    local_endpoint: Option<DiagnosticsSink>,
    tls: Option<TlsConfig>,
}

impl ServerBuilder {
    /// Handler for every non-WebSocket request. Required.
    pub fn on_request<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(RequestView, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.request = Some(request_handler(handler));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&HandlerError, &RequestView) + Send + Sync + 'static,
    {
        self.error = Some(Arc::new(handler));
        self
    }

    pub fn on_websocket_connecting<F>(mut self, handler: F) -> Self
    where
        F: Fn(&mut WebSocketConnectingEvent) + Send + Sync + 'static,
    {
        self.websocket_connecting = Some(Arc::new(handler));
        self
    }

    pub fn on_websocket_connected<F>(mut self, handler: F) -> Self
    where
        F: Fn(WebSocketConnectEvent) + Send + Sync + 'static,
    {
        self.websocket_connected = Some(Arc::new(handler));
        self
    }

    /// Receives the local endpoint of every accepted connection.
    pub fn on_local_endpoint<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.local_endpoint = Some(Arc::new(sink));
        self
    }

    /// Certificate used by `https` prefixes.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Build a server over the HTTP acceptor.
    pub fn build(self) -> Result<Server, ServerError> {
        let tls = self.tls.clone();
        self.build_with(move || HttpAcceptor::new(tls.clone()))
    }

    /// Build a server over a custom acceptor, created by `factory` on demand.
    pub fn build_with<A, F>(self, factory: F) -> Result<Server<A>, ServerError>
    where
        A: Acceptor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let request = self.request.ok_or(ServerError::MissingRequestHandler)?;
        let callbacks = Callbacks {
            request,
            error: self.error,
            websocket_connecting: self.websocket_connecting,
            websocket_connected: self.websocket_connected,
            local_endpoint: self.local_endpoint,
        };

        Ok(Server {
            dispatcher: Arc::new(Dispatcher::new(callbacks)),
            factory: Box::new(factory),
            acceptor: Mutex::new(None),
            state: Mutex::new(LifecycleState::Created),
            disposed: AtomicBool::new(false),
            dispose_lock: Mutex::new(()),
        })
    }
}
