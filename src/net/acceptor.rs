//! The transport acceptor seam.
//!
//! The lifecycle manager drives any [`Acceptor`]: register prefixes, start
//! accepting with a dispatcher, close. [`HttpAcceptor`](super::listener::HttpAcceptor)
//! is the production implementation.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::http::dispatcher::Dispatcher;
use crate::net::prefix::PrefixError;

/// Error type for acceptor operations.
#[derive(Debug, Error)]
pub enum AcceptorError {
    #[error("invalid prefix '{prefix}': {source}")]
    InvalidPrefix {
        prefix: String,
        #[source]
        source: PrefixError,
    },

    #[error("prefixes on {0} mix http and https")]
    SchemeConflict(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("https prefix on {0} but no certificate is configured")]
    TlsNotConfigured(String),

    #[error("failed to load TLS certificate: {0}")]
    Tls(#[source] std::io::Error),

    #[error("acceptor is closed")]
    Closed,
}

/// Accepts connections on registered prefixes and hands them to a dispatcher.
///
/// Prefix mutation is serialized by the implementation.
pub trait Acceptor: Send + Sync + 'static {
    /// Register a prefix. Duplicates are kept.
    fn add_prefix(&self, prefix: &str) -> Result<(), AcceptorError>;

    /// Remove one registration of `prefix`. Returns whether it was present.
    fn remove_prefix(&self, prefix: &str) -> bool;

    /// Currently registered prefixes, in registration order.
    fn prefixes(&self) -> Vec<String>;

    /// Begin accepting on every registered prefix not yet being served.
    fn listen(
        &self,
        dispatcher: Arc<Dispatcher>,
    ) -> impl Future<Output = Result<(), AcceptorError>> + Send;

    /// Stop accepting. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
