//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Server::start(prefixes)
//!     → prefix.rs (parse, normalise, group by host:port)
//!     → listener.rs (one axum listener per host:port, 404 outside prefixes)
//!     → tls.rs (rustls config for https prefixes)
//!     → ConnectionContext handed to the dispatcher
//!
//! connection.rs tracks dispatched work until it completes.
//! ```
//!
//! # Design Decisions
//! - `acceptor.rs` is the seam; the lifecycle manager never names axum
//! - http and https never share a host:port

pub mod acceptor;
pub mod connection;
pub mod listener;
pub mod prefix;
pub mod tls;

pub use acceptor::{Acceptor, AcceptorError};
pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::HttpAcceptor;
pub use prefix::{BindKey, Prefix, PrefixError};
