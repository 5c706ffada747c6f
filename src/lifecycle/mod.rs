//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Server (manager.rs):
//!     start(prefixes) → create acceptor → register → listen(dispatcher)
//!     stop()          → unregister every prefix → close acceptor
//!     dispose()       → stop() once, from whichever caller gets there first
//!
//! Shutdown (shutdown.rs):
//!     close() → trigger → every listener drains and exits
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → host disposes the server
//! ```

pub mod manager;
pub mod shutdown;
pub mod signals;

pub use manager::{LifecycleState, Server, ServerBuilder, ServerError};
pub use shutdown::Shutdown;
