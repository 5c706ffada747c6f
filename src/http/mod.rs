//! Connection dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Acceptor
//!     → context.rs (request snapshot, body, response sink, upgrade hook)
//!     → dispatcher.rs (log, diagnostics, classify)
//!         → websocket.rs (connecting → upgrade → connected)
//!         → host RequestHandler → fault.rs (error callback)
//! ```

pub mod callbacks;
pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod fault;
pub mod request;
pub mod response;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

use std::any::Any;

pub use callbacks::{Callbacks, HandlerError, HandlerResult};
pub use channel::{Message, WebSocketChannel};
pub use context::{ConnectionContext, RequestSnapshot, UpgradeError, Upgrader};
pub use dispatcher::{Dispatched, Dispatcher};
pub use fault::{FaultFunnel, HandlerAborted};
pub use request::RequestView;
pub use response::ResponseSink;
pub use websocket::{HandshakeHandler, HandshakeOutcome, WebSocketConnectEvent, WebSocketConnectingEvent};

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
