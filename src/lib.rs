//! Accept-and-dispatch core for an embedded HTTP and WebSocket server.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

mod util;

pub use config::ServerConfig;
pub use http::{Message, RequestView, WebSocketChannel, WebSocketConnectEvent, WebSocketConnectingEvent};
pub use lifecycle::{LifecycleState, Server, ServerBuilder, ServerError};
pub use net::{Acceptor, AcceptorError, HttpAcceptor};
