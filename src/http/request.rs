//! Read-only request adapter handed to host callbacks.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, Method};

use crate::http::context::ConnectionContext;
use crate::http::response::ResponseSink;
use crate::net::connection::ConnectionId;

/// Immutable view over one accepted connection's request data.
///
/// Cloning is cheap; every clone refers to the same connection.
#[derive(Debug, Clone)]
pub struct RequestView {
    context: ConnectionContext,
}

impl RequestView {
    pub fn new(context: ConnectionContext) -> Self {
        Self { context }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.context.id()
    }

    pub fn method(&self) -> &Method {
        &self.context.request().method
    }

    pub fn raw_target(&self) -> &str {
        &self.context.request().raw_target
    }

    pub fn url(&self) -> &str {
        &self.context.request().url
    }

    /// Path component of the raw target.
    pub fn path(&self) -> &str {
        let target = self.raw_target();
        target.split_once('?').map_or(target, |(path, _)| path)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.context.request().headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    pub fn remote_endpoint(&self) -> &str {
        &self.context.request().remote_endpoint
    }

    pub fn local_endpoint(&self) -> &str {
        &self.context.request().local_endpoint
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.context.request().query_params
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_params().get(key).map(String::as_str)
    }

    /// Take the request body; later calls return `None`.
    pub fn take_body(&self) -> Option<Body> {
        self.context.take_body()
    }

    /// Response sink of the underlying connection.
    ///
    /// Error handlers use this to write their own error page; handlers
    /// normally return their response instead.
    pub fn response(&self) -> &ResponseSink {
        self.context.response()
    }
}
