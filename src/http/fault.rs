//! Fault funnel for asynchronous request handling.
//!
//! Every HTTP dispatch is observed here. A handler that returns `Err` or
//! panics is reported exactly once to the host's error callback, or logged
//! when none is registered. Nothing is re-raised into the accept path.

use std::panic::AssertUnwindSafe;

use axum::http::StatusCode;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::http::callbacks::{ErrorHandler, HandlerError, HandlerResult};
use crate::http::context::ConnectionContext;
use crate::http::panic_message;
use crate::http::request::RequestView;
use crate::observability::metrics;

/// Fault raised when handler work panicked or was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request handler did not complete: {0}")]
pub struct HandlerAborted(pub String);

/// Routes request handler faults to a single error callback.
#[derive(Clone, Default)]
pub struct FaultFunnel {
    on_error: Option<ErrorHandler>,
}

impl FaultFunnel {
    pub fn new(on_error: Option<ErrorHandler>) -> Self {
        Self { on_error }
    }

    /// Wait for handler work. A response goes to the connection's sink; a
    /// fault goes to [`report`](Self::report).
    pub async fn observe(&self, work: JoinHandle<HandlerResult>, context: ConnectionContext) {
        let error: HandlerError = match work.await {
            Ok(Ok(response)) => {
                context.response().send(response);
                return;
            }
            Ok(Err(e)) => e,
            Err(join_error) if join_error.is_panic() => {
                Box::new(HandlerAborted(panic_message(join_error.into_panic().as_ref())))
            }
            Err(join_error) => Box::new(HandlerAborted(join_error.to_string())),
        };

        self.report(error, RequestView::new(context));
    }

    /// Deliver one fault. Closes the response with 500 if nobody answered.
    pub fn report(&self, error: HandlerError, view: RequestView) {
        metrics::record_fault();

        match &self.on_error {
            Some(callback) => {
                let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&error, &view)));
                if let Err(panic) = delivered {
                    tracing::error!(
                        connection_id = %view.connection_id(),
                        panic = %panic_message(panic.as_ref()),
                        "Error handler panicked"
                    );
                }
            }
            None => {
                tracing::error!(
                    connection_id = %view.connection_id(),
                    url = %view.url(),
                    error = %error,
                    "Unhandled request handler failure"
                );
            }
        }

        if !view.response().is_closed() {
            view.response().set_status(StatusCode::INTERNAL_SERVER_ERROR);
            view.response().close();
        }
    }
}
