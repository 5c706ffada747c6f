//! The mutable response side of an accepted connection.
//!
//! # Design Decisions
//! - First write wins: once a response is sent, later writes are ignored
//! - Dropping the last handle of an unsent sink completes the response with
//!   the current status and an empty body

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use tokio::sync::oneshot;

use crate::util::lock;

/// Cloneable handle through which exactly one response is delivered.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug)]
struct SinkInner {
    status: Mutex<StatusCode>,
    tx: Mutex<Option<oneshot::Sender<Response>>>,
}

impl ResponseSink {
    /// Create a sink and the receiver the transport waits on.
    pub fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            inner: Arc::new(SinkInner {
                status: Mutex::new(StatusCode::OK),
                tx: Mutex::new(Some(tx)),
            }),
        };
        (sink, rx)
    }

    /// Status used by [`close`](Self::close).
    pub fn status(&self) -> StatusCode {
        *lock(&self.inner.status)
    }

    pub fn set_status(&self, status: StatusCode) {
        *lock(&self.inner.status) = status;
    }

    /// Deliver a full response. Returns `false` if one was already sent.
    pub fn send(&self, response: Response) -> bool {
        let Some(tx) = lock(&self.inner.tx).take() else {
            tracing::debug!(status = %response.status(), "Response already sent; dropping");
            return false;
        };
        // The transport may have gone away; nothing left to deliver to.
        let _ = tx.send(response);
        true
    }

    /// Complete the response with the current status and an empty body.
    pub fn close(&self) -> bool {
        self.send(status_response(self.status()))
    }

    /// Whether a response has been delivered.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.tx).is_none()
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        let pending = self
            .tx
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(tx) = pending {
            let status = *self
                .status
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let _ = tx.send(status_response(status));
        }
    }
}

/// A response carrying only a status code.
pub fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_sends_current_status() {
        let (sink, rx) = ResponseSink::channel();
        assert_eq!(sink.status(), StatusCode::OK);
        sink.set_status(StatusCode::UNAUTHORIZED);
        assert!(sink.close());
        assert!(sink.is_closed());
        assert_eq!(rx.await.unwrap().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn first_write_wins() {
        let (sink, rx) = ResponseSink::channel();
        assert!(sink.send(status_response(StatusCode::ACCEPTED)));
        assert!(!sink.send(status_response(StatusCode::BAD_REQUEST)));
        assert!(!sink.close());
        assert_eq!(rx.await.unwrap().status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn dropping_last_handle_completes_response() {
        let (sink, rx) = ResponseSink::channel();
        let clone = sink.clone();
        clone.set_status(StatusCode::NO_CONTENT);
        drop(sink);
        assert!(!clone.is_closed());
        drop(clone);
        assert_eq!(rx.await.unwrap().status(), StatusCode::NO_CONTENT);
    }
}
