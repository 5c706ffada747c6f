//! End-to-end tests over real sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;

use frontdoor::{LifecycleState, Server};

mod common;

#[tokio::test]
async fn http_request_reaches_handler_with_absolute_url() {
    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);
    let builder = Server::builder().on_request(move |view, url| {
        *record.lock().unwrap() = Some((url, view.query("tag").map(str::to_string)));
        async { Ok("hello".into_response()) }
    });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    let response = common::client()
        .get(format!("http://{addr}/items?tag=a&tag=b"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello");

    let (url, tag) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(url, format!("http://{addr}/items?tag=a&tag=b"));
    assert_eq!(tag.as_deref(), Some("a,b"));
    server.dispose();
}

#[tokio::test]
async fn paths_outside_every_prefix_get_404() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let builder = Server::builder().on_request(move |_view, _url| {
        counted.fetch_add(1, Ordering::SeqCst);
        async { Ok(StatusCode::NO_CONTENT.into_response()) }
    });
    let (server, addr) = common::start(builder, &["http://127.0.0.1:0/api/"]).await;
    let client = common::client();

    let outside = client.get(format!("http://{addr}/other")).send().await.unwrap();
    assert_eq!(outside.status(), StatusCode::NOT_FOUND);

    let inside = client.get(format!("http://{addr}/API/v1")).send().await.unwrap();
    assert_eq!(inside.status(), StatusCode::NO_CONTENT);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    server.dispose();
}

#[tokio::test]
async fn handler_failure_reaches_error_handler_once_and_answers_500() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&errors);
    let builder = Server::builder()
        .on_request(|_view, _url| async { Err("database unavailable".into()) })
        .on_error(move |error, view| {
            record.lock().unwrap().push((error.to_string(), view.path().to_string()));
        });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    let response = common::client().get(format!("http://{addr}/broken")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    assert!(common::eventually(|| !errors.lock().unwrap().is_empty()).await);
    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors, vec![("database unavailable".to_string(), "/broken".to_string())]);
    server.dispose();
}

#[tokio::test]
async fn admitted_websocket_is_connected_and_echoes() {
    let handler_calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&handler_calls);
    let connected_url = Arc::new(Mutex::new(None));
    let record = Arc::clone(&connected_url);

    let builder = Server::builder()
        .on_request(move |_view, _url| {
            counted.fetch_add(1, Ordering::SeqCst);
            async { Ok(StatusCode::OK.into_response()) }
        })
        .on_websocket_connecting(|event| {
            event.allow_connection = event.query_params.get("token").map(String::as_str) == Some("s3cret");
        })
        .on_websocket_connected(move |event| {
            *record.lock().unwrap() = Some(event.url.clone());
            let mut channel = event.channel;
            tokio::spawn(async move {
                while let Some(message) = channel.recv().await {
                    if channel.send(message).await.is_err() {
                        break;
                    }
                }
            });
        });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    let (mut socket, response) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket?token=s3cret"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);

    socket.send(tungstenite::Message::text("ping")).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply.to_text().unwrap(), "ping");

    assert_eq!(
        connected_url.lock().unwrap().clone(),
        Some(format!("http://{addr}/socket?token=s3cret"))
    );
    assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    server.dispose();
}

#[tokio::test]
async fn rejected_websocket_gets_401() {
    let connected = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&connected);
    let builder = Server::builder()
        .on_request(|_view, _url| async { Ok(StatusCode::OK.into_response()) })
        .on_websocket_connecting(|event| event.allow_connection = false)
        .on_websocket_connected(move |_event| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), StatusCode::UNAUTHORIZED),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert_eq!(connected.load(Ordering::SeqCst), 0);
    server.dispose();
}

#[tokio::test]
async fn websocket_without_connecting_callback_is_rejected() {
    let builder = Server::builder().on_request(|_view, _url| async { Ok(StatusCode::OK.into_response()) });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap_err();
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == StatusCode::UNAUTHORIZED));
    server.dispose();
}

#[tokio::test]
async fn local_endpoint_is_reported_per_connection() {
    let endpoints = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&endpoints);
    let builder = Server::builder()
        .on_request(|_view, _url| async { Ok(StatusCode::OK.into_response()) })
        .on_local_endpoint(move |endpoint| record.lock().unwrap().push(endpoint.to_string()));
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;

    common::client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(endpoints.lock().unwrap().clone(), vec![addr.to_string()]);
    server.dispose();
}

#[tokio::test]
async fn dispose_stops_accepting() {
    let builder = Server::builder().on_request(|_view, _url| async { Ok(StatusCode::OK.into_response()) });
    let (server, addr) = common::start(builder, &[common::LOOPBACK]).await;
    assert_eq!(server.state(), LifecycleState::Started);

    server.dispose();
    server.dispose();
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert!(server.prefixes().is_empty());
    assert!(server.local_addrs().is_empty());

    let mut refused = false;
    for _ in 0..50 {
        if common::client().get(format!("http://{addr}/")).send().await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused, "listener should stop accepting after dispose");
}

#[tokio::test]
async fn restart_after_stop_serves_new_prefixes() {
    let builder = Server::builder().on_request(|_view, _url| async { Ok("again".into_response()) });
    let (server, _) = common::start(builder, &[common::LOOPBACK]).await;
    server.stop();
    assert_eq!(server.state(), LifecycleState::Stopped);

    server.start(&[common::LOOPBACK]).await.unwrap();
    let addr = server.local_addrs()[0];
    let body = common::client()
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "again");
    server.dispose();
}

