//! frontdoor demo server.
//!
//! Echoes every HTTP request back as JSON and every WebSocket message back
//! to its sender.

use std::collections::BTreeMap;
use std::path::PathBuf;

use axum::response::IntoResponse;
use axum::Json;
use clap::Parser;
use serde_json::json;

use frontdoor::config::{load_config, ServerConfig};
use frontdoor::http::dispatcher::header_summary;
use frontdoor::lifecycle::signals::shutdown_signal;
use frontdoor::observability::{logging, metrics};
use frontdoor::{Message, RequestView, Server, WebSocketConnectEvent};

/// Largest request body echoed back.
const MAX_ECHO_BODY: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "frontdoor", version, about = "HTTP and WebSocket accept-and-dispatch demo")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "frontdoor starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let token = config.websocket.token.clone();
    let mut builder = Server::builder()
        .on_request(echo_request)
        .on_error(|error, view| {
            tracing::error!(connection_id = %view.connection_id(), error = %error, "Request failed");
        })
        .on_websocket_connecting(move |event| {
            event.allow_connection = match &token {
                Some(expected) => event.query_params.get("token") == Some(expected),
                None => true,
            };
        })
        .on_websocket_connected(echo_messages)
        .on_local_endpoint(|endpoint| tracing::trace!(local = %endpoint, "Accepted"));
    if let Some(tls) = config.listener.tls.clone() {
        builder = builder.tls(tls);
    }

    let server = builder.build()?;
    server.start(&config.listener.prefixes).await?;
    for addr in server.local_addrs() {
        tracing::info!(address = %addr, "Listening");
    }

    shutdown_signal().await;
    server.dispose();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn echo_request(view: RequestView, url: String) -> frontdoor::http::HandlerResult {
    let body = match view.take_body() {
        Some(body) => axum::body::to_bytes(body, MAX_ECHO_BODY).await?,
        None => Default::default(),
    };
    let query: BTreeMap<&str, &str> = view
        .query_params()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    Ok(Json(json!({
        "connection_id": view.connection_id().to_string(),
        "method": view.method().as_str(),
        "url": url,
        "path": view.path(),
        "query": query,
        "headers": header_summary(view.headers()),
        "remote_endpoint": view.remote_endpoint(),
        "local_endpoint": view.local_endpoint(),
        "body": String::from_utf8_lossy(&body),
    }))
    .into_response())
}

fn echo_messages(event: WebSocketConnectEvent) {
    let remote = event.remote_endpoint;
    let mut channel = event.channel;
    tokio::spawn(async move {
        while let Some(message) = channel.recv().await {
            if let Message::Text(text) = &message {
                tracing::trace!(remote = %remote, len = text.len(), "Echoing text");
            }
            if channel.send(message).await.is_err() {
                break;
            }
        }
        tracing::debug!(remote = %remote, "WebSocket closed");
    });
}
