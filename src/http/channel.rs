//! Bidirectional message channel handed to hosts after a WebSocket upgrade.
//!
//! # Data Flow
//! ```text
//! Client ←── WebSocket frames ──→ pump task ←── mpsc ──→ WebSocketChannel (host)
//! ```
//!
//! # Design Decisions
//! - Hosts never see the socket type; the pump owns it
//! - Ping/pong is answered by the transport and never surfaces here
//! - Dropping the channel closes the socket with a Close frame

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

/// Buffered messages per direction.
pub const CHANNEL_CAPACITY: usize = 64;

/// A data message on an upgraded connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    fn from_ws(message: WsMessage) -> Option<Self> {
        match message {
            WsMessage::Text(text) => Some(Message::Text(text.as_str().to_owned())),
            WsMessage::Binary(data) => Some(Message::Binary(data.to_vec())),
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) => None,
        }
    }

    fn into_ws(self) -> WsMessage {
        match self {
            Message::Text(text) => WsMessage::Text(text.into()),
            Message::Binary(data) => WsMessage::Binary(data.into()),
        }
    }
}

/// The peer side of the channel is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("WebSocket channel closed")]
pub struct ChannelClosed;

/// Open channel to one WebSocket client.
#[derive(Debug)]
pub struct WebSocketChannel {
    sender: MessageSender,
    receiver: MessageReceiver,
}

impl WebSocketChannel {
    /// Two in-memory channels wired to each other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                sender: MessageSender(a_tx),
                receiver: MessageReceiver(b_rx),
            },
            Self {
                sender: MessageSender(b_tx),
                receiver: MessageReceiver(a_rx),
            },
        )
    }

    /// Bridge an upgraded socket. The returned future pumps frames until
    /// either side closes and must be driven by the caller.
    pub fn bridge(socket: WebSocket) -> (Self, impl std::future::Future<Output = ()> + Send) {
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel = Self {
            sender: MessageSender(outbound_tx),
            receiver: MessageReceiver(inbound_rx),
        };
        (channel, pump(socket, outbound_rx, inbound_tx))
    }

    pub async fn send(&self, message: Message) -> Result<(), ChannelClosed> {
        self.sender.send(message).await
    }

    /// Next message from the peer, `None` once it has closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (MessageSender, MessageReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a [`WebSocketChannel`].
#[derive(Debug, Clone)]
pub struct MessageSender(mpsc::Sender<Message>);

impl MessageSender {
    pub async fn send(&self, message: Message) -> Result<(), ChannelClosed> {
        self.0.send(message).await.map_err(|_| ChannelClosed)
    }
}

/// Receiving half of a [`WebSocketChannel`].
#[derive(Debug)]
pub struct MessageReceiver(mpsc::Receiver<Message>);

impl MessageReceiver {
    pub async fn recv(&mut self) -> Option<Message> {
        self.0.recv().await
    }
}

async fn pump(
    socket: WebSocket,
    mut outbound: mpsc::Receiver<Message>,
    inbound: mpsc::Sender<Message>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(message) => {
                    if let Err(e) = ws_tx.send(message.into_ws()).await {
                        tracing::debug!(error = %e, "WebSocket send failed");
                        break;
                    }
                }
                None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(frame)) => {
                    if let Some(message) = Message::from_ws(frame) {
                        if inbound.send(message).await.is_err() {
                            let _ = ws_tx.send(WsMessage::Close(None)).await;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    tracing::debug!("WebSocket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_both_directions() {
        let (mut host, mut client) = WebSocketChannel::pair();

        host.send(Message::Text("hello".into())).await.unwrap();
        assert_eq!(client.recv().await, Some(Message::Text("hello".into())));

        client.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        assert_eq!(host.recv().await, Some(Message::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn dropping_one_end_closes_the_other() {
        let (host, mut client) = WebSocketChannel::pair();
        drop(host);
        assert_eq!(client.recv().await, None);
        assert_eq!(
            client.send(Message::Text("late".into())).await,
            Err(ChannelClosed)
        );
    }

    #[tokio::test]
    async fn split_halves_work_independently() {
        let (host, mut client) = WebSocketChannel::pair();
        let (sender, mut receiver) = host.split();

        let echo = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if sender.send(message).await.is_err() {
                    break;
                }
            }
        });

        client.send(Message::Text("ping".into())).await.unwrap();
        assert_eq!(client.recv().await, Some(Message::Text("ping".into())));

        drop(client);
        echo.await.unwrap();
    }
}
