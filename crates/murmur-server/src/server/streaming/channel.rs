//! Transport abstraction for the text protocol.
//!
//! A connection is split into a [`ChannelSender`] and a [`ChannelReceiver`] so
//! one task can stream fragments while another watches for the peer going
//! away. [`WsSender`] / [`WsReceiver`] implement both halves over an axum
//! [`WebSocket`].

use crate::server::streaming::close::Close;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use core::future::Future;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::de::DeserializeOwned;

/// Why a receive or send did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer closed the connection or it dropped.
    Disconnected,
    /// The peer sent a binary frame where text was expected.
    UnexpectedMessage,
    /// A text frame did not deserialize into the expected payload.
    Malformed(String),
}

pub trait ChannelSender: Send + 'static {
    /// Sends one text message.
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Sends a close frame. Best effort: a peer that is already gone is not an
    /// error.
    fn close(&mut self, close: Close) -> impl Future<Output = ()> + Send;
}

pub trait ChannelReceiver: Send + 'static {
    /// Waits for the next text message. Control frames are skipped.
    fn recv_text(&mut self) -> impl Future<Output = Result<String, ChannelError>> + Send;

    /// Receives one text message and parses it as JSON.
    fn recv_json<T>(&mut self) -> impl Future<Output = Result<T, ChannelError>> + Send
    where
        T: DeserializeOwned,
        Self: Sized,
    {
        async move {
            let text = self.recv_text().await?;
            serde_json::from_str(&text).map_err(|e| ChannelError::Malformed(e.to_string()))
        }
    }

    /// Resolves once the peer has gone away, discarding anything it sends in
    /// the meantime.
    fn closed(mut self) -> impl Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async move {
            loop {
                if let Err(ChannelError::Disconnected) = self.recv_text().await {
                    return;
                }
            }
        }
    }
}

pub struct WsSender(SplitSink<WebSocket, Message>);

pub struct WsReceiver(SplitStream<WebSocket>);

/// Splits an upgraded socket into independently owned halves.
pub fn split(socket: WebSocket) -> (WsSender, WsReceiver) {
    let (sink, stream) = socket.split();
    (WsSender(sink), WsReceiver(stream))
}

impl ChannelSender for WsSender {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|_| ChannelError::Disconnected)
    }

    async fn close(&mut self, close: Close) {
        let frame = CloseFrame {
            code: close.code,
            reason: close.reason.into_owned().into(),
        };
        if let Err(e) = self.0.send(Message::Close(Some(frame))).await {
            tracing::trace!("close frame not delivered: {e}");
        }
        let _ = self.0.close().await;
    }
}

impl ChannelReceiver for WsReceiver {
    async fn recv_text(&mut self) -> Result<String, ChannelError> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_owned()),
                Some(Ok(Message::Binary(_))) => return Err(ChannelError::UnexpectedMessage),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    return Err(ChannelError::Disconnected);
                }
            }
        }
    }
}
