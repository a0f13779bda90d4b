//! In-memory channel halves for driving sessions in tests.

use crate::server::streaming::{
    channel::{ChannelError, ChannelReceiver, ChannelSender},
    close::Close,
};
use tokio::sync::mpsc;

/// What the server side sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Close(Close),
}

/// What the client side sends.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Binary,
}

pub struct MockSender(mpsc::UnboundedSender<Sent>);

pub struct MockReceiver(mpsc::UnboundedReceiver<Frame>);

/// The client end of a mock connection.
pub struct Client {
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
    incoming: mpsc::UnboundedReceiver<Sent>,
}

pub fn pair() -> (MockSender, MockReceiver, Client) {
    let (to_client, incoming) = mpsc::unbounded_channel();
    let (outgoing, from_client) = mpsc::unbounded_channel();
    (
        MockSender(to_client),
        MockReceiver(from_client),
        Client {
            outgoing: Some(outgoing),
            incoming,
        },
    )
}

impl Client {
    pub fn send(&self, text: &str) {
        self.send_frame(Frame::Text(text.to_string()));
    }

    pub fn send_frame(&self, frame: Frame) {
        if let Some(tx) = &self.outgoing {
            tx.send(frame).unwrap();
        }
    }

    /// Simulates the client closing its end.
    pub fn disconnect(&mut self) {
        self.outgoing = None;
    }

    pub async fn recv(&mut self) -> Option<Sent> {
        self.incoming.recv().await
    }

    /// Everything sent until the server dropped its sender.
    pub async fn drain(&mut self) -> Vec<Sent> {
        let mut out = Vec::new();
        while let Some(sent) = self.incoming.recv().await {
            out.push(sent);
        }
        out
    }
}

impl ChannelSender for MockSender {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.0
            .send(Sent::Text(text))
            .map_err(|_| ChannelError::Disconnected)
    }

    async fn close(&mut self, close: Close) {
        let _ = self.0.send(Sent::Close(close));
    }
}

impl ChannelReceiver for MockReceiver {
    async fn recv_text(&mut self) -> Result<String, ChannelError> {
        match self.0.recv().await {
            Some(Frame::Text(text)) => Ok(text),
            Some(Frame::Binary) => Err(ChannelError::UnexpectedMessage),
            None => Err(ChannelError::Disconnected),
        }
    }
}
