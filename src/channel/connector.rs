//! Socket seam for the push channel

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::borrow::Cow;
use std::pin::Pin;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::debug;

use crate::types::{Result, TransportError};

/// Transport-level message, independent of the websocket library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    /// `code` is `None` when the peer closed without a status
    Close { code: Option<u16>, reason: String },
}

pub type WireSink = Pin<Box<dyn Sink<WireMessage, Error = TransportError> + Send>>;
pub type WireStream = Pin<Box<dyn Stream<Item = Result<WireMessage>> + Send>>;

/// One established duplex connection
pub struct WireConnection {
    pub sink: WireSink,
    pub stream: WireStream,
}

/// Opens duplex connections to the push endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<WireConnection>;
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<WireConnection> {
        let (ws, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Network(format!("WebSocket connect failed: {}", e)))?;
        debug!(url = %url, status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|msg: WireMessage| future::ready(Ok::<_, TransportError>(to_tungstenite(msg))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(msg) => from_tungstenite(msg).map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(WireConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn to_tungstenite(msg: WireMessage) -> Message {
    match msg {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Ping(data) => Message::Ping(data),
        WireMessage::Pong(data) => Message::Pong(data),
        WireMessage::Close { code, reason } => Message::Close(code.map(|code| CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}

fn from_tungstenite(msg: Message) -> Option<WireMessage> {
    match msg {
        Message::Text(text) => Some(WireMessage::Text(text)),
        // Some servers send JSON as binary frames
        Message::Binary(data) => String::from_utf8(data).ok().map(WireMessage::Text),
        Message::Ping(data) => Some(WireMessage::Ping(data)),
        Message::Pong(data) => Some(WireMessage::Pong(data)),
        Message::Close(frame) => Some(match frame {
            Some(frame) => WireMessage::Close {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => WireMessage::Close {
                code: None,
                reason: String::new(),
            },
        }),
        Message::Frame(_) => None,
    }
}
