//! In-process connector
//!
//! Each `connect` hands a [`MemoryPeer`] to the paired [`MemoryServer`], which
//! plays the server side. Used for embedding and for deterministic tests.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connector::{Connector, WireConnection, WireMessage};
use crate::types::{Result, TransportError};

#[derive(Debug, Default)]
struct ConnectorState {
    attempts: AtomicUsize,
    refusing: AtomicBool,
}

/// Client side of an in-process duplex link
#[derive(Clone)]
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    state: Arc<ConnectorState>,
}

/// Receives every connection opened through the paired connector
pub struct MemoryServer {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
    state: Arc<ConnectorState>,
}

/// Server end of one connection
pub struct MemoryPeer {
    pub url: String,
    to_client: fmpsc::UnboundedSender<Result<WireMessage>>,
    from_client: fmpsc::UnboundedReceiver<WireMessage>,
}

impl MemoryConnector {
    pub fn pair() -> (MemoryConnector, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ConnectorState::default());
        (
            MemoryConnector {
                accepted: tx,
                state: Arc::clone(&state),
            },
            MemoryServer {
                accepted: rx,
                state,
            },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<WireConnection> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);
        if self.state.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Network("connection refused".to_string()));
        }

        let (client_tx, server_rx) = fmpsc::unbounded();
        let (server_tx, client_rx) = fmpsc::unbounded();
        let peer = MemoryPeer {
            url: url.to_string(),
            to_client: server_tx,
            from_client: server_rx,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Network("memory server dropped".to_string()))?;

        let sink = client_tx.sink_map_err(|e| TransportError::Network(e.to_string()));
        Ok(WireConnection {
            sink: Box::pin(sink),
            stream: Box::pin(client_rx),
        })
    }
}

impl MemoryServer {
    /// Next connection opened by the client
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }

    /// Connection attempts seen so far, including refused ones
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Refuse (or accept again) future connection attempts
    pub fn set_refusing(&self, refusing: bool) {
        self.state.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Next message from the client, `None` once the client dropped its sink
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.from_client.next().await
    }

    /// Next text frame from the client, parsed as JSON
    pub async fn recv_json(&mut self) -> Option<Value> {
        loop {
            match self.recv().await? {
                WireMessage::Text(text) => return serde_json::from_str(&text).ok(),
                _ => continue,
            }
        }
    }

    pub fn send(&self, message: WireMessage) -> bool {
        self.to_client.unbounded_send(Ok(message)).is_ok()
    }

    pub fn send_json(&self, value: Value) -> bool {
        self.send(WireMessage::Text(value.to_string()))
    }

    /// Deliver a transport error to the client stream
    pub fn fail(&self, error: TransportError) -> bool {
        self.to_client.unbounded_send(Err(error)).is_ok()
    }

    /// Send a close frame and end the server side
    pub fn close(self, code: u16, reason: &str) {
        let _ = self.to_client.unbounded_send(Ok(WireMessage::Close {
            code: Some(code),
            reason: reason.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (connector, mut server) = MemoryConnector::pair();
        let mut conn = connector.connect("mem://push").await.unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.url, "mem://push");

        conn.sink
            .send(WireMessage::Text(json!({"type": "ping"}).to_string()))
            .await
            .unwrap();
        assert_eq!(peer.recv_json().await, Some(json!({"type": "ping"})));

        peer.send_json(json!({"type": "pong"}));
        let msg = conn.stream.next().await.unwrap().unwrap();
        assert_eq!(msg, WireMessage::Text(r#"{"type":"pong"}"#.into()));
    }

    #[tokio::test]
    async fn test_refusing() {
        let (connector, server) = MemoryConnector::pair();
        server.set_refusing(true);
        assert!(connector.connect("mem://push").await.is_err());
        assert_eq!(server.attempts(), 1);
    }
}
