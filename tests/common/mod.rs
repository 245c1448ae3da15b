//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use wallet_transport::channel::{ChannelObserver, ChannelState, MemoryPeer, MemoryServer};
use wallet_transport::pipeline::{HttpRequest, HttpResponse, HttpTransport};
use wallet_transport::{Result, TransportError};

type Responder = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync>;

/// Transport answering through a closure, recording every request with its send time
pub struct FnTransport {
    responder: Responder,
    log: Mutex<Vec<(Instant, HttpRequest)>>,
}

impl FnTransport {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.log.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn count_path(&self, suffix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url.split('?').next().unwrap_or_default().ends_with(suffix))
            .count()
    }
}

#[async_trait]
impl HttpTransport for FnTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = (self.responder)(&request);
        self.log.lock().unwrap().push((Instant::now(), request));
        response
    }
}

/// Records state transitions and terminal errors with their times
#[derive(Default)]
pub struct RecordingObserver {
    pub transitions: Mutex<Vec<(Instant, ChannelState, ChannelState)>>,
    pub terminal: Mutex<Vec<TransportError>>,
}

impl RecordingObserver {
    pub fn states(&self) -> Vec<ChannelState> {
        self.transitions.lock().unwrap().iter().map(|(_, _, to)| *to).collect()
    }

    /// Times at which the channel entered `state`
    pub fn entered(&self, state: ChannelState) -> Vec<Instant> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, to)| *to == state)
            .map(|(at, _, _)| *at)
            .collect()
    }
}

impl ChannelObserver for RecordingObserver {
    fn on_state_change(&self, from: ChannelState, to: ChannelState) {
        self.transitions.lock().unwrap().push((Instant::now(), from, to));
    }

    fn on_terminal_error(&self, error: &TransportError) {
        self.terminal.lock().unwrap().push(error.clone());
    }
}

/// Paused-clock timers fire on millisecond ticks
pub fn assert_near(actual: std::time::Duration, expected: std::time::Duration) {
    let slack = std::time::Duration::from_millis(5);
    assert!(
        actual >= expected && actual <= expected + slack,
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

/// Accept the next connection, check the auth frame, acknowledge it
pub async fn handshake(server: &mut MemoryServer) -> MemoryPeer {
    let mut peer = server.accept().await.expect("connection");
    let auth: Value = peer.recv_json().await.expect("auth frame");
    assert_eq!(auth["type"], "auth");
    peer.send_json(json!({"type": "auth_success"}));
    peer
}
