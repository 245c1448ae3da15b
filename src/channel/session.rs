//! Session task: connect, authenticate, pump frames, reconnect.

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connector::{Connector, WireConnection, WireMessage, WireSink, WireStream};
use super::frames::{ClientFrame, ServerFrame};
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::state::{ABNORMAL_CLOSURE, NO_STATUS_CODE};
use super::{ChannelConfig, ChannelObserver, ChannelShared, ChannelState, SessionCallbacks};
use crate::auth::CredentialStore;
use crate::dispatch::{EventDispatcher, EventKind};
use crate::types::{FatalCloseKind, Result, TransportError};

pub(crate) enum Command {
    UpdateToken(String),
    Disconnect,
}

/// How one connection ended
enum SessionEnd {
    /// Caller asked to stop
    Disconnected,
    /// Recoverable by reconnecting
    Transient(String),
    /// Terminal, no reconnect
    Fatal(TransportError),
}

pub(crate) struct Session {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<CredentialStore>,
    shared: Arc<ChannelShared>,
    commands: mpsc::UnboundedReceiver<Command>,
    dispatcher: EventDispatcher,
    observer: Arc<dyn ChannelObserver>,
    attempt: u32,
}

impl Session {
    pub(crate) fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<CredentialStore>,
        shared: Arc<ChannelShared>,
        commands: mpsc::UnboundedReceiver<Command>,
        callbacks: SessionCallbacks,
    ) -> Self {
        Self {
            config,
            connector,
            credentials,
            shared,
            commands,
            dispatcher: callbacks.dispatcher,
            observer: callbacks.observer,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            match self.connect_once().await {
                SessionEnd::Disconnected => {
                    info!("Push channel disconnected");
                    self.transition(ChannelState::Closed);
                    return;
                }
                SessionEnd::Fatal(err) => {
                    error!(error = %err, "Push channel closed permanently");
                    self.shared.set_terminal_error(err.clone());
                    self.observer.on_terminal_error(&err);
                    self.transition(ChannelState::Closed);
                    return;
                }
                SessionEnd::Transient(reason) => {
                    if self.attempt >= self.config.max_reconnect_attempts {
                        warn!(
                            attempts = self.attempt,
                            reason = %reason,
                            "Giving up on push channel after max reconnect attempts"
                        );
                        self.transition(ChannelState::Closed);
                        return;
                    }

                    let delay = self.config.reconnect_delay(self.attempt);
                    self.attempt += 1;
                    self.transition(ChannelState::Reconnecting);
                    warn!(
                        attempt = self.attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Push channel interrupted, scheduling reconnect"
                    );
                    if !self.wait_before_reconnect(delay).await {
                        info!("Push channel disconnected while waiting to reconnect");
                        self.transition(ChannelState::Closed);
                        return;
                    }
                }
            }
        }
    }

    fn transition(&self, to: ChannelState) {
        let from = self.shared.state.send_replace(to);
        if from != to {
            info!(from = %from, to = %to, "Push channel state change");
            self.observer.on_state_change(from, to);
        }
    }

    /// Sleep out the reconnect delay; `false` if a disconnect arrived first
    async fn wait_before_reconnect(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    // Next handshake reads the credential store
                    Some(Command::UpdateToken(_)) => continue,
                    Some(Command::Disconnect) | None => return false,
                },
            }
        }
    }

    async fn connect_once(&mut self) -> SessionEnd {
        self.transition(ChannelState::Connecting);

        let Some(token) = self.credentials.access_token().await else {
            return SessionEnd::Fatal(TransportError::Auth(
                "No access token for push channel".to_string(),
            ));
        };

        let deadline = Instant::now() + self.config.connect_timeout;
        let WireConnection { mut sink, mut stream } = {
            let connect = tokio::time::timeout_at(deadline, self.connector.connect(&self.config.url));
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break match result {
                        Ok(Ok(conn)) => conn,
                        Ok(Err(e)) => return SessionEnd::Transient(e.to_string()),
                        Err(_) => return SessionEnd::Transient("connect timed out".to_string()),
                    },
                    command = self.commands.recv() => match command {
                        Some(Command::UpdateToken(_)) => continue,
                        Some(Command::Disconnect) | None => return SessionEnd::Disconnected,
                    },
                }
            }
        };

        self.transition(ChannelState::Authenticating);
        let auth = ClientFrame::Auth {
            token,
            client_name: self.config.client_name.clone(),
        };
        if let Err(e) = send_frame(&mut sink, &auth).await {
            return SessionEnd::Transient(e.to_string());
        }
        drop(auth);

        // Wait for the acknowledgement
        let auth_deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(auth_deadline);
        loop {
            tokio::select! {
                _ = &mut auth_deadline => {
                    return SessionEnd::Transient("authentication timed out".to_string());
                }
                command = self.commands.recv() => match command {
                    Some(Command::UpdateToken(_)) => {}
                    Some(Command::Disconnect) | None => {
                        close_gracefully(&mut sink).await;
                        return SessionEnd::Disconnected;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(WireMessage::Text(text))) => match ServerFrame::parse(&text) {
                        Ok(frame) if frame.kind == EventKind::AuthSuccess.as_str() => break,
                        Ok(frame) if frame.kind == EventKind::AuthError.as_str() => {
                            return SessionEnd::Fatal(auth_rejected(&frame));
                        }
                        Ok(frame) => self.handle_frame(frame),
                        Err(e) => warn!(error = %e, "Dropping undecodable push frame"),
                    },
                    Some(Ok(WireMessage::Ping(data))) => {
                        let _ = sink.send(WireMessage::Pong(data)).await;
                    }
                    Some(Ok(WireMessage::Pong(_))) => {}
                    Some(Ok(WireMessage::Close { code, reason })) => return self.classify_close(code, reason),
                    Some(Err(e)) => return self.classify_drop(e.to_string()),
                    None => return self.classify_drop("stream ended during authentication".to_string()),
                },
            }
        }

        self.attempt = 0;
        self.transition(ChannelState::Open);
        self.pump(sink, stream).await
    }

    /// Open-state loop: inbound frames, commands, flushes, heartbeat
    async fn pump(&mut self, mut sink: WireSink, mut stream: WireStream) -> SessionEnd {
        let shared = Arc::clone(&self.shared);
        if let Err(e) = flush_queue(&shared, &mut sink).await {
            return SessionEnd::Transient(e.to_string());
        }

        let interval = self.config.heartbeat_interval;
        let mut monitor = HeartbeatMonitor::new(interval, Instant::now());
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = stream.next() => {
                    monitor.record_inbound(Instant::now());
                    match message {
                        Some(Ok(WireMessage::Text(text))) => match ServerFrame::parse(&text) {
                            Ok(frame) if frame.kind == EventKind::AuthError.as_str() => {
                                return SessionEnd::Fatal(auth_rejected(&frame));
                            }
                            Ok(frame) => self.handle_frame(frame),
                            Err(e) => warn!(error = %e, "Dropping undecodable push frame"),
                        },
                        Some(Ok(WireMessage::Ping(data))) => {
                            if let Err(e) = sink.send(WireMessage::Pong(data)).await {
                                return SessionEnd::Transient(e.to_string());
                            }
                        }
                        Some(Ok(WireMessage::Pong(_))) => {}
                        Some(Ok(WireMessage::Close { code, reason })) => return self.classify_close(code, reason),
                        Some(Err(e)) => return self.classify_drop(e.to_string()),
                        None => return self.classify_drop("stream ended".to_string()),
                    }
                }
                command = self.commands.recv() => match command {
                    Some(Command::UpdateToken(token)) => {
                        debug!("Re-authenticating push channel");
                        let auth = ClientFrame::Auth {
                            token,
                            client_name: self.config.client_name.clone(),
                        };
                        if let Err(e) = send_frame(&mut sink, &auth).await {
                            return SessionEnd::Transient(e.to_string());
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        close_gracefully(&mut sink).await;
                        return SessionEnd::Disconnected;
                    }
                },
                _ = shared.flush.notified() => {
                    if let Err(e) = flush_queue(&shared, &mut sink).await {
                        return SessionEnd::Transient(e.to_string());
                    }
                }
                _ = ticker.tick() => match monitor.check(Instant::now()) {
                    HeartbeatAction::Idle => {}
                    HeartbeatAction::Probe => {
                        debug!("Sending heartbeat probe");
                        if let Err(e) = send_frame(&mut sink, &ClientFrame::Ping).await {
                            return SessionEnd::Transient(e.to_string());
                        }
                    }
                    HeartbeatAction::Dead => {
                        warn!(
                            silent_ms = monitor.dead_after().as_millis() as u64,
                            "No inbound traffic, treating push connection as dead"
                        );
                        return SessionEnd::Transient("heartbeat timeout".to_string());
                    }
                },
            }
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        let timestamp = frame.timestamp_or(Utc::now());
        match EventKind::from_wire(&frame.kind) {
            Some(EventKind::Pong) | Some(EventKind::AuthSuccess) => {}
            Some(EventKind::Error) => {
                warn!(detail = frame.message().unwrap_or("unspecified"), "Push server reported an error");
            }
            _ => {
                self.dispatcher.dispatch_wire(&frame.kind, frame.data, timestamp);
            }
        }
    }

    /// Connection lost without a close frame
    fn classify_drop(&self, reason: String) -> SessionEnd {
        self.classify_close(Some(ABNORMAL_CLOSURE), reason)
    }

    fn classify_close(&self, code: Option<u16>, reason: String) -> SessionEnd {
        let code = code.unwrap_or(NO_STATUS_CODE);
        if self.config.close_policy.is_fatal(code) {
            SessionEnd::Fatal(TransportError::ChannelFatal {
                code,
                kind: FatalCloseKind::from_code(code),
                reason,
            })
        } else {
            SessionEnd::Transient(format!("closed with code {}: {}", code, reason))
        }
    }
}

fn auth_rejected(frame: &ServerFrame) -> TransportError {
    TransportError::ChannelFatal {
        code: 1008,
        kind: FatalCloseKind::Auth,
        reason: frame.message().unwrap_or("authentication rejected").to_string(),
    }
}

/// Write queued messages in order; a failed message goes back to the front
async fn flush_queue(shared: &ChannelShared, sink: &mut WireSink) -> Result<()> {
    loop {
        let next = shared.queue().pop_front();
        let Some(message) = next else {
            return Ok(());
        };
        if let Err(e) = sink.send(WireMessage::Text(message.clone())).await {
            shared.queue().restore_front(message);
            return Err(e);
        }
    }
}

async fn send_frame(sink: &mut WireSink, frame: &ClientFrame) -> Result<()> {
    sink.send(WireMessage::Text(frame.to_text()?)).await
}

async fn close_gracefully(sink: &mut WireSink) {
    let close = WireMessage::Close {
        code: Some(1000),
        reason: "client disconnect".to_string(),
    };
    if let Err(e) = sink.send(close).await {
        debug!(error = %e, "Close frame not delivered");
    }
    let _ = sink.close().await;
}
