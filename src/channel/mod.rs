//! Push channel
//!
//! One persistent duplex connection to the push endpoint, driven by a session
//! task that owns the socket and every timer:
//!
//! ```text
//!  Idle ─connect─▶ Connecting ─open─▶ Authenticating ─ack─▶ Open
//!                      ▲                                     │ non-fatal close /
//!                      └──── delay ──── Reconnecting ◀───────┘ heartbeat timeout
//!
//!  fatal close, attempts exhausted, disconnect ─▶ Closed
//! ```
//!
//! Messages sent while the channel is not open wait in a bounded
//! [`OutboundQueue`] and are flushed in order once it opens.

pub mod connector;
pub mod frames;
pub mod heartbeat;
pub mod memory;
pub mod queue;
pub mod state;

mod session;

pub use connector::{Connector, TungsteniteConnector, WireConnection, WireMessage};
pub use frames::{ClientFrame, ServerFrame};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use queue::OutboundQueue;
pub use state::{ChannelState, CloseCodePolicy, ABNORMAL_CLOSURE, NO_STATUS_CODE};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::auth::CredentialStore;
use crate::dispatch::EventDispatcher;
use crate::types::{Result, TransportError};

use session::{Command, Session};

/// Push channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    /// Sent in the auth frame
    pub client_name: String,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub queue_capacity: usize,
    /// Deadline for socket open plus auth acknowledgement
    pub connect_timeout: Duration,
    pub close_policy: CloseCodePolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            client_name: "wallet-transport".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            queue_capacity: 100,
            connect_timeout: Duration::from_secs(10),
            close_policy: CloseCodePolicy::default(),
        }
    }
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// `min(base * 2^attempt, max)`
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.reconnect_base_delay
            .saturating_mul(factor)
            .min(self.reconnect_max_delay)
    }
}

/// Receives connectivity changes. Runs on the channel task; keep it short.
pub trait ChannelObserver: Send + Sync {
    fn on_state_change(&self, _from: ChannelState, _to: ChannelState) {}

    /// The channel closed for good because of `error`
    fn on_terminal_error(&self, _error: &TransportError) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ChannelObserver for NoopObserver {}

/// What a channel does with traffic and state changes
pub struct SessionCallbacks {
    pub dispatcher: EventDispatcher,
    pub observer: Arc<dyn ChannelObserver>,
}

impl Default for SessionCallbacks {
    fn default() -> Self {
        Self {
            dispatcher: EventDispatcher::new(),
            observer: Arc::new(NoopObserver),
        }
    }
}

impl SessionCallbacks {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            dispatcher,
            ..Self::default()
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChannelObserver>) -> Self {
        self.observer = observer;
        self
    }
}

/// State shared between the handle and its session task
pub(crate) struct ChannelShared {
    state: watch::Sender<ChannelState>,
    queue: Mutex<OutboundQueue>,
    flush: Notify,
    terminal_error: Mutex<Option<TransportError>>,
}

impl ChannelShared {
    fn queue(&self) -> MutexGuard<'_, OutboundQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_terminal_error(&self, error: TransportError) {
        *self.terminal_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    fn terminal_error(&self) -> Option<TransportError> {
        self.terminal_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

struct Pending {
    callbacks: SessionCallbacks,
    commands: mpsc::UnboundedReceiver<Command>,
}

/// Handle to one push channel
pub struct PushChannel {
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<CredentialStore>,
    shared: Arc<ChannelShared>,
    commands: mpsc::UnboundedSender<Command>,
    pending: Mutex<Option<Pending>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PushChannel {
    /// Create an idle channel; nothing happens until [`connect`](Self::connect)
    pub fn new(
        config: ChannelConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<CredentialStore>,
        callbacks: SessionCallbacks,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            state,
            queue: Mutex::new(OutboundQueue::new(config.queue_capacity)),
            flush: Notify::new(),
            terminal_error: Mutex::new(None),
        });

        Self {
            config,
            connector,
            credentials,
            shared,
            commands: commands_tx,
            pending: Mutex::new(Some(Pending {
                callbacks,
                commands: commands_rx,
            })),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Error that closed the channel, if it closed fatally
    pub fn terminal_error(&self) -> Option<TransportError> {
        self.shared.terminal_error()
    }

    /// Start the session task. Calling it again is a no-op.
    ///
    /// Fails with `Config` when the heartbeat interval is zero.
    pub async fn connect(&self) -> Result<()> {
        if self.config.heartbeat_interval.is_zero() {
            return Err(TransportError::Config(
                "heartbeat_interval must be positive".to_string(),
            ));
        }
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(pending) = pending else {
            return if self.state().is_terminal() {
                Err(TransportError::ChannelClosed)
            } else {
                Ok(())
            };
        };

        info!(url = %self.config.url, "Starting push channel");
        let session = Session::new(
            self.config.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.credentials),
            Arc::clone(&self.shared),
            pending.commands,
            pending.callbacks,
        );
        let handle = tokio::spawn(session.run());
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    /// Wait until the channel is open, or fail on closure or deadline
    pub async fn wait_until_open(&self, deadline: Duration) -> Result<()> {
        let mut states = self.subscribe_state();
        let wait = async {
            loop {
                let state = *states.borrow_and_update();
                match state {
                    ChannelState::Open => return Ok(()),
                    ChannelState::Closed => {
                        return Err(self.terminal_error().unwrap_or(TransportError::ChannelClosed))
                    }
                    _ => {}
                }
                if states.changed().await.is_err() {
                    return Err(TransportError::ChannelClosed);
                }
            }
        };

        tokio::time::timeout(deadline, wait).await.unwrap_or_else(|_| {
            Err(TransportError::Timeout(format!(
                "push channel not open after {}ms",
                deadline.as_millis()
            )))
        })
    }

    /// Queue a text message; it is written as soon as the channel is open.
    ///
    /// A full queue drops the message with a warning and still returns `Ok`.
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(TransportError::ChannelClosed);
        }
        let accepted = self.shared.queue().push(message.into());
        if accepted {
            self.shared.flush.notify_one();
        }
        Ok(())
    }

    /// Serialize and queue a JSON message
    pub fn send_json<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        self.send(serde_json::to_string(message)?)
    }

    /// Messages waiting for an open channel
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    /// Re-authenticate an open connection with a new token.
    ///
    /// While not open this is a no-op: the next handshake reads the
    /// credential store.
    pub fn update_token(&self, token: impl Into<String>) {
        if self.state().is_open() {
            let _ = self.commands.send(Command::UpdateToken(token.into()));
        }
    }

    /// Close the channel and wait for the session task to finish.
    ///
    /// Cancels any pending reconnect and the heartbeat timer.
    pub async fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
        let never_started = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                debug!(error = %e, "Push session task ended abnormally");
            }
        }

        if never_started || self.state() != ChannelState::Closed {
            self.shared.state.send_replace(ChannelState::Closed);
        }
    }
}
