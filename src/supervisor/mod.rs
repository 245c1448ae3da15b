//! Connection supervisor
//!
//! Owns at most one live [`PushChannel`]. Concurrent `connect` calls share one
//! in-flight attempt. Constructed by the application root and passed to
//! whatever needs the push channel.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;
use crate::channel::{ChannelConfig, ChannelState, Connector, PushChannel, SessionCallbacks};
use crate::types::{Result, TransportError};

type ConnectAttempt = Shared<BoxFuture<'static, Result<()>>>;

#[derive(Default)]
struct Slot {
    channel: Option<Arc<PushChannel>>,
    in_flight: Option<ConnectAttempt>,
}

pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    credentials: Arc<CredentialStore>,
    connect_timeout: Duration,
    slot: Mutex<Slot>,
}

impl ConnectionSupervisor {
    pub fn new(connector: Arc<dyn Connector>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            connector,
            credentials,
            connect_timeout: Duration::from_secs(10),
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve once a channel is open.
    ///
    /// Already open: returns immediately. Attempt in flight: awaits it, and
    /// `callbacks` are dropped. Stale channel: torn down first.
    pub async fn connect(&self, config: ChannelConfig, callbacks: SessionCallbacks) -> Result<()> {
        let attempt = {
            let mut slot = self.slot.lock().await;

            if let Some(attempt) = &slot.in_flight {
                debug!("Joining in-flight push connection attempt");
                attempt.clone()
            } else {
                if let Some(channel) = &slot.channel {
                    if channel.state() == ChannelState::Open {
                        return Ok(());
                    }
                }
                if let Some(stale) = slot.channel.take() {
                    info!(state = %stale.state(), "Tearing down stale push channel");
                    stale.disconnect().await;
                }

                let channel = Arc::new(PushChannel::new(
                    config,
                    Arc::clone(&self.connector),
                    Arc::clone(&self.credentials),
                    callbacks,
                ));
                slot.channel = Some(Arc::clone(&channel));

                let timeout = self.connect_timeout;
                let attempt = async move {
                    channel.connect().await?;
                    let result = channel.wait_until_open(timeout).await;
                    if result.is_err() {
                        channel.disconnect().await;
                    }
                    result
                }
                .boxed()
                .shared();
                slot.in_flight = Some(attempt.clone());
                attempt
            }
        };

        let result = attempt.clone().await;
        self.finish_attempt(&attempt, &result).await;
        result
    }

    async fn finish_attempt(&self, attempt: &ConnectAttempt, result: &Result<()>) {
        let mut slot = self.slot.lock().await;
        let same = slot
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(attempt));
        if !same {
            return;
        }
        slot.in_flight = None;
        if let Err(e) = result {
            warn!(error = %e, "Push connection attempt failed");
            slot.channel = None;
        }
    }

    /// Close the current channel, if any
    pub async fn disconnect(&self) {
        let channel = {
            let mut slot = self.slot.lock().await;
            slot.in_flight = None;
            slot.channel.take()
        };
        if let Some(channel) = channel {
            channel.disconnect().await;
            info!("Push channel released");
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .await
            .channel
            .as_ref()
            .is_some_and(|channel| channel.state() == ChannelState::Open)
    }

    /// Current channel, whatever its state
    pub async fn channel(&self) -> Option<Arc<PushChannel>> {
        self.slot.lock().await.channel.clone()
    }

    pub async fn send(&self, message: impl Into<String>) -> Result<()> {
        match self.channel().await {
            Some(channel) => channel.send(message),
            None => Err(TransportError::ChannelClosed),
        }
    }

    pub async fn update_token(&self, token: impl Into<String>) {
        if let Some(channel) = self.channel().await {
            channel.update_token(token);
        }
    }
}
