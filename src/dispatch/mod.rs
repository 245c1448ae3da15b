//! Typed push-event dispatch
//!
//! Server frames are routed by [`EventKind`] to registered handlers in arrival
//! order. A failing or panicking handler is logged and does not stop delivery
//! of later events. Kinds without an [`EventKind`] are logged and ignored.

pub mod snapshot;

pub use snapshot::{PushSnapshot, PushStateStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Every message kind the push endpoint can send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AuthSuccess,
    AuthError,
    Pong,
    Error,
    BalanceUpdate,
    TransactionUpdate,
    TransferStatus,
    Notification,
    KycStatus,
    SessionRevoked,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::AuthSuccess,
        EventKind::AuthError,
        EventKind::Pong,
        EventKind::Error,
        EventKind::BalanceUpdate,
        EventKind::TransactionUpdate,
        EventKind::TransferStatus,
        EventKind::Notification,
        EventKind::KycStatus,
        EventKind::SessionRevoked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthError => "auth_error",
            Self::Pong => "pong",
            Self::Error => "error",
            Self::BalanceUpdate => "balance_update",
            Self::TransactionUpdate => "transaction_update",
            Self::TransferStatus => "transfer_status",
            Self::Notification => "notification",
            Self::KycStatus => "kyc_status",
            Self::SessionRevoked => "session_revoked",
        }
    }

    pub fn from_wire(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Consumed by the channel itself, never dispatched
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::AuthSuccess | Self::AuthError | Self::Pong | Self::Error
        )
    }

    /// Kinds delivered to application handlers
    pub fn application() -> impl Iterator<Item = EventKind> {
        Self::ALL.into_iter().filter(|k| !k.is_control())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server-pushed event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushEvent {
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl PushEvent {
    pub fn new(kind: EventKind, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }
}

/// Handler callback. Runs on the channel task and must not block.
pub type EventHandler = Box<dyn FnMut(&PushEvent) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub dispatched: u64,
    pub handler_failures: u64,
    pub unknown_kinds: u64,
    pub unhandled: u64,
}

/// Routes push events to handlers
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<EventHandler>>,
    stats: DispatchStats,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; several handlers for one kind run in registration order
    pub fn register<F>(&mut self, kind: EventKind, handler: F) -> &mut Self
    where
        F: FnMut(&PushEvent) -> anyhow::Result<()> + Send + 'static,
    {
        if kind.is_control() {
            warn!(kind = %kind, "Handler registered for a control kind will never run");
        }
        self.handlers.entry(kind).or_default().push(Box::new(handler));
        self
    }

    /// Builder form of [`register`](Self::register)
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: FnMut(&PushEvent) -> anyhow::Result<()> + Send + 'static,
    {
        self.register(kind, handler);
        self
    }

    /// Application kinds that have no handler
    pub fn unhandled_kinds(&self) -> Vec<EventKind> {
        EventKind::application()
            .filter(|kind| self.handlers.get(kind).map_or(true, Vec::is_empty))
            .collect()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Run every handler for `event.kind`, returning how many succeeded
    pub fn dispatch(&mut self, event: &PushEvent) -> usize {
        self.stats.dispatched += 1;
        let Some(handlers) = self.handlers.get_mut(&event.kind) else {
            self.stats.unhandled += 1;
            debug!(kind = %event.kind, "No handler for event");
            return 0;
        };

        let mut succeeded = 0;
        for handler in handlers.iter_mut() {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(e)) => {
                    self.stats.handler_failures += 1;
                    error!(kind = %event.kind, error = %e, "Event handler failed");
                }
                Err(_) => {
                    self.stats.handler_failures += 1;
                    error!(kind = %event.kind, "Event handler panicked");
                }
            }
        }
        succeeded
    }

    /// Dispatch a frame by its wire kind; unknown kinds are logged and ignored
    pub fn dispatch_wire(&mut self, kind: &str, payload: Value, timestamp: DateTime<Utc>) -> usize {
        match EventKind::from_wire(kind) {
            Some(kind) => self.dispatch(&PushEvent::new(kind, payload, timestamp)),
            None => {
                self.stats.unknown_kinds += 1;
                warn!(kind = %kind, "Ignoring unknown push event kind");
                0
            }
        }
    }
}
