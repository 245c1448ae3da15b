use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{EventDispatcher, EventKind, PushEvent};

const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

/// Application-visible state folded from push events
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSnapshot {
    /// Latest payload per kind
    pub latest: BTreeMap<EventKind, Value>,
    /// Most recent notifications, newest first
    pub notifications: VecDeque<Value>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub session_revoked: bool,
}

/// Shared snapshot updated by dispatcher handlers
#[derive(Clone)]
pub struct PushStateStore {
    inner: Arc<RwLock<PushSnapshot>>,
    notification_limit: usize,
}

impl Default for PushStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_LIMIT)
    }
}

impl PushStateStore {
    pub fn new(notification_limit: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PushSnapshot::default())),
            notification_limit,
        }
    }

    /// Register a handler for every application kind
    pub fn install(&self, dispatcher: &mut EventDispatcher) {
        for kind in EventKind::application() {
            let store = self.clone();
            dispatcher.register(kind, move |event| {
                store.apply(event);
                Ok(())
            });
        }
    }

    pub fn apply(&self, event: &PushEvent) {
        let mut state = self.write();
        match event.kind {
            EventKind::Notification => {
                state.notifications.push_front(event.payload.clone());
                state.notifications.truncate(self.notification_limit);
            }
            EventKind::SessionRevoked => state.session_revoked = true,
            _ => {}
        }
        state.latest.insert(event.kind, event.payload.clone());
        state.last_event_at = Some(
            state
                .last_event_at
                .map_or(event.timestamp, |seen| seen.max(event.timestamp)),
        );
    }

    pub fn snapshot(&self) -> PushSnapshot {
        self.read().clone()
    }

    pub fn latest(&self, kind: EventKind) -> Option<Value> {
        self.read().latest.get(&kind).cloned()
    }

    pub fn clear(&self) {
        *self.write() = PushSnapshot::default();
    }

    // A panicking handler may poison the lock; the snapshot is still usable
    fn read(&self) -> RwLockReadGuard<'_, PushSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PushSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_install_tracks_latest_and_notifications() {
        let store = PushStateStore::new(2);
        let mut dispatcher = EventDispatcher::new();
        store.install(&mut dispatcher);
        assert!(dispatcher.unhandled_kinds().is_empty());

        let at = |ms| Utc.timestamp_millis_opt(ms).unwrap();
        dispatcher.dispatch(&PushEvent::new(EventKind::BalanceUpdate, json!({"amount": 1}), at(1)));
        dispatcher.dispatch(&PushEvent::new(EventKind::BalanceUpdate, json!({"amount": 2}), at(2)));
        for n in 0..3 {
            dispatcher.dispatch(&PushEvent::new(EventKind::Notification, json!({"n": n}), at(3)));
        }

        let snapshot = store.snapshot();
        assert_eq!(store.latest(EventKind::BalanceUpdate), Some(json!({"amount": 2})));
        assert_eq!(snapshot.notifications, vec![json!({"n": 2}), json!({"n": 1})]);
        assert_eq!(snapshot.last_event_at, Some(at(3)));
        assert!(!snapshot.session_revoked);

        dispatcher.dispatch(&PushEvent::new(EventKind::SessionRevoked, json!({}), at(4)));
        assert!(store.snapshot().session_revoked);
    }
}
