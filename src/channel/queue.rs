use std::collections::VecDeque;
use tracing::warn;

/// Bounded FIFO of messages waiting for an open channel.
///
/// When full, new messages are dropped and the queued ones are kept.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueue a message; returns `false` if it was dropped
    pub fn push(&mut self, message: String) -> bool {
        if self.items.len() >= self.capacity {
            self.dropped += 1;
            warn!(
                capacity = self.capacity,
                dropped = self.dropped,
                "Outbound queue full, dropping message"
            );
            return false;
        }
        self.items.push_back(message);
        true
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    /// Put back a message whose send failed. Ignores the capacity, the
    /// message was already admitted.
    pub fn restore_front(&mut self, message: String) {
        self.items.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages dropped since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = OutboundQueue::new(3);
        queue.push("a".into());
        queue.push("b".into());
        assert_eq!(queue.pop_front().as_deref(), Some("a"));
        assert_eq!(queue.pop_front().as_deref(), Some("b"));
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn test_full_drops_newest() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.push("1".into()));
        assert!(queue.push("2".into()));
        assert!(!queue.push("3".into()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop_front().as_deref(), Some("1"));
    }

    #[test]
    fn test_restore_front_keeps_order() {
        let mut queue = OutboundQueue::new(2);
        queue.push("1".into());
        queue.push("2".into());
        let first = queue.pop_front().unwrap();
        queue.restore_front(first);
        assert_eq!(queue.pop_front().as_deref(), Some("1"));
        assert_eq!(queue.pop_front().as_deref(), Some("2"));
    }
}
