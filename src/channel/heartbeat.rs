use std::time::Duration;
use tokio::time::Instant;

/// Silent intervals after which the connection is considered dead
pub const DEAD_AFTER_INTERVALS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Traffic seen within the last interval
    Idle,
    /// Quiet for at least one interval, send a probe
    Probe,
    /// Quiet for too long, drop the connection
    Dead,
}

/// Tracks inbound traffic on an open connection
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_inbound: Instant,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_inbound: now,
        }
    }

    pub fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
    }

    pub fn dead_after(&self) -> Duration {
        self.interval * DEAD_AFTER_INTERVALS
    }

    /// Decide what to do at a heartbeat tick
    pub fn check(&self, now: Instant) -> HeartbeatAction {
        let quiet = now.saturating_duration_since(self.last_inbound);
        if quiet >= self.dead_after() {
            HeartbeatAction::Dead
        } else if quiet >= self.interval {
            HeartbeatAction::Probe
        } else {
            HeartbeatAction::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_thresholds() {
        let start = Instant::now();
        let interval = Duration::from_secs(30);
        let mut monitor = HeartbeatMonitor::new(interval, start);

        assert_eq!(monitor.check(start + Duration::from_secs(10)), HeartbeatAction::Idle);
        assert_eq!(monitor.check(start + interval), HeartbeatAction::Probe);
        assert_eq!(monitor.check(start + interval * 3), HeartbeatAction::Probe);
        assert_eq!(monitor.check(start + interval * 4), HeartbeatAction::Dead);

        monitor.record_inbound(start + interval * 3);
        assert_eq!(monitor.check(start + interval * 4), HeartbeatAction::Probe);
    }
}
