use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::DispatchConfig;
use crate::dispatcher::Dispatcher;

/// Per-lane overload admission policy.
///
/// A lane is congested only when it is non-empty, its head task has
/// waited at least the age threshold, and its depth has reached the
/// depth threshold. Depth alone is not overload: a burst a healthy
/// worker drains in time never trips the probe. Age of the head is the
/// proof that the lane is not keeping up.
#[derive(Debug, Clone)]
pub struct CongestionPolicy {
    depth_threshold: usize,
    age_threshold: Duration,
    retry_after_base_secs: u64,
    retry_after_spread_secs: u64,
}

impl CongestionPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        CongestionPolicy {
            depth_threshold: config.congestion_depth,
            age_threshold: config.congestion_age(),
            retry_after_base_secs: config.retry_after_base_secs,
            retry_after_spread_secs: config.retry_after_spread_secs,
        }
    }

    /// Admission check for NEW inbound work keyed by `key`.
    ///
    /// Callers consult this before enqueueing work born from the
    /// network. Work for calls already in progress, timer fires above
    /// all, bypasses it: a retransmission timer must run on a congested
    /// lane or the machines waiting on it would wedge.
    pub fn should_reject(&self, dispatcher: &Dispatcher, key: &str) -> bool {
        let lane = dispatcher.lane_for_key(key);
        let congested = lane.is_congested(self.depth_threshold, self.age_threshold);
        if congested {
            warn!(
                key = %key,
                depth = lane.pending_count(),
                "Lane congested, rejecting new work"
            );
        }
        congested
    }

    /// Retry-After seconds for a rejection: base plus a random spread,
    /// so retriers do not come back in one synchronized wave
    pub fn retry_after_secs(&self) -> u64 {
        if self.retry_after_spread_secs == 0 {
            return self.retry_after_base_secs;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.retry_after_spread_secs);
        self.retry_after_base_secs + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use std::thread;

    fn policy(depth: usize, age_ms: u64) -> CongestionPolicy {
        CongestionPolicy {
            depth_threshold: depth,
            age_threshold: Duration::from_millis(age_ms),
            retry_after_base_secs: 5,
            retry_after_spread_secs: 10,
        }
    }

    #[test]
    fn empty_lane_is_never_congested() {
        let dispatcher = Dispatcher::new(2).unwrap();
        assert!(!policy(1, 0).should_reject(&dispatcher, "call-1"));
    }

    #[test]
    fn deep_and_old_lane_rejects() {
        let dispatcher = Dispatcher::new(1).unwrap();
        for i in 0..3 {
            dispatcher.add_task_last(Task::new("call-1", format!("t{i}"), || {}));
        }
        let p = policy(3, 20);
        assert!(!p.should_reject(&dispatcher, "call-1"), "head still fresh");
        thread::sleep(Duration::from_millis(30));
        assert!(p.should_reject(&dispatcher, "call-1"));
    }

    #[test]
    fn old_but_shallow_lane_admits() {
        let dispatcher = Dispatcher::new(1).unwrap();
        dispatcher.add_task_last(Task::new("call-1", "only", || {}));
        thread::sleep(Duration::from_millis(30));
        assert!(!policy(5, 20).should_reject(&dispatcher, "call-1"));
    }

    #[test]
    fn retry_after_stays_in_range_and_varies() {
        let p = policy(1, 0);
        let draws: Vec<u64> = (0..100).map(|_| p.retry_after_secs()).collect();
        assert!(draws.iter().all(|&s| (5..=15).contains(&s)));
        assert!(draws.iter().any(|&s| s != draws[0]), "no jitter observed");
    }

    #[test]
    fn zero_spread_is_deterministic() {
        let p = CongestionPolicy {
            depth_threshold: 1,
            age_threshold: Duration::ZERO,
            retry_after_base_secs: 7,
            retry_after_spread_secs: 0,
        };
        assert_eq!(p.retry_after_secs(), 7);
    }
}
