//! Shared request-rate governor
//!
//! Bounds the aggregate rate of outbound platform calls across every
//! concurrent worker: at most `limit` admissions are granted in any rolling
//! window of length `period`.
//!
//! The governor keeps a log of recent grant instants. The log sits behind a
//! tokio mutex, which hands out the lock in FIFO order, so a caller that
//! has to wait for the window to slide keeps its place in line and later
//! callers cannot overtake it. Exceeding the rate only ever delays a caller.
//!
//! Time comes from `tokio::time::Instant`, so tests run against tokio's
//! paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Stand-in wait when a window end is past what `Instant` can represent
const UNREPRESENTABLE_WAIT: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Proof that a caller was admitted
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    /// When the admission was granted
    pub granted_at: Instant,

    /// How long the caller waited for it
    pub waited: Duration,
}

/// Counters describing governor activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GovernorStats {
    pub admissions: u64,
    pub delayed: u64,
    pub total_wait: Duration,
}

/// Sliding-window rate governor
pub struct RateGovernor {
    limit: usize,
    period: Duration,
    log: Mutex<VecDeque<Instant>>,
    admissions: AtomicU64,
    delayed: AtomicU64,
    wait_micros: AtomicU64,
}

impl RateGovernor {
    /// Create a governor admitting `limit` calls per `period`
    ///
    /// `limit` is clamped to at least one; configuration validation rejects
    /// zero before it gets here.
    pub fn new(limit: u32, period: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            period,
            log: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            admissions: AtomicU64::new(0),
            delayed: AtomicU64::new(0),
            wait_micros: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until a call may be issued
    pub async fn acquire(&self) -> Admission {
        let requested = Instant::now();
        let mut log = self.log.lock().await;

        loop {
            let now = Instant::now();
            while let Some(&oldest) = log.front() {
                if now.duration_since(oldest) >= self.period {
                    log.pop_front();
                } else {
                    break;
                }
            }

            if log.len() < self.limit {
                log.push_back(now);
                let waited = now.duration_since(requested);
                self.record(waited);
                return Admission {
                    granted_at: now,
                    waited,
                };
            }

            // Window is full: the oldest grant leaves it after `period`
            let reopen = log[0]
                .checked_add(self.period)
                .unwrap_or_else(|| now + UNREPRESENTABLE_WAIT);
            trace!(wait_ms = reopen.duration_since(now).as_millis() as u64, "Rate window full");
            sleep_until(reopen).await;
        }
    }

    fn record(&self, waited: Duration) {
        self.admissions.fetch_add(1, Ordering::Relaxed);
        if !waited.is_zero() {
            self.delayed.fetch_add(1, Ordering::Relaxed);
            self.wait_micros
                .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        }
    }

    /// Snapshot of governor counters
    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            admissions: self.admissions.load(Ordering::Relaxed),
            delayed: self.delayed.load(Ordering::Relaxed),
            total_wait: Duration::from_micros(self.wait_micros.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_limit_is_immediate() {
        let governor = RateGovernor::new(5, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..5 {
            let admission = governor.acquire().await;
            assert!(admission.waited.is_zero());
        }
        assert_eq!(Instant::now(), start);

        let sixth = governor.acquire().await;
        assert_eq!(sixth.granted_at.duration_since(start), Duration::from_secs(1));
        assert_eq!(governor.stats().admissions, 6);
        assert_eq!(governor.stats().delayed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_times_rate_never_exceeds_window() {
        let limit = 10u32;
        let period = Duration::from_secs(2);
        let governor = Arc::new(RateGovernor::new(limit, period));

        // 3x the configured rate: 30 calls requested per period, for 20 periods
        let interval = period / (limit * 3);
        let mut handles = Vec::new();
        for i in 0..(limit * 3 * 20) {
            let governor = Arc::clone(&governor);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(interval * i).await;
                governor.acquire().await.granted_at
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        for (i, start) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|g| g.duration_since(*start) < period)
                .count();
            assert!(
                in_window <= limit as usize,
                "window starting at grant {} holds {} admissions",
                i,
                in_window
            );
        }
        assert_eq!(governor.stats().admissions, (limit * 3 * 20) as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_waits_instead_of_overflowing() {
        let governor = RateGovernor::new(1, Duration::from_secs(u64::MAX));
        assert!(governor.acquire().await.waited.is_zero());

        let second = tokio::time::timeout(Duration::from_secs(5), governor.acquire()).await;
        assert!(second.is_err());
        assert_eq!(governor.stats().admissions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_are_served_in_arrival_order() {
        let governor = Arc::new(RateGovernor::new(1, Duration::from_millis(100)));
        governor.acquire().await;

        let mut handles = Vec::new();
        for id in 0..5u32 {
            let governor = Arc::clone(&governor);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(id as u64)).await;
                (id, governor.acquire().await.granted_at)
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results.sort_by_key(|(_, at)| *at);
        let order: Vec<u32> = results.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
