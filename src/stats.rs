//! Shared mining counters

use crate::utils::{format_duration, format_hash_rate};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Thread-safe counters updated by the session, dispatcher and search tasks
#[derive(Debug)]
pub struct MiningStats {
    hashes: Arc<AtomicU64>,
    jobs_received: AtomicU64,
    solutions_found: AtomicU64,
    solutions_submitted: AtomicU64,
    shares_accepted: AtomicU64,
    shares_rejected: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of [`MiningStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    pub total_hashes: u64,
    pub jobs_received: u64,
    pub solutions_found: u64,
    pub solutions_submitted: u64,
    pub shares_accepted: u64,
    pub shares_rejected: u64,
    pub uptime_secs: u64,
    pub average_hash_rate: f64,
}

impl MiningStats {
    pub fn new() -> Self {
        Self {
            hashes: Arc::new(AtomicU64::new(0)),
            jobs_received: AtomicU64::new(0),
            solutions_found: AtomicU64::new(0),
            solutions_submitted: AtomicU64::new(0),
            shares_accepted: AtomicU64::new(0),
            shares_rejected: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Hash counter handed to search tasks
    pub fn hash_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.hashes)
    }

    pub fn record_job(&self) {
        self.jobs_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_solution_found(&self) {
        self.solutions_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_solution_submitted(&self) {
        self.solutions_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_share_accepted(&self) {
        self.shares_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_share_rejected(&self) {
        self.shares_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_hashes = self.hashes.load(Ordering::Relaxed);
        let elapsed = self.start_time.elapsed();
        let elapsed_secs = elapsed.as_secs_f64();

        StatsSnapshot {
            total_hashes,
            jobs_received: self.jobs_received.load(Ordering::Relaxed),
            solutions_found: self.solutions_found.load(Ordering::Relaxed),
            solutions_submitted: self.solutions_submitted.load(Ordering::Relaxed),
            shares_accepted: self.shares_accepted.load(Ordering::Relaxed),
            shares_rejected: self.shares_rejected.load(Ordering::Relaxed),
            uptime_secs: elapsed.as_secs(),
            average_hash_rate: if elapsed_secs > 0.0 {
                total_hashes as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }
}

impl Default for MiningStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Hash rate over the interval since an earlier snapshot
    pub fn hash_rate_since(&self, earlier: &StatsSnapshot, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.total_hashes.saturating_sub(earlier.total_hashes) as f64 / elapsed_secs
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uptime {}, {} hashes ({}), jobs {}, found {}, submitted {}, accepted {}, rejected {}",
            format_duration(self.uptime_secs),
            self.total_hashes,
            format_hash_rate(self.average_hash_rate),
            self.jobs_received,
            self.solutions_found,
            self.solutions_submitted,
            self.shares_accepted,
            self.shares_rejected
        )
    }
}
