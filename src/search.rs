//! Nonce search over one slice of the nonce space
//!
//! A [`SearchTask`] is blocking, CPU-bound work. The dispatcher runs each one
//! on the blocking thread pool and cancels it through its token.

use crate::crypto::PowHasher;
use crate::types::{Job, NonceRange, SearchOutcome, Solution};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hashes are published to the shared counter in batches of this size
const COUNTER_BATCH: u64 = 4096;

/// Search of one nonce range for one job
pub struct SearchTask {
    job: Arc<Job>,
    range: NonceRange,
    hasher: Box<dyn PowHasher>,
    cancel: CancellationToken,
    hashes: Arc<AtomicU64>,
}

impl SearchTask {
    /// Create a search task
    pub fn new(
        job: Arc<Job>,
        range: NonceRange,
        hasher: Box<dyn PowHasher>,
        cancel: CancellationToken,
        hashes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            job,
            range,
            hasher,
            cancel,
            hashes,
        }
    }

    /// Scan the range in increasing nonce order
    ///
    /// Returns `None` if the task was cancelled before reaching an outcome.
    /// A hasher fault ends the scan and counts as exhaustion.
    pub fn run(mut self) -> Option<SearchOutcome> {
        let started = Instant::now();
        let mut candidate = self.job.blob.clone();
        let mut pending = 0u64;
        let mut scanned = 0u64;

        let outcome = 'scan: {
            for nonce in self.range.iter() {
                if self.cancel.is_cancelled() {
                    break 'scan None;
                }

                Job::inject_nonce(&mut candidate, nonce);
                let digest = match self.hasher.hash(&candidate) {
                    Ok(digest) => digest,
                    Err(e) => {
                        warn!(job_id = %self.job.job_id, range = %self.range, "Hash fault, abandoning range: {}", e);
                        break 'scan Some(SearchOutcome::Exhausted);
                    }
                };

                scanned += 1;
                pending += 1;
                if pending == COUNTER_BATCH {
                    self.hashes.fetch_add(pending, Ordering::Relaxed);
                    pending = 0;
                }

                if self.job.target.is_met_by(&digest) {
                    break 'scan Some(SearchOutcome::Found(Solution {
                        job_id: self.job.job_id.clone(),
                        nonce,
                        digest,
                    }));
                }
            }
            Some(SearchOutcome::Exhausted)
        };

        self.hashes.fetch_add(pending, Ordering::Relaxed);

        debug!(
            job_id = %self.job.job_id,
            range = %self.range,
            hashes = scanned,
            elapsed_ms = started.elapsed().as_millis() as u64,
            result = match &outcome {
                Some(SearchOutcome::Found(_)) => "found",
                Some(SearchOutcome::Exhausted) => "exhausted",
                None => "cancelled",
            },
            "Search task finished"
        );

        outcome
    }
}
