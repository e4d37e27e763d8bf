//! Mining coordinator
//!
//! Wires a [`PoolSession`] to a [`JobDispatcher`]: jobs from the pool start a
//! new search, winning solutions flow back through the session handle, and
//! the shared counters are logged periodically.

use crate::config::Config;
use crate::crypto::{Blake2sEngine, HashEngine};
use crate::dispatcher::JobDispatcher;
use crate::session::{PoolSession, SessionConfig, SessionEvent};
use crate::stats::MiningStats;
use crate::utils::format_hash_rate;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long shutdown waits for search tasks to stop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Main mining coordinator
pub struct MiningCoordinator {
    session_config: SessionConfig,
    engine: Arc<dyn HashEngine>,
    worker_count: usize,
    stats_interval: Duration,
    stats: Arc<MiningStats>,
}

impl MiningCoordinator {
    /// Create a coordinator
    pub fn new(
        session_config: SessionConfig,
        engine: Arc<dyn HashEngine>,
        worker_count: usize,
        stats_interval: Duration,
    ) -> Self {
        Self {
            session_config,
            engine,
            worker_count,
            stats_interval,
            stats: Arc::new(MiningStats::new()),
        }
    }

    /// Create a coordinator with the bundled hash engine
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = Blake2sEngine::init_cache(config.hash_key.as_bytes());
        Ok(Self::new(
            config.session_config()?,
            Arc::new(engine),
            config.effective_worker_count(),
            config.stats_interval()?,
        ))
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<MiningStats> {
        Arc::clone(&self.stats)
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting mining coordinator: pool={}:{}, workers={}, engine={}",
            self.session_config.host,
            self.session_config.port,
            self.worker_count,
            self.engine.name()
        );

        let (session, handle, mut events) =
            PoolSession::new(self.session_config.clone(), shutdown.child_token());
        let (dispatcher, results) = JobDispatcher::new(
            Arc::clone(&self.engine),
            Arc::new(handle),
            self.worker_count,
            Arc::clone(&self.stats),
        )?;
        let dispatcher = Arc::new(dispatcher);

        let session_task = tokio::spawn(session.run());
        let results_task = {
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.process_results(results, shutdown).await })
        };

        let mut ticker = interval_at(Instant::now() + self.stats_interval, self.stats_interval);
        let mut last_snapshot = self.stats.snapshot();
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &dispatcher),
                    None => {
                        debug!("Session event stream ended");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let snapshot = self.stats.snapshot();
                    let rate = snapshot.hash_rate_since(&last_snapshot, last_tick.elapsed().as_secs_f64());
                    info!("Stats: {} | current {}", snapshot, format_hash_rate(rate));
                    last_snapshot = snapshot;
                    last_tick = Instant::now();
                }
            }
        }

        info!("Shutting down mining coordinator");
        shutdown.cancel();
        dispatcher.shutdown(SHUTDOWN_TIMEOUT).await;
        if let Err(e) = session_task.await {
            warn!("Pool session task failed: {}", e);
        }
        if let Err(e) = results_task.await {
            warn!("Result processing task failed: {}", e);
        }

        info!("Final stats: {}", self.stats.snapshot());
        Ok(())
    }

    fn handle_event(&self, event: SessionEvent, dispatcher: &JobDispatcher) {
        match event {
            SessionEvent::Connected { host, ip } => {
                info!("Connected to pool {} ({})", host, ip);
            }
            SessionEvent::LoggedIn { session_id } => {
                debug!("Session {} established", session_id);
            }
            SessionEvent::Job(params) => {
                if let Err(e) = dispatcher.on_job(&params) {
                    warn!("Dropping job ({}): {}", e.category(), e);
                }
            }
            SessionEvent::ShareAccepted => {
                self.stats.record_share_accepted();
            }
            SessionEvent::Rejected(e) => {
                self.stats.record_share_rejected();
                warn!("{} ({})", e, e.category());
            }
            SessionEvent::Error(e) => {
                warn!("Pool session error ({}): {}", e.category(), e);
            }
            SessionEvent::Disconnected { reason } => {
                warn!(
                    "Disconnected from pool ({}), search continues on job {:?}",
                    reason,
                    dispatcher.current_job_id()
                );
            }
        }
    }
}
