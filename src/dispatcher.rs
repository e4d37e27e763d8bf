//! Job dispatch and winner selection
//!
//! The dispatcher owns the current job. Each accepted job bumps a generation
//! counter, cancels the previous job's search tasks and starts one
//! [`SearchTask`] per nonce range on the blocking pool. Task results come back
//! tagged with their generation and are reduced under the state lock, so at
//! most one solution per job is ever handed to the [`SolutionSink`].

use crate::crypto::{HashEngine, PowHasher};
use crate::protocol::JobParams;
use crate::search::SearchTask;
use crate::stats::MiningStats;
use crate::types::{Job, NonceRange, SearchOutcome, Solution};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Destination for winning solutions
pub trait SolutionSink: Send + Sync + 'static {
    /// Hand a solution over for submission; must not block
    fn submit(&self, solution: Solution);
}

/// Search result tagged with the job generation it was produced for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub generation: u64,
    pub outcome: SearchOutcome,
}

/// What happened to a reported result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDisposition {
    /// The solution won and was passed to the sink
    Submitted,
    /// The range was exhausted
    Exhausted,
    /// The job already had a submission
    Duplicate,
    /// The result belonged to a superseded job
    Stale,
}

struct DispatchState {
    generation: u64,
    job: Option<Arc<Job>>,
    submitted: bool,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Fans a job out over the nonce space and reduces the results
pub struct JobDispatcher {
    engine: Arc<dyn HashEngine>,
    sink: Arc<dyn SolutionSink>,
    worker_count: usize,
    stats: Arc<MiningStats>,
    results: mpsc::UnboundedSender<TaskReport>,
    state: Mutex<DispatchState>,
}

impl JobDispatcher {
    /// Create a dispatcher together with the receiving end of its result channel
    ///
    /// Every report on the receiver must be passed to [`on_search_result`](Self::on_search_result).
    pub fn new(
        engine: Arc<dyn HashEngine>,
        sink: Arc<dyn SolutionSink>,
        worker_count: usize,
        stats: Arc<MiningStats>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TaskReport>)> {
        if worker_count == 0 {
            return Err(Error::config("worker count must be resolved before dispatching"));
        }

        let (results, results_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            engine,
            sink,
            worker_count,
            stats,
            results,
            state: Mutex::new(DispatchState {
                generation: 0,
                job: None,
                submitted: false,
                cancel: CancellationToken::new(),
                handles: Vec::new(),
            }),
        };
        Ok((dispatcher, results_rx))
    }

    /// Generation of the job currently being searched
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Id of the job currently being searched
    pub fn current_job_id(&self) -> Option<String> {
        self.state.lock().job.as_ref().map(|job| job.job_id.clone())
    }

    /// Whether the current job already has a submitted solution
    pub fn is_submitted(&self) -> bool {
        self.state.lock().submitted
    }

    /// Replace the current job and start searching it
    ///
    /// An invalid job is rejected without touching the running search. A job
    /// identical to the current one (pools resend it after every login) keeps
    /// the running search and its submission state.
    pub fn on_job(&self, params: &JobParams) -> Result<()> {
        let job = Arc::new(Job::from_params(params)?);
        if self.state.lock().job.as_deref() == Some(&*job) {
            debug!(job_id = %job.job_id, "Job already current");
            return Ok(());
        }

        let ranges = NonceRange::partition(self.worker_count)?;
        let hashers = ranges
            .iter()
            .map(|_| self.engine.create_hasher())
            .collect::<Result<Vec<Box<dyn PowHasher>>>>()?;

        let mut state = self.state.lock();
        if state.job.as_deref() == Some(&*job) {
            return Ok(());
        }
        state.cancel.cancel();
        state.handles.retain(|handle| !handle.is_finished());

        state.generation += 1;
        state.submitted = false;
        state.cancel = CancellationToken::new();
        state.job = Some(Arc::clone(&job));
        let generation = state.generation;

        for (range, hasher) in ranges.into_iter().zip(hashers) {
            let task = SearchTask::new(
                Arc::clone(&job),
                range,
                hasher,
                state.cancel.child_token(),
                self.stats.hash_counter(),
            );
            let results = self.results.clone();
            state.handles.push(tokio::task::spawn_blocking(move || {
                if let Some(outcome) = task.run() {
                    let _ = results.send(TaskReport { generation, outcome });
                }
            }));
        }
        drop(state);

        self.stats.record_job();
        info!(
            job_id = %job.job_id,
            generation,
            workers = self.worker_count,
            target = %job.target,
            "Dispatched new job"
        );
        Ok(())
    }

    /// Reduce one task result
    pub fn on_search_result(&self, report: TaskReport) -> ReportDisposition {
        let solution = match report.outcome {
            SearchOutcome::Exhausted => {
                debug!(generation = report.generation, "Search range exhausted");
                return ReportDisposition::Exhausted;
            }
            SearchOutcome::Found(solution) => solution,
        };
        self.stats.record_solution_found();

        {
            let mut state = self.state.lock();
            if report.generation != state.generation {
                debug!(
                    job_id = %solution.job_id,
                    generation = report.generation,
                    current = state.generation,
                    "Dropping solution for superseded job"
                );
                return ReportDisposition::Stale;
            }
            if state.submitted {
                debug!(job_id = %solution.job_id, nonce = %solution.nonce, "Job already submitted, dropping solution");
                return ReportDisposition::Duplicate;
            }
            state.submitted = true;
            state.cancel.cancel();
        }

        info!(
            job_id = %solution.job_id,
            nonce = %solution.nonce,
            result = %solution.digest_hex(),
            "Solution found"
        );
        self.stats.record_solution_submitted();
        self.sink.submit(solution);
        ReportDisposition::Submitted
    }

    /// Drain the result channel until it closes or `shutdown` fires
    pub async fn process_results(
        &self,
        mut results: mpsc::UnboundedReceiver<TaskReport>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                report = results.recv() => match report {
                    Some(report) => {
                        self.on_search_result(report);
                    }
                    None => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }
    }

    /// Cancel all search tasks and wait up to `timeout` for them to stop
    pub async fn shutdown(&self, timeout: Duration) {
        let handles = {
            let mut state = self.state.lock();
            state.cancel.cancel();
            std::mem::take(&mut state.handles)
        };

        let count = handles.len();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Timed out waiting for {} search tasks to stop", count);
        } else {
            debug!("Stopped {} search tasks", count);
        }
    }
}
