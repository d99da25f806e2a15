//! Worker pool for per-tile tasks
//!
//! Tasks run on a dedicated rayon pool and report back over a channel. The
//! pool joins before returning, so a stage never observes a task still
//! writing, and results come back sorted by tile id whatever order they
//! finished in.

use crate::error::{PipelineError, Result};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiledseg_algorithms::interrupt::Interrupt;
use tiledseg_core::Error;
use tracing::debug;

/// Cooperative cancellation signal shared by a run and its caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one task may spend: stops on cancellation or past its deadline
#[derive(Debug, Clone)]
pub struct TaskBudget {
    token: CancellationToken,
    started: Instant,
    timeout: Option<Duration>,
}

impl TaskBudget {
    pub fn start(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token,
            started: Instant::now(),
            timeout,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Interrupt for TaskBudget {
    fn check(&self) -> tiledseg_core::Result<()> {
        if self.token.is_cancelled() {
            return Err(Error::Interrupted("run cancelled".into()));
        }
        if let Some(limit) = self.timeout {
            if self.started.elapsed() > limit {
                return Err(Error::Interrupted(format!(
                    "timed out after {:.1}s",
                    limit.as_secs_f64()
                )));
            }
        }
        Ok(())
    }
}

/// A fixed-size pool running one task per tile
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    token: CancellationToken,
    timeout: Option<Duration>,
}

impl WorkerPool {
    pub fn new(workers: usize, token: CancellationToken, timeout: Option<Duration>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("tiledseg-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;
        Ok(Self {
            pool,
            token,
            timeout,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Run `task` once per `(id, item)` and wait for all of them.
    ///
    /// Items not yet started when the token is cancelled are skipped; tasks
    /// already running see the cancellation through their budget. After the
    /// join a cancelled run returns `Cancelled`.
    pub fn run<I, R, F>(&self, items: Vec<(u32, I)>, task: F) -> Result<Vec<(u32, R)>>
    where
        I: Send,
        R: Send,
        F: Fn(u32, I, &TaskBudget) -> R + Sync,
    {
        let (tx, rx) = unbounded();
        let submitted = items.len();
        let task = &task;
        let token = &self.token;
        let timeout = self.timeout;

        self.pool.scope(|scope| {
            for (id, item) in items {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    if token.is_cancelled() {
                        return;
                    }
                    let budget = TaskBudget::start(token.clone(), timeout);
                    let outcome = task(id, item, &budget);
                    debug!("task {} finished in {:.2}s", id, budget.elapsed().as_secs_f64());
                    // The receiver outlives the scope
                    let _ = tx.send((id, outcome));
                });
            }
        });
        drop(tx);

        if self.token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let mut results: Vec<(u32, R)> = rx.iter().collect();
        results.sort_by_key(|(id, _)| *id);
        debug!("{} of {} tasks reported", results.len(), submitted);
        Ok(results)
    }
}
