//! Job progress ticker.
//!
//! A periodic scan-and-converge loop: every tick recomputes wall-clock
//! progress for all live assignments, applies the increases in one
//! transaction, then completes anything at 100 % through the exactly-once
//! path. The ticker keeps no in-memory state between ticks, so restart
//! recovery is just the next tick.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::TickerConfig;
use crate::db::{Database, ProgressUpdate};
use crate::economy;
use crate::error::{AssignmentError, DatabaseError};
use crate::model::AssignmentStatus;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSummary {
    /// Live progress rows scanned.
    pub scanned: usize,
    /// Rows whose progress advanced.
    pub updated: usize,
    /// Assignments completed this tick.
    pub completed: usize,
    /// The tick ran out of budget and abandoned remaining work.
    pub budget_exhausted: bool,
}

struct Inner {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    config: TickerConfig,
}

/// The periodic job progress engine.
///
/// One instance per process; `start` is a no-op when already running.
pub struct JobTicker {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobTicker {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>, config: TickerConfig) -> Self {
        Self {
            inner: Arc::new(Inner { db, clock, config }),
            task: Mutex::new(None),
        }
    }

    /// Start the tick loop on a background task.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            tracing::info!("Job ticker is disabled, not starting");
            return;
        }

        let mut task = self.task.lock().expect("ticker task lock");
        if task.is_some() {
            tracing::info!("Job ticker already running");
            return;
        }

        tracing::info!(interval = ?self.inner.config.interval, "Starting job ticker");
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.interval);
            loop {
                // The first tick fires immediately, converging state left
                // over from before a restart.
                interval.tick().await;
                if let Err(e) = inner.run_tick().await {
                    tracing::error!(error = %e, "Job ticker tick failed");
                }
            }
        }));
    }

    /// Stop the tick loop. Idempotent.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().expect("ticker task lock").take() {
            task.abort();
            tracing::info!("Job ticker stopped");
        }
    }

    /// Whether the tick loop is currently running.
    pub fn is_running(&self) -> bool {
        self.task.lock().expect("ticker task lock").is_some()
    }

    /// Run a single tick under the configured budget.
    pub async fn run_tick(&self) -> Result<TickSummary, DatabaseError> {
        self.inner.run_tick().await
    }
}

impl Inner {
    /// Run a single tick under the configured budget.
    ///
    /// Exceeding the budget abandons the remaining work; progress updates
    /// are idempotent and monotonic, so the next tick picks it back up.
    async fn run_tick(&self) -> Result<TickSummary, DatabaseError> {
        match tokio::time::timeout(self.config.tick_budget, self.tick_inner()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(budget = ?self.config.tick_budget, "Tick exceeded budget, abandoning");
                Ok(TickSummary {
                    budget_exhausted: true,
                    ..TickSummary::default()
                })
            }
        }
    }

    async fn tick_inner(&self) -> Result<TickSummary, DatabaseError> {
        let scans = self.db.list_active_progress().await?;
        let now = self.clock.now();

        let mut updates = Vec::new();
        for scan in &scans {
            let new_progress =
                economy::progress_at(now, scan.actual_start_time, scan.expected_end_time);
            // Only increases are applied; equal or lower recomputations are
            // dropped here so the tick is idempotent.
            if new_progress > scan.progress_percentage {
                updates.push(ProgressUpdate {
                    progress_id: scan.progress_id,
                    assignment_id: scan.assignment_id,
                    new_progress,
                    time_worked_minutes: economy::minutes_worked(now, scan.actual_start_time),
                    mark_in_progress: scan.assignment_status == AssignmentStatus::Assigned
                        && new_progress > 0,
                });
            }
        }

        if !updates.is_empty() {
            self.db.apply_progress_updates(&updates, now).await?;
        }

        // Completion runs after the progress commit, one transaction per
        // assignment, so the batch update stays small and each completion
        // is individually idempotent.
        let completable = self.db.list_completable_assignments().await?;
        let mut completed = 0;
        for assignment_id in completable {
            match self.db.complete_assignment(assignment_id, now).await {
                Ok(done) => {
                    completed += 1;
                    tracing::info!(
                        assignment_id,
                        mana = done.mana_awarded,
                        exp = done.exp_awarded,
                        "Auto-completed finished job"
                    );
                }
                Err(AssignmentError::NotFound { .. }) => {
                    // Someone else finalized it between scan and complete.
                    tracing::debug!(assignment_id, "Assignment already finalized, skipping");
                }
                Err(e) => {
                    tracing::error!(assignment_id, error = %e, "Failed to auto-complete assignment");
                }
            }
        }

        Ok(TickSummary {
            scanned: scans.len(),
            updated: updates.len(),
            completed,
            budget_exhausted: false,
        })
    }
}
