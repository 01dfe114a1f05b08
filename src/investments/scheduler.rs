//! Investment scheduler.
//!
//! Timer-driven engine: one pending one-shot timer per active investment,
//! rehydrated from the database on start. Timers are lost on crash by
//! design; the periodic cleanup sweep re-enqueues mature rows, and the
//! status-guarded settlement collapses duplicate firings to one observable
//! effect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::db::Database;
use crate::economy::RandomSource;
use crate::error::DatabaseError;

struct Inner {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    rng: Arc<dyn RandomSource>,
    config: SchedulerConfig,
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
}

/// The timer-driven investment completion engine.
///
/// One instance per process, with explicit `start`/`stop`. The timer map's
/// mutex covers only insert/replace/remove; no lock is held across a
/// database call or a timer wait.
pub struct InvestmentScheduler {
    inner: Arc<Inner>,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

impl InvestmentScheduler {
    pub fn new(
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        rng: Arc<dyn RandomSource>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                clock,
                rng,
                config,
                timers: Mutex::new(HashMap::new()),
            }),
            cleanup: Mutex::new(None),
        }
    }

    /// Start the scheduler: rehydrate timers for every active investment
    /// that has not matured yet, and spawn the cleanup sweep.
    ///
    /// The first sweep runs immediately, so investments that matured while
    /// the process was down are settled right after bring-up.
    ///
    /// Returns the number of rehydrated timers.
    pub async fn start(&self) -> Result<usize, DatabaseError> {
        tracing::info!("Starting investment scheduler");

        let pending = self
            .inner
            .db
            .list_pending_investments(self.inner.clock.now())
            .await?;
        let count = pending.len();
        for (id, end_time) in pending {
            self.schedule_completion(id, end_time);
        }
        tracing::info!(rehydrated = count, "Rescheduled active investments");

        let inner = Arc::clone(&self.inner);
        let sweep = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.cleanup_interval);
            loop {
                interval.tick().await;
                inner.sweep_matured().await;
            }
        });
        if let Some(old) = self.cleanup.lock().expect("cleanup lock").replace(sweep) {
            old.abort();
        }

        Ok(count)
    }

    /// Stop the scheduler: cancel the sweep and all pending timers.
    /// Idempotent.
    pub fn stop(&self) {
        if let Some(sweep) = self.cleanup.lock().expect("cleanup lock").take() {
            sweep.abort();
        }

        let mut timers = self.inner.timers.lock().expect("timer map lock");
        let cancelled = timers.len();
        for (_, timer) in timers.drain() {
            timer.abort();
        }
        tracing::info!(cancelled, "Investment scheduler stopped");
    }

    /// Number of pending timers.
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.lock().expect("timer map lock").len()
    }

    /// Register a one-shot timer firing at `end_time`, replacing any prior
    /// timer for the same investment. A past `end_time` dispatches
    /// immediately on a background task.
    pub fn schedule_completion(&self, investment_id: i64, end_time: DateTime<Utc>) {
        let delay = (end_time - self.inner.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut timers = self.inner.timers.lock().expect("timer map lock");
        if let Some(old) = timers.remove(&investment_id) {
            old.abort();
        }

        let inner = Arc::clone(&self.inner);
        let timer = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.process_investment(investment_id).await;
        });
        timers.insert(investment_id, timer);
    }

    /// Settle one investment now. Duplicate calls are collapsed by the
    /// settlement's status guard.
    pub async fn process_investment(&self, investment_id: i64) {
        self.inner.process_investment(investment_id).await;
    }

    /// Settle everything active whose end time has passed.
    pub async fn sweep_matured(&self) {
        self.inner.sweep_matured().await;
    }
}

impl Inner {
    async fn process_investment(&self, investment_id: i64) {
        let unit = self.rng.unit();
        match self
            .db
            .settle_investment(investment_id, unit, self.clock.now())
            .await
        {
            Ok(Some(settled)) => {
                tracing::info!(
                    investment_id,
                    return_rate = settled.actual_return_rate,
                    returned_amount = settled.returned_amount,
                    "Investment completed"
                );
            }
            Ok(None) => {
                tracing::debug!(investment_id, "Investment already processed");
            }
            Err(e) => {
                tracing::error!(investment_id, error = %e, "Failed to process investment");
            }
        }

        // Drop without aborting: this may be our own task's handle.
        drop(
            self.timers
                .lock()
                .expect("timer map lock")
                .remove(&investment_id),
        );
    }

    /// Defensive against clock skew, missed wakeups across restarts, and
    /// timers that outlived the process.
    async fn sweep_matured(&self) {
        let matured = match self.db.list_matured_investments(self.clock.now()).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to scan for matured investments");
                return;
            }
        };

        if !matured.is_empty() {
            tracing::info!(count = matured.len(), "Processing matured investments");
        }
        for investment_id in matured {
            self.process_investment(investment_id).await;
        }
    }
}
