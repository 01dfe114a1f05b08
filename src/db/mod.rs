//! Persistence contract.
//!
//! The [`Database`] trait is the transactional surface the lifecycle
//! managers and both engines rely on. Every method that mutates state is
//! one database transaction with the row-lock and status-guard discipline
//! the invariants demand; gets are plain reads. The production
//! implementation is PostgreSQL behind `deadpool-postgres` (feature
//! `postgres`, default); `crate::testing` provides an in-memory
//! implementation for deterministic engine tests.

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AssignmentError, DatabaseError, InvestmentError, WizardError};
use crate::model::{
    ActivityLog, AssignmentDetail, AssignmentStatus, InvestmentDetail, InvestmentStatus,
    InvestmentType, Job, JobAssignment, JobProgress, ManaTransaction, NewInvestmentType, NewJob,
    NewWizard, Page, Wizard, WizardInvestment,
};

/// Create the default database backend from configuration and run migrations.
#[cfg(feature = "postgres")]
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<std::sync::Arc<dyn Database>, DatabaseError> {
    let backend = postgres::PgBackend::new(config)?;
    backend.run_migrations().await?;
    Ok(std::sync::Arc::new(backend))
}

/// One row of the ticker's scan: an active progress row joined with its
/// assignment status.
#[derive(Debug, Clone)]
pub struct ProgressScan {
    pub progress_id: i64,
    pub assignment_id: i64,
    pub actual_start_time: DateTime<Utc>,
    pub expected_end_time: DateTime<Utc>,
    pub progress_percentage: i32,
    pub assignment_status: AssignmentStatus,
}

/// One computed progress update to apply in the per-tick transaction.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub progress_id: i64,
    pub assignment_id: i64,
    pub new_progress: i32,
    pub time_worked_minutes: i32,
    /// Transition the assignment `assigned → in_progress`.
    pub mark_in_progress: bool,
}

/// Outcome of the exactly-once completion path.
#[derive(Debug, Clone)]
pub struct CompletedAssignment {
    pub assignment: JobAssignment,
    pub mana_awarded: i64,
    pub exp_awarded: i32,
    pub new_balance: i64,
    pub new_level: i32,
    pub leveled_up: bool,
}

/// Outcome of the exactly-once investment settlement path.
#[derive(Debug, Clone)]
pub struct SettledInvestment {
    pub id: i64,
    pub wizard_id: i64,
    pub amount: i64,
    pub actual_return_rate: f64,
    pub returned_amount: i64,
    pub new_balance: i64,
}

/// Filter for the assignment listing surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentFilter {
    pub wizard_id: Option<i64>,
    pub job_id: Option<i64>,
    pub status: Option<AssignmentStatus>,
}

/// Filter for the investment type listing surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvestmentTypeFilter {
    pub min_amount: Option<i64>,
    pub max_amount: Option<i64>,
    pub risk_level: Option<i32>,
}

/// Backend-agnostic persistence trait.
///
/// Status-guarded mutations (`complete_assignment`, `settle_investment`,
/// `cancel_assignment`) are the exactly-once fences: a guard that matches
/// no row reports `NotFound`/`None` and the caller treats that as an
/// idempotent no-op.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ==================== Wizards & balances ====================

    /// Create a wizard, enforcing the per-user ownership limit.
    async fn create_wizard(&self, new: &NewWizard) -> Result<Wizard, WizardError>;

    /// Get a wizard by id.
    async fn get_wizard(&self, id: i64) -> Result<Option<Wizard>, DatabaseError>;

    /// List wizards, optionally restricted to one owning user.
    async fn list_wizards(
        &self,
        user_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Wizard>, DatabaseError>;

    /// Read a wizard's mana balance.
    async fn get_mana_balance(&self, wizard_id: i64) -> Result<i64, WizardError>;

    /// Apply a signed delta to a wizard's balance under a row lock.
    ///
    /// Rejects a mutation that would make the balance negative. When a
    /// reason is given, a ledger row and an activity log entry commit with
    /// the mutation. Returns the new balance.
    async fn update_mana_balance(
        &self,
        wizard_id: i64,
        delta: i64,
        reason: Option<&str>,
    ) -> Result<i64, WizardError>;

    /// Move mana between two wizards in one transaction.
    async fn transfer_mana(
        &self,
        from_wizard_id: i64,
        to_wizard_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<(), WizardError>;

    /// List ledger rows touching a wizard, most recent first.
    async fn list_transactions(
        &self,
        wizard_id: i64,
        page: Page,
    ) -> Result<Vec<ManaTransaction>, DatabaseError>;

    // ==================== Jobs ====================

    async fn create_job(&self, new: &NewJob) -> Result<Job, DatabaseError>;

    async fn get_job(&self, id: i64) -> Result<Option<Job>, DatabaseError>;

    async fn list_jobs(
        &self,
        realm: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<Job>, DatabaseError>;

    // ==================== Assignments ====================

    /// Assign a wizard to a job.
    ///
    /// One transaction: eligibility checks, guarded capacity increment,
    /// assignment insert (the partial unique index rejects a duplicate
    /// live assignment), progress row insert, activity log.
    async fn assign_wizard(
        &self,
        wizard_id: i64,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> Result<JobAssignment, AssignmentError>;

    async fn get_assignment(&self, id: i64) -> Result<Option<JobAssignment>, DatabaseError>;

    /// List assignments with nested job and progress.
    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
        page: Page,
    ) -> Result<Vec<AssignmentDetail>, DatabaseError>;

    /// Client-hinted progress update. Monotonic: a lower value keeps the
    /// stored one. Crossing 100 deactivates the progress row but never
    /// completes the assignment; only `complete_assignment` does that.
    async fn update_progress(
        &self,
        assignment_id: i64,
        progress: i32,
        time_worked_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<JobProgress, AssignmentError>;

    /// The single exactly-once completion path.
    ///
    /// The status-guarded select is the fence: when the assignment is not
    /// in a payable state any more this returns `NotFound` and nothing is
    /// mutated.
    async fn complete_assignment(
        &self,
        assignment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CompletedAssignment, AssignmentError>;

    /// Cancel a non-terminal assignment. Pays nothing.
    async fn cancel_assignment(
        &self,
        assignment_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<JobAssignment, AssignmentError>;

    async fn get_progress(
        &self,
        assignment_id: i64,
    ) -> Result<Option<JobProgress>, DatabaseError>;

    // ==================== Ticker scan ====================

    /// All active progress rows whose assignment is still live and whose
    /// time bounds are set.
    async fn list_active_progress(&self) -> Result<Vec<ProgressScan>, DatabaseError>;

    /// Apply a batch of computed progress updates in one transaction.
    async fn apply_progress_updates(
        &self,
        updates: &[ProgressUpdate],
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Assignment ids at 100 % progress whose assignment is not terminal.
    async fn list_completable_assignments(&self) -> Result<Vec<i64>, DatabaseError>;

    // ==================== Investments ====================

    async fn create_investment_type(
        &self,
        new: &NewInvestmentType,
    ) -> Result<InvestmentType, DatabaseError>;

    async fn get_investment_type(
        &self,
        id: i64,
    ) -> Result<Option<InvestmentType>, DatabaseError>;

    async fn list_investment_types(
        &self,
        filter: &InvestmentTypeFilter,
    ) -> Result<Vec<InvestmentType>, DatabaseError>;

    /// Deduct the principal and insert the investment row in one
    /// transaction. Timer registration is the caller's concern.
    async fn create_investment(
        &self,
        wizard_id: i64,
        investment_type_id: i64,
        amount: i64,
        now: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<WizardInvestment, InvestmentError>;

    async fn list_investments(
        &self,
        wizard_id: i64,
        status: Option<InvestmentStatus>,
    ) -> Result<Vec<InvestmentDetail>, DatabaseError>;

    /// Active investments maturing in the future: `(id, end_time)` pairs
    /// for scheduler rehydration.
    async fn list_pending_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, DateTime<Utc>)>, DatabaseError>;

    /// Active investments whose end time has already passed.
    async fn list_matured_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, DatabaseError>;

    /// The exactly-once settlement path.
    ///
    /// `unit` is the uniform sample for the return calculation. Returns
    /// `Ok(None)` when the status guard matches no row (already settled).
    async fn settle_investment(
        &self,
        investment_id: i64,
        unit: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettledInvestment>, InvestmentError>;

    // ==================== Activity ====================

    /// List audit entries for a user, most recent first.
    async fn list_activities(
        &self,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<ActivityLog>, DatabaseError>;
}
