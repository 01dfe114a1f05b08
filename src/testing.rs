//! Test harness: an in-memory [`Database`] implementation plus seed
//! helpers.
//!
//! `MemoryBackend` mirrors the PostgreSQL backend's transactional
//! semantics (status guards, capacity guard, monotonic progress, balance
//! non-negativity, the one-live-assignment constraint) over a single
//! mutex-held state, so engine and service tests run deterministically
//! without a server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{
    AssignmentFilter, CompletedAssignment, Database, InvestmentTypeFilter, ProgressScan,
    ProgressUpdate, SettledInvestment,
};
use crate::economy;
use crate::error::{AssignmentError, DatabaseError, InvestmentError, WizardError};
use crate::model::{
    ActivityLog, AssignmentDetail, AssignmentStatus, InvestmentDetail, InvestmentStatus,
    InvestmentType, Job, JobAssignment, JobProgress, ManaTransaction, NewInvestmentType, NewJob,
    NewWizard, Page, Wizard, WizardInvestment,
};

const WIZARDS_PER_USER: usize = 2;

#[derive(Default)]
struct State {
    wizards: HashMap<i64, Wizard>,
    jobs: HashMap<i64, Job>,
    assignments: HashMap<i64, JobAssignment>,
    progress: HashMap<i64, JobProgress>,
    investment_types: HashMap<i64, InvestmentType>,
    investments: HashMap<i64, WizardInvestment>,
    transactions: Vec<ManaTransaction>,
    activities: Vec<ActivityLog>,
    next_id: i64,
}

impl State {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_transaction(
        &mut self,
        from: Option<i64>,
        to: Option<i64>,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        let id = self.alloc();
        self.transactions.push(ManaTransaction {
            id,
            from_wizard_id: from,
            to_wizard_id: to,
            amount,
            reason: reason.to_string(),
            created_at: now,
        });
    }

    fn push_activity(
        &mut self,
        user_id: i64,
        wizard_id: Option<i64>,
        activity_type: &str,
        description: String,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) {
        let id = self.alloc();
        self.activities.push(ActivityLog {
            id,
            user_id,
            wizard_id,
            activity_type: activity_type.to_string(),
            description,
            metadata,
            created_at: now,
        });
    }

    fn progress_for_assignment_mut(&mut self, assignment_id: i64) -> Option<&mut JobProgress> {
        self.progress
            .values_mut()
            .find(|p| p.assignment_id == assignment_id)
    }
}

/// In-memory implementation of the persistence contract.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, typed as the trait object services expect.
    pub fn shared() -> (Arc<Self>, Arc<dyn Database>) {
        let backend = Arc::new(Self::new());
        let db: Arc<dyn Database> = backend.clone();
        (backend, db)
    }

    /// Seed a wizard with explicit stats, bypassing the ownership limit.
    pub fn seed_wizard(
        &self,
        user_id: i64,
        name: &str,
        element: &str,
        level: i32,
        mana_balance: i64,
    ) -> Wizard {
        let now = Utc::now();
        let mut state = self.state.lock().expect("state lock");
        let id = state.alloc();
        let wizard = Wizard {
            id,
            user_id,
            name: name.to_string(),
            realm: "Pyrrhian Flame".to_string(),
            element: element.to_string(),
            mana_balance,
            experience_points: (level - 1) * economy::EXP_PER_LEVEL,
            level,
            guild_id: None,
            created_at: now,
            updated_at: now,
        };
        state.wizards.insert(id, wizard.clone());
        wizard
    }

    /// Seed a job open for assignment.
    pub fn seed_job(&self, new: NewJob) -> Job {
        let now = Utc::now();
        let mut state = self.state.lock().expect("state lock");
        let id = state.alloc();
        let job = Job {
            id,
            realm: new.realm,
            title: new.title,
            description: new.description,
            required_element: new.required_element,
            required_level: new.required_level,
            mana_reward_per_hour: new.mana_reward_per_hour,
            exp_reward_per_hour: new.exp_reward_per_hour,
            duration_minutes: new.duration_minutes,
            max_wizards: new.max_wizards,
            currently_assigned: 0,
            is_active: true,
            created_at: now,
        };
        state.jobs.insert(id, job.clone());
        job
    }

    /// Seed an investment type.
    pub fn seed_investment_type(&self, new: NewInvestmentType) -> InvestmentType {
        let mut state = self.state.lock().expect("state lock");
        let id = state.alloc();
        let itype = InvestmentType {
            id,
            name: new.name,
            description: new.description,
            min_amount: new.min_amount,
            max_amount: new.max_amount,
            duration_hours: new.duration_hours,
            base_return_rate: new.base_return_rate,
            risk_level: new.risk_level,
            is_active: true,
        };
        state.investment_types.insert(id, itype.clone());
        itype
    }

    /// Ledger rows recorded so far, oldest first.
    pub fn transactions(&self) -> Vec<ManaTransaction> {
        self.state.lock().expect("state lock").transactions.clone()
    }

    /// Activity entries recorded so far, oldest first.
    pub fn activities(&self) -> Vec<ActivityLog> {
        self.state.lock().expect("state lock").activities.clone()
    }
}

#[async_trait]
impl Database for MemoryBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }

    // ==================== Wizards & balances ====================

    async fn create_wizard(&self, new: &NewWizard) -> Result<Wizard, WizardError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("state lock");
        let owned = state
            .wizards
            .values()
            .filter(|w| w.user_id == new.user_id)
            .count();
        if owned >= WIZARDS_PER_USER {
            return Err(WizardError::WizardLimitReached {
                user_id: new.user_id,
                max: WIZARDS_PER_USER,
            });
        }

        let id = state.alloc();
        let wizard = Wizard {
            id,
            user_id: new.user_id,
            name: new.name.clone(),
            realm: new.realm.clone(),
            element: new.element.clone(),
            mana_balance: 0,
            experience_points: 0,
            level: 1,
            guild_id: None,
            created_at: now,
            updated_at: now,
        };
        state.wizards.insert(id, wizard.clone());
        state.push_activity(
            new.user_id,
            Some(id),
            "wizard_created",
            format!("Wizard {} joined the {} realm", wizard.name, wizard.realm),
            serde_json::json!({ "element": wizard.element }),
            now,
        );
        Ok(wizard)
    }

    async fn get_wizard(&self, id: i64) -> Result<Option<Wizard>, DatabaseError> {
        Ok(self.state.lock().expect("state lock").wizards.get(&id).cloned())
    }

    async fn list_wizards(
        &self,
        user_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Wizard>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut wizards: Vec<_> = state
            .wizards
            .values()
            .filter(|w| user_id.is_none_or(|u| w.user_id == u))
            .cloned()
            .collect();
        wizards.sort_by_key(|w| w.id);
        Ok(wizards
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    async fn get_mana_balance(&self, wizard_id: i64) -> Result<i64, WizardError> {
        let state = self.state.lock().expect("state lock");
        state
            .wizards
            .get(&wizard_id)
            .map(|w| w.mana_balance)
            .ok_or(WizardError::NotFound { id: wizard_id })
    }

    async fn update_mana_balance(
        &self,
        wizard_id: i64,
        delta: i64,
        reason: Option<&str>,
    ) -> Result<i64, WizardError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("state lock");
        let wizard = state
            .wizards
            .get(&wizard_id)
            .ok_or(WizardError::NotFound { id: wizard_id })?;
        let balance = wizard.mana_balance;
        let user_id = wizard.user_id;
        if balance + delta < 0 {
            return Err(WizardError::InsufficientMana {
                balance,
                required: -delta,
            });
        }

        let new_balance = balance + delta;
        {
            let wizard = state.wizards.get_mut(&wizard_id).expect("checked above");
            wizard.mana_balance = new_balance;
            wizard.updated_at = now;
        }

        if let Some(reason) = reason {
            if delta != 0 {
                let (from, to, amount) = if delta > 0 {
                    (None, Some(wizard_id), delta)
                } else {
                    (Some(wizard_id), None, -delta)
                };
                state.push_transaction(from, to, amount, reason, now);
            }
            state.push_activity(
                user_id,
                Some(wizard_id),
                "mana_update",
                reason.to_string(),
                serde_json::json!({ "delta": delta, "new_balance": new_balance }),
                now,
            );
        }
        Ok(new_balance)
    }

    async fn transfer_mana(
        &self,
        from_wizard_id: i64,
        to_wizard_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<(), WizardError> {
        let now = Utc::now();
        let mut state = self.state.lock().expect("state lock");

        let sender = state
            .wizards
            .get(&from_wizard_id)
            .ok_or(WizardError::NotFound { id: from_wizard_id })?
            .clone();
        let receiver = state
            .wizards
            .get(&to_wizard_id)
            .ok_or(WizardError::NotFound { id: to_wizard_id })?
            .clone();

        if sender.mana_balance < amount {
            return Err(WizardError::InsufficientMana {
                balance: sender.mana_balance,
                required: amount,
            });
        }

        state
            .wizards
            .get_mut(&from_wizard_id)
            .expect("sender")
            .mana_balance -= amount;
        state
            .wizards
            .get_mut(&to_wizard_id)
            .expect("receiver")
            .mana_balance += amount;
        state.push_transaction(
            Some(from_wizard_id),
            Some(to_wizard_id),
            amount,
            reason,
            now,
        );
        state.push_activity(
            sender.user_id,
            Some(from_wizard_id),
            "mana_transfer",
            format!("Sent {} mana to {}", amount, receiver.name),
            serde_json::json!({ "to_wizard_id": to_wizard_id, "amount": amount }),
            now,
        );
        state.push_activity(
            receiver.user_id,
            Some(to_wizard_id),
            "mana_transfer",
            format!("Received {} mana from {}", amount, sender.name),
            serde_json::json!({ "from_wizard_id": from_wizard_id, "amount": amount }),
            now,
        );
        Ok(())
    }

    async fn list_transactions(
        &self,
        wizard_id: i64,
        page: Page,
    ) -> Result<Vec<ManaTransaction>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut rows: Vec<_> = state
            .transactions
            .iter()
            .filter(|t| t.from_wizard_id == Some(wizard_id) || t.to_wizard_id == Some(wizard_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }

    // ==================== Jobs ====================

    async fn create_job(&self, new: &NewJob) -> Result<Job, DatabaseError> {
        Ok(self.seed_job(new.clone()))
    }

    async fn get_job(&self, id: i64) -> Result<Option<Job>, DatabaseError> {
        Ok(self.state.lock().expect("state lock").jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        realm: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<Job>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|j| realm.is_none_or(|r| j.realm == r))
            .filter(|j| !active_only || j.is_active)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    // ==================== Assignments ====================

    async fn assign_wizard(
        &self,
        wizard_id: i64,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> Result<JobAssignment, AssignmentError> {
        let mut state = self.state.lock().expect("state lock");

        let job = state
            .jobs
            .get(&job_id)
            .filter(|j| j.is_active)
            .ok_or(AssignmentError::JobNotFound { id: job_id })?
            .clone();
        if job.currently_assigned >= job.max_wizards {
            return Err(AssignmentError::JobFull { id: job_id });
        }

        let wizard = state
            .wizards
            .get(&wizard_id)
            .ok_or(AssignmentError::WizardNotFound { id: wizard_id })?
            .clone();
        if wizard.element != job.required_element {
            return Err(AssignmentError::ElementMismatch {
                wizard_element: wizard.element.clone(),
                required_element: job.required_element.clone(),
            });
        }
        if wizard.level < job.required_level {
            return Err(AssignmentError::LevelTooLow {
                wizard_level: wizard.level,
                required_level: job.required_level,
            });
        }

        let duplicate = state
            .assignments
            .values()
            .any(|a| a.job_id == job_id && a.wizard_id == wizard_id && !a.status.is_terminal());
        if duplicate {
            return Err(AssignmentError::AlreadyAssigned { wizard_id, job_id });
        }

        let assignment_id = state.alloc();
        let assignment = JobAssignment {
            id: assignment_id,
            job_id,
            wizard_id,
            status: AssignmentStatus::Assigned,
            assigned_at: now,
            started_at: None,
            completed_at: None,
            mana_earned: None,
            exp_earned: None,
            notes: None,
        };
        state.assignments.insert(assignment_id, assignment.clone());
        state.jobs.get_mut(&job_id).expect("job").currently_assigned += 1;

        let progress_id = state.alloc();
        state.progress.insert(
            progress_id,
            JobProgress {
                id: progress_id,
                assignment_id,
                actual_start_time: Some(now),
                expected_end_time: Some(
                    now + chrono::Duration::minutes(i64::from(job.duration_minutes)),
                ),
                progress_percentage: 0,
                time_worked_minutes: 0,
                is_active: true,
                last_tick_time: None,
                last_updated_at: now,
            },
        );
        state.push_activity(
            wizard.user_id,
            Some(wizard_id),
            "job_assigned",
            format!("{} took the job \"{}\"", wizard.name, job.title),
            serde_json::json!({ "job_id": job_id, "assignment_id": assignment_id }),
            now,
        );

        Ok(assignment)
    }

    async fn get_assignment(&self, id: i64) -> Result<Option<JobAssignment>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("state lock")
            .assignments
            .get(&id)
            .cloned())
    }

    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
        page: Page,
    ) -> Result<Vec<AssignmentDetail>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut assignments: Vec<_> = state
            .assignments
            .values()
            .filter(|a| filter.wizard_id.is_none_or(|w| a.wizard_id == w))
            .filter(|a| filter.job_id.is_none_or(|j| a.job_id == j))
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        assignments.sort_by(|a, b| b.id.cmp(&a.id));

        Ok(assignments
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .filter_map(|assignment| {
                let job = state.jobs.get(&assignment.job_id)?.clone();
                let progress = state
                    .progress
                    .values()
                    .find(|p| p.assignment_id == assignment.id)
                    .cloned();
                Some(AssignmentDetail {
                    assignment,
                    job,
                    progress,
                })
            })
            .collect())
    }

    async fn update_progress(
        &self,
        assignment_id: i64,
        progress: i32,
        time_worked_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<JobProgress, AssignmentError> {
        let mut state = self.state.lock().expect("state lock");

        let status = state
            .assignments
            .get(&assignment_id)
            .map(|a| a.status)
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;
        if status.is_terminal() {
            return Err(AssignmentError::AlreadyTerminal {
                id: assignment_id,
                status: status.to_string(),
            });
        }

        let clamped = progress.clamp(0, 100);
        let row = state
            .progress_for_assignment_mut(assignment_id)
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;
        if clamped <= row.progress_percentage {
            return Ok(row.clone());
        }

        row.progress_percentage = clamped;
        row.time_worked_minutes = time_worked_minutes.max(0);
        row.is_active = clamped < 100;
        row.last_updated_at = now;
        let updated = row.clone();

        if status == AssignmentStatus::Assigned && clamped > 0 {
            let assignment = state
                .assignments
                .get_mut(&assignment_id)
                .expect("checked above");
            assignment.status = AssignmentStatus::InProgress;
            assignment.started_at.get_or_insert(now);
        }

        Ok(updated)
    }

    async fn complete_assignment(
        &self,
        assignment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CompletedAssignment, AssignmentError> {
        let mut state = self.state.lock().expect("state lock");

        // Status guard: the exactly-once fence.
        let assignment = state
            .assignments
            .get(&assignment_id)
            .filter(|a| !a.status.is_terminal())
            .ok_or(AssignmentError::NotFound { id: assignment_id })?
            .clone();

        let job = state
            .jobs
            .get(&assignment.job_id)
            .ok_or(AssignmentError::JobNotFound {
                id: assignment.job_id,
            })?
            .clone();
        let wizard = state
            .wizards
            .get(&assignment.wizard_id)
            .ok_or(AssignmentError::WizardNotFound {
                id: assignment.wizard_id,
            })?
            .clone();

        let (mana_awarded, exp_awarded) = economy::job_reward(
            job.mana_reward_per_hour,
            job.exp_reward_per_hour,
            job.duration_minutes,
        );
        let new_exp = wizard.experience_points + exp_awarded;
        let new_level = economy::level_for_exp(new_exp);
        let leveled_up = new_level > wizard.level;

        let started_at = assignment.started_at.unwrap_or(now);
        {
            let a = state
                .assignments
                .get_mut(&assignment_id)
                .expect("assignment");
            a.status = AssignmentStatus::Completed;
            a.started_at = Some(started_at);
            a.completed_at = Some(now);
            a.mana_earned = Some(mana_awarded);
            a.exp_earned = Some(exp_awarded);
        }

        let new_balance;
        {
            let w = state
                .wizards
                .get_mut(&assignment.wizard_id)
                .expect("wizard");
            w.mana_balance += mana_awarded;
            w.experience_points = new_exp;
            w.level = new_level;
            w.updated_at = now;
            new_balance = w.mana_balance;
        }

        {
            let j = state.jobs.get_mut(&assignment.job_id).expect("job");
            j.currently_assigned = (j.currently_assigned - 1).max(0);
        }

        if let Some(p) = state.progress_for_assignment_mut(assignment_id) {
            p.progress_percentage = 100;
            p.is_active = false;
            p.last_updated_at = now;
        }

        if mana_awarded != 0 {
            state.push_transaction(
                None,
                Some(assignment.wizard_id),
                mana_awarded,
                "Job reward",
                now,
            );
        }
        state.push_activity(
            wizard.user_id,
            Some(assignment.wizard_id),
            "job_completed",
            format!(
                "{} completed \"{}\" for {} mana and {} exp",
                wizard.name, job.title, mana_awarded, exp_awarded
            ),
            serde_json::json!({
                "job_id": assignment.job_id,
                "assignment_id": assignment_id,
                "mana_earned": mana_awarded,
                "exp_earned": exp_awarded,
            }),
            now,
        );
        if leveled_up {
            state.push_activity(
                wizard.user_id,
                Some(assignment.wizard_id),
                "level_up",
                format!("{} reached level {}", wizard.name, new_level),
                serde_json::json!({ "level": new_level }),
                now,
            );
        }

        let assignment = state
            .assignments
            .get(&assignment_id)
            .expect("assignment")
            .clone();
        Ok(CompletedAssignment {
            assignment,
            mana_awarded,
            exp_awarded,
            new_balance,
            new_level,
            leveled_up,
        })
    }

    async fn cancel_assignment(
        &self,
        assignment_id: i64,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<JobAssignment, AssignmentError> {
        let mut state = self.state.lock().expect("state lock");

        let status = state
            .assignments
            .get(&assignment_id)
            .map(|a| a.status)
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;
        if status.is_terminal() {
            return Err(AssignmentError::AlreadyTerminal {
                id: assignment_id,
                status: status.to_string(),
            });
        }

        let (job_id, wizard_id) = {
            let a = state
                .assignments
                .get_mut(&assignment_id)
                .expect("assignment");
            a.status = AssignmentStatus::Cancelled;
            a.notes = reason.map(str::to_string);
            (a.job_id, a.wizard_id)
        };
        {
            let j = state.jobs.get_mut(&job_id).expect("job");
            j.currently_assigned = (j.currently_assigned - 1).max(0);
        }
        if let Some(p) = state.progress_for_assignment_mut(assignment_id) {
            p.is_active = false;
            p.last_updated_at = now;
        }

        if let Some(wizard) = state.wizards.get(&wizard_id).cloned() {
            let job_title = state
                .jobs
                .get(&job_id)
                .map(|j| j.title.clone())
                .unwrap_or_default();
            state.push_activity(
                wizard.user_id,
                Some(wizard_id),
                "job_cancelled",
                format!("{} abandoned \"{}\"", wizard.name, job_title),
                serde_json::json!({
                    "job_id": job_id,
                    "assignment_id": assignment_id,
                    "reason": reason,
                }),
                now,
            );
        }

        Ok(state
            .assignments
            .get(&assignment_id)
            .expect("assignment")
            .clone())
    }

    async fn get_progress(
        &self,
        assignment_id: i64,
    ) -> Result<Option<JobProgress>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        Ok(state
            .progress
            .values()
            .find(|p| p.assignment_id == assignment_id)
            .cloned())
    }

    // ==================== Ticker scan ====================

    async fn list_active_progress(&self) -> Result<Vec<ProgressScan>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut scans = Vec::new();
        for p in state.progress.values() {
            if !p.is_active {
                continue;
            }
            let Some(assignment) = state.assignments.get(&p.assignment_id) else {
                continue;
            };
            if assignment.status.is_terminal() {
                continue;
            }
            let (Some(start), Some(end)) = (p.actual_start_time, p.expected_end_time) else {
                continue;
            };
            scans.push(ProgressScan {
                progress_id: p.id,
                assignment_id: p.assignment_id,
                actual_start_time: start,
                expected_end_time: end,
                progress_percentage: p.progress_percentage,
                assignment_status: assignment.status,
            });
        }
        scans.sort_by_key(|s| s.progress_id);
        Ok(scans)
    }

    async fn apply_progress_updates(
        &self,
        updates: &[ProgressUpdate],
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().expect("state lock");
        for update in updates {
            if let Some(p) = state.progress.get_mut(&update.progress_id) {
                // Monotonic guard, matching the SQL WHERE clause.
                if update.new_progress > p.progress_percentage {
                    p.progress_percentage = update.new_progress;
                    p.time_worked_minutes = update.time_worked_minutes;
                    p.last_tick_time = Some(now);
                    p.last_updated_at = now;
                }
            }
            if update.mark_in_progress {
                if let Some(a) = state.assignments.get_mut(&update.assignment_id) {
                    if a.status == AssignmentStatus::Assigned {
                        a.status = AssignmentStatus::InProgress;
                        a.started_at.get_or_insert(now);
                    }
                }
            }
        }
        Ok(())
    }

    async fn list_completable_assignments(&self) -> Result<Vec<i64>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut ids: Vec<_> = state
            .progress
            .values()
            .filter(|p| p.progress_percentage >= 100 && p.is_active)
            .filter_map(|p| {
                let a = state.assignments.get(&p.assignment_id)?;
                (!a.status.is_terminal()).then_some(a.id)
            })
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    // ==================== Investments ====================

    async fn create_investment_type(
        &self,
        new: &NewInvestmentType,
    ) -> Result<InvestmentType, DatabaseError> {
        Ok(self.seed_investment_type(new.clone()))
    }

    async fn get_investment_type(
        &self,
        id: i64,
    ) -> Result<Option<InvestmentType>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .expect("state lock")
            .investment_types
            .get(&id)
            .cloned())
    }

    async fn list_investment_types(
        &self,
        filter: &InvestmentTypeFilter,
    ) -> Result<Vec<InvestmentType>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut types: Vec<_> = state
            .investment_types
            .values()
            .filter(|t| t.is_active)
            .filter(|t| {
                filter
                    .min_amount
                    .is_none_or(|min| t.max_amount == 0 || t.max_amount >= min)
            })
            .filter(|t| filter.max_amount.is_none_or(|max| t.min_amount <= max))
            .filter(|t| filter.risk_level.is_none_or(|r| t.risk_level == r))
            .cloned()
            .collect();
        types.sort_by_key(|t| t.id);
        Ok(types)
    }

    async fn create_investment(
        &self,
        wizard_id: i64,
        investment_type_id: i64,
        amount: i64,
        now: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<WizardInvestment, InvestmentError> {
        let mut state = self.state.lock().expect("state lock");

        let wizard = state
            .wizards
            .get(&wizard_id)
            .ok_or(InvestmentError::WizardNotFound { id: wizard_id })?
            .clone();
        if wizard.mana_balance < amount {
            return Err(InvestmentError::InsufficientBalance {
                balance: wizard.mana_balance,
                required: amount,
            });
        }

        state
            .wizards
            .get_mut(&wizard_id)
            .expect("wizard")
            .mana_balance -= amount;

        let id = state.alloc();
        let investment = WizardInvestment {
            id,
            wizard_id,
            investment_type_id,
            amount,
            start_time: now,
            end_time,
            status: InvestmentStatus::Active,
            actual_return_rate: None,
            returned_amount: None,
            created_at: now,
            updated_at: now,
        };
        state.investments.insert(id, investment.clone());
        state.push_transaction(Some(wizard_id), None, amount, "Investment creation", now);
        state.push_activity(
            wizard.user_id,
            Some(wizard_id),
            "investment_created",
            format!("Invested {} mana", amount),
            serde_json::json!({
                "investment_id": id,
                "investment_type_id": investment_type_id,
                "amount": amount,
            }),
            now,
        );
        Ok(investment)
    }

    async fn list_investments(
        &self,
        wizard_id: i64,
        status: Option<InvestmentStatus>,
    ) -> Result<Vec<InvestmentDetail>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut rows: Vec<_> = state
            .investments
            .values()
            .filter(|i| i.wizard_id == wizard_id)
            .filter(|i| status.is_none_or(|s| i.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .filter_map(|investment| {
                let itype = state.investment_types.get(&investment.investment_type_id)?;
                Some(InvestmentDetail {
                    type_name: itype.name.clone(),
                    risk_level: itype.risk_level,
                    investment,
                })
            })
            .collect())
    }

    async fn list_pending_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, DateTime<Utc>)>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut rows: Vec<_> = state
            .investments
            .values()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_time > now)
            .map(|i| (i.id, i.end_time))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        Ok(rows)
    }

    async fn list_matured_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut ids: Vec<_> = state
            .investments
            .values()
            .filter(|i| i.status == InvestmentStatus::Active && i.end_time <= now)
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn settle_investment(
        &self,
        investment_id: i64,
        unit: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettledInvestment>, InvestmentError> {
        let mut state = self.state.lock().expect("state lock");

        // Status guard: already-settled rows report None.
        let Some(investment) = state
            .investments
            .get(&investment_id)
            .filter(|i| i.status == InvestmentStatus::Active)
            .cloned()
        else {
            return Ok(None);
        };

        let itype = state
            .investment_types
            .get(&investment.investment_type_id)
            .ok_or(InvestmentError::TypeNotFound {
                id: investment.investment_type_id,
            })?
            .clone();
        let wizard = state
            .wizards
            .get(&investment.wizard_id)
            .ok_or(InvestmentError::WizardNotFound {
                id: investment.wizard_id,
            })?
            .clone();

        let actual_rate = economy::return_rate(itype.base_return_rate, itype.risk_level, unit);
        let returned = economy::returned_amount(investment.amount, actual_rate);

        {
            let i = state
                .investments
                .get_mut(&investment_id)
                .expect("investment");
            i.status = InvestmentStatus::Completed;
            i.actual_return_rate = Some(actual_rate);
            i.returned_amount = Some(returned);
            i.updated_at = now;
        }
        let new_balance;
        {
            let w = state
                .wizards
                .get_mut(&investment.wizard_id)
                .expect("wizard");
            w.mana_balance += returned;
            w.updated_at = now;
            new_balance = w.mana_balance;
        }
        state.push_transaction(
            None,
            Some(investment.wizard_id),
            returned,
            "Investment return",
            now,
        );
        state.push_activity(
            wizard.user_id,
            Some(investment.wizard_id),
            "investment_return",
            format!(
                "Investment matured: {} mana returned at {:.2} %",
                returned, actual_rate
            ),
            serde_json::json!({
                "investment_id": investment_id,
                "returned_amount": returned,
                "actual_return_rate": actual_rate,
            }),
            now,
        );

        Ok(Some(SettledInvestment {
            id: investment_id,
            wizard_id: investment.wizard_id,
            amount: investment.amount,
            actual_return_rate: actual_rate,
            returned_amount: returned,
            new_balance,
        }))
    }

    // ==================== Activity ====================

    async fn list_activities(
        &self,
        user_id: i64,
        page: Page,
    ) -> Result<Vec<ActivityLog>, DatabaseError> {
        let state = self.state.lock().expect("state lock");
        let mut rows: Vec<_> = state
            .activities
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(rows
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.size as usize)
            .collect())
    }
}
