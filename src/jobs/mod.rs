//! Assignment lifecycle manager.
//!
//! Transactional operations on wizard↔job assignments: assign,
//! client-hinted progress updates, the exactly-once completion path, and
//! cancellation. The ticker in [`ticker`] drives completion; this surface
//! also exposes a manual completion path with the same idempotency.

pub mod ticker;

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{AssignmentFilter, CompletedAssignment, Database};
use crate::economy;
use crate::error::AssignmentError;
use crate::model::{AssignmentDetail, JobAssignment, JobProgress, Page};

/// The assignment lifecycle service.
pub struct AssignmentService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl AssignmentService {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Assign a wizard to a job, subject to eligibility and capacity.
    pub async fn assign(
        &self,
        wizard_id: i64,
        job_id: i64,
    ) -> Result<JobAssignment, AssignmentError> {
        let assignment = self
            .db
            .assign_wizard(wizard_id, job_id, self.clock.now())
            .await?;
        tracing::info!(
            assignment_id = assignment.id,
            wizard_id,
            job_id,
            "Assigned wizard to job"
        );
        Ok(assignment)
    }

    /// Client-hinted progress update; the ticker remains the source of
    /// truth. Input progress is clamped to [0, 100] and applied
    /// monotonically.
    pub async fn update_progress(
        &self,
        assignment_id: i64,
        progress: i32,
        time_worked_minutes: i32,
    ) -> Result<JobProgress, AssignmentError> {
        self.db
            .update_progress(
                assignment_id,
                progress.clamp(0, 100),
                time_worked_minutes.max(0),
                self.clock.now(),
            )
            .await
    }

    /// Manually complete an assignment. Idempotent: a second call reports
    /// `NotFound` and changes nothing.
    pub async fn complete(
        &self,
        assignment_id: i64,
    ) -> Result<CompletedAssignment, AssignmentError> {
        let completed = self
            .db
            .complete_assignment(assignment_id, self.clock.now())
            .await?;
        tracing::info!(
            assignment_id,
            mana = completed.mana_awarded,
            exp = completed.exp_awarded,
            leveled_up = completed.leveled_up,
            "Completed job assignment"
        );
        Ok(completed)
    }

    /// Cancel a non-terminal assignment. No reward is paid.
    pub async fn cancel(
        &self,
        assignment_id: i64,
        reason: Option<&str>,
    ) -> Result<JobAssignment, AssignmentError> {
        let cancelled = self
            .db
            .cancel_assignment(assignment_id, reason, self.clock.now())
            .await?;
        tracing::info!(assignment_id, "Cancelled job assignment");
        Ok(cancelled)
    }

    /// List assignments with nested job and progress.
    pub async fn list(
        &self,
        filter: &AssignmentFilter,
        page: Page,
    ) -> Result<Vec<AssignmentDetail>, AssignmentError> {
        Ok(self.db.list_assignments(filter, page).await?)
    }

    /// Current progress with real-time interpolation.
    ///
    /// Returns the stored row with its percentage and minutes lifted to the
    /// wall-clock values when those are ahead, so a client polling between
    /// ticker passes sees live progress. Nothing is persisted here.
    pub async fn progress(&self, assignment_id: i64) -> Result<JobProgress, AssignmentError> {
        let mut progress = self
            .db
            .get_progress(assignment_id)
            .await?
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;

        if progress.is_active {
            if let (Some(start), Some(end)) =
                (progress.actual_start_time, progress.expected_end_time)
            {
                let now = self.clock.now();
                let live = economy::progress_at(now, start, end);
                if live > progress.progress_percentage {
                    progress.progress_percentage = live;
                }
                let worked = economy::minutes_worked(now, start);
                if worked > progress.time_worked_minutes {
                    progress.time_worked_minutes = worked;
                }
            }
        }

        Ok(progress)
    }
}
