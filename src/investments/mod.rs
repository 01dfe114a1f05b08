//! Investment lifecycle manager.
//!
//! Creation deducts the principal and inserts the investment row in one
//! transaction; timer registration with the scheduler is fire-and-forget
//! after commit. If registration is lost to a crash, the scheduler's
//! cleanup sweep collects the mature row later.

pub mod scheduler;

use std::sync::Arc;

use crate::clock::Clock;
use crate::db::{Database, InvestmentTypeFilter};
use crate::error::InvestmentError;
use crate::investments::scheduler::InvestmentScheduler;
use crate::model::{InvestmentDetail, InvestmentStatus, InvestmentType, WizardInvestment};

/// The investment lifecycle service.
pub struct InvestmentService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<InvestmentScheduler>,
}

impl InvestmentService {
    pub fn new(
        db: Arc<dyn Database>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<InvestmentScheduler>,
    ) -> Self {
        Self {
            db,
            clock,
            scheduler,
        }
    }

    /// Place an investment: validate against the type, deduct the
    /// principal, and register the maturity timer.
    pub async fn create(
        &self,
        wizard_id: i64,
        investment_type_id: i64,
        amount: i64,
    ) -> Result<WizardInvestment, InvestmentError> {
        let itype = self
            .db
            .get_investment_type(investment_type_id)
            .await?
            .filter(|t| t.is_active)
            .ok_or(InvestmentError::TypeNotFound {
                id: investment_type_id,
            })?;

        if amount < itype.min_amount || (itype.max_amount > 0 && amount > itype.max_amount) {
            return Err(InvestmentError::InvalidAmount {
                amount,
                min: itype.min_amount,
                max: itype.max_amount,
            });
        }

        let now = self.clock.now();
        let end_time = now + chrono::Duration::hours(i64::from(itype.duration_hours));
        let investment = self
            .db
            .create_investment(wizard_id, investment_type_id, amount, now, end_time)
            .await?;

        tracing::info!(
            investment_id = investment.id,
            wizard_id,
            amount,
            end_time = %end_time,
            "Created investment"
        );

        self.scheduler
            .schedule_completion(investment.id, end_time);

        Ok(investment)
    }

    pub async fn list(
        &self,
        wizard_id: i64,
        status: Option<InvestmentStatus>,
    ) -> Result<Vec<InvestmentDetail>, InvestmentError> {
        Ok(self.db.list_investments(wizard_id, status).await?)
    }

    pub async fn list_types(
        &self,
        filter: &InvestmentTypeFilter,
    ) -> Result<Vec<InvestmentType>, InvestmentError> {
        Ok(self.db.list_investment_types(filter).await?)
    }
}
