//! Domain entities shared by the persistence contract and the services.
//!
//! Ids are `i64` (BIGSERIAL), timestamps are `DateTime<Utc>`, and the two
//! status enums carry the exact wire strings stored in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle states of a job assignment.
///
/// Transitions form a DAG: `assigned → in_progress → completed`, with
/// `cancelled` reachable from any non-terminal state. Terminal states are
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl AssignmentStatus {
    /// Whether the assignment can still change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assigned" => Ok(Self::Assigned),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid assignment status '{}'", s)),
        }
    }
}

/// Lifecycle states of a wizard investment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl InvestmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl std::fmt::Display for InvestmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for InvestmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("invalid investment status '{}'", s)),
        }
    }
}

/// A wizard: the economic actor. Owns a non-negative mana balance.
#[derive(Debug, Clone, Serialize)]
pub struct Wizard {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub realm: String,
    pub element: String,
    pub mana_balance: i64,
    pub experience_points: i32,
    pub level: i32,
    pub guild_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for wizard creation.
#[derive(Debug, Clone)]
pub struct NewWizard {
    pub user_id: i64,
    pub name: String,
    pub realm: String,
    pub element: String,
}

/// A timed job wizards can be assigned to.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: i64,
    pub realm: String,
    pub title: String,
    pub description: String,
    pub required_element: String,
    pub required_level: i32,
    pub mana_reward_per_hour: i64,
    pub exp_reward_per_hour: i32,
    pub duration_minutes: i32,
    pub max_wizards: i32,
    pub currently_assigned: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for job creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub realm: String,
    pub title: String,
    pub description: String,
    pub required_element: String,
    pub required_level: i32,
    pub mana_reward_per_hour: i64,
    pub exp_reward_per_hour: i32,
    pub duration_minutes: i32,
    pub max_wizards: i32,
}

/// A wizard's commitment to a job for that job's duration.
#[derive(Debug, Clone, Serialize)]
pub struct JobAssignment {
    pub id: i64,
    pub job_id: i64,
    pub wizard_id: i64,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mana_earned: Option<i64>,
    pub exp_earned: Option<i32>,
    pub notes: Option<String>,
}

/// The 1:1 wall-clock progress ledger for an assignment.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub id: i64,
    pub assignment_id: i64,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub expected_end_time: Option<DateTime<Utc>>,
    pub progress_percentage: i32,
    pub time_worked_minutes: i32,
    pub is_active: bool,
    pub last_tick_time: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

/// An assignment joined with its job and progress row, as listed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentDetail {
    pub assignment: JobAssignment,
    pub job: Job,
    pub progress: Option<JobProgress>,
}

/// An investment product definition.
#[derive(Debug, Clone, Serialize)]
pub struct InvestmentType {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub min_amount: i64,
    /// 0 means no upper bound.
    pub max_amount: i64,
    pub duration_hours: i32,
    pub base_return_rate: f64,
    pub risk_level: i32,
    pub is_active: bool,
}

/// Input for investment type creation.
#[derive(Debug, Clone)]
pub struct NewInvestmentType {
    pub name: String,
    pub description: String,
    pub min_amount: i64,
    pub max_amount: i64,
    pub duration_hours: i32,
    pub base_return_rate: f64,
    pub risk_level: i32,
}

/// Principal deducted now, returned with a stochastic delta at maturity.
#[derive(Debug, Clone, Serialize)]
pub struct WizardInvestment {
    pub id: i64,
    pub wizard_id: i64,
    pub investment_type_id: i64,
    pub amount: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: InvestmentStatus,
    pub actual_return_rate: Option<f64>,
    pub returned_amount: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An investment joined with its type, as listed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct InvestmentDetail {
    pub investment: WizardInvestment,
    pub type_name: String,
    pub risk_level: i32,
}

/// A row in the mana movement ledger.
///
/// System credits/debits (rewards, investment principal and returns) have
/// one side NULL; wizard-to-wizard transfers have both.
#[derive(Debug, Clone, Serialize)]
pub struct ManaTransaction {
    pub id: i64,
    pub from_wizard_id: Option<i64>,
    pub to_wizard_id: Option<i64>,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// A human-readable audit entry with structured metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityLog {
    pub id: i64,
    pub user_id: i64,
    pub wizard_id: Option<i64>,
    pub activity_type: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Offset pagination for list surfaces.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: i64,
    pub size: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: 20,
        }
    }
}

impl Page {
    pub fn offset(&self) -> i64 {
        (self.number.max(1) - 1) * self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_assignment_status_round_trips_wire_strings() {
        for s in ["assigned", "in_progress", "completed", "cancelled"] {
            let status = AssignmentStatus::from_str(s).unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!(AssignmentStatus::from_str("paused").is_err());
    }

    #[test]
    fn test_investment_status_round_trips_wire_strings() {
        for s in ["active", "completed", "cancelled"] {
            let status = InvestmentStatus::from_str(s).unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!(InvestmentStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AssignmentStatus::Assigned.is_terminal());
        assert!(!AssignmentStatus::InProgress.is_terminal());
        assert!(AssignmentStatus::Completed.is_terminal());
        assert!(AssignmentStatus::Cancelled.is_terminal());
        assert!(!InvestmentStatus::Active.is_terminal());
        assert!(InvestmentStatus::Completed.is_terminal());
    }

    #[test]
    fn test_page_offset() {
        assert_eq!(Page::default().offset(), 0);
        assert_eq!(Page { number: 3, size: 20 }.offset(), 40);
        // Page numbers below 1 clamp to the first page.
        assert_eq!(Page { number: 0, size: 20 }.offset(), 0);
    }
}
