//! PostgreSQL backend for the persistence contract.
//!
//! Uses `deadpool-postgres` for pooling and `refinery` for embedded
//! migrations. Every mutating trait method is a single transaction; rows
//! that participate in balance or capacity mutations are taken with
//! `SELECT … FOR UPDATE`, and terminal-state fences are plain status
//! guards in the `WHERE` clause. Activity-log inserts run behind a
//! savepoint so their failure never aborts the owning transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row, Transaction};

use crate::config::DatabaseConfig;
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

/// Maximum wizards per owning user.
const WIZARDS_PER_USER: usize = 2;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Deadpool-backed PostgreSQL implementation of [`Database`].
pub struct PgBackend {
    pool: Pool,
}

impl PgBackend {
    /// Build a connection pool from configuration. Does not touch the
    /// database until the first checkout.
    pub fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pg_config: tokio_postgres::Config = config.url().parse()?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()?;
        Ok(Self { pool })
    }

    /// Expose the pool for callers that need raw access (tests, seeds).
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn parse_assignment_status(raw: &str) -> Result<AssignmentStatus, DatabaseError> {
    raw.parse().map_err(DatabaseError::Query)
}

fn parse_investment_status(raw: &str) -> Result<InvestmentStatus, DatabaseError> {
    raw.parse().map_err(DatabaseError::Query)
}

fn wizard_from_row(row: &Row) -> Wizard {
    Wizard {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        realm: row.get("realm"),
        element: row.get("element"),
        mana_balance: row.get("mana_balance"),
        experience_points: row.get("experience_points"),
        level: row.get("level"),
        guild_id: row.get("guild_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn job_from_row(row: &Row) -> Job {
    Job {
        id: row.get("id"),
        realm: row.get("realm"),
        title: row.get("title"),
        description: row.get("description"),
        required_element: row.get("required_element"),
        required_level: row.get("required_level"),
        mana_reward_per_hour: row.get("mana_reward_per_hour"),
        exp_reward_per_hour: row.get("exp_reward_per_hour"),
        duration_minutes: row.get("duration_minutes"),
        max_wizards: row.get("max_wizards"),
        currently_assigned: row.get("currently_assigned"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    }
}

fn assignment_from_row(row: &Row) -> Result<JobAssignment, DatabaseError> {
    let status: String = row.get("status");
    Ok(JobAssignment {
        id: row.get("id"),
        job_id: row.get("job_id"),
        wizard_id: row.get("wizard_id"),
        status: parse_assignment_status(&status)?,
        assigned_at: row.get("assigned_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        mana_earned: row.get("mana_earned"),
        exp_earned: row.get("exp_earned"),
        notes: row.get("notes"),
    })
}

fn progress_from_row(row: &Row) -> JobProgress {
    JobProgress {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        actual_start_time: row.get("actual_start_time"),
        expected_end_time: row.get("expected_end_time"),
        progress_percentage: row.get("progress_percentage"),
        time_worked_minutes: row.get("time_worked_minutes"),
        is_active: row.get("is_active"),
        last_tick_time: row.get("last_tick_time"),
        last_updated_at: row.get("last_updated_at"),
    }
}

fn investment_type_from_row(row: &Row) -> InvestmentType {
    InvestmentType {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        min_amount: row.get("min_amount"),
        max_amount: row.get("max_amount"),
        duration_hours: row.get("duration_hours"),
        base_return_rate: row.get("base_return_rate"),
        risk_level: row.get("risk_level"),
        is_active: row.get("is_active"),
    }
}

fn investment_from_row(row: &Row) -> Result<WizardInvestment, DatabaseError> {
    let status: String = row.get("status");
    Ok(WizardInvestment {
        id: row.get("id"),
        wizard_id: row.get("wizard_id"),
        investment_type_id: row.get("investment_type_id"),
        amount: row.get("amount"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: parse_investment_status(&status)?,
        actual_return_rate: row.get("actual_return_rate"),
        returned_amount: row.get("returned_amount"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn is_unique_violation(err: &tokio_postgres::Error) -> bool {
    err.code() == Some(&SqlState::UNIQUE_VIOLATION)
}

/// Insert a mana ledger row. A NULL side marks a system credit or debit.
async fn record_transaction(
    tx: &Transaction<'_>,
    from_wizard_id: Option<i64>,
    to_wizard_id: Option<i64>,
    amount: i64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    tx.execute(
        r#"
        INSERT INTO mana_transactions (from_wizard_id, to_wizard_id, amount, reason, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
        &[&from_wizard_id, &to_wizard_id, &amount, &reason, &now],
    )
    .await?;
    Ok(())
}

/// Best-effort activity log append.
///
/// Runs behind a savepoint: an insert failure rolls back to the savepoint,
/// is logged, and the owning transaction continues.
async fn append_activity(
    tx: &mut Transaction<'_>,
    user_id: i64,
    wizard_id: Option<i64>,
    activity_type: &str,
    description: &str,
    metadata: serde_json::Value,
    now: DateTime<Utc>,
) {
    let result = async {
        let sp = tx.savepoint("activity_log").await?;
        sp.execute(
            r#"
            INSERT INTO activity_logs (user_id, wizard_id, activity_type, description, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
            &[
                &user_id,
                &wizard_id,
                &activity_type,
                &description,
                &metadata,
                &now,
            ],
        )
        .await?;
        sp.commit().await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(
            activity_type,
            user_id,
            error = %e,
            "Failed to append activity log entry"
        );
    }
}

#[async_trait]
impl Database for PgBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.conn().await?;
        embedded::migrations::runner()
            .run_async(&mut **conn)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        Ok(())
    }

    // ==================== Wizards & balances ====================

    async fn create_wizard(&self, new: &NewWizard) -> Result<Wizard, WizardError> {
        let mut conn = self.conn().await.map_err(WizardError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let count_row = tx
            .query_one(
                "SELECT COUNT(*) FROM wizards WHERE user_id = $1",
                &[&new.user_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let owned: i64 = count_row.get(0);
        if owned as usize >= WIZARDS_PER_USER {
            return Err(WizardError::WizardLimitReached {
                user_id: new.user_id,
                max: WIZARDS_PER_USER,
            });
        }

        let now = Utc::now();
        let row = tx
            .query_one(
                r#"
                INSERT INTO wizards (user_id, name, realm, element, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $5)
                RETURNING id, user_id, name, realm, element, mana_balance,
                          experience_points, level, guild_id, created_at, updated_at
                "#,
                &[&new.user_id, &new.name, &new.realm, &new.element, &now],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let wizard = wizard_from_row(&row);

        append_activity(
            &mut tx,
            new.user_id,
            Some(wizard.id),
            "wizard_created",
            &format!("Wizard {} joined the {} realm", wizard.name, wizard.realm),
            serde_json::json!({ "element": wizard.element }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;
        Ok(wizard)
    }

    async fn get_wizard(&self, id: i64) -> Result<Option<Wizard>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, user_id, name, realm, element, mana_balance,
                       experience_points, level, guild_id, created_at, updated_at
                FROM wizards WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(wizard_from_row))
    }

    async fn list_wizards(
        &self,
        user_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Wizard>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id, user_id, name, realm, element, mana_balance,
                       experience_points, level, guild_id, created_at, updated_at
                FROM wizards
                WHERE ($1::bigint IS NULL OR user_id = $1)
                ORDER BY id
                LIMIT $2 OFFSET $3
                "#,
                &[&user_id, &page.size, &page.offset()],
            )
            .await?;
        Ok(rows.iter().map(wizard_from_row).collect())
    }

    async fn get_mana_balance(&self, wizard_id: i64) -> Result<i64, WizardError> {
        let conn = self.conn().await.map_err(WizardError::Database)?;
        let row = conn
            .query_opt(
                "SELECT mana_balance FROM wizards WHERE id = $1",
                &[&wizard_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        match row {
            Some(row) => Ok(row.get(0)),
            None => Err(WizardError::NotFound { id: wizard_id }),
        }
    }

    async fn update_mana_balance(
        &self,
        wizard_id: i64,
        delta: i64,
        reason: Option<&str>,
    ) -> Result<i64, WizardError> {
        let mut conn = self.conn().await.map_err(WizardError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let row = tx
            .query_opt(
                "SELECT user_id, mana_balance FROM wizards WHERE id = $1 FOR UPDATE",
                &[&wizard_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(WizardError::NotFound { id: wizard_id })?;
        let user_id: i64 = row.get("user_id");
        let balance: i64 = row.get("mana_balance");

        if balance + delta < 0 {
            return Err(WizardError::InsufficientMana {
                balance,
                required: -delta,
            });
        }

        let now = Utc::now();
        let row = tx
            .query_one(
                r#"
                UPDATE wizards SET mana_balance = mana_balance + $2, updated_at = $3
                WHERE id = $1
                RETURNING mana_balance
                "#,
                &[&wizard_id, &delta, &now],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let new_balance: i64 = row.get(0);

        if let Some(reason) = reason {
            if delta != 0 {
                let (from, to, amount) = if delta > 0 {
                    (None, Some(wizard_id), delta)
                } else {
                    (Some(wizard_id), None, -delta)
                };
                record_transaction(&tx, from, to, amount, reason, now)
                    .await
                    .map_err(WizardError::Database)?;
            }
            append_activity(
                &mut tx,
                user_id,
                Some(wizard_id),
                "mana_update",
                reason,
                serde_json::json!({ "delta": delta, "new_balance": new_balance }),
                now,
            )
            .await;
        }

        tx.commit().await.map_err(DatabaseError::Postgres)?;
        Ok(new_balance)
    }

    async fn transfer_mana(
        &self,
        from_wizard_id: i64,
        to_wizard_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<(), WizardError> {
        let mut conn = self.conn().await.map_err(WizardError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        // Lock both rows in id order so concurrent opposite transfers
        // cannot deadlock.
        let locked = tx
            .query(
                r#"
                SELECT id, user_id, name, mana_balance FROM wizards
                WHERE id = ANY($1::bigint[])
                ORDER BY id
                FOR UPDATE
                "#,
                &[&vec![from_wizard_id, to_wizard_id]],
            )
            .await
            .map_err(DatabaseError::Postgres)?;

        let find = |id: i64| locked.iter().find(|r| r.get::<_, i64>("id") == id);
        let sender = find(from_wizard_id).ok_or(WizardError::NotFound { id: from_wizard_id })?;
        let receiver = find(to_wizard_id).ok_or(WizardError::NotFound { id: to_wizard_id })?;

        let sender_balance: i64 = sender.get("mana_balance");
        if sender_balance < amount {
            return Err(WizardError::InsufficientMana {
                balance: sender_balance,
                required: amount,
            });
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE wizards SET mana_balance = mana_balance - $2, updated_at = $3 WHERE id = $1",
            &[&from_wizard_id, &amount, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;
        tx.execute(
            "UPDATE wizards SET mana_balance = mana_balance + $2, updated_at = $3 WHERE id = $1",
            &[&to_wizard_id, &amount, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        record_transaction(
            &tx,
            Some(from_wizard_id),
            Some(to_wizard_id),
            amount,
            reason,
            now,
        )
        .await
        .map_err(WizardError::Database)?;

        let sender_user: i64 = sender.get("user_id");
        let receiver_user: i64 = receiver.get("user_id");
        let sender_name: String = sender.get("name");
        let receiver_name: String = receiver.get("name");
        append_activity(
            &mut tx,
            sender_user,
            Some(from_wizard_id),
            "mana_transfer",
            &format!("Sent {} mana to {}", amount, receiver_name),
            serde_json::json!({ "to_wizard_id": to_wizard_id, "amount": amount }),
            now,
        )
        .await;
        append_activity(
            &mut tx,
            receiver_user,
            Some(to_wizard_id),
            "mana_transfer",
            &format!("Received {} mana from {}", amount, sender_name),
            serde_json::json!({ "from_wizard_id": from_wizard_id, "amount": amount }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;
        Ok(())
    }

    async fn list_transactions(
        &self,
        wizard_id: i64,
        page: Page,
    ) -> Result<Vec<ManaTransaction>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id, from_wizard_id, to_wizard_id, amount, reason, created_at
                FROM mana_transactions
                WHERE from_wizard_id = $1 OR to_wizard_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2 OFFSET $3
                "#,
                &[&wizard_id, &page.size, &page.offset()],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ManaTransaction {
                id: row.get("id"),
                from_wizard_id: row.get("from_wizard_id"),
                to_wizard_id: row.get("to_wizard_id"),
                amount: row.get("amount"),
                reason: row.get("reason"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    // ==================== Jobs ====================

    async fn create_job(&self, new: &NewJob) -> Result<Job, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                r#"
                INSERT INTO jobs (realm, title, description, required_element, required_level,
                                  mana_reward_per_hour, exp_reward_per_hour, duration_minutes,
                                  max_wizards)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id, realm, title, description, required_element, required_level,
                          mana_reward_per_hour, exp_reward_per_hour, duration_minutes,
                          max_wizards, currently_assigned, is_active, created_at
                "#,
                &[
                    &new.realm,
                    &new.title,
                    &new.description,
                    &new.required_element,
                    &new.required_level,
                    &new.mana_reward_per_hour,
                    &new.exp_reward_per_hour,
                    &new.duration_minutes,
                    &new.max_wizards,
                ],
            )
            .await?;
        Ok(job_from_row(&row))
    }

    async fn get_job(&self, id: i64) -> Result<Option<Job>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, realm, title, description, required_element, required_level,
                       mana_reward_per_hour, exp_reward_per_hour, duration_minutes,
                       max_wizards, currently_assigned, is_active, created_at
                FROM jobs WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(job_from_row))
    }

    async fn list_jobs(
        &self,
        realm: Option<&str>,
        active_only: bool,
    ) -> Result<Vec<Job>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id, realm, title, description, required_element, required_level,
                       mana_reward_per_hour, exp_reward_per_hour, duration_minutes,
                       max_wizards, currently_assigned, is_active, created_at
                FROM jobs
                WHERE ($1::text IS NULL OR realm = $1)
                  AND (NOT $2 OR is_active)
                ORDER BY id
                "#,
                &[&realm, &active_only],
            )
            .await?;
        Ok(rows.iter().map(job_from_row).collect())
    }

    // ==================== Assignments ====================

    async fn assign_wizard(
        &self,
        wizard_id: i64,
        job_id: i64,
        now: DateTime<Utc>,
    ) -> Result<JobAssignment, AssignmentError> {
        let mut conn = self.conn().await.map_err(AssignmentError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let job_row = tx
            .query_opt(
                r#"
                SELECT required_element, required_level, duration_minutes,
                       max_wizards, currently_assigned, is_active, title
                FROM jobs WHERE id = $1
                FOR UPDATE
                "#,
                &[&job_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(AssignmentError::JobNotFound { id: job_id })?;

        if !job_row.get::<_, bool>("is_active") {
            return Err(AssignmentError::JobNotFound { id: job_id });
        }
        let max_wizards: i32 = job_row.get("max_wizards");
        let currently_assigned: i32 = job_row.get("currently_assigned");
        if currently_assigned >= max_wizards {
            return Err(AssignmentError::JobFull { id: job_id });
        }

        let wizard_row = tx
            .query_opt(
                "SELECT user_id, element, level, name FROM wizards WHERE id = $1",
                &[&wizard_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(AssignmentError::WizardNotFound { id: wizard_id })?;

        let wizard_element: String = wizard_row.get("element");
        let required_element: String = job_row.get("required_element");
        if wizard_element != required_element {
            return Err(AssignmentError::ElementMismatch {
                wizard_element,
                required_element,
            });
        }
        let wizard_level: i32 = wizard_row.get("level");
        let required_level: i32 = job_row.get("required_level");
        if wizard_level < required_level {
            return Err(AssignmentError::LevelTooLow {
                wizard_level,
                required_level,
            });
        }

        let inserted = tx
            .query_one(
                r#"
                INSERT INTO job_assignments (job_id, wizard_id, status, assigned_at)
                VALUES ($1, $2, 'assigned', $3)
                RETURNING id
                "#,
                &[&job_id, &wizard_id, &now],
            )
            .await;
        let assignment_id: i64 = match inserted {
            Ok(row) => row.get(0),
            Err(e) if is_unique_violation(&e) => {
                return Err(AssignmentError::AlreadyAssigned { wizard_id, job_id });
            }
            Err(e) => return Err(DatabaseError::Postgres(e).into()),
        };

        tx.execute(
            "UPDATE jobs SET currently_assigned = currently_assigned + 1 WHERE id = $1",
            &[&job_id],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let duration_minutes: i32 = job_row.get("duration_minutes");
        let expected_end = now + chrono::Duration::minutes(i64::from(duration_minutes));
        tx.execute(
            r#"
            INSERT INTO job_progress (assignment_id, actual_start_time, expected_end_time,
                                      progress_percentage, time_worked_minutes, is_active,
                                      last_updated_at)
            VALUES ($1, $2, $3, 0, 0, TRUE, $2)
            "#,
            &[&assignment_id, &now, &expected_end],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let user_id: i64 = wizard_row.get("user_id");
        let wizard_name: String = wizard_row.get("name");
        let job_title: String = job_row.get("title");
        append_activity(
            &mut tx,
            user_id,
            Some(wizard_id),
            "job_assigned",
            &format!("{} took the job \"{}\"", wizard_name, job_title),
            serde_json::json!({ "job_id": job_id, "assignment_id": assignment_id }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(JobAssignment {
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
        })
    }

    async fn get_assignment(&self, id: i64) -> Result<Option<JobAssignment>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, job_id, wizard_id, status, assigned_at, started_at,
                       completed_at, mana_earned, exp_earned, notes
                FROM job_assignments WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn list_assignments(
        &self,
        filter: &AssignmentFilter,
        page: Page,
    ) -> Result<Vec<AssignmentDetail>, DatabaseError> {
        let conn = self.conn().await?;
        let status = filter.status.map(|s| s.to_string());
        let rows = conn
            .query(
                r#"
                SELECT a.id, a.job_id, a.wizard_id, a.status, a.assigned_at, a.started_at,
                       a.completed_at, a.mana_earned, a.exp_earned, a.notes,
                       j.realm, j.title, j.description, j.required_element, j.required_level,
                       j.mana_reward_per_hour, j.exp_reward_per_hour, j.duration_minutes,
                       j.max_wizards, j.currently_assigned, j.is_active,
                       j.created_at AS job_created_at,
                       p.id AS progress_id, p.actual_start_time, p.expected_end_time,
                       p.progress_percentage, p.time_worked_minutes,
                       p.is_active AS progress_is_active, p.last_tick_time, p.last_updated_at
                FROM job_assignments a
                JOIN jobs j ON j.id = a.job_id
                LEFT JOIN job_progress p ON p.assignment_id = a.id
                WHERE ($1::bigint IS NULL OR a.wizard_id = $1)
                  AND ($2::bigint IS NULL OR a.job_id = $2)
                  AND ($3::text IS NULL OR a.status = $3)
                ORDER BY a.assigned_at DESC, a.id DESC
                LIMIT $4 OFFSET $5
                "#,
                &[
                    &filter.wizard_id,
                    &filter.job_id,
                    &status,
                    &page.size,
                    &page.offset(),
                ],
            )
            .await?;

        let mut details = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.get("status");
            let assignment = JobAssignment {
                id: row.get("id"),
                job_id: row.get("job_id"),
                wizard_id: row.get("wizard_id"),
                status: parse_assignment_status(&status)?,
                assigned_at: row.get("assigned_at"),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                mana_earned: row.get("mana_earned"),
                exp_earned: row.get("exp_earned"),
                notes: row.get("notes"),
            };
            let job = Job {
                id: assignment.job_id,
                realm: row.get("realm"),
                title: row.get("title"),
                description: row.get("description"),
                required_element: row.get("required_element"),
                required_level: row.get("required_level"),
                mana_reward_per_hour: row.get("mana_reward_per_hour"),
                exp_reward_per_hour: row.get("exp_reward_per_hour"),
                duration_minutes: row.get("duration_minutes"),
                max_wizards: row.get("max_wizards"),
                currently_assigned: row.get("currently_assigned"),
                is_active: row.get("is_active"),
                created_at: row.get("job_created_at"),
            };
            let progress = row
                .get::<_, Option<i64>>("progress_id")
                .map(|progress_id| JobProgress {
                    id: progress_id,
                    assignment_id: assignment.id,
                    actual_start_time: row.get("actual_start_time"),
                    expected_end_time: row.get("expected_end_time"),
                    progress_percentage: row.get("progress_percentage"),
                    time_worked_minutes: row.get("time_worked_minutes"),
                    is_active: row.get("progress_is_active"),
                    last_tick_time: row.get("last_tick_time"),
                    last_updated_at: row.get("last_updated_at"),
                });
            details.push(AssignmentDetail {
                assignment,
                job,
                progress,
            });
        }
        Ok(details)
    }

    async fn update_progress(
        &self,
        assignment_id: i64,
        progress: i32,
        time_worked_minutes: i32,
        now: DateTime<Utc>,
    ) -> Result<JobProgress, AssignmentError> {
        let mut conn = self.conn().await.map_err(AssignmentError::Database)?;
        let tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let row = tx
            .query_opt(
                r#"
                SELECT a.status AS assignment_status,
                       p.id, p.assignment_id, p.actual_start_time, p.expected_end_time,
                       p.progress_percentage, p.time_worked_minutes, p.is_active,
                       p.last_tick_time, p.last_updated_at
                FROM job_assignments a
                JOIN job_progress p ON p.assignment_id = a.id
                WHERE a.id = $1
                FOR UPDATE OF a, p
                "#,
                &[&assignment_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;

        let status_raw: String = row.get("assignment_status");
        let status = parse_assignment_status(&status_raw)?;
        if status.is_terminal() {
            return Err(AssignmentError::AlreadyTerminal {
                id: assignment_id,
                status: status.to_string(),
            });
        }

        let current = progress_from_row(&row);
        let clamped = progress.clamp(0, 100);

        // Monotonic: a stale or lower hint keeps the stored value.
        if clamped <= current.progress_percentage {
            tx.commit().await.map_err(DatabaseError::Postgres)?;
            return Ok(current);
        }

        // Crossing 100 retires the progress row; completion stays with the
        // exactly-once path.
        let still_active = clamped < 100;
        tx.execute(
            r#"
            UPDATE job_progress
            SET progress_percentage = $2, time_worked_minutes = $3,
                is_active = $4, last_updated_at = $5
            WHERE id = $1
            "#,
            &[
                &current.id,
                &clamped,
                &time_worked_minutes.max(0),
                &still_active,
                &now,
            ],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        if status == AssignmentStatus::Assigned && clamped > 0 {
            tx.execute(
                r#"
                UPDATE job_assignments
                SET status = 'in_progress', started_at = COALESCE(started_at, $2)
                WHERE id = $1 AND status = 'assigned'
                "#,
                &[&assignment_id, &now],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        }

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(JobProgress {
            progress_percentage: clamped,
            time_worked_minutes: time_worked_minutes.max(0),
            is_active: still_active,
            last_updated_at: now,
            ..current
        })
    }

    async fn complete_assignment(
        &self,
        assignment_id: i64,
        now: DateTime<Utc>,
    ) -> Result<CompletedAssignment, AssignmentError> {
        let mut conn = self.conn().await.map_err(AssignmentError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        // The status guard is the exactly-once fence: a second completion
        // attempt finds no row and reports NotFound without mutating.
        let row = tx
            .query_opt(
                r#"
                SELECT a.job_id, a.wizard_id, a.status, a.assigned_at, a.started_at, a.notes,
                       j.title, j.mana_reward_per_hour, j.exp_reward_per_hour, j.duration_minutes,
                       w.user_id, w.name AS wizard_name, w.experience_points, w.level
                FROM job_assignments a
                JOIN jobs j ON j.id = a.job_id
                JOIN wizards w ON w.id = a.wizard_id
                WHERE a.id = $1 AND a.status IN ('assigned', 'in_progress')
                FOR UPDATE OF a, j, w
                "#,
                &[&assignment_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;

        let job_id: i64 = row.get("job_id");
        let wizard_id: i64 = row.get("wizard_id");
        let (mana_awarded, exp_awarded) = economy::job_reward(
            row.get("mana_reward_per_hour"),
            row.get("exp_reward_per_hour"),
            row.get("duration_minutes"),
        );

        let started_at: Option<DateTime<Utc>> = row.get("started_at");
        let started_at = started_at.unwrap_or(now);
        tx.execute(
            r#"
            UPDATE job_assignments
            SET status = 'completed', started_at = $2, completed_at = $3,
                mana_earned = $4, exp_earned = $5
            WHERE id = $1
            "#,
            &[&assignment_id, &started_at, &now, &mana_awarded, &exp_awarded],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let old_level: i32 = row.get("level");
        let new_exp: i32 = row.get::<_, i32>("experience_points") + exp_awarded;
        let new_level = economy::level_for_exp(new_exp);
        let balance_row = tx
            .query_one(
                r#"
                UPDATE wizards
                SET mana_balance = mana_balance + $2, experience_points = $3,
                    level = $4, updated_at = $5
                WHERE id = $1
                RETURNING mana_balance
                "#,
                &[&wizard_id, &mana_awarded, &new_exp, &new_level, &now],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let new_balance: i64 = balance_row.get(0);

        tx.execute(
            "UPDATE jobs SET currently_assigned = GREATEST(currently_assigned - 1, 0) WHERE id = $1",
            &[&job_id],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        tx.execute(
            r#"
            UPDATE job_progress
            SET progress_percentage = 100, is_active = FALSE, last_updated_at = $2
            WHERE assignment_id = $1
            "#,
            &[&assignment_id, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        if mana_awarded != 0 {
            record_transaction(&tx, None, Some(wizard_id), mana_awarded, "Job reward", now)
                .await
                .map_err(AssignmentError::Database)?;
        }

        let user_id: i64 = row.get("user_id");
        let wizard_name: String = row.get("wizard_name");
        let job_title: String = row.get("title");
        append_activity(
            &mut tx,
            user_id,
            Some(wizard_id),
            "job_completed",
            &format!(
                "{} completed \"{}\" for {} mana and {} exp",
                wizard_name, job_title, mana_awarded, exp_awarded
            ),
            serde_json::json!({
                "job_id": job_id,
                "assignment_id": assignment_id,
                "mana_earned": mana_awarded,
                "exp_earned": exp_awarded,
            }),
            now,
        )
        .await;
        let leveled_up = new_level > old_level;
        if leveled_up {
            append_activity(
                &mut tx,
                user_id,
                Some(wizard_id),
                "level_up",
                &format!("{} reached level {}", wizard_name, new_level),
                serde_json::json!({ "level": new_level }),
                now,
            )
            .await;
        }

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(CompletedAssignment {
            assignment: JobAssignment {
                id: assignment_id,
                job_id,
                wizard_id,
                status: AssignmentStatus::Completed,
                assigned_at: row.get("assigned_at"),
                started_at: Some(started_at),
                completed_at: Some(now),
                mana_earned: Some(mana_awarded),
                exp_earned: Some(exp_awarded),
                notes: row.get("notes"),
            },
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
        let mut conn = self.conn().await.map_err(AssignmentError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let row = tx
            .query_opt(
                r#"
                SELECT a.job_id, a.wizard_id, a.status, a.assigned_at, a.started_at,
                       j.title, w.user_id, w.name AS wizard_name
                FROM job_assignments a
                JOIN jobs j ON j.id = a.job_id
                JOIN wizards w ON w.id = a.wizard_id
                WHERE a.id = $1
                FOR UPDATE OF a, j
                "#,
                &[&assignment_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(AssignmentError::NotFound { id: assignment_id })?;

        let status_raw: String = row.get("status");
        let status = parse_assignment_status(&status_raw)?;
        if status.is_terminal() {
            return Err(AssignmentError::AlreadyTerminal {
                id: assignment_id,
                status: status.to_string(),
            });
        }

        let job_id: i64 = row.get("job_id");
        let wizard_id: i64 = row.get("wizard_id");
        tx.execute(
            "UPDATE job_assignments SET status = 'cancelled', notes = $2 WHERE id = $1",
            &[&assignment_id, &reason],
        )
        .await
        .map_err(DatabaseError::Postgres)?;
        tx.execute(
            "UPDATE jobs SET currently_assigned = GREATEST(currently_assigned - 1, 0) WHERE id = $1",
            &[&job_id],
        )
        .await
        .map_err(DatabaseError::Postgres)?;
        tx.execute(
            r#"
            UPDATE job_progress SET is_active = FALSE, last_updated_at = $2
            WHERE assignment_id = $1
            "#,
            &[&assignment_id, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let user_id: i64 = row.get("user_id");
        let wizard_name: String = row.get("wizard_name");
        let job_title: String = row.get("title");
        append_activity(
            &mut tx,
            user_id,
            Some(wizard_id),
            "job_cancelled",
            &format!("{} abandoned \"{}\"", wizard_name, job_title),
            serde_json::json!({
                "job_id": job_id,
                "assignment_id": assignment_id,
                "reason": reason,
            }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(JobAssignment {
            id: assignment_id,
            job_id,
            wizard_id,
            status: AssignmentStatus::Cancelled,
            assigned_at: row.get("assigned_at"),
            started_at: row.get("started_at"),
            completed_at: None,
            mana_earned: None,
            exp_earned: None,
            notes: reason.map(str::to_string),
        })
    }

    async fn get_progress(
        &self,
        assignment_id: i64,
    ) -> Result<Option<JobProgress>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, assignment_id, actual_start_time, expected_end_time,
                       progress_percentage, time_worked_minutes, is_active,
                       last_tick_time, last_updated_at
                FROM job_progress WHERE assignment_id = $1
                "#,
                &[&assignment_id],
            )
            .await?;
        Ok(row.as_ref().map(progress_from_row))
    }

    // ==================== Ticker scan ====================

    async fn list_active_progress(&self) -> Result<Vec<ProgressScan>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT p.id, p.assignment_id, p.actual_start_time, p.expected_end_time,
                       p.progress_percentage, a.status
                FROM job_progress p
                JOIN job_assignments a ON a.id = p.assignment_id
                WHERE p.is_active
                  AND a.status IN ('assigned', 'in_progress')
                  AND p.actual_start_time IS NOT NULL
                  AND p.expected_end_time IS NOT NULL
                "#,
                &[],
            )
            .await?;

        let mut scans = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: String = row.get("status");
            scans.push(ProgressScan {
                progress_id: row.get("id"),
                assignment_id: row.get("assignment_id"),
                actual_start_time: row.get("actual_start_time"),
                expected_end_time: row.get("expected_end_time"),
                progress_percentage: row.get("progress_percentage"),
                assignment_status: parse_assignment_status(&status)?,
            });
        }
        Ok(scans)
    }

    async fn apply_progress_updates(
        &self,
        updates: &[ProgressUpdate],
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;

        for update in updates {
            // The progress guard keeps the row monotonic even if another
            // writer advanced it between scan and apply.
            tx.execute(
                r#"
                UPDATE job_progress
                SET progress_percentage = $2, time_worked_minutes = $3,
                    last_updated_at = $4, last_tick_time = $4
                WHERE id = $1 AND progress_percentage < $2
                "#,
                &[
                    &update.progress_id,
                    &update.new_progress,
                    &update.time_worked_minutes,
                    &now,
                ],
            )
            .await?;

            if update.mark_in_progress {
                tx.execute(
                    r#"
                    UPDATE job_assignments
                    SET status = 'in_progress', started_at = COALESCE(started_at, $2)
                    WHERE id = $1 AND status = 'assigned'
                    "#,
                    &[&update.assignment_id, &now],
                )
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_completable_assignments(&self) -> Result<Vec<i64>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT p.assignment_id
                FROM job_progress p
                JOIN job_assignments a ON a.id = p.assignment_id
                WHERE p.progress_percentage >= 100
                  AND a.status IN ('assigned', 'in_progress')
                  AND p.is_active
                "#,
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    // ==================== Investments ====================

    async fn create_investment_type(
        &self,
        new: &NewInvestmentType,
    ) -> Result<InvestmentType, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                r#"
                INSERT INTO investment_types (name, description, min_amount, max_amount,
                                              duration_hours, base_return_rate, risk_level)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, name, description, min_amount, max_amount, duration_hours,
                          base_return_rate, risk_level, is_active
                "#,
                &[
                    &new.name,
                    &new.description,
                    &new.min_amount,
                    &new.max_amount,
                    &new.duration_hours,
                    &new.base_return_rate,
                    &new.risk_level,
                ],
            )
            .await?;
        Ok(investment_type_from_row(&row))
    }

    async fn get_investment_type(
        &self,
        id: i64,
    ) -> Result<Option<InvestmentType>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT id, name, description, min_amount, max_amount, duration_hours,
                       base_return_rate, risk_level, is_active
                FROM investment_types WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        Ok(row.as_ref().map(investment_type_from_row))
    }

    async fn list_investment_types(
        &self,
        filter: &InvestmentTypeFilter,
    ) -> Result<Vec<InvestmentType>, DatabaseError> {
        let conn = self.conn().await?;
        // Amount filters select types whose allowed stake range intersects
        // the caller's budget window; max_amount = 0 means unbounded.
        let rows = conn
            .query(
                r#"
                SELECT id, name, description, min_amount, max_amount, duration_hours,
                       base_return_rate, risk_level, is_active
                FROM investment_types
                WHERE is_active
                  AND ($1::bigint IS NULL OR max_amount = 0 OR max_amount >= $1)
                  AND ($2::bigint IS NULL OR min_amount <= $2)
                  AND ($3::int IS NULL OR risk_level = $3)
                ORDER BY id
                "#,
                &[&filter.min_amount, &filter.max_amount, &filter.risk_level],
            )
            .await?;
        Ok(rows.iter().map(investment_type_from_row).collect())
    }

    async fn create_investment(
        &self,
        wizard_id: i64,
        investment_type_id: i64,
        amount: i64,
        now: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<WizardInvestment, InvestmentError> {
        let mut conn = self.conn().await.map_err(InvestmentError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        let row = tx
            .query_opt(
                "SELECT user_id, mana_balance FROM wizards WHERE id = $1 FOR UPDATE",
                &[&wizard_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?
            .ok_or(InvestmentError::WizardNotFound { id: wizard_id })?;
        let balance: i64 = row.get("mana_balance");
        if balance < amount {
            return Err(InvestmentError::InsufficientBalance {
                balance,
                required: amount,
            });
        }

        tx.execute(
            "UPDATE wizards SET mana_balance = mana_balance - $2, updated_at = $3 WHERE id = $1",
            &[&wizard_id, &amount, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let inserted = tx
            .query_one(
                r#"
                INSERT INTO wizard_investments (wizard_id, investment_type_id, amount,
                                                start_time, end_time, status, created_at,
                                                updated_at)
                VALUES ($1, $2, $3, $4, $5, 'active', $4, $4)
                RETURNING id
                "#,
                &[&wizard_id, &investment_type_id, &amount, &now, &end_time],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let investment_id: i64 = inserted.get(0);

        record_transaction(
            &tx,
            Some(wizard_id),
            None,
            amount,
            "Investment creation",
            now,
        )
        .await
        .map_err(InvestmentError::Database)?;

        let user_id: i64 = row.get("user_id");
        append_activity(
            &mut tx,
            user_id,
            Some(wizard_id),
            "investment_created",
            &format!("Invested {} mana", amount),
            serde_json::json!({
                "investment_id": investment_id,
                "investment_type_id": investment_type_id,
                "amount": amount,
            }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(WizardInvestment {
            id: investment_id,
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
        })
    }

    async fn list_investments(
        &self,
        wizard_id: i64,
        status: Option<InvestmentStatus>,
    ) -> Result<Vec<InvestmentDetail>, DatabaseError> {
        let conn = self.conn().await?;
        let status = status.map(|s| s.to_string());
        let rows = conn
            .query(
                r#"
                SELECT i.id, i.wizard_id, i.investment_type_id, i.amount, i.start_time,
                       i.end_time, i.status, i.actual_return_rate, i.returned_amount,
                       i.created_at, i.updated_at,
                       t.name AS type_name, t.risk_level
                FROM wizard_investments i
                JOIN investment_types t ON t.id = i.investment_type_id
                WHERE i.wizard_id = $1
                  AND ($2::text IS NULL OR i.status = $2)
                ORDER BY i.created_at DESC, i.id DESC
                "#,
                &[&wizard_id, &status],
            )
            .await?;

        let mut details = Vec::with_capacity(rows.len());
        for row in &rows {
            details.push(InvestmentDetail {
                investment: investment_from_row(row)?,
                type_name: row.get("type_name"),
                risk_level: row.get("risk_level"),
            });
        }
        Ok(details)
    }

    async fn list_pending_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(i64, DateTime<Utc>)>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id, end_time FROM wizard_investments
                WHERE status = 'active' AND end_time > $1
                "#,
                &[&now],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("end_time")))
            .collect())
    }

    async fn list_matured_investments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id FROM wizard_investments
                WHERE status = 'active' AND end_time <= $1
                "#,
                &[&now],
            )
            .await?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn settle_investment(
        &self,
        investment_id: i64,
        unit: f64,
        now: DateTime<Utc>,
    ) -> Result<Option<SettledInvestment>, InvestmentError> {
        let mut conn = self.conn().await.map_err(InvestmentError::Database)?;
        let mut tx = conn.transaction().await.map_err(DatabaseError::Postgres)?;

        // Already-settled rows fall out of the status guard; the caller
        // treats None as a duplicate firing.
        let row = tx
            .query_opt(
                r#"
                SELECT i.wizard_id, i.amount, t.base_return_rate, t.risk_level,
                       w.user_id
                FROM wizard_investments i
                JOIN investment_types t ON t.id = i.investment_type_id
                JOIN wizards w ON w.id = i.wizard_id
                WHERE i.id = $1 AND i.status = 'active'
                FOR UPDATE OF i, w
                "#,
                &[&investment_id],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let wizard_id: i64 = row.get("wizard_id");
        let amount: i64 = row.get("amount");
        let actual_rate =
            economy::return_rate(row.get("base_return_rate"), row.get("risk_level"), unit);
        let returned = economy::returned_amount(amount, actual_rate);

        tx.execute(
            r#"
            UPDATE wizard_investments
            SET status = 'completed', actual_return_rate = $2, returned_amount = $3,
                updated_at = $4
            WHERE id = $1
            "#,
            &[&investment_id, &actual_rate, &returned, &now],
        )
        .await
        .map_err(DatabaseError::Postgres)?;

        let balance_row = tx
            .query_one(
                r#"
                UPDATE wizards SET mana_balance = mana_balance + $2, updated_at = $3
                WHERE id = $1
                RETURNING mana_balance
                "#,
                &[&wizard_id, &returned, &now],
            )
            .await
            .map_err(DatabaseError::Postgres)?;
        let new_balance: i64 = balance_row.get(0);

        record_transaction(&tx, None, Some(wizard_id), returned, "Investment return", now)
            .await
            .map_err(InvestmentError::Database)?;

        let user_id: i64 = row.get("user_id");
        append_activity(
            &mut tx,
            user_id,
            Some(wizard_id),
            "investment_return",
            &format!(
                "Investment matured: {} mana returned at {:.2} %",
                returned, actual_rate
            ),
            serde_json::json!({
                "investment_id": investment_id,
                "returned_amount": returned,
                "actual_return_rate": actual_rate,
            }),
            now,
        )
        .await;

        tx.commit().await.map_err(DatabaseError::Postgres)?;

        Ok(Some(SettledInvestment {
            id: investment_id,
            wizard_id,
            amount,
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
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id, user_id, wizard_id, activity_type, description, metadata, created_at
                FROM activity_logs
                WHERE user_id = $1
                ORDER BY created_at DESC, id DESC
                LIMIT $2 OFFSET $3
                "#,
                &[&user_id, &page.size, &page.offset()],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| ActivityLog {
                id: row.get("id"),
                user_id: row.get("user_id"),
                wizard_id: row.get("wizard_id"),
                activity_type: row.get("activity_type"),
                description: row.get("description"),
                metadata: row.get("metadata"),
                created_at: row.get("created_at"),
            })
            .collect())
    }
}
