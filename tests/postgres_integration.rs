//! PostgreSQL integration tests.
//!
//! Run with a live database:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/manaforge_test \
//!     cargo test --features integration --test postgres_integration
//! ```
//!
//! These exercise the real backend's transaction and guard SQL against the
//! same scenarios the in-memory suites cover deterministically.

#![cfg(feature = "integration")]

use chrono::{Duration, Utc};
use secrecy::SecretString;

use manaforge::config::DatabaseConfig;
use manaforge::db::{Database, postgres::PgBackend};
use manaforge::error::AssignmentError;
use manaforge::model::{AssignmentStatus, NewInvestmentType, NewJob, NewWizard};

fn backend() -> PgBackend {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a test database for integration tests");
    let config = DatabaseConfig {
        url: SecretString::from(url),
        pool_size: 4,
    };
    PgBackend::new(&config).expect("failed to build pool")
}

fn unique_user() -> i64 {
    // Distinct per test process so reruns don't trip the ownership limit.
    std::process::id() as i64 * 1_000 + (Utc::now().timestamp_micros() % 1_000)
}

#[tokio::test]
async fn assignment_round_trip_against_postgres() {
    let db = backend();
    db.run_migrations().await.expect("migrations");

    let wizard = db
        .create_wizard(&NewWizard {
            user_id: unique_user(),
            name: "Integration Ignis".to_string(),
            realm: "Pyrrhian Flame".to_string(),
            element: "Fire".to_string(),
        })
        .await
        .expect("create wizard");
    // Fresh wizards start at level 1; keep the job open to them.
    let job = db
        .create_job(&NewJob {
            realm: "Pyrrhian Flame".to_string(),
            title: "Integration Forge Duty".to_string(),
            description: String::new(),
            required_element: "Fire".to_string(),
            required_level: 1,
            mana_reward_per_hour: 120,
            exp_reward_per_hour: 60,
            duration_minutes: 60,
            max_wizards: 1,
        })
        .await
        .expect("create job");

    let now = Utc::now();
    let assignment = db
        .assign_wizard(wizard.id, job.id, now)
        .await
        .expect("assign");
    assert_eq!(assignment.status, AssignmentStatus::Assigned);

    // The partial unique index rejects a duplicate live assignment.
    let err = db.assign_wizard(wizard.id, job.id, now).await.unwrap_err();
    assert!(matches!(
        err,
        AssignmentError::AlreadyAssigned { .. } | AssignmentError::JobFull { .. }
    ));

    let completed = db
        .complete_assignment(assignment.id, now + Duration::minutes(60))
        .await
        .expect("complete");
    assert_eq!(completed.mana_awarded, 120);
    assert_eq!(completed.exp_awarded, 60);

    // Exactly once: the guard reports NotFound on the second attempt.
    let err = db
        .complete_assignment(assignment.id, now + Duration::minutes(61))
        .await
        .unwrap_err();
    assert!(matches!(err, AssignmentError::NotFound { .. }));

    let after = db.get_wizard(wizard.id).await.unwrap().unwrap();
    assert_eq!(after.mana_balance, 120);
}

#[tokio::test]
async fn investment_settles_once_against_postgres() {
    let db = backend();
    db.run_migrations().await.expect("migrations");

    let wizard = db
        .create_wizard(&NewWizard {
            user_id: unique_user(),
            name: "Integration Auric".to_string(),
            realm: "Verdant Wild".to_string(),
            element: "Earth".to_string(),
        })
        .await
        .expect("create wizard");
    db.update_mana_balance(wizard.id, 1_000, None)
        .await
        .expect("fund wizard");

    let itype = db
        .create_investment_type(&NewInvestmentType {
            name: "Integration Bond".to_string(),
            description: String::new(),
            min_amount: 100,
            max_amount: 0,
            duration_hours: 1,
            base_return_rate: 5.0,
            risk_level: 2,
        })
        .await
        .expect("create type");

    let now = Utc::now();
    let investment = db
        .create_investment(wizard.id, itype.id, 1_000, now, now + Duration::hours(1))
        .await
        .expect("create investment");
    assert_eq!(db.get_mana_balance(wizard.id).await.unwrap(), 0);

    let settled = db
        .settle_investment(investment.id, 0.5, now + Duration::hours(1))
        .await
        .expect("settle")
        .expect("was active");
    assert_eq!(settled.returned_amount, 1_050);

    let duplicate = db
        .settle_investment(investment.id, 0.5, now + Duration::hours(2))
        .await
        .expect("settle again");
    assert!(duplicate.is_none());
    assert_eq!(db.get_mana_balance(wizard.id).await.unwrap(), 1_050);
}
