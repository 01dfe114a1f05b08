//! End-to-end assignment lifecycle scenarios, driven deterministically
//! through the in-memory backend and a manual clock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use manaforge::clock::ManualClock;
use manaforge::config::TickerConfig;
use manaforge::db::Database;
use manaforge::error::{AssignmentError, ErrorCode};
use manaforge::jobs::AssignmentService;
use manaforge::jobs::ticker::JobTicker;
use manaforge::model::{AssignmentStatus, NewJob};
use manaforge::testing::MemoryBackend;

fn fire_job(max_wizards: i32) -> NewJob {
    NewJob {
        realm: "Pyrrhian Flame".to_string(),
        title: "Tend the Ember Forge".to_string(),
        description: "Keep the forge fires burning".to_string(),
        required_element: "Fire".to_string(),
        required_level: 5,
        mana_reward_per_hour: 120,
        exp_reward_per_hour: 60,
        duration_minutes: 60,
        max_wizards,
    }
}

struct Harness {
    backend: Arc<MemoryBackend>,
    clock: Arc<ManualClock>,
    service: AssignmentService,
    ticker: Arc<JobTicker>,
}

fn harness() -> Harness {
    let (backend, db) = MemoryBackend::shared();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = AssignmentService::new(db.clone(), clock.clone());
    let ticker = Arc::new(JobTicker::new(db, clock.clone(), TickerConfig::default()));
    Harness {
        backend,
        clock,
        service,
        ticker,
    }
}

#[tokio::test]
async fn assign_then_complete_via_ticker() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 100);
    let job = h.backend.seed_job(fire_job(1));

    // Assign: status assigned, progress row spans [T, T+60m].
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Assigned);

    let progress = h.service.progress(assignment.id).await.unwrap();
    assert_eq!(progress.progress_percentage, 0);
    let start = progress.actual_start_time.unwrap();
    assert_eq!(
        progress.expected_end_time.unwrap(),
        start + Duration::minutes(60)
    );

    // Half-way: one tick converges to 50 % and starts the assignment.
    h.clock.advance(Duration::minutes(30));
    let summary = h.ticker.run_tick().await.unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.completed, 0);

    let progress = h.service.progress(assignment.id).await.unwrap();
    assert_eq!(progress.progress_percentage, 50);
    assert_eq!(progress.time_worked_minutes, 30);
    let stored = h
        .backend
        .get_assignment(assignment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AssignmentStatus::InProgress);
    assert!(stored.started_at.is_some());

    // Full duration: the same tick updates to 100 and auto-completes.
    h.clock.advance(Duration::minutes(30));
    let summary = h.ticker.run_tick().await.unwrap();
    assert_eq!(summary.completed, 1);

    let wizard_after = h.backend.get_wizard(wizard.id).await.unwrap().unwrap();
    // 120 mana/h over 60 minutes on top of the starting 100.
    assert_eq!(wizard_after.mana_balance, 220);
    assert_eq!(wizard_after.experience_points, wizard.experience_points + 60);
    assert_eq!(wizard_after.level, 5);

    let job_after = h.backend.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job_after.currently_assigned, 0);

    let stored = h
        .backend
        .get_assignment(assignment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AssignmentStatus::Completed);
    assert_eq!(stored.mana_earned, Some(120));
    assert_eq!(stored.exp_earned, Some(60));
}

#[tokio::test]
async fn complete_is_exactly_once() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(1));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    let completed = h.service.complete(assignment.id).await.unwrap();
    assert_eq!(completed.mana_awarded, 120);
    assert_eq!(completed.new_balance, 120);

    // Second completion: idempotent NOT_FOUND no-op, nothing changes.
    let err = h.service.complete(assignment.id).await.unwrap_err();
    assert!(matches!(err, AssignmentError::NotFound { .. }));
    assert_eq!(err.code(), ErrorCode::NotFound);

    let wizard_after = h.backend.get_wizard(wizard.id).await.unwrap().unwrap();
    assert_eq!(wizard_after.mana_balance, 120);

    // The reward appears in the ledger exactly once.
    let rewards: Vec<_> = h
        .backend
        .transactions()
        .into_iter()
        .filter(|t| t.reason == "Job reward")
        .collect();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0].amount, 120);
}

#[tokio::test]
async fn full_job_rejects_further_assignment() {
    let h = harness();
    let first = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let second = h.backend.seed_wizard(2, "Pyra", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(1));

    h.service.assign(first.id, job.id).await.unwrap();
    let err = h.service.assign(second.id, job.id).await.unwrap_err();
    assert!(matches!(err, AssignmentError::JobFull { .. }));
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    let job_after = h.backend.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job_after.currently_assigned, 1);
}

#[tokio::test]
async fn duplicate_active_assignment_rejected() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(3));

    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    // Push it to in_progress first; still counts as a live assignment.
    h.clock.advance(Duration::minutes(10));
    h.ticker.run_tick().await.unwrap();
    let stored = h
        .backend
        .get_assignment(assignment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AssignmentStatus::InProgress);

    let err = h.service.assign(wizard.id, job.id).await.unwrap_err();
    assert!(matches!(err, AssignmentError::AlreadyAssigned { .. }));

    // A terminal assignment frees the slot again.
    h.service.cancel(assignment.id, None).await.unwrap();
    h.service.assign(wizard.id, job.id).await.unwrap();
}

#[tokio::test]
async fn eligibility_gates_assignment() {
    let h = harness();
    let wrong_element = h.backend.seed_wizard(1, "Aqua", "Water", 9, 0);
    let too_low = h.backend.seed_wizard(2, "Spark", "Fire", 3, 0);
    let job = h.backend.seed_job(fire_job(2));

    let err = h.service.assign(wrong_element.id, job.id).await.unwrap_err();
    assert!(matches!(err, AssignmentError::ElementMismatch { .. }));

    let err = h.service.assign(too_low.id, job.id).await.unwrap_err();
    assert!(matches!(err, AssignmentError::LevelTooLow { .. }));

    let err = h.service.assign(too_low.id, 9999).await.unwrap_err();
    assert!(matches!(err, AssignmentError::JobNotFound { .. }));
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn cancel_before_completion_pays_nothing() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 100);
    let job = h.backend.seed_job(fire_job(1));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    // Work 40 % of the job.
    h.clock.advance(Duration::minutes(24));
    h.ticker.run_tick().await.unwrap();

    let cancelled = h
        .service
        .cancel(assignment.id, Some("changed mind"))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AssignmentStatus::Cancelled);
    assert_eq!(cancelled.notes.as_deref(), Some("changed mind"));

    let wizard_after = h.backend.get_wizard(wizard.id).await.unwrap().unwrap();
    assert_eq!(wizard_after.mana_balance, 100);
    let job_after = h.backend.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(job_after.currently_assigned, 0);

    // Later ticks skip the cancelled assignment entirely.
    h.clock.advance(Duration::hours(2));
    let summary = h.ticker.run_tick().await.unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.completed, 0);

    // Cancelling again is an idempotent failure.
    let err = h.service.cancel(assignment.id, None).await.unwrap_err();
    assert!(matches!(err, AssignmentError::AlreadyTerminal { .. }));
}

#[tokio::test]
async fn ticker_converges_regardless_of_tick_count() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(1));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    // k ticks with the clock advanced by Δ total equal one tick with Δ.
    h.clock.advance(Duration::minutes(20));
    for _ in 0..3 {
        h.ticker.run_tick().await.unwrap();
    }
    let progress = h.service.progress(assignment.id).await.unwrap();
    assert_eq!(progress.progress_percentage, 33);

    // A tick with no elapsed time changes nothing.
    let summary = h.ticker.run_tick().await.unwrap();
    assert_eq!(summary.updated, 0);
}

#[tokio::test]
async fn client_progress_hints_are_clamped_and_monotonic() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(1));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    let progress = h
        .service
        .update_progress(assignment.id, 40, 24)
        .await
        .unwrap();
    assert_eq!(progress.progress_percentage, 40);

    // The assignment transitioned on the first positive hint.
    let stored = h
        .backend
        .get_assignment(assignment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AssignmentStatus::InProgress);

    // A lower hint keeps the stored value.
    let progress = h
        .service
        .update_progress(assignment.id, 10, 6)
        .await
        .unwrap();
    assert_eq!(progress.progress_percentage, 40);

    // An overshooting hint clamps to 100 and retires the row, but the
    // assignment is not completed here.
    let progress = h
        .service
        .update_progress(assignment.id, 250, 90)
        .await
        .unwrap();
    assert_eq!(progress.progress_percentage, 100);
    assert!(!progress.is_active);
    let stored = h
        .backend
        .get_assignment(assignment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, AssignmentStatus::InProgress);

    // Terminal assignments refuse further hints.
    h.service.complete(assignment.id).await.unwrap();
    let err = h
        .service
        .update_progress(assignment.id, 100, 60)
        .await
        .unwrap_err();
    assert!(matches!(err, AssignmentError::AlreadyTerminal { .. }));
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);
}

#[tokio::test]
async fn progress_reads_interpolate_between_ticks() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(1));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    // No tick has run, but a poll sees live wall-clock progress.
    h.clock.advance(Duration::minutes(15));
    let live = h.service.progress(assignment.id).await.unwrap();
    assert_eq!(live.progress_percentage, 25);
    assert_eq!(live.time_worked_minutes, 15);

    // The stored row is untouched until the ticker passes.
    let stored = h.backend.get_progress(assignment.id).await.unwrap().unwrap();
    assert_eq!(stored.progress_percentage, 0);
}

#[tokio::test]
async fn completion_awards_level_up() {
    let h = harness();
    // Level 1 wizard; 120 exp/h for an hour crosses the level-2 threshold.
    let wizard = h.backend.seed_wizard(1, "Novice", "Fire", 1, 0);
    let job = h.backend.seed_job(NewJob {
        required_level: 1,
        exp_reward_per_hour: 120,
        ..fire_job(1)
    });
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    let completed = h.service.complete(assignment.id).await.unwrap();
    assert!(completed.leveled_up);
    assert_eq!(completed.new_level, 2);

    let level_ups: Vec<_> = h
        .backend
        .activities()
        .into_iter()
        .filter(|a| a.activity_type == "level_up")
        .collect();
    assert_eq!(level_ups.len(), 1);
}

#[tokio::test]
async fn listing_nests_job_and_progress() {
    let h = harness();
    let wizard = h.backend.seed_wizard(1, "Ignis", "Fire", 5, 0);
    let job = h.backend.seed_job(fire_job(2));
    let assignment = h.service.assign(wizard.id, job.id).await.unwrap();

    let listed = h
        .service
        .list(
            &manaforge::db::AssignmentFilter {
                wizard_id: Some(wizard.id),
                status: Some(AssignmentStatus::Assigned),
                ..Default::default()
            },
            manaforge::model::Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].assignment.id, assignment.id);
    assert_eq!(listed[0].job.id, job.id);
    assert!(listed[0].progress.is_some());
}
