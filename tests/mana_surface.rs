//! Wizard and mana surface scenarios: balance guards, transfers, and the
//! ownership rules.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use manaforge::db::Database;
use manaforge::error::{ErrorCode, WizardError};
use manaforge::identity::Caller;
use manaforge::mana::ManaService;
use manaforge::model::Page;
use manaforge::testing::MemoryBackend;

fn harness() -> (Arc<MemoryBackend>, ManaService) {
    let (backend, db) = MemoryBackend::shared();
    let service = ManaService::new(db);
    (backend, service)
}

#[tokio::test]
async fn self_transfer_is_soft_rejected() {
    let (backend, service) = harness();
    let wizard = backend.seed_wizard(1, "Ignis", "Fire", 5, 100);

    let outcome = service
        .transfer_mana(wizard.id, wizard.id, 10, "")
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "Cannot transfer mana to yourself");

    let after = backend.get_wizard(wizard.id).await.unwrap().unwrap();
    assert_eq!(after.mana_balance, 100);
    assert!(backend.transactions().is_empty());
}

#[tokio::test]
async fn non_positive_transfer_is_soft_rejected() {
    let (backend, service) = harness();
    let a = backend.seed_wizard(1, "Ignis", "Fire", 5, 100);
    let b = backend.seed_wizard(2, "Aqua", "Water", 5, 100);

    for amount in [0, -25] {
        let outcome = service.transfer_mana(a.id, b.id, amount, "").await.unwrap();
        assert!(!outcome.success);
    }
    assert!(backend.transactions().is_empty());
}

#[tokio::test]
async fn transfer_moves_mana_and_writes_the_ledger() {
    let (backend, service) = harness();
    let a = backend.seed_wizard(1, "Ignis", "Fire", 5, 100);
    let b = backend.seed_wizard(2, "Aqua", "Water", 5, 10);

    let outcome = service
        .transfer_mana(a.id, b.id, 60, "tribute")
        .await
        .unwrap();
    assert!(outcome.success);

    assert_eq!(service.get_mana_balance(a.id).await.unwrap(), 40);
    assert_eq!(service.get_mana_balance(b.id).await.unwrap(), 70);

    let ledger = backend.transactions();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].from_wizard_id, Some(a.id));
    assert_eq!(ledger[0].to_wizard_id, Some(b.id));
    assert_eq!(ledger[0].amount, 60);

    // Both parties got an audit entry.
    let transfers: Vec<_> = backend
        .activities()
        .into_iter()
        .filter(|e| e.activity_type == "mana_transfer")
        .collect();
    assert_eq!(transfers.len(), 2);
}

#[tokio::test]
async fn transfer_requires_sufficient_balance() {
    let (backend, service) = harness();
    let a = backend.seed_wizard(1, "Ignis", "Fire", 5, 30);
    let b = backend.seed_wizard(2, "Aqua", "Water", 5, 0);

    let err = service.transfer_mana(a.id, b.id, 50, "").await.unwrap_err();
    assert!(matches!(err, WizardError::InsufficientMana { .. }));
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    assert_eq!(service.get_mana_balance(a.id).await.unwrap(), 30);
    assert_eq!(service.get_mana_balance(b.id).await.unwrap(), 0);
}

#[tokio::test]
async fn balance_never_goes_negative() {
    let (backend, service) = harness();
    let wizard = backend.seed_wizard(1, "Ignis", "Fire", 5, 40);

    let err = service
        .update_mana_balance(wizard.id, -100, "tax")
        .await
        .unwrap_err();
    assert!(matches!(err, WizardError::InsufficientMana { .. }));
    assert_eq!(service.get_mana_balance(wizard.id).await.unwrap(), 40);

    // Draining to exactly zero is allowed.
    let new_balance = service
        .update_mana_balance(wizard.id, -40, "tax")
        .await
        .unwrap();
    assert_eq!(new_balance, 0);
}

#[tokio::test]
async fn balance_updates_with_a_reason_hit_the_ledger() {
    let (backend, service) = harness();
    let wizard = backend.seed_wizard(1, "Ignis", "Fire", 5, 0);

    service
        .update_mana_balance(wizard.id, 250, "quest bounty")
        .await
        .unwrap();
    // An empty reason skips the ledger and audit trail.
    service.update_mana_balance(wizard.id, 5, "").await.unwrap();

    let ledger = backend.transactions();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].reason, "quest bounty");
    assert_eq!(ledger[0].to_wizard_id, Some(wizard.id));
    assert_eq!(service.get_mana_balance(wizard.id).await.unwrap(), 255);
}

#[tokio::test]
async fn missing_wizard_is_not_found() {
    let (_backend, service) = harness();
    let err = service.get_mana_balance(404).await.unwrap_err();
    assert!(matches!(err, WizardError::NotFound { id: 404 }));
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn users_own_at_most_two_wizards() {
    let (_backend, service) = harness();
    let caller = Caller::new(7);

    service
        .create_wizard(caller, "Ignis", "Pyrrhian Flame", "Fire")
        .await
        .unwrap();
    service
        .create_wizard(caller, "Aqua", "Abyssal Depths", "Water")
        .await
        .unwrap();
    let err = service
        .create_wizard(caller, "Terra", "Verdant Wild", "Earth")
        .await
        .unwrap_err();
    assert!(matches!(err, WizardError::WizardLimitReached { .. }));
    assert_eq!(err.code(), ErrorCode::FailedPrecondition);

    // Another user is unaffected.
    service
        .create_wizard(Caller::new(8), "Zephyr", "Skyward Spire", "Air")
        .await
        .unwrap();
}

#[tokio::test]
async fn transaction_history_is_owner_only() {
    let (backend, service) = harness();
    let mine = backend.seed_wizard(1, "Ignis", "Fire", 5, 100);
    let theirs = backend.seed_wizard(2, "Aqua", "Water", 5, 100);

    service
        .transfer_mana(mine.id, theirs.id, 25, "gift")
        .await
        .unwrap();

    let history = service
        .list_transactions(Caller::new(1), mine.id, Page::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // A foreign wizard's history is indistinguishable from a missing one.
    let err = service
        .list_transactions(Caller::new(1), theirs.id, Page::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WizardError::NotFound { .. }));
}
