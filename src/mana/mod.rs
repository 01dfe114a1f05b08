//! Wizard and mana surface.
//!
//! Sole owner of wizard rows and balances: every balance mutation in the
//! system funnels through the persistence contract's single
//! `update_mana_balance`/`transfer_mana` entry points, so the status log,
//! ledger row, and activity entry always commit together. The investment
//! and assignment paths credit balances inside their own transactions
//! through the same SQL discipline instead of calling back into this
//! service.

use std::sync::Arc;

use crate::db::Database;
use crate::error::WizardError;
use crate::identity::Caller;
use crate::model::{ActivityLog, ManaTransaction, NewWizard, Page, Wizard};

/// Result of a transfer attempt.
///
/// Validation failures are soft: the surface reports `success = false` with
/// a message and leaves balances untouched. Missing wizards and
/// insufficient balance surface as hard errors with their RPC codes.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub success: bool,
    pub message: String,
}

impl TransferOutcome {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    fn ok() -> Self {
        Self {
            success: true,
            message: "Transfer completed".to_string(),
        }
    }
}

/// The wizard (mana) service.
pub struct ManaService {
    db: Arc<dyn Database>,
}

impl ManaService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create a wizard owned by the calling user.
    pub async fn create_wizard(
        &self,
        caller: Caller,
        name: &str,
        realm: &str,
        element: &str,
    ) -> Result<Wizard, WizardError> {
        let wizard = self
            .db
            .create_wizard(&NewWizard {
                user_id: caller.user_id,
                name: name.to_string(),
                realm: realm.to_string(),
                element: element.to_string(),
            })
            .await?;
        tracing::info!(
            wizard_id = wizard.id,
            user_id = caller.user_id,
            "Created wizard"
        );
        Ok(wizard)
    }

    pub async fn get_wizard(&self, id: i64) -> Result<Wizard, WizardError> {
        self.db
            .get_wizard(id)
            .await?
            .ok_or(WizardError::NotFound { id })
    }

    pub async fn list_wizards(
        &self,
        user_id: Option<i64>,
        page: Page,
    ) -> Result<Vec<Wizard>, WizardError> {
        Ok(self.db.list_wizards(user_id, page).await?)
    }

    pub async fn get_mana_balance(&self, wizard_id: i64) -> Result<i64, WizardError> {
        self.db.get_mana_balance(wizard_id).await
    }

    /// Apply a signed delta to a wizard's balance.
    ///
    /// A result below zero fails the whole operation. An empty reason
    /// skips the ledger and activity entries.
    pub async fn update_mana_balance(
        &self,
        wizard_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<i64, WizardError> {
        let reason = (!reason.trim().is_empty()).then_some(reason);
        let new_balance = self.db.update_mana_balance(wizard_id, amount, reason).await?;
        tracing::debug!(wizard_id, amount, new_balance, "Updated mana balance");
        Ok(new_balance)
    }

    /// Move mana between two wizards.
    pub async fn transfer_mana(
        &self,
        from_wizard_id: i64,
        to_wizard_id: i64,
        amount: i64,
        reason: &str,
    ) -> Result<TransferOutcome, WizardError> {
        if amount <= 0 {
            return Ok(TransferOutcome::rejected(
                WizardError::NonPositiveAmount { amount }.to_string(),
            ));
        }
        if from_wizard_id == to_wizard_id {
            return Ok(TransferOutcome::rejected(
                WizardError::SelfTransfer.to_string(),
            ));
        }

        self.db
            .transfer_mana(from_wizard_id, to_wizard_id, amount, reason)
            .await?;
        tracing::info!(
            from_wizard_id,
            to_wizard_id,
            amount,
            "Transferred mana"
        );
        Ok(TransferOutcome::ok())
    }

    /// List ledger rows for a wizard the caller owns.
    pub async fn list_transactions(
        &self,
        caller: Caller,
        wizard_id: i64,
        page: Page,
    ) -> Result<Vec<ManaTransaction>, WizardError> {
        let wizard = self.get_wizard(wizard_id).await?;
        if wizard.user_id != caller.user_id {
            // Ownership is part of the contract; a foreign wizard is
            // indistinguishable from a missing one.
            return Err(WizardError::NotFound { id: wizard_id });
        }
        Ok(self.db.list_transactions(wizard_id, page).await?)
    }

    /// List audit entries for the calling user.
    pub async fn list_activities(
        &self,
        caller: Caller,
        page: Page,
    ) -> Result<Vec<ActivityLog>, WizardError> {
        Ok(self.db.list_activities(caller.user_id, page).await?)
    }
}
