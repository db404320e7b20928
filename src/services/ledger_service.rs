use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::database::memory::MemoryStore;
use crate::database::postgres::PgStore;
use crate::database::{
    GrantCommand, LedgerStore, ResetCommand, StartOutcome, TestCatalog, UserDirectory,
};
use crate::dto::attempt_dto::{
    AttemptCounts, AttemptRecordView, AuditEntryView, CompleteResult, EligibilitySnapshot,
    GrantAttemptsRequest, LearnerStatusView, LedgerEntryView, ResetAttemptsRequest, StartResult,
};
use crate::error::{Error, Result};
use crate::models::attempt_ledger::{AttemptLedgerEntry, DEFAULT_ALLOWED_ATTEMPTS};
use crate::models::user::Caller;

/// Eligibility checks and attempt accounting per (user, test) pair.
#[derive(Clone)]
pub struct LedgerService {
    catalog: Arc<dyn TestCatalog>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn LedgerStore>,
}

impl LedgerService {
    pub fn new(
        catalog: Arc<dyn TestCatalog>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            catalog,
            users,
            store,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self::new(store.clone(), store.clone(), store)
    }

    pub fn in_memory(store: MemoryStore) -> Self {
        let store = Arc::new(store);
        Self::new(store.clone(), store.clone(), store)
    }

    async fn require_test(&self, test_id: Uuid) -> Result<()> {
        match self.catalog.get_test_by_id(test_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound("Test not found".to_string())),
        }
    }

    async fn require_user(&self, user_id: Uuid) -> Result<()> {
        match self.users.get_user_by_id(user_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound("User not found".to_string())),
        }
    }

    async fn require_entry(&self, user_id: Uuid, test_id: Uuid) -> Result<AttemptLedgerEntry> {
        self.store
            .find_entry(user_id, test_id)
            .await?
            .ok_or_else(ledger_entry_not_found)
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn check_eligibility(
        &self,
        caller: &Caller,
        test_id: Uuid,
    ) -> Result<EligibilitySnapshot> {
        self.require_test(test_id).await?;
        let entry = self
            .store
            .ensure_entry(caller.user_id, test_id, DEFAULT_ALLOWED_ATTEMPTS)
            .await?;
        Ok(EligibilitySnapshot::from(&entry))
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn mark_started(&self, caller: &Caller, test_id: Uuid) -> Result<StartResult> {
        match self
            .store
            .start_attempt(caller.user_id, test_id, Utc::now())
            .await?
        {
            StartOutcome::Started(started) => {
                info!(
                    attempt_number = started.record.attempt_number,
                    remaining = started.entry.remaining_attempts(),
                    "Attempt started"
                );
                Ok(StartResult {
                    attempts_used: started.entry.attempts_used,
                    remaining_attempts: started.entry.remaining_attempts(),
                    attempt_number: started.record.attempt_number,
                    started_at: started.record.started_at,
                })
            }
            StartOutcome::Exhausted(entry) => {
                warn!(
                    allowed = entry.allowed_attempts,
                    used = entry.attempts_used,
                    "Start rejected, no attempts remaining"
                );
                Err(Error::AttemptsExhausted)
            }
            StartOutcome::Missing => Err(ledger_entry_not_found()),
        }
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn mark_completed(&self, caller: &Caller, test_id: Uuid) -> Result<CompleteResult> {
        let completed = self
            .store
            .complete_attempt(caller.user_id, test_id, Utc::now())
            .await?
            .ok_or_else(ledger_entry_not_found)?;
        Ok(CompleteResult {
            has_completed: completed.entry.has_completed,
            attempt_number: completed.record.map(|r| r.attempt_number),
        })
    }

    #[instrument(skip(self, req), fields(admin_id = %caller.user_id, user_id = %req.user_id, test_id = %req.test_id))]
    pub async fn grant_attempts(
        &self,
        caller: &Caller,
        req: GrantAttemptsRequest,
    ) -> Result<AttemptCounts> {
        caller.require_admin()?;
        req.validate()?;
        self.require_user(req.user_id).await?;
        self.require_test(req.test_id).await?;

        let change = self
            .store
            .grant_attempts(GrantCommand {
                user_id: req.user_id,
                test_id: req.test_id,
                additional_attempts: req.additional_attempts,
                granted_by: caller.user_id,
                reason: normalize_reason(req.reason),
            })
            .await?;

        info!(
            added = req.additional_attempts,
            allowed = change.after.allowed_attempts,
            "Attempts granted"
        );
        Ok(AttemptCounts::from(&change.after))
    }

    #[instrument(skip(self, req), fields(admin_id = %caller.user_id, user_id = %req.user_id, test_id = %req.test_id))]
    pub async fn reset_attempts(
        &self,
        caller: &Caller,
        req: ResetAttemptsRequest,
    ) -> Result<AttemptCounts> {
        caller.require_admin()?;
        req.validate()?;

        let change = self
            .store
            .reset_attempts(ResetCommand {
                user_id: req.user_id,
                test_id: req.test_id,
                allowed_attempts: req.new_allowed_attempts.unwrap_or(DEFAULT_ALLOWED_ATTEMPTS),
                granted_by: caller.user_id,
                reason: normalize_reason(req.reason),
            })
            .await?
            .ok_or_else(ledger_entry_not_found)?;

        info!(allowed = change.after.allowed_attempts, "Attempts reset");
        Ok(AttemptCounts::from(&change.after))
    }

    #[instrument(skip(self), fields(caller_id = %caller.user_id))]
    pub async fn list_status_for_test(
        &self,
        caller: &Caller,
        test_id: Uuid,
    ) -> Result<Vec<LearnerStatusView>> {
        caller.require_staff()?;
        self.require_test(test_id).await?;
        let rows = self.store.list_for_test(test_id).await?;
        Ok(rows.into_iter().map(LearnerStatusView::from).collect())
    }

    #[instrument(skip(self), fields(caller_id = %caller.user_id))]
    pub async fn list_attempts_for_user(
        &self,
        caller: &Caller,
        user_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<LedgerEntryView>> {
        caller.require_self_or_staff(user_id)?;
        let rows = self.store.list_for_user(user_id, test_id).await?;
        Ok(rows.into_iter().map(LedgerEntryView::from).collect())
    }

    #[instrument(skip(self), fields(user_id = %caller.user_id))]
    pub async fn list_attempt_history(
        &self,
        caller: &Caller,
        test_id: Uuid,
    ) -> Result<Vec<AttemptRecordView>> {
        let records = self.store.list_records(caller.user_id, test_id).await?;
        Ok(records.into_iter().map(AttemptRecordView::from).collect())
    }

    #[instrument(skip(self), fields(admin_id = %caller.user_id))]
    pub async fn audit_trail(
        &self,
        caller: &Caller,
        user_id: Uuid,
        test_id: Uuid,
    ) -> Result<Vec<AuditEntryView>> {
        caller.require_admin()?;
        let entry = self.require_entry(user_id, test_id).await?;
        let logs = self.store.audit_trail(entry.id).await?;
        Ok(logs.into_iter().map(AuditEntryView::from).collect())
    }
}

fn ledger_entry_not_found() -> Error {
    Error::NotFound("Attempt ledger entry not found".to_string())
}

fn normalize_reason(reason: Option<String>) -> Option<String> {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}
