pub mod memory;
pub mod pool;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::attempt_ledger::{AttemptLedgerEntry, LedgerEntryWithUser};
use crate::models::attempt_record::AttemptRecord;
use crate::models::audit_log::AuditLog;
use crate::models::test::Test;
use crate::models::user::User;

/// Read-only access to test definitions owned by the course catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TestCatalog: Send + Sync {
    async fn get_test_by_id(&self, test_id: Uuid) -> Result<Option<Test>>;
}

/// Read-only access to user accounts owned by the identity provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>>;
}

#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub entry: AttemptLedgerEntry,
    pub record: AttemptRecord,
}

#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(StartedAttempt),
    Exhausted(AttemptLedgerEntry),
    Missing,
}

#[derive(Debug, Clone)]
pub struct CompletedAttempt {
    pub entry: AttemptLedgerEntry,
    pub record: Option<AttemptRecord>,
}

#[derive(Debug, Clone)]
pub struct LedgerChange {
    pub before: Option<AttemptLedgerEntry>,
    pub after: AttemptLedgerEntry,
}

#[derive(Debug, Clone)]
pub struct GrantCommand {
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub additional_attempts: i32,
    pub granted_by: Uuid,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResetCommand {
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub allowed_attempts: i32,
    pub granted_by: Uuid,
    pub reason: Option<String>,
}

/// Persistence for attempt ledger entries, their attempt records and the
/// audit trail of administrative changes.
///
/// Every mutating method is atomic: implementations must not let two
/// concurrent starts consume the same remaining attempt.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Creates the entry with `default_allowed` attempts if absent, then reads it.
    async fn ensure_entry(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        default_allowed: i32,
    ) -> Result<AttemptLedgerEntry>;

    async fn find_entry(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<AttemptLedgerEntry>>;

    async fn start_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome>;

    async fn complete_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedAttempt>>;

    async fn grant_attempts(&self, cmd: GrantCommand) -> Result<LedgerChange>;

    /// Returns `None` when there is no entry to reset.
    async fn reset_attempts(&self, cmd: ResetCommand) -> Result<Option<LedgerChange>>;

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<LedgerEntryWithUser>>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<AttemptLedgerEntry>>;

    /// Active (non-superseded) attempt records, oldest first.
    async fn list_records(&self, user_id: Uuid, test_id: Uuid) -> Result<Vec<AttemptRecord>>;

    async fn audit_trail(&self, ledger_id: Uuid) -> Result<Vec<AuditLog>>;
}
