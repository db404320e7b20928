use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::attempt_ledger::{AttemptLedgerEntry, LedgerEntryWithUser};
use crate::models::attempt_record::AttemptRecord;
use crate::models::audit_log::AuditLog;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct EligibilitySnapshot {
    pub can_attempt: bool,
    pub allowed_attempts: i32,
    pub attempts_used: i32,
    pub remaining_attempts: i32,
    pub has_started: bool,
    pub has_completed: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl From<&AttemptLedgerEntry> for EligibilitySnapshot {
    fn from(entry: &AttemptLedgerEntry) -> Self {
        Self {
            can_attempt: entry.can_attempt(),
            allowed_attempts: entry.allowed_attempts,
            attempts_used: entry.attempts_used,
            remaining_attempts: entry.remaining_attempts(),
            has_started: entry.has_started,
            has_completed: entry.has_completed,
            last_attempt_at: entry.last_attempt_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartResult {
    pub attempts_used: i32,
    pub remaining_attempts: i32,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompleteResult {
    pub has_completed: bool,
    /// Attempt closed by this call, if one was still open.
    pub attempt_number: Option<i32>,
}

/// Counters returned by the administrative grant and reset operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct AttemptCounts {
    pub allowed_attempts: i32,
    pub attempts_used: i32,
    pub remaining_attempts: i32,
}

impl From<&AttemptLedgerEntry> for AttemptCounts {
    fn from(entry: &AttemptLedgerEntry) -> Self {
        Self {
            allowed_attempts: entry.allowed_attempts,
            attempts_used: entry.attempts_used,
            remaining_attempts: entry.remaining_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GrantAttemptsRequest {
    pub user_id: Uuid,
    pub test_id: Uuid,
    #[validate(range(min = 1, message = "additional_attempts must be a positive integer"))]
    pub additional_attempts: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ResetAttemptsRequest {
    pub user_id: Uuid,
    pub test_id: Uuid,
    #[validate(range(min = 1, message = "new_allowed_attempts must be a positive integer"))]
    pub new_allowed_attempts: Option<i32>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct AttemptsQuery {
    /// Restrict the listing to a single test.
    pub test_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LedgerEntryView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub allowed_attempts: i32,
    pub attempts_used: i32,
    pub remaining_attempts: i32,
    pub can_attempt: bool,
    pub has_started: bool,
    pub has_completed: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
    pub grant_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<AttemptLedgerEntry> for LedgerEntryView {
    fn from(entry: AttemptLedgerEntry) -> Self {
        Self {
            remaining_attempts: entry.remaining_attempts(),
            can_attempt: entry.can_attempt(),
            id: entry.id,
            user_id: entry.user_id,
            test_id: entry.test_id,
            allowed_attempts: entry.allowed_attempts,
            attempts_used: entry.attempts_used,
            has_started: entry.has_started,
            has_completed: entry.has_completed,
            last_attempt_at: entry.last_attempt_at,
            granted_by: entry.granted_by,
            grant_reason: entry.grant_reason,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LearnerStatusView {
    pub user_name: String,
    pub user_email: String,
    #[serde(flatten)]
    pub entry: LedgerEntryView,
}

impl From<LedgerEntryWithUser> for LearnerStatusView {
    fn from(row: LedgerEntryWithUser) -> Self {
        Self {
            user_name: row.user_name,
            user_email: row.user_email,
            entry: row.entry.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AttemptRecordView {
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<AttemptRecord> for AttemptRecordView {
    fn from(record: AttemptRecord) -> Self {
        Self {
            attempt_number: record.attempt_number,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntryView {
    pub actor_id: Option<Uuid>,
    pub action: String,
    #[schema(value_type = Object)]
    pub changes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl From<AuditLog> for AuditEntryView {
    fn from(log: AuditLog) -> Self {
        Self {
            actor_id: log.user_id,
            action: log.action,
            changes: log.changes,
            created_at: log.created_at,
        }
    }
}
