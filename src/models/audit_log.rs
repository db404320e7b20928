use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::attempt_ledger::AttemptLedgerEntry;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub changes: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

pub const LEDGER_ENTITY: &str = "attempt_ledger";
pub const ACTION_GRANT: &str = "attempts.grant";
pub const ACTION_RESET: &str = "attempts.reset";

/// Before/after counters recorded for an administrative ledger change.
pub fn ledger_change_set(
    before: Option<&AttemptLedgerEntry>,
    after: &AttemptLedgerEntry,
    reason: Option<&str>,
) -> JsonValue {
    json!({
        "before": before.map(|e| json!({
            "allowed_attempts": e.allowed_attempts,
            "attempts_used": e.attempts_used,
        })),
        "after": {
            "allowed_attempts": after.allowed_attempts,
            "attempts_used": after.attempts_used,
        },
        "reason": reason,
    })
}
