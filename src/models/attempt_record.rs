use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::attempt_ledger::AttemptLedgerEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AttemptRecord {
    pub id: Uuid,
    pub ledger_id: Uuid,
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub attempt_number: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub superseded: bool,
}

impl AttemptRecord {
    pub fn started(entry: &AttemptLedgerEntry, attempt_number: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ledger_id: entry.id,
            user_id: entry.user_id,
            test_id: entry.test_id,
            attempt_number,
            started_at: now,
            completed_at: None,
            superseded: false,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.superseded && self.completed_at.is_none()
    }
}
