use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Allowance a learner receives the first time they look at a test.
pub const DEFAULT_ALLOWED_ATTEMPTS: i32 = 1;

/// One row per (user, test) pair tracking allowed and used attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AttemptLedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub test_id: Uuid,
    pub allowed_attempts: i32,
    pub attempts_used: i32,
    pub has_started: bool,
    pub has_completed: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub granted_by: Option<Uuid>,
    pub grant_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttemptLedgerEntry {
    pub fn new(user_id: Uuid, test_id: Uuid, allowed_attempts: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            test_id,
            allowed_attempts,
            attempts_used: 0,
            has_started: false,
            has_completed: false,
            last_attempt_at: None,
            granted_by: None,
            grant_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_attempts(&self) -> i32 {
        self.allowed_attempts - self.attempts_used
    }

    pub fn can_attempt(&self) -> bool {
        self.remaining_attempts() > 0
    }

    /// Consumes one attempt if any remain. Returns the new attempt number.
    pub fn try_consume(&mut self, now: DateTime<Utc>) -> Option<i32> {
        if !self.can_attempt() {
            return None;
        }
        self.attempts_used += 1;
        self.has_started = true;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
        Some(self.attempts_used)
    }

    /// Adds exactly `additional` attempts, or fails without touching the entry.
    pub fn grant(
        &mut self,
        additional: i32,
        admin_id: Uuid,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.allowed_attempts = self
            .allowed_attempts
            .checked_add(additional)
            .ok_or_else(allowance_overflow)?;
        self.granted_by = Some(admin_id);
        self.grant_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    pub fn reset(&mut self, allowed: i32, admin_id: Uuid, reason: Option<String>, now: DateTime<Utc>) {
        self.allowed_attempts = allowed;
        self.attempts_used = 0;
        self.has_started = false;
        self.has_completed = false;
        self.last_attempt_at = None;
        self.granted_by = Some(admin_id);
        self.grant_reason = reason;
        self.updated_at = now;
    }
}

pub fn allowance_overflow() -> Error {
    Error::Conflict("Granting would exceed the maximum attempt allowance".to_string())
}

/// Ledger entry joined with the identity of the learner it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntryWithUser {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub entry: AttemptLedgerEntry,
    pub user_name: String,
    pub user_email: String,
}
