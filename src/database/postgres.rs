use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::database::{
    CompletedAttempt, GrantCommand, LedgerChange, LedgerStore, ResetCommand, StartOutcome,
    StartedAttempt, TestCatalog, UserDirectory,
};
use crate::error::Result;
use crate::models::attempt_ledger::{AttemptLedgerEntry, LedgerEntryWithUser};
use crate::models::attempt_record::AttemptRecord;
use crate::models::audit_log::{
    ledger_change_set, AuditLog, ACTION_GRANT, ACTION_RESET, LEDGER_ENTITY,
};
use crate::models::test::Test;
use crate::models::user::User;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_entry(
        conn: &mut PgConnection,
        user_id: Uuid,
        test_id: Uuid,
    ) -> Result<Option<AttemptLedgerEntry>> {
        let entry = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"SELECT * FROM attempt_ledger WHERE user_id = $1 AND test_id = $2 FOR UPDATE"#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(entry)
    }

    async fn write_audit(
        conn: &mut PgConnection,
        actor_id: Uuid,
        action: &str,
        entity_id: Uuid,
        changes: JsonValue,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (user_id, action, entity_type, entity_id, changes, created_at)
            VALUES ($1, $2, $3, $4, $5, clock_timestamp())
            "#,
        )
        .bind(actor_id)
        .bind(action)
        .bind(LEDGER_ENTITY)
        .bind(entity_id)
        .bind(changes)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TestCatalog for PgStore {
    async fn get_test_by_id(&self, test_id: Uuid) -> Result<Option<Test>> {
        let test = sqlx::query_as::<_, Test>(
            r#"SELECT id, title, is_active, created_at FROM tests WHERE id = $1"#,
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(test)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, name, email, role, is_active, created_at FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn ensure_entry(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        default_allowed: i32,
    ) -> Result<AttemptLedgerEntry> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO attempt_ledger (user_id, test_id, allowed_attempts)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, test_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .bind(default_allowed)
        .execute(&mut *tx)
        .await?;

        let entry = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"SELECT * FROM attempt_ledger WHERE user_id = $1 AND test_id = $2"#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    async fn find_entry(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<AttemptLedgerEntry>> {
        let entry = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"SELECT * FROM attempt_ledger WHERE user_id = $1 AND test_id = $2"#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(entry)
    }

    async fn start_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        let mut tx = self.pool.begin().await?;

        // Check and increment in one statement; the row lock serializes racing starts.
        let updated = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"
            UPDATE attempt_ledger
            SET attempts_used = attempts_used + 1,
                has_started = TRUE,
                last_attempt_at = $3,
                updated_at = $3
            WHERE user_id = $1 AND test_id = $2 AND attempts_used < allowed_attempts
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = updated else {
            let existing = sqlx::query_as::<_, AttemptLedgerEntry>(
                r#"SELECT * FROM attempt_ledger WHERE user_id = $1 AND test_id = $2"#,
            )
            .bind(user_id)
            .bind(test_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(match existing {
                Some(entry) => StartOutcome::Exhausted(entry),
                None => StartOutcome::Missing,
            });
        };

        let record = sqlx::query_as::<_, AttemptRecord>(
            r#"
            INSERT INTO attempt_records (ledger_id, user_id, test_id, attempt_number, started_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.test_id)
        .bind(entry.attempts_used)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(StartOutcome::Started(StartedAttempt { entry, record }))
    }

    async fn complete_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedAttempt>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"
            UPDATE attempt_ledger
            SET has_completed = TRUE, updated_at = $3
            WHERE user_id = $1 AND test_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(entry) = updated else {
            tx.rollback().await?;
            return Ok(None);
        };

        let record = sqlx::query_as::<_, AttemptRecord>(
            r#"
            UPDATE attempt_records
            SET completed_at = $2
            WHERE id = (
                SELECT id FROM attempt_records
                WHERE ledger_id = $1 AND NOT superseded AND completed_at IS NULL
                ORDER BY attempt_number DESC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(entry.id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(CompletedAttempt { entry, record }))
    }

    async fn grant_attempts(&self, cmd: GrantCommand) -> Result<LedgerChange> {
        let mut tx = self.pool.begin().await?;

        let existing = match Self::lock_entry(&mut *tx, cmd.user_id, cmd.test_id).await? {
            Some(entry) => entry,
            None => {
                let inserted = sqlx::query_as::<_, AttemptLedgerEntry>(
                    r#"
                    INSERT INTO attempt_ledger (user_id, test_id, allowed_attempts, granted_by, grant_reason)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (user_id, test_id) DO NOTHING
                    RETURNING *
                    "#,
                )
                .bind(cmd.user_id)
                .bind(cmd.test_id)
                .bind(cmd.additional_attempts)
                .bind(cmd.granted_by)
                .bind(cmd.reason.as_deref())
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(after) = inserted {
                    let changes = ledger_change_set(None, &after, cmd.reason.as_deref());
                    Self::write_audit(&mut *tx, cmd.granted_by, ACTION_GRANT, after.id, changes)
                        .await?;
                    tx.commit().await?;
                    return Ok(LedgerChange { before: None, after });
                }

                // A concurrent first check created the row after our lookup.
                Self::lock_entry(&mut *tx, cmd.user_id, cmd.test_id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?
            }
        };

        let mut granted = existing.clone();
        granted.grant(
            cmd.additional_attempts,
            cmd.granted_by,
            cmd.reason.clone(),
            Utc::now(),
        )?;

        let after = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"
            UPDATE attempt_ledger
            SET allowed_attempts = $2,
                granted_by = $3,
                grant_reason = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(existing.id)
        .bind(granted.allowed_attempts)
        .bind(cmd.granted_by)
        .bind(cmd.reason.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        let changes = ledger_change_set(Some(&existing), &after, cmd.reason.as_deref());
        Self::write_audit(&mut *tx, cmd.granted_by, ACTION_GRANT, after.id, changes).await?;

        tx.commit().await?;
        Ok(LedgerChange {
            before: Some(existing),
            after,
        })
    }

    async fn reset_attempts(&self, cmd: ResetCommand) -> Result<Option<LedgerChange>> {
        let mut tx = self.pool.begin().await?;

        let Some(before) = Self::lock_entry(&mut *tx, cmd.user_id, cmd.test_id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let after = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"
            UPDATE attempt_ledger
            SET allowed_attempts = $2,
                attempts_used = 0,
                has_started = FALSE,
                has_completed = FALSE,
                last_attempt_at = NULL,
                granted_by = $3,
                grant_reason = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(before.id)
        .bind(cmd.allowed_attempts)
        .bind(cmd.granted_by)
        .bind(cmd.reason.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE attempt_records SET superseded = TRUE WHERE ledger_id = $1 AND NOT superseded"#,
        )
        .bind(after.id)
        .execute(&mut *tx)
        .await?;

        let changes = ledger_change_set(Some(&before), &after, cmd.reason.as_deref());
        Self::write_audit(&mut *tx, cmd.granted_by, ACTION_RESET, after.id, changes).await?;

        tx.commit().await?;
        Ok(Some(LedgerChange {
            before: Some(before),
            after,
        }))
    }

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<LedgerEntryWithUser>> {
        let rows = sqlx::query_as::<_, LedgerEntryWithUser>(
            r#"
            SELECT l.*, u.name AS user_name, u.email AS user_email
            FROM attempt_ledger l
            JOIN users u ON u.id = l.user_id
            WHERE l.test_id = $1
            ORDER BY u.name, u.email
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<AttemptLedgerEntry>> {
        let rows = sqlx::query_as::<_, AttemptLedgerEntry>(
            r#"
            SELECT * FROM attempt_ledger
            WHERE user_id = $1 AND ($2::uuid IS NULL OR test_id = $2)
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_records(&self, user_id: Uuid, test_id: Uuid) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query_as::<_, AttemptRecord>(
            r#"
            SELECT * FROM attempt_records
            WHERE user_id = $1 AND test_id = $2 AND NOT superseded
            ORDER BY attempt_number
            "#,
        )
        .bind(user_id)
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn audit_trail(&self, ledger_id: Uuid) -> Result<Vec<AuditLog>> {
        let rows = sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, user_id, action, entity_type, entity_id, changes, created_at
            FROM audit_logs
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY seq
            "#,
        )
        .bind(LEDGER_ENTITY)
        .bind(ledger_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
