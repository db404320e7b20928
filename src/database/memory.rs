//! In-process store backed by a single mutex.
//!
//! Implements the same contracts as [`PgStore`](crate::database::postgres::PgStore)
//! and is what the router and service tests run against. Holding one lock for
//! each operation makes every check-and-update atomic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::{
    CompletedAttempt, GrantCommand, LedgerChange, LedgerStore, ResetCommand, StartOutcome,
    StartedAttempt, TestCatalog, UserDirectory,
};
use crate::error::{Error, Result};
use crate::models::attempt_ledger::{AttemptLedgerEntry, LedgerEntryWithUser};
use crate::models::attempt_record::AttemptRecord;
use crate::models::audit_log::{
    ledger_change_set, AuditLog, ACTION_GRANT, ACTION_RESET, LEDGER_ENTITY,
};
use crate::models::test::Test;
use crate::models::user::{Role, User};

#[derive(Default)]
struct MemoryState {
    tests: HashMap<Uuid, Test>,
    users: HashMap<Uuid, User>,
    entries: HashMap<(Uuid, Uuid), AttemptLedgerEntry>,
    records: Vec<AttemptRecord>,
    audit: Vec<AuditLog>,
}

impl MemoryState {
    /// Ledger rows reference users the same way the `users` foreign keys do.
    fn require_user(&self, user_id: Uuid) -> Result<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(Error::NotFound("User not found".to_string()))
        }
    }

    fn push_audit(&mut self, actor_id: Uuid, action: &str, change: &LedgerChange, reason: Option<&str>) {
        self.audit.push(AuditLog {
            id: Uuid::new_v4(),
            user_id: Some(actor_id),
            action: action.to_string(),
            entity_type: LEDGER_ENTITY.to_string(),
            entity_id: change.after.id,
            changes: Some(ledger_change_set(change.before.as_ref(), &change.after, reason)),
            created_at: Utc::now(),
        });
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_test(&self, title: &str) -> Test {
        let test = Test {
            id: Uuid::new_v4(),
            title: title.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.lock().tests.insert(test.id, test.clone());
        test
    }

    pub fn insert_user(&self, name: &str, email: &str, role: Role) -> User {
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            role: role.as_str().to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.lock().users.insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl TestCatalog for MemoryStore {
    async fn get_test_by_id(&self, test_id: Uuid) -> Result<Option<Test>> {
        Ok(self.lock().tests.get(&test_id).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user_by_id(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id).cloned())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn ensure_entry(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        default_allowed: i32,
    ) -> Result<AttemptLedgerEntry> {
        let mut state = self.lock();
        state.require_user(user_id)?;
        let entry = state
            .entries
            .entry((user_id, test_id))
            .or_insert_with(|| AttemptLedgerEntry::new(user_id, test_id, default_allowed, Utc::now()));
        Ok(entry.clone())
    }

    async fn find_entry(&self, user_id: Uuid, test_id: Uuid) -> Result<Option<AttemptLedgerEntry>> {
        Ok(self.lock().entries.get(&(user_id, test_id)).cloned())
    }

    async fn start_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<StartOutcome> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&(user_id, test_id)) else {
            return Ok(StartOutcome::Missing);
        };
        let Some(attempt_number) = entry.try_consume(now) else {
            return Ok(StartOutcome::Exhausted(entry.clone()));
        };
        let entry = entry.clone();
        let record = AttemptRecord::started(&entry, attempt_number, now);
        state.records.push(record.clone());
        Ok(StartOutcome::Started(StartedAttempt { entry, record }))
    }

    async fn complete_attempt(
        &self,
        user_id: Uuid,
        test_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<CompletedAttempt>> {
        let mut state = self.lock();
        let Some(entry) = state.entries.get_mut(&(user_id, test_id)) else {
            return Ok(None);
        };
        entry.has_completed = true;
        entry.updated_at = now;
        let entry = entry.clone();

        let record = state
            .records
            .iter_mut()
            .filter(|r| r.ledger_id == entry.id && r.is_open())
            .max_by_key(|r| r.attempt_number)
            .map(|r| {
                r.completed_at = Some(now);
                r.clone()
            });

        Ok(Some(CompletedAttempt { entry, record }))
    }

    async fn grant_attempts(&self, cmd: GrantCommand) -> Result<LedgerChange> {
        let mut state = self.lock();
        state.require_user(cmd.user_id)?;
        state.require_user(cmd.granted_by)?;
        let now = Utc::now();
        let key = (cmd.user_id, cmd.test_id);

        let change = match state.entries.get_mut(&key) {
            Some(entry) => {
                let before = entry.clone();
                entry.grant(cmd.additional_attempts, cmd.granted_by, cmd.reason.clone(), now)?;
                LedgerChange {
                    before: Some(before),
                    after: entry.clone(),
                }
            }
            None => {
                let mut entry =
                    AttemptLedgerEntry::new(cmd.user_id, cmd.test_id, cmd.additional_attempts, now);
                entry.granted_by = Some(cmd.granted_by);
                entry.grant_reason = cmd.reason.clone();
                state.entries.insert(key, entry.clone());
                LedgerChange {
                    before: None,
                    after: entry,
                }
            }
        };

        state.push_audit(cmd.granted_by, ACTION_GRANT, &change, cmd.reason.as_deref());
        Ok(change)
    }

    async fn reset_attempts(&self, cmd: ResetCommand) -> Result<Option<LedgerChange>> {
        let mut state = self.lock();
        state.require_user(cmd.granted_by)?;
        let Some(entry) = state.entries.get_mut(&(cmd.user_id, cmd.test_id)) else {
            return Ok(None);
        };
        let before = entry.clone();
        entry.reset(cmd.allowed_attempts, cmd.granted_by, cmd.reason.clone(), Utc::now());
        let change = LedgerChange {
            before: Some(before),
            after: entry.clone(),
        };

        for record in state.records.iter_mut().filter(|r| r.ledger_id == change.after.id) {
            record.superseded = true;
        }
        state.push_audit(cmd.granted_by, ACTION_RESET, &change, cmd.reason.as_deref());
        Ok(Some(change))
    }

    async fn list_for_test(&self, test_id: Uuid) -> Result<Vec<LedgerEntryWithUser>> {
        let state = self.lock();
        let mut rows: Vec<LedgerEntryWithUser> = state
            .entries
            .values()
            .filter(|e| e.test_id == test_id)
            .filter_map(|e| {
                state.users.get(&e.user_id).map(|u| LedgerEntryWithUser {
                    entry: e.clone(),
                    user_name: u.name.clone(),
                    user_email: u.email.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.user_name
                .cmp(&b.user_name)
                .then_with(|| a.user_email.cmp(&b.user_email))
        });
        Ok(rows)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        test_id: Option<Uuid>,
    ) -> Result<Vec<AttemptLedgerEntry>> {
        let state = self.lock();
        let mut rows: Vec<AttemptLedgerEntry> = state
            .entries
            .values()
            .filter(|e| e.user_id == user_id && test_id.map_or(true, |t| e.test_id == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn list_records(&self, user_id: Uuid, test_id: Uuid) -> Result<Vec<AttemptRecord>> {
        let state = self.lock();
        let mut rows: Vec<AttemptRecord> = state
            .records
            .iter()
            .filter(|r| r.user_id == user_id && r.test_id == test_id && !r.superseded)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.attempt_number);
        Ok(rows)
    }

    async fn audit_trail(&self, ledger_id: Uuid) -> Result<Vec<AuditLog>> {
        Ok(self
            .lock()
            .audit
            .iter()
            .filter(|a| a.entity_type == LEDGER_ENTITY && a.entity_id == ledger_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (MemoryStore, Uuid, Uuid, Uuid) {
        let store = MemoryStore::new();
        let test = store.insert_test("Geometry quiz").id;
        let user = store.insert_user("Lin", "lin@example.com", Role::Student).id;
        let admin = store.insert_user("Ops", "ops@example.com", Role::Admin).id;
        (store, user, test, admin)
    }

    #[tokio::test]
    async fn reset_supersedes_history_and_restarts_numbering() {
        let (store, user, test, admin) = seeded();
        store.ensure_entry(user, test, 2).await.unwrap();
        store.start_attempt(user, test, Utc::now()).await.unwrap();
        store.start_attempt(user, test, Utc::now()).await.unwrap();
        assert_eq!(store.list_records(user, test).await.unwrap().len(), 2);

        store
            .reset_attempts(ResetCommand {
                user_id: user,
                test_id: test,
                allowed_attempts: 1,
                granted_by: admin,
                reason: None,
            })
            .await
            .unwrap()
            .expect("entry exists");
        assert!(store.list_records(user, test).await.unwrap().is_empty());

        match store.start_attempt(user, test, Utc::now()).await.unwrap() {
            StartOutcome::Started(started) => assert_eq!(started.record.attempt_number, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn complete_closes_latest_open_attempt_only() {
        let (store, user, test, _) = seeded();
        store.ensure_entry(user, test, 3).await.unwrap();
        store.start_attempt(user, test, Utc::now()).await.unwrap();
        store.start_attempt(user, test, Utc::now()).await.unwrap();

        let done = store
            .complete_attempt(user, test, Utc::now())
            .await
            .unwrap()
            .expect("entry exists");
        assert!(done.entry.has_completed);
        assert_eq!(done.record.map(|r| r.attempt_number), Some(2));

        let records = store.list_records(user, test).await.unwrap();
        assert!(records[0].completed_at.is_none());
        assert!(records[1].completed_at.is_some());
    }

    #[tokio::test]
    async fn unknown_users_are_rejected_like_foreign_keys() {
        let (store, user, test, admin) = seeded();
        let err = store.ensure_entry(Uuid::new_v4(), test, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref m) if m == "User not found"));

        let err = store
            .grant_attempts(GrantCommand {
                user_id: user,
                test_id: test,
                additional_attempts: 1,
                granted_by: Uuid::new_v4(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.find_entry(user, test).await.unwrap().is_none());

        store.ensure_entry(user, test, 1).await.unwrap();
        let change = store
            .grant_attempts(GrantCommand {
                user_id: user,
                test_id: test,
                additional_attempts: 1,
                granted_by: admin,
                reason: None,
            })
            .await
            .unwrap();
        assert_eq!(change.after.allowed_attempts, 2);
    }

    #[tokio::test]
    async fn overflowing_grant_leaves_entry_and_audit_untouched() {
        let (store, user, test, admin) = seeded();
        let entry = store.ensure_entry(user, test, 1).await.unwrap();
        let err = store
            .grant_attempts(GrantCommand {
                user_id: user,
                test_id: test,
                additional_attempts: i32::MAX,
                granted_by: admin,
                reason: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.find_entry(user, test).await.unwrap(), Some(entry.clone()));
        assert!(store.audit_trail(entry.id).await.unwrap().is_empty());
    }
}
