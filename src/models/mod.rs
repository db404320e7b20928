pub mod attempt_ledger;
pub mod attempt_record;
pub mod audit_log;
pub mod user;
