pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use crate::middleware::auth::JwtVerifier;
use crate::services::ledger_service::LedgerService;

#[derive(Clone)]
pub struct AppState {
    pub ledger_service: LedgerService,
    pub jwt: JwtVerifier,
}

impl AppState {
    pub fn new(ledger_service: LedgerService, jwt_secret: &str) -> Self {
        Self {
            ledger_service,
            jwt: JwtVerifier::new(jwt_secret),
        }
    }
}
