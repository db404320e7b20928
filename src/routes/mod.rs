pub mod attempts;
pub mod docs;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{auth::require_bearer_auth, rate_limit};
use crate::AppState;

pub fn router(state: AppState, rps: u32) -> Router {
    let attempts_api = Router::new()
        .route(
            "/api/attempts/eligibility/:test_id",
            get(attempts::check_eligibility),
        )
        .route("/api/attempts/start/:test_id", post(attempts::mark_started))
        .route(
            "/api/attempts/complete/:test_id",
            post(attempts::mark_completed),
        )
        .route("/api/attempts/grant", post(attempts::grant_attempts))
        .route("/api/attempts/reset", post(attempts::reset_attempts))
        .route(
            "/api/attempts/test/:test_id/status",
            get(attempts::list_status_for_test),
        )
        .route("/api/attempts/my-attempts", get(attempts::list_my_attempts))
        .route(
            "/api/attempts/user/:user_id",
            get(attempts::list_user_attempts),
        )
        .route(
            "/api/attempts/user/:user_id/test/:test_id/audit",
            get(attempts::audit_trail),
        )
        .route(
            "/api/attempts/history/:test_id",
            get(attempts::list_attempt_history),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer_auth,
        ));

    Router::new()
        .route("/health", get(health::health))
        .route("/api/docs/openapi.json", get(docs::openapi_json))
        .merge(attempts_api)
        .layer(axum::middleware::from_fn_with_state(
            rate_limit::RateLimiter::new(rps),
            rate_limit::rps_middleware,
        ))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
