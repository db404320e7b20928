use axum::Json;
use utoipa::OpenApi;

use crate::dto::attempt_dto::{
    AttemptCounts, AttemptRecordView, AuditEntryView, CompleteResult, EligibilitySnapshot,
    GrantAttemptsRequest, LearnerStatusView, LedgerEntryView, ResetAttemptsRequest, StartResult,
};
use crate::routes::attempts;

#[derive(OpenApi)]
#[openapi(
    paths(
        attempts::check_eligibility,
        attempts::mark_started,
        attempts::mark_completed,
        attempts::grant_attempts,
        attempts::reset_attempts,
        attempts::list_status_for_test,
        attempts::list_my_attempts,
        attempts::list_user_attempts,
        attempts::list_attempt_history,
        attempts::audit_trail,
    ),
    components(schemas(
        EligibilitySnapshot,
        StartResult,
        CompleteResult,
        AttemptCounts,
        GrantAttemptsRequest,
        ResetAttemptsRequest,
        LedgerEntryView,
        LearnerStatusView,
        AttemptRecordView,
        AuditEntryView,
    )),
    tags((name = "attempts", description = "Test attempt eligibility and accounting"))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
