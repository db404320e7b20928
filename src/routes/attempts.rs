use axum::{extract::State, response::IntoResponse, Json};
use uuid::Uuid;

use crate::{
    dto::{
        attempt_dto::{
            AttemptCounts, AttemptRecordView, AttemptsQuery, AuditEntryView, CompleteResult,
            EligibilitySnapshot, GrantAttemptsRequest, LearnerStatusView, LedgerEntryView,
            ResetAttemptsRequest, StartResult,
        },
        response::ApiResponse,
    },
    error::Result,
    extractors::{AppJson, AppPath, AppQuery},
    models::user::Caller,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/attempts/eligibility/{test_id}",
    params(("test_id" = Uuid, Path, description = "Test ID")),
    responses(
        (status = 200, description = "Eligibility snapshot for the caller", body = EligibilitySnapshot),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 404, description = "Test or user not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn check_eligibility(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(test_id): AppPath<Uuid>,
) -> Result<impl IntoResponse> {
    let snapshot = state.ledger_service.check_eligibility(&caller, test_id).await?;
    Ok(Json(ApiResponse::ok(snapshot)))
}

#[utoipa::path(
    post,
    path = "/api/attempts/start/{test_id}",
    params(("test_id" = Uuid, Path, description = "Test ID")),
    responses(
        (status = 200, description = "Attempt started", body = StartResult),
        (status = 403, description = "No attempts remaining"),
        (status = 404, description = "Attempt ledger entry not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn mark_started(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(test_id): AppPath<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.ledger_service.mark_started(&caller, test_id).await?;
    Ok(Json(ApiResponse::with_message(result, "Attempt started")))
}

#[utoipa::path(
    post,
    path = "/api/attempts/complete/{test_id}",
    params(("test_id" = Uuid, Path, description = "Test ID")),
    responses(
        (status = 200, description = "Attempt marked completed", body = CompleteResult),
        (status = 404, description = "Attempt ledger entry not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn mark_completed(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(test_id): AppPath<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.ledger_service.mark_completed(&caller, test_id).await?;
    Ok(Json(ApiResponse::with_message(result, "Attempt completed")))
}

#[utoipa::path(
    post,
    path = "/api/attempts/grant",
    request_body = GrantAttemptsRequest,
    responses(
        (status = 200, description = "Attempts granted", body = AttemptCounts),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Administrator privileges required"),
        (status = 404, description = "User or test not found"),
        (status = 409, description = "Allowance would exceed the maximum")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn grant_attempts(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(payload): AppJson<GrantAttemptsRequest>,
) -> Result<impl IntoResponse> {
    let counts = state.ledger_service.grant_attempts(&caller, payload).await?;
    Ok(Json(ApiResponse::with_message(counts, "Attempts granted")))
}

#[utoipa::path(
    post,
    path = "/api/attempts/reset",
    request_body = ResetAttemptsRequest,
    responses(
        (status = 200, description = "Attempts reset", body = AttemptCounts),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Administrator privileges required"),
        (status = 404, description = "Attempt ledger entry not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn reset_attempts(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(payload): AppJson<ResetAttemptsRequest>,
) -> Result<impl IntoResponse> {
    let counts = state.ledger_service.reset_attempts(&caller, payload).await?;
    Ok(Json(ApiResponse::with_message(counts, "Attempts reset")))
}

#[utoipa::path(
    get,
    path = "/api/attempts/test/{test_id}/status",
    params(("test_id" = Uuid, Path, description = "Test ID")),
    responses(
        (status = 200, description = "Standing of every learner on the test", body = [LearnerStatusView]),
        (status = 403, description = "Teacher or administrator privileges required"),
        (status = 404, description = "Test not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_status_for_test(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(test_id): AppPath<Uuid>,
) -> Result<impl IntoResponse> {
    let rows = state
        .ledger_service
        .list_status_for_test(&caller, test_id)
        .await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[utoipa::path(
    get,
    path = "/api/attempts/my-attempts",
    params(AttemptsQuery),
    responses(
        (status = 200, description = "Caller's ledger entries", body = [LedgerEntryView])
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_my_attempts(
    State(state): State<AppState>,
    caller: Caller,
    AppQuery(query): AppQuery<AttemptsQuery>,
) -> Result<impl IntoResponse> {
    let rows = state
        .ledger_service
        .list_attempts_for_user(&caller, caller.user_id, query.test_id)
        .await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[utoipa::path(
    get,
    path = "/api/attempts/user/{user_id}",
    params(("user_id" = Uuid, Path, description = "User ID"), AttemptsQuery),
    responses(
        (status = 200, description = "User's ledger entries", body = [LedgerEntryView]),
        (status = 403, description = "Teacher or administrator privileges required")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_user_attempts(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(user_id): AppPath<Uuid>,
    AppQuery(query): AppQuery<AttemptsQuery>,
) -> Result<impl IntoResponse> {
    caller.require_staff()?;
    let rows = state
        .ledger_service
        .list_attempts_for_user(&caller, user_id, query.test_id)
        .await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[utoipa::path(
    get,
    path = "/api/attempts/history/{test_id}",
    params(("test_id" = Uuid, Path, description = "Test ID")),
    responses(
        (status = 200, description = "Caller's attempts on the test, oldest first", body = [AttemptRecordView])
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn list_attempt_history(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(test_id): AppPath<Uuid>,
) -> Result<impl IntoResponse> {
    let rows = state
        .ledger_service
        .list_attempt_history(&caller, test_id)
        .await?;
    Ok(Json(ApiResponse::ok(rows)))
}

#[utoipa::path(
    get,
    path = "/api/attempts/user/{user_id}/test/{test_id}/audit",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
        ("test_id" = Uuid, Path, description = "Test ID")
    ),
    responses(
        (status = 200, description = "Administrative changes to the ledger entry", body = [AuditEntryView]),
        (status = 403, description = "Administrator privileges required"),
        (status = 404, description = "Attempt ledger entry not found")
    )
)]
#[axum::debug_handler(state = AppState)]
pub async fn audit_trail(
    State(state): State<AppState>,
    caller: Caller,
    AppPath((user_id, test_id)): AppPath<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let rows = state
        .ledger_service
        .audit_trail(&caller, user_id, test_id)
        .await?;
    Ok(Json(ApiResponse::ok(rows)))
}
