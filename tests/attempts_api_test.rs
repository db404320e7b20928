use attempts_backend::{
    database::memory::MemoryStore,
    middleware::auth::Claims,
    models::user::{Role, User},
    routes,
    services::ledger_service::LedgerService,
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test_secret_key";

struct TestApp {
    app: Router,
    test_id: Uuid,
    student: User,
    admin: User,
    teacher: User,
}

fn setup_app() -> TestApp {
    let store = MemoryStore::new();
    let test = store.insert_test("Physics test series 1");
    let student = store.insert_user("Ada Learner", "ada@example.com", Role::Student);
    let admin = store.insert_user("Ada Admin", "admin@example.com", Role::Admin);
    let teacher = store.insert_user("Tom Teacher", "tom@example.com", Role::Teacher);

    let state = AppState::new(LedgerService::in_memory(store.clone()), SECRET);
    TestApp {
        app: routes::router(state, 1000),
        test_id: test.id,
        student,
        admin,
        teacher,
    }
}

fn token_for(user: &User) -> String {
    let claims = Claims {
        sub: user.id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        role: Some(user.role.clone()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<JsonValue>,
) -> (StatusCode, JsonValue) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn health_and_docs_are_public() {
    let t = setup_app();
    let (status, body) = call(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&t.app, "GET", "/api/docs/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/attempts/grant"].is_object());
}

#[tokio::test]
async fn ledger_routes_require_bearer_token() {
    let t = setup_app();
    let uri = format!("/api/attempts/eligibility/{}", t.test_id);

    let (status, body) = call(&t.app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = call(&t.app, "GET", &uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn single_attempt_flow_end_to_end() {
    let t = setup_app();
    let student = token_for(&t.student);

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/eligibility/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["can_attempt"], true);
    assert_eq!(body["data"]["allowed_attempts"], 1);
    assert_eq!(body["data"]["attempts_used"], 0);
    assert_eq!(body["data"]["remaining_attempts"], 1);

    let start_uri = format!("/api/attempts/start/{}", t.test_id);
    let (status, body) = call(&t.app, "POST", &start_uri, Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["attempts_used"], 1);
    assert_eq!(body["data"]["remaining_attempts"], 0);

    let (status, body) = call(&t.app, "POST", &start_uri, Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No attempts remaining");

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/complete/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["has_completed"], true);
    assert_eq!(body["data"]["attempt_number"], 1);

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/history/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert!(body["data"][0]["completed_at"].is_string());
}

#[tokio::test]
async fn unknown_test_and_missing_entry_are_not_found() {
    let t = setup_app();
    let student = token_for(&t.student);

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/eligibility/{}", Uuid::new_v4()),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Test not found");

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/start/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Attempt ledger entry not found");
}

#[tokio::test]
async fn malformed_path_id_is_bad_request() {
    let t = setup_app();
    let student = token_for(&t.student);
    let (status, body) = call(
        &t.app,
        "GET",
        "/api/attempts/eligibility/not-a-uuid",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn admin_grant_reopens_exhausted_learner() {
    let t = setup_app();
    let student = token_for(&t.student);
    let admin = token_for(&t.admin);

    call(
        &t.app,
        "GET",
        &format!("/api/attempts/eligibility/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    call(
        &t.app,
        "POST",
        &format!("/api/attempts/start/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;

    let grant = json!({
        "user_id": t.student.id,
        "test_id": t.test_id,
        "additional_attempts": 2,
        "reason": "network outage during first attempt"
    });

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/attempts/grant",
        Some(&student),
        Some(grant.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&t.app, "POST", "/api/attempts/grant", Some(&admin), Some(grant)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allowed_attempts"], 3);
    assert_eq!(body["data"]["attempts_used"], 1);
    assert_eq!(body["data"]["remaining_attempts"], 2);

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/attempts/start/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["attempt_number"], 2);
}

#[tokio::test]
async fn grant_validates_payload() {
    let t = setup_app();
    let admin = token_for(&t.admin);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/attempts/grant",
        Some(&admin),
        Some(json!({
            "user_id": t.student.id,
            "test_id": t.test_id,
            "additional_attempts": 0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/attempts/grant",
        Some(&admin),
        Some(json!({ "user_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_reset_restores_fresh_state() {
    let t = setup_app();
    let student = token_for(&t.student);
    let admin = token_for(&t.admin);

    call(
        &t.app,
        "POST",
        "/api/attempts/grant",
        Some(&admin),
        Some(json!({
            "user_id": t.student.id,
            "test_id": t.test_id,
            "additional_attempts": 5
        })),
    )
    .await;
    for _ in 0..5 {
        let (status, _) = call(
            &t.app,
            "POST",
            &format!("/api/attempts/start/{}", t.test_id),
            Some(&student),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/attempts/reset",
        Some(&admin),
        Some(json!({
            "user_id": t.student.id,
            "test_id": t.test_id,
            "new_allowed_attempts": 2,
            "reason": "regrade"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["allowed_attempts"], 2);
    assert_eq!(body["data"]["attempts_used"], 0);

    let (_, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/eligibility/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(body["data"]["has_started"], false);
    assert_eq!(body["data"]["has_completed"], false);
    assert_eq!(body["data"]["remaining_attempts"], 2);

    let (status, body) = call(
        &t.app,
        "GET",
        &format!(
            "/api/attempts/user/{}/test/{}/audit",
            t.student.id, t.test_id
        ),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"][1]["action"], "attempts.reset");
}

#[tokio::test]
async fn staff_and_self_service_listings() {
    let t = setup_app();
    let student = token_for(&t.student);
    let teacher = token_for(&t.teacher);

    call(
        &t.app,
        "GET",
        &format!("/api/attempts/eligibility/{}", t.test_id),
        Some(&student),
        None,
    )
    .await;

    let status_uri = format!("/api/attempts/test/{}/status", t.test_id);
    let (status, body) = call(&t.app, "GET", &status_uri, Some(&teacher), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["user_name"], "Ada Learner");
    assert_eq!(body["data"][0]["remaining_attempts"], 1);

    let (status, _) = call(&t.app, "GET", &status_uri, Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &t.app,
        "GET",
        &format!("/api/attempts/my-attempts?test_id={}", t.test_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let user_uri = format!("/api/attempts/user/{}", t.student.id);
    let (status, body) = call(&t.app, "GET", &user_uri, Some(&teacher), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["user_id"], t.student.id.to_string());

    let (status, _) = call(&t.app, "GET", &user_uri, Some(&student), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
