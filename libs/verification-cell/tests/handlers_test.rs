use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use notification_cell::RecordingNotifier;
use shared_database::{AccountStore, InMemoryStore};
use shared_models::{Account, AccountOrigin, Role};
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{test_now, JwtTestUtils, TestConfig, TestUser};
use verification_cell::{verification_routes, VerificationService, VerificationState};

fn create_test_app(store: Arc<InMemoryStore>) -> Router {
    let config = TestConfig::default().to_arc();
    let service = VerificationService::new(
        &config,
        store.clone(),
        store,
        Arc::new(RecordingNotifier::new()),
        Arc::new(FixedClock::new(test_now())),
    );
    verification_routes(Arc::new(VerificationState { config, service }))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_returns_created_without_leaking_secrets() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(post_json(
            "/register",
            json!({
                "email": "jane@example.com",
                "password": "s3cure-password",
                "confirm_password": "s3cure-password",
                "first_name": "Jane",
                "last_name": "Doe"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert!(body["verification"]["token_id"].is_string());
    assert!(body["verification"].get("code").is_none());
    assert!(body["verification"].get("token").is_none());
}

#[tokio::test]
async fn invalid_registration_lists_validation_errors() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(post_json(
            "/register",
            json!({ "email": "nope", "password": "x", "confirm_password": "y" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["validation_errors"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn unknown_code_is_a_bad_request() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(post_json("/verify", json!({ "verification_code": "000000", "email": "a@b.com" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn password_reset_request_answers_the_same_for_unknown_email() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(post_json("/password-reset/request", json!({ "email": "ghost@example.com" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
}

#[tokio::test]
async fn email_change_requires_authentication() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(post_json("/email-change", json!({ "new_email": "new@example.com" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn email_change_with_valid_token_issues_confirmation() {
    let store = Arc::new(InMemoryStore::new());
    let account = Account::new("old@example.com", Role::Patient, AccountOrigin::SelfRegistered, test_now());
    store.insert_account(&account).await.unwrap();
    let app = create_test_app(store);

    let config = TestConfig::default();
    let user = TestUser::with_id(account.id, "old@example.com", "patient");
    let token = JwtTestUtils::create_test_token(&user, &config.jwt_secret, Some(1));

    let request = Request::builder()
        .method("POST")
        .uri("/email-change")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(json!({ "new_email": "new@example.com" }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["verification"]["kind"], "email_change");
}
