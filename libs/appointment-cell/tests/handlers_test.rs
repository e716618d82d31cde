use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use appointment_cell::{appointment_routes, AppointmentState};
use notification_cell::RecordingNotifier;
use shared_database::InMemoryStore;
use shared_utils::clock::FixedClock;
use shared_utils::test_utils::{test_now, JwtTestUtils, TestConfig, TestUser};

fn create_test_app(store: Arc<InMemoryStore>) -> Router {
    let state = AppointmentState::new(
        TestConfig::default().to_arc(),
        store.clone(),
        store,
        Arc::new(RecordingNotifier::new()),
        Arc::new(FixedClock::new(test_now())),
    );
    appointment_routes(Arc::new(state))
}

fn json_request(method: &str, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn guest_booking() -> Value {
    json!({
        "is_guest": true,
        "guest_first_name": "A",
        "guest_last_name": "B",
        "guest_email": "a@b.com",
        "guest_phone": "5551234567",
        "guest_age": "30",
        "guest_gender": "male",
        "service_type": "Consultation",
        "date": "2030-03-05",
        "time": "10:00"
    })
}

async fn book(app: &Router, body: Value) -> Value {
    let response = app
        .clone()
        .oneshot(json_request("POST", "/book", body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn guest_booking_returns_the_guest_id() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let body = book(&app, guest_booking()).await;

    assert_eq!(body["success"], true);
    assert_eq!(body["appointment"]["guest_id"], "GUEST-20300305-001");
    assert_eq!(body["appointment"]["status"], "scheduled");
    assert_eq!(body["appointment"]["service_type"], "consultation");
}

#[tokio::test]
async fn invalid_booking_lists_every_problem() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));

    let response = app
        .oneshot(json_request(
            "POST",
            "/book",
            json!({ "is_guest": true, "date": "2020-01-01", "time": "07:00" }),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    let codes: Vec<&str> = body["validation_errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["code"].as_str())
        .collect();
    assert!(codes.contains(&"past_date"));
    assert!(codes.contains(&"outside_business_hours"));
    assert!(codes.contains(&"required"));
}

#[tokio::test]
async fn guest_lookup_by_query_string() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    book(&app, guest_booking()).await;

    let request = Request::builder()
        .uri("/guest/lookup?guest_id=GUEST-20300305-001&email=a%40b.com")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["owner"]["kind"], "guest");

    let request = Request::builder()
        .uri("/guest/lookup?guest_id=GUEST-20300305-001&email=x%40y.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn guest_patch_rejects_clinical_fields() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    book(&app, guest_booking()).await;

    let response = app
        .oneshot(json_request(
            "PATCH",
            "/guest",
            json!({ "guest_id": "GUEST-20300305-001", "email": "a@b.com", "date": "2030-03-06" }),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(response).await["validation_errors"][0]["code"], "immutable");
}

#[tokio::test]
async fn reschedule_requires_authentication() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    let booking = book(&app, guest_booking()).await;
    let id = booking["appointment"]["appointment_id"].as_str().unwrap();

    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/{}/reschedule", id),
            json!({ "new_date": "2030-03-06T10:00:00Z", "reschedule_reason": "x" }),
            None,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn owner_reschedules_and_conflicts_surface_as_409() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    let account_booking = |time: &str| {
        json!({
            "first_name": "Pat",
            "last_name": "Lee",
            "email": "pat@example.com",
            "service_type": "rehabilitation",
            "date": "2030-03-05",
            "time": time
        })
    };
    let first = book(&app, account_booking("10:00")).await;
    let second = book(&app, account_booking("11:00")).await;

    let account_id = first["appointment"]["account_id"].as_str().unwrap().parse().unwrap();
    let user = TestUser::with_id(account_id, "pat@example.com", "patient");
    let token = JwtTestUtils::create_test_token(&user, &TestConfig::default().jwt_secret, Some(1));
    let second_id = second["appointment"]["appointment_id"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/{}/reschedule", second_id),
            json!({ "new_date": "2030-03-05 10:00", "reschedule_reason": "Earlier please" }),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/{}/reschedule", second_id),
            json!({ "new_date": "2030-03-05 12:00", "reschedule_reason": "Later please" }),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["appointment"]["scheduled_at"],
        "2030-03-05T12:00:00Z"
    );
}

#[tokio::test]
async fn status_changes_are_staff_only() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    let booking = book(&app, guest_booking()).await;
    let id = booking["appointment"]["appointment_id"].as_str().unwrap();
    let secret = TestConfig::default().jwt_secret;

    let patient_token = JwtTestUtils::create_test_token(&TestUser::patient("a@b.com"), &secret, Some(1));
    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/{}/status", id),
            json!({ "status": "confirmed" }),
            Some(&patient_token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let admin_token = JwtTestUtils::create_test_token(&TestUser::admin("admin@clinic.test"), &secret, Some(1));
    let response = app
        .oneshot(json_request(
            "PATCH",
            &format!("/{}/status", id),
            json!({ "status": "confirmed" }),
            Some(&admin_token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["appointment"]["status"], "confirmed");
}

#[tokio::test]
async fn treatment_plan_progress_is_reported() {
    let app = create_test_app(Arc::new(InMemoryStore::new()));
    let booking = book(&app, guest_booking()).await;
    let id = booking["appointment"]["appointment_id"].as_str().unwrap();
    let token = JwtTestUtils::create_test_token(
        &TestUser::therapist("doc@clinic.test"),
        &TestConfig::default().jwt_secret,
        Some(1),
    );

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/{}/treatment-plans", id),
            json!({ "details": "Six sessions of manual therapy", "total_sessions": 3 }),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let plan_id = body_json(response).await["treatment_plan"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/treatment-plans/{}/sessions", plan_id),
            json!({}),
            Some(&token),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["progress_percentage"], 33);
    assert_eq!(body["finished"], false);
}
