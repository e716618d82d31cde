use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::{appointment_routes, AppointmentState};
use notification_cell::Notifier;
use shared_config::AppConfig;
use shared_database::{AccountStore, AppointmentStore, VerificationStore};
use shared_utils::clock::Clock;
use verification_cell::{verification_routes, VerificationService, VerificationState};

/// Wires every cell against one backing store.
pub fn create_router<S>(
    config: Arc<AppConfig>,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
) -> Router
where
    S: AccountStore + AppointmentStore + VerificationStore + 'static,
{
    let appointments = AppointmentState::new(
        config.clone(),
        store.clone(),
        store.clone(),
        notifier.clone(),
        clock.clone(),
    );
    let verification = VerificationState {
        service: VerificationService::new(&config, store.clone(), store, notifier, clock),
        config,
    };

    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", appointment_routes(Arc::new(appointments)))
        .nest("/auth", verification_routes(Arc::new(verification)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use tower::ServiceExt;

    use notification_cell::RecordingNotifier;
    use shared_database::InMemoryStore;
    use shared_utils::clock::FixedClock;
    use shared_utils::test_utils::{test_now, TestConfig};

    fn app() -> Router {
        create_router(
            TestConfig::default().to_arc(),
            Arc::new(InMemoryStore::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(FixedClock::new(test_now())),
        )
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn root_answers() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cells_are_nested_under_their_prefixes() {
        let app = app();

        let response = app
            .clone()
            .oneshot(post(
                "/appointments/book",
                json!({
                    "email": "pat@example.com",
                    "service_type": "consultation",
                    "date": "2030-03-05",
                    "time": "09:30"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(post("/auth/password-reset/request", json!({ "email": "pat@example.com" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
