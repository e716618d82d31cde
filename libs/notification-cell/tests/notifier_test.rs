use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use notification_cell::{
    dispatch, notifier_from_config, EmailMessage, HttpEmailNotifier, NotificationError, Notifier,
    RecordingNotifier,
};
use shared_config::EmailConfig;

fn email_config(server: &MockServer) -> EmailConfig {
    EmailConfig {
        api_url: format!("{}/emails", server.uri()),
        api_key: "re_test_key".to_string(),
        from_address: "clinic@example.com".to_string(),
        public_app_url: "https://clinic.test".to_string(),
    }
}

#[tokio::test]
async fn http_notifier_posts_message_with_bearer_key() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer re_test_key"))
        .and(body_partial_json(json!({
            "from": "clinic@example.com",
            "to": ["patient@example.com"],
            "subject": "Hello"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg_1" })))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = HttpEmailNotifier::new(email_config(&server));
    notifier
        .send(&EmailMessage::new("patient@example.com", "Hello", "<p>hi</p>"))
        .await
        .unwrap();
}

#[tokio::test]
async fn provider_rejection_is_reported_with_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/emails"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
        .mount(&server)
        .await;

    let notifier = HttpEmailNotifier::new(email_config(&server));
    let result = notifier.send(&EmailMessage::new("bad", "Hello", "<p>hi</p>")).await;

    assert_matches!(result, Err(NotificationError::Rejected { status: 422, .. }));
}

#[tokio::test]
async fn unconfigured_http_notifier_refuses_to_send() {
    let notifier = HttpEmailNotifier::new(EmailConfig::default());
    let result = notifier.send(&EmailMessage::new("a@b.com", "s", "b")).await;
    assert_matches!(result, Err(NotificationError::NotConfigured));
}

#[tokio::test]
async fn missing_configuration_falls_back_to_log_notifier() {
    let notifier = notifier_from_config(&EmailConfig::default());
    assert!(notifier.send(&EmailMessage::new("a@b.com", "s", "b")).await.is_ok());
}

#[tokio::test]
async fn dispatch_swallows_failures() {
    let recorder = Arc::new(RecordingNotifier::failing());

    dispatch(recorder.clone(), EmailMessage::new("a@b.com", "s", "b"))
        .await
        .unwrap();

    assert_eq!(recorder.sent_to("A@B.com").len(), 1);
}
