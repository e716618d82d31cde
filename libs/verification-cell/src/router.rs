use std::sync::Arc;

use axum::{middleware, routing::post, Router};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::verification::VerificationService;

pub struct VerificationState {
    pub config: Arc<AppConfig>,
    pub service: VerificationService,
}

pub fn verification_routes(state: Arc<VerificationState>) -> Router {
    let public_routes = Router::new()
        .route("/register", post(handlers::register))
        .route("/verify", post(handlers::verify))
        .route("/resend", post(handlers::resend))
        .route("/password-reset/request", post(handlers::request_password_reset))
        .route("/password-reset/confirm", post(handlers::confirm_password_reset));

    let protected_routes = Router::new()
        .route("/email-change", post(handlers::request_email_change))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
