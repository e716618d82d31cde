use std::sync::Arc;

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::ErrorClass;
use shared_utils::extractor::require_account_id;

use crate::models::{
    EmailChangeRequest, PasswordResetConfirmRequest, PasswordResetRequest, RegisterRequest, ResendRequest,
    VerificationError, VerifyRequest,
};
use crate::router::VerificationState;

const NEUTRAL_DELIVERY_MESSAGE: &str = "If an account exists for this email, a message with a code has been sent";

fn to_app_error(e: VerificationError) -> AppError {
    if e.class() == ErrorClass::Transient {
        warn!(error = %e, "Verification request failed, retry may succeed");
    }
    match e {
        VerificationError::InvalidInput(errors) => AppError::InvalidInput(errors),
        VerificationError::NotFound | VerificationError::Expired => AppError::BadRequest(e.to_string()),
        VerificationError::AlreadyConsumed | VerificationError::EmailInUse => AppError::Conflict(e.to_string()),
        VerificationError::AccountNotFound => AppError::NotFound(e.to_string()),
        VerificationError::Hashing(msg) => AppError::Internal(msg),
        VerificationError::Store(store) => AppError::Database(store.to_string()),
    }
}

#[axum::debug_handler]
pub async fn register(
    State(state): State<Arc<VerificationState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let outcome = state.service.register(request).await.map_err(to_app_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "account_id": outcome.account_id,
            "email": outcome.email,
            "verification": outcome.verification,
            "message": "Account created. Check your email for the verification code."
        })),
    ))
}

#[axum::debug_handler]
pub async fn verify(
    State(state): State<Arc<VerificationState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.service.verify(request).await.map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "account_id": outcome.account_id,
        "verification_type": outcome.kind,
        "email": outcome.email
    })))
}

#[axum::debug_handler]
pub async fn resend(
    State(state): State<Arc<VerificationState>>,
    Json(request): Json<ResendRequest>,
) -> Result<Json<Value>, AppError> {
    state.service.resend(request).await.map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "message": NEUTRAL_DELIVERY_MESSAGE })))
}

#[axum::debug_handler]
pub async fn request_password_reset(
    State(state): State<Arc<VerificationState>>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<Value>, AppError> {
    state
        .service
        .request_password_reset(&request.email)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "message": NEUTRAL_DELIVERY_MESSAGE })))
}

#[axum::debug_handler]
pub async fn confirm_password_reset(
    State(state): State<Arc<VerificationState>>,
    Json(request): Json<PasswordResetConfirmRequest>,
) -> Result<Json<Value>, AppError> {
    state.service.reset_password(request).await.map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Password has been reset. You can now log in with your new password."
    })))
}

#[axum::debug_handler]
pub async fn request_email_change(
    State(state): State<Arc<VerificationState>>,
    Extension(user): Extension<User>,
    Json(request): Json<EmailChangeRequest>,
) -> Result<Json<Value>, AppError> {
    let account_id = require_account_id(&user)?;
    let issued = state
        .service
        .request_email_change(account_id, &request.new_email)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "verification": issued,
        "message": "Check the new address for a confirmation code"
    })))
}
