use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::{ErrorClass, FieldError, VerificationType};

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub phone_number: Option<String>,
}

/// Either the opaque token from the emailed link or the 6-digit code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerifyRequest {
    pub verification_code: Option<String>,
    pub token: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordResetConfirmRequest {
    pub verification_code: Option<String>,
    pub token: Option<String>,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResendRequest {
    pub email: String,
    pub verification_type: VerificationType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailChangeRequest {
    pub new_email: String,
}

// ==============================================================================
// RESPONSES
// ==============================================================================

/// What callers learn about an issued token. The secret parts only travel by email.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IssuedVerification {
    pub token_id: Uuid,
    pub kind: VerificationType,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RegistrationOutcome {
    pub account_id: Uuid,
    pub email: String,
    pub verification: IssuedVerification,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VerifyOutcome {
    pub account_id: Uuid,
    pub kind: VerificationType,
    pub email: String,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Invalid input")]
    InvalidInput(Vec<FieldError>),

    #[error("Invalid or unknown verification code")]
    NotFound,

    #[error("Verification code has expired, please request a new one")]
    Expired,

    #[error("Verification code has already been used")]
    AlreadyConsumed,

    #[error("Email address is already in use")]
    EmailInUse,

    #[error("Account not found")]
    AccountNotFound,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl VerificationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            VerificationError::InvalidInput(_) | VerificationError::EmailInUse => ErrorClass::Validation,
            VerificationError::Expired | VerificationError::AlreadyConsumed => ErrorClass::State,
            VerificationError::NotFound | VerificationError::AccountNotFound => ErrorClass::NotFound,
            VerificationError::Hashing(_) => ErrorClass::Transient,
            VerificationError::Store(StoreError::NotFound) => ErrorClass::NotFound,
            VerificationError::Store(StoreError::Conflict(_)) => ErrorClass::State,
            VerificationError::Store(_) => ErrorClass::Transient,
        }
    }

    pub fn field(field: &str, code: &str, message: impl Into<String>) -> Self {
        VerificationError::InvalidInput(vec![FieldError::new(field, code, message)])
    }
}
