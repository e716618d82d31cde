use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Role;

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtHeader {
    pub alg: String,
    pub typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

/// The authenticated caller, as established by the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn account_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.id).ok()
    }

    /// Supabase puts `authenticated` in the role claim, so the clinic role may
    /// live in user metadata instead.
    pub fn clinic_role(&self) -> Option<Role> {
        self.role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .or_else(|| {
                self.metadata
                    .as_ref()
                    .and_then(|m| m.get("role"))
                    .and_then(|r| r.as_str())
                    .and_then(|r| r.parse().ok())
            })
    }

    /// Therapists and admins may act on appointments they do not own.
    pub fn is_staff(&self) -> bool {
        self.clinic_role().map(|r| r.is_staff()).unwrap_or(false)
    }
}
