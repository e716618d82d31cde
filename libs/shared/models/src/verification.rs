use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Registration,
    PasswordReset,
    EmailChange,
}

impl VerificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationType::Registration => "registration",
            VerificationType::PasswordReset => "password_reset",
            VerificationType::EmailChange => "email_change",
        }
    }
}

impl fmt::Display for VerificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "registration" => Ok(VerificationType::Registration),
            "password_reset" => Ok(VerificationType::PasswordReset),
            "email_change" => Ok(VerificationType::EmailChange),
            other => Err(format!("unknown verification type: {}", other)),
        }
    }
}

/// A pending proof of control over an email address.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationToken {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: VerificationType,
    pub token: String,
    pub code: String,
    pub target_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub consumed: bool,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl VerificationToken {
    /// A missing expiry counts as already expired.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.consumed && self.expires_at.map(|exp| now <= exp).unwrap_or(false)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now > exp).unwrap_or(true)
    }
}

impl fmt::Debug for VerificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationToken")
            .field("id", &self.id)
            .field("account_id", &self.account_id)
            .field("kind", &self.kind)
            .field("token", &"<redacted>")
            .field("code", &"<redacted>")
            .field("target_email", &self.target_email)
            .field("expires_at", &self.expires_at)
            .field("consumed", &self.consumed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_at: Option<DateTime<Utc>>, consumed: bool) -> VerificationToken {
        VerificationToken {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            kind: VerificationType::Registration,
            token: "opaque".into(),
            code: "123456".into(),
            target_email: None,
            created_at: Utc::now(),
            expires_at,
            consumed,
            consumed_at: None,
        }
    }

    #[test]
    fn validity_depends_on_consumed_and_expiry() {
        let now = Utc::now();
        assert!(token(Some(now + Duration::hours(1)), false).is_valid(now));
        assert!(token(Some(now), false).is_valid(now));
        assert!(!token(Some(now - Duration::seconds(1)), false).is_valid(now));
        assert!(!token(Some(now + Duration::hours(1)), true).is_valid(now));
        assert!(!token(None, false).is_valid(now));
    }

    #[test]
    fn expiry_ignores_the_consumed_flag() {
        let now = Utc::now();
        assert!(!token(Some(now + Duration::hours(1)), true).is_expired(now));
        assert!(token(Some(now - Duration::seconds(1)), false).is_expired(now));
        assert!(token(None, false).is_expired(now));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let rendered = format!("{:?}", token(None, false));
        assert!(!rendered.contains("123456"));
        assert!(!rendered.contains("opaque"));
    }
}
