use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::VerificationPolicy;
use shared_database::VerificationStore;
use shared_models::{VerificationToken, VerificationType};
use shared_utils::clock::Clock;

use crate::models::VerificationError;

/// Draws token material from the operating system RNG.
pub struct TokenGenerator;

impl TokenGenerator {
    /// 256 random bits, URL-safe base64 without padding.
    pub fn opaque() -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Uniform 6-digit code, zero padded.
    pub fn code() -> String {
        format!("{:06}", OsRng.gen_range(0..1_000_000u32))
    }
}

/// How a caller identifies a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenLookup<'a> {
    /// The opaque string from the emailed link. Matches on the token alone.
    Token(&'a str),
    /// The short code, optionally scoped to the address it was sent to.
    Code {
        code: &'a str,
        kind: VerificationType,
        email: Option<&'a str>,
    },
}

impl<'a> TokenLookup<'a> {
    /// Picks the lookup key: a non-blank token wins over a code.
    pub fn from_parts(
        token: Option<&'a str>,
        code: Option<&'a str>,
        email: Option<&'a str>,
        kind: VerificationType,
    ) -> Option<Self> {
        let non_blank = |v: Option<&'a str>| v.map(str::trim).filter(|v| !v.is_empty());
        if let Some(token) = non_blank(token) {
            return Some(TokenLookup::Token(token));
        }
        non_blank(code).map(|code| TokenLookup::Code {
            code,
            kind,
            email: non_blank(email),
        })
    }
}

/// Issues, resolves and consumes one-time verification tokens.
pub struct TokenStore {
    store: Arc<dyn VerificationStore>,
    clock: Arc<dyn Clock>,
    policy: VerificationPolicy,
}

impl TokenStore {
    pub fn new(store: Arc<dyn VerificationStore>, clock: Arc<dyn Clock>, policy: VerificationPolicy) -> Self {
        Self { store, clock, policy }
    }

    pub fn ttl(&self, kind: VerificationType) -> Duration {
        match kind {
            VerificationType::Registration => self.policy.registration_ttl(),
            VerificationType::PasswordReset => self.policy.password_reset_ttl(),
            VerificationType::EmailChange => self.policy.email_change_ttl(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Invalidates any live token of the same account and type and issues a
    /// fresh one. `target_email` is the address the code is mailed to.
    #[instrument(skip(self, target_email))]
    pub async fn issue(
        &self,
        account_id: Uuid,
        kind: VerificationType,
        target_email: Option<&str>,
    ) -> Result<VerificationToken, VerificationError> {
        let now = self.clock.now();
        let token = VerificationToken {
            id: Uuid::new_v4(),
            account_id,
            kind,
            token: TokenGenerator::opaque(),
            code: TokenGenerator::code(),
            target_email: target_email.map(|e| e.trim().to_ascii_lowercase()),
            created_at: now,
            expires_at: Some(now + self.ttl(kind)),
            consumed: false,
            consumed_at: None,
        };

        let invalidated = self.store.replace_active_token(&token, now).await?;
        info!(
            token_id = %token.id,
            account_id = %account_id,
            kind = %kind,
            invalidated,
            "Issued verification token"
        );
        Ok(token)
    }

    /// Finds a usable token. An opaque token that was already used reports
    /// `AlreadyConsumed`; codes only ever match unconsumed tokens.
    pub async fn resolve(&self, lookup: TokenLookup<'_>) -> Result<VerificationToken, VerificationError> {
        let now = self.clock.now();

        let token = match lookup {
            TokenLookup::Token(value) => {
                let token = self
                    .store
                    .find_token_by_value(value)
                    .await?
                    .ok_or(VerificationError::NotFound)?;
                if token.consumed {
                    debug!(token_id = %token.id, "Token already consumed");
                    return Err(VerificationError::AlreadyConsumed);
                }
                token
            }
            TokenLookup::Code { code, kind, email } => {
                if kind == VerificationType::EmailChange && email.is_none() {
                    return Err(VerificationError::NotFound);
                }
                self.store
                    .find_unconsumed_by_code(code, kind, email)
                    .await?
                    .ok_or(VerificationError::NotFound)?
            }
        };

        if token.is_expired(now) {
            debug!(token_id = %token.id, "Token expired");
            return Err(VerificationError::Expired);
        }
        Ok(token)
    }

    pub fn is_valid(&self, token: &VerificationToken) -> bool {
        token.is_valid(self.clock.now())
    }

    /// Marks the token used and returns the consumption stamp, truncated to
    /// the microsecond precision storage keeps. Losing a concurrent race
    /// yields `AlreadyConsumed`.
    pub async fn consume(&self, token: &VerificationToken) -> Result<DateTime<Utc>, VerificationError> {
        let now = self.clock.now().trunc_subsecs(6);
        if self.store.mark_consumed(token.id, now).await? {
            debug!(token_id = %token.id, "Token consumed");
            Ok(now)
        } else {
            warn!(token_id = %token.id, "Token was consumed concurrently");
            Err(VerificationError::AlreadyConsumed)
        }
    }

    /// Makes a token usable again after the effect it authorised failed to
    /// persist. Failures are logged; the caller reports the original error.
    pub async fn release(&self, token: &VerificationToken, consumed_at: DateTime<Utc>) {
        match self.store.release_consumed(token.id, consumed_at).await {
            Ok(true) => info!(token_id = %token.id, "Token released after a failed write"),
            Ok(false) => warn!(token_id = %token.id, "Token left consumed, a newer token is live"),
            Err(e) => warn!(token_id = %token.id, error = %e, "Failed to release token"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_material_has_expected_shape() {
        let opaque = TokenGenerator::opaque();
        assert_eq!(opaque.len(), 43);
        assert!(!opaque.contains('='));

        let code = TokenGenerator::code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn token_takes_precedence_over_code() {
        let lookup = TokenLookup::from_parts(Some("abc"), Some("123456"), None, VerificationType::Registration);
        assert_eq!(lookup, Some(TokenLookup::Token("abc")));

        let lookup = TokenLookup::from_parts(Some("  "), Some("123456"), Some(""), VerificationType::Registration);
        assert_eq!(
            lookup,
            Some(TokenLookup::Code { code: "123456", kind: VerificationType::Registration, email: None })
        );

        assert_eq!(TokenLookup::from_parts(None, None, None, VerificationType::PasswordReset), None);
    }
}
