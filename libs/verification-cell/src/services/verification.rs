use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{dispatch, EmailTemplates, Notifier};
use shared_config::{AppConfig, VerificationPolicy};
use shared_database::{AccountStore, StoreError, VerificationStore};
use shared_models::{Account, AccountOrigin, FieldError, Role, VerificationToken, VerificationType};
use shared_utils::clock::Clock;
use shared_utils::validation::{is_six_digit_code, is_valid_email, normalize_email, normalize_phone, password_errors};

use crate::models::{
    IssuedVerification, PasswordResetConfirmRequest, RegisterRequest, RegistrationOutcome, ResendRequest,
    VerificationError, VerifyOutcome, VerifyRequest,
};
use crate::services::password::hash_password;
use crate::services::token_store::{TokenLookup, TokenStore};

fn issued(token: &VerificationToken) -> IssuedVerification {
    IssuedVerification {
        token_id: token.id,
        kind: token.kind,
        expires_at: token.expires_at,
    }
}

fn email_field_errors(field: &str, email: &str) -> Vec<FieldError> {
    if email.trim().is_empty() {
        vec![FieldError::required(field)]
    } else if !is_valid_email(email) {
        vec![FieldError::new(field, "invalid", "Enter a valid email address")]
    } else {
        Vec::new()
    }
}

/// Account verification flows: registration, email confirmation, password
/// reset and email change.
pub struct VerificationService {
    accounts: Arc<dyn AccountStore>,
    tokens: TokenStore,
    notifier: Arc<dyn Notifier>,
    templates: EmailTemplates,
    policy: VerificationPolicy,
}

impl VerificationService {
    pub fn new(
        config: &AppConfig,
        accounts: Arc<dyn AccountStore>,
        verifications: Arc<dyn VerificationStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            tokens: TokenStore::new(verifications, clock, config.verification.clone()),
            notifier,
            templates: EmailTemplates::new(&config.email.public_app_url, config.booking.clinic_offset()),
            policy: config.verification.clone(),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Issues a token for `account_id`. The target email defaults to the
    /// account's current address.
    #[instrument(skip(self, target_email))]
    pub async fn issue_verification(
        &self,
        account_id: Uuid,
        kind: VerificationType,
        target_email: Option<&str>,
    ) -> Result<VerificationToken, VerificationError> {
        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;
        let target = target_email.unwrap_or(account.email.as_str());
        self.tokens.issue(account.id, kind, Some(target)).await
    }

    fn send_token_email(&self, account: &Account, token: &VerificationToken) {
        let to = token.target_email.clone().unwrap_or_else(|| account.email.clone());
        let name = if account.first_name.is_empty() { account.username.as_str() } else { account.first_name.as_str() };
        let hours = self.tokens.ttl(token.kind).num_hours();

        let message = match token.kind {
            VerificationType::Registration => {
                self.templates.registration_verification(&to, name, &token.token, &token.code, hours)
            }
            VerificationType::PasswordReset => {
                self.templates.password_reset(&to, name, &token.token, &token.code, hours)
            }
            VerificationType::EmailChange => {
                self.templates.email_change(&to, name, &token.token, &token.code, hours)
            }
        };
        dispatch(self.notifier.clone(), message);
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> Result<RegistrationOutcome, VerificationError> {
        let mut errors = email_field_errors("email", &request.email);
        errors.extend(password_errors("password", &request.password, &request.confirm_password, &self.policy));

        let phone = match request.phone_number.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            Some(raw) => match normalize_phone(raw) {
                Some(phone) => Some(phone),
                None => {
                    errors.push(FieldError::new("phone_number", "invalid", "Enter a valid phone number"));
                    None
                }
            },
            None => None,
        };

        if errors.is_empty() && self.accounts.find_account_by_email(&request.email).await?.is_some() {
            errors.push(FieldError::new("email", "taken", "An account with this email already exists"));
        }
        if !errors.is_empty() {
            return Err(VerificationError::InvalidInput(errors));
        }

        let password_hash = hash_password(&request.password)?;

        let mut account = Account::new(&request.email, Role::Patient, AccountOrigin::SelfRegistered, self.tokens.now());
        if let Some(username) = request.username.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            account.username = username.to_string();
        }
        account.first_name = request.first_name.trim().to_string();
        account.last_name = request.last_name.trim().to_string();
        account.phone_number = phone;

        match self.accounts.insert_account(&account).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(VerificationError::field(
                    "email",
                    "taken",
                    "An account with this email or username already exists",
                ))
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.accounts.set_password_hash(account.id, &password_hash).await {
            warn!(account_id = %account.id, error = %e, "Storing password failed, removing new account");
            if let Err(cleanup) = self.accounts.delete_account(account.id).await {
                warn!(account_id = %account.id, error = %cleanup, "Failed to remove half-created account");
            }
            return Err(e.into());
        }

        let token = self.tokens.issue(account.id, VerificationType::Registration, Some(&account.email)).await?;
        self.send_token_email(&account, &token);

        info!(account_id = %account.id, "Registered account pending email verification");
        Ok(RegistrationOutcome {
            account_id: account.id,
            email: account.email,
            verification: issued(&token),
        })
    }

    /// Completes a registration or email-change verification.
    #[instrument(skip(self, request))]
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifyOutcome, VerificationError> {
        let token_value = request.token.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let code = request.verification_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let email = request.email.as_deref().map(str::trim).filter(|e| !e.is_empty());

        let mut errors = Vec::new();
        if token_value.is_none() {
            match code {
                None => errors.push(FieldError::required("verification_code")),
                Some(code) if !is_six_digit_code(code) => errors.push(FieldError::new(
                    "verification_code",
                    "invalid",
                    "Verification code must be 6 digits",
                )),
                Some(_) => {}
            }
        }
        if let Some(email) = email {
            errors.extend(email_field_errors("email", email));
        }
        if !errors.is_empty() {
            return Err(VerificationError::InvalidInput(errors));
        }

        let token = match (token_value, code) {
            (Some(value), _) => self.tokens.resolve(TokenLookup::Token(value)).await?,
            (None, Some(code)) => self.resolve_code_for_verify(code, email).await?,
            (None, None) => return Err(VerificationError::NotFound),
        };

        match token.kind {
            VerificationType::Registration => self.complete_registration(&token).await,
            VerificationType::EmailChange => self.complete_email_change(&token).await,
            VerificationType::PasswordReset => Err(VerificationError::NotFound),
        }
    }

    async fn resolve_code_for_verify(
        &self,
        code: &str,
        email: Option<&str>,
    ) -> Result<VerificationToken, VerificationError> {
        let registration = self
            .tokens
            .resolve(TokenLookup::Code { code, kind: VerificationType::Registration, email })
            .await;
        match (registration, email) {
            (Err(VerificationError::NotFound), Some(email)) => {
                self.tokens
                    .resolve(TokenLookup::Code { code, kind: VerificationType::EmailChange, email: Some(email) })
                    .await
            }
            (result, _) => result,
        }
    }

    async fn complete_registration(&self, token: &VerificationToken) -> Result<VerifyOutcome, VerificationError> {
        let mut account = self
            .accounts
            .find_account(token.account_id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;

        let consumed_at = self.tokens.consume(token).await?;

        account.is_active = true;
        account.email_verified = true;
        account.updated_at = self.tokens.now();
        if let Err(e) = self.accounts.update_account(&account).await {
            self.tokens.release(token, consumed_at).await;
            return Err(e.into());
        }

        info!(account_id = %account.id, "Email verified, account activated");
        Ok(VerifyOutcome {
            account_id: account.id,
            kind: token.kind,
            email: account.email,
        })
    }

    async fn complete_email_change(&self, token: &VerificationToken) -> Result<VerifyOutcome, VerificationError> {
        let new_email = token.target_email.clone().ok_or(VerificationError::NotFound)?;
        let mut account = self
            .accounts
            .find_account(token.account_id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;

        if let Some(holder) = self.accounts.find_account_by_email(&new_email).await? {
            if holder.id != account.id {
                return Err(VerificationError::EmailInUse);
            }
        }

        let consumed_at = self.tokens.consume(token).await?;

        if account.username.eq_ignore_ascii_case(&account.email) {
            account.username = new_email.clone();
        }
        account.email = new_email;
        account.email_verified = true;
        account.updated_at = self.tokens.now();

        if let Err(e) = self.accounts.update_account(&account).await {
            self.tokens.release(token, consumed_at).await;
            return Err(match e {
                StoreError::Conflict(_) => VerificationError::EmailInUse,
                other => other.into(),
            });
        }

        info!(account_id = %account.id, "Email address changed");
        Ok(VerifyOutcome {
            account_id: account.id,
            kind: token.kind,
            email: account.email,
        })
    }

    /// Always succeeds for a well-formed address so callers cannot learn
    /// which emails have accounts.
    #[instrument(skip(self, email))]
    pub async fn request_password_reset(&self, email: &str) -> Result<(), VerificationError> {
        let errors = email_field_errors("email", email);
        if !errors.is_empty() {
            return Err(VerificationError::InvalidInput(errors));
        }

        match self.accounts.find_account_by_email(email).await? {
            Some(account) if account.is_active => {
                let token = self
                    .tokens
                    .issue(account.id, VerificationType::PasswordReset, Some(&account.email))
                    .await?;
                self.send_token_email(&account, &token);
            }
            Some(account) => debug!(account_id = %account.id, "Password reset requested for inactive account"),
            None => debug!("Password reset requested for unknown email"),
        }
        Ok(())
    }

    #[instrument(skip(self, request))]
    pub async fn reset_password(&self, request: PasswordResetConfirmRequest) -> Result<Uuid, VerificationError> {
        let mut errors = password_errors(
            "new_password",
            &request.new_password,
            &request.confirm_password,
            &self.policy,
        );

        let lookup = TokenLookup::from_parts(
            request.token.as_deref(),
            request.verification_code.as_deref(),
            None,
            VerificationType::PasswordReset,
        );
        match lookup {
            None => errors.push(FieldError::required("verification_code")),
            Some(TokenLookup::Code { code, .. }) if !is_six_digit_code(code) => errors.push(FieldError::new(
                "verification_code",
                "invalid",
                "Verification code must be 6 digits",
            )),
            Some(_) => {}
        }
        let Some(lookup) = lookup.filter(|_| errors.is_empty()) else {
            return Err(VerificationError::InvalidInput(errors));
        };

        let token = self.tokens.resolve(lookup).await?;
        if token.kind != VerificationType::PasswordReset {
            return Err(VerificationError::NotFound);
        }
        let account = self
            .accounts
            .find_account(token.account_id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;

        let password_hash = hash_password(&request.new_password)?;
        let consumed_at = self.tokens.consume(&token).await?;
        if let Err(e) = self.accounts.set_password_hash(account.id, &password_hash).await {
            self.tokens.release(&token, consumed_at).await;
            return Err(e.into());
        }

        dispatch(
            self.notifier.clone(),
            self.templates.password_reset_confirmation(&account.email, &account.first_name),
        );
        info!(account_id = %account.id, "Password reset completed");
        Ok(account.id)
    }

    /// Re-issues a registration or password-reset token. Answers success
    /// whether or not anything was sent.
    #[instrument(skip(self, request), fields(kind = %request.verification_type))]
    pub async fn resend(&self, request: ResendRequest) -> Result<(), VerificationError> {
        let errors = email_field_errors("email", &request.email);
        if !errors.is_empty() {
            return Err(VerificationError::InvalidInput(errors));
        }

        match request.verification_type {
            VerificationType::PasswordReset => self.request_password_reset(&request.email).await,
            VerificationType::Registration => {
                match self.accounts.find_account_by_email(&request.email).await? {
                    Some(account) if !account.email_verified => {
                        let token = self
                            .tokens
                            .issue(account.id, VerificationType::Registration, Some(&account.email))
                            .await?;
                        self.send_token_email(&account, &token);
                    }
                    Some(account) => debug!(account_id = %account.id, "Resend skipped, email already verified"),
                    None => debug!("Resend requested for unknown email"),
                }
                Ok(())
            }
            VerificationType::EmailChange => Err(VerificationError::field(
                "verification_type",
                "unsupported",
                "Email change codes are requested from the account settings",
            )),
        }
    }

    #[instrument(skip(self, new_email))]
    pub async fn request_email_change(
        &self,
        account_id: Uuid,
        new_email: &str,
    ) -> Result<IssuedVerification, VerificationError> {
        let errors = email_field_errors("new_email", new_email);
        if !errors.is_empty() {
            return Err(VerificationError::InvalidInput(errors));
        }
        let new_email = normalize_email(new_email);

        let account = self
            .accounts
            .find_account(account_id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;
        if account.email.eq_ignore_ascii_case(&new_email) {
            return Err(VerificationError::field(
                "new_email",
                "unchanged",
                "New email must differ from the current one",
            ));
        }
        if self.accounts.find_account_by_email(&new_email).await?.is_some() {
            return Err(VerificationError::EmailInUse);
        }

        let token = self
            .tokens
            .issue(account.id, VerificationType::EmailChange, Some(&new_email))
            .await?;
        self.send_token_email(&account, &token);
        Ok(issued(&token))
    }
}
