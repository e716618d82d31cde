use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use shared_models::{Account, Appointment, TreatmentPlan, VerificationToken, VerificationType};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    #[error("Uniqueness conflict: {0}")]
    Conflict(String),

    #[error("Record {0} was modified concurrently")]
    StaleVersion(Uuid),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed record: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Case-insensitive match on the email address.
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Fails with `Conflict` when the email or username is already taken.
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Fails with `Conflict` when the new email or username belongs to another account.
    async fn update_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;

    /// Removes the account with its appointments, their treatment plans and its tokens.
    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// Exact guest id plus case-insensitive email; account-linked rows never match.
    async fn find_guest_appointment(
        &self,
        guest_id: &str,
        email: &str,
    ) -> Result<Option<Appointment>, StoreError>;

    async fn guest_ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Fails with `Conflict` on a duplicate guest id or when the account
    /// already holds an active appointment at the same instant.
    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError>;

    /// Writes only if the stored version equals `appointment.version`;
    /// returns the row with its bumped version.
    async fn update_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError>;

    /// Active (scheduled or confirmed) appointments of `account_id` at exactly `at`.
    async fn find_active_at(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert_treatment_plan(&self, plan: &TreatmentPlan) -> Result<(), StoreError>;

    async fn find_treatment_plan(&self, id: Uuid) -> Result<Option<TreatmentPlan>, StoreError>;

    /// Same version contract as `update_appointment`.
    async fn update_treatment_plan(&self, plan: &TreatmentPlan) -> Result<TreatmentPlan, StoreError>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Consumes every unconsumed token of the same account and type, then
    /// inserts `token`, as one atomic step. Returns how many were invalidated.
    async fn replace_active_token(
        &self,
        token: &VerificationToken,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn find_token_by_value(&self, token: &str) -> Result<Option<VerificationToken>, StoreError>;

    /// Newest unconsumed token of `kind` carrying `code`, optionally scoped to
    /// the address the code was sent to.
    async fn find_unconsumed_by_code(
        &self,
        code: &str,
        kind: VerificationType,
        email: Option<&str>,
    ) -> Result<Option<VerificationToken>, StoreError>;

    /// Compare-and-swap on the consumed flag. `false` means someone else got there first.
    async fn mark_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Reverts a consumption stamped at `consumed_at`. Returns `false` when the
    /// stamp no longer matches or a newer token of the same type is live.
    async fn release_consumed(&self, id: Uuid, consumed_at: DateTime<Utc>) -> Result<bool, StoreError>;
}
