use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    Account, AccountOrigin, Appointment, AppointmentOwner, AppointmentStatus, Gender, GuestDetails,
    Role, ServiceType, TreatmentPlan, VerificationToken, VerificationType,
};

use crate::store::{AccountStore, AppointmentStore, StoreError, VerificationStore};
use crate::supabase::{ApiError, SupabaseClient};

const RETURN_REPRESENTATION: (&str, &str) = ("Prefer", "return=representation");

fn map_api_error(err: anyhow::Error) -> StoreError {
    match err.downcast_ref::<ApiError>() {
        Some(api) if api.status.as_u16() == 409 => StoreError::Conflict(api.body.clone()),
        Some(api) if api.status.as_u16() == 404 => StoreError::NotFound,
        _ => match err.downcast_ref::<serde_json::Error>() {
            Some(json_err) => StoreError::Serialization(json_err.to_string()),
            None => StoreError::Unavailable(err.to_string()),
        },
    }
}

/// Addresses are stored lowercase, so an `eq` filter on the lowercased value
/// compares case-insensitively without treating `%` or `_` as wildcards.
fn email_param(email: &str) -> String {
    urlencoding::encode(&email.trim().to_ascii_lowercase()).into_owned()
}

fn timestamp_param(ts: DateTime<Utc>) -> String {
    urlencoding::encode(&ts.to_rfc3339_opts(SecondsFormat::Micros, true)).into_owned()
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountRow {
    id: Uuid,
    username: String,
    email: String,
    role: Role,
    first_name: String,
    last_name: String,
    phone_number: Option<String>,
    date_of_birth: Option<NaiveDate>,
    gender: Option<Gender>,
    medical_history: Option<String>,
    treatment_reason: Option<String>,
    condition_description: Option<String>,
    current_medications: Option<String>,
    is_active: bool,
    email_verified: bool,
    origin: AccountOrigin,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountRow {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            username: a.username.clone(),
            email: a.email.to_ascii_lowercase(),
            role: a.role,
            first_name: a.first_name.clone(),
            last_name: a.last_name.clone(),
            phone_number: a.phone_number.clone(),
            date_of_birth: a.date_of_birth,
            gender: a.gender,
            medical_history: a.medical_history.clone(),
            treatment_reason: a.treatment_reason.clone(),
            condition_description: a.condition_description.clone(),
            current_medications: a.current_medications.clone(),
            is_active: a.is_active,
            email_verified: a.email_verified,
            origin: a.origin,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

impl From<AccountRow> for Account {
    fn from(r: AccountRow) -> Self {
        Self {
            id: r.id,
            username: r.username,
            email: r.email,
            role: r.role,
            first_name: r.first_name,
            last_name: r.last_name,
            phone_number: r.phone_number,
            date_of_birth: r.date_of_birth,
            gender: r.gender,
            medical_history: r.medical_history,
            treatment_reason: r.treatment_reason,
            condition_description: r.condition_description,
            current_medications: r.current_medications,
            is_active: r.is_active,
            email_verified: r.email_verified,
            origin: r.origin,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Flat `appointments` row. The table keeps guest columns inline and a
/// check constraint ties them to `is_guest`.
#[derive(Debug, Serialize, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    account_id: Option<Uuid>,
    is_guest: bool,
    guest_id: Option<String>,
    guest_first_name: Option<String>,
    guest_last_name: Option<String>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    guest_age: Option<u8>,
    guest_gender: Option<Gender>,
    scheduled_at: DateTime<Utc>,
    service_type: ServiceType,
    note: String,
    status: AppointmentStatus,
    duration_minutes: i32,
    therapist_id: Option<Uuid>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Appointment> for AppointmentRow {
    fn from(a: &Appointment) -> Self {
        let guest = a.owner.guest();
        Self {
            id: a.id,
            account_id: a.owner.account_id(),
            is_guest: guest.is_some(),
            guest_id: guest.map(|g| g.guest_id.clone()),
            guest_first_name: guest.map(|g| g.first_name.clone()),
            guest_last_name: guest.map(|g| g.last_name.clone()),
            guest_email: guest.map(|g| g.email.to_ascii_lowercase()),
            guest_phone: guest.map(|g| g.phone.clone()),
            guest_age: guest.and_then(|g| g.age),
            guest_gender: guest.and_then(|g| g.gender),
            scheduled_at: a.scheduled_at,
            service_type: a.service_type,
            note: a.note.clone(),
            status: a.status,
            duration_minutes: a.duration_minutes,
            therapist_id: a.therapist_id,
            version: a.version,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        let owner = match (r.is_guest, r.account_id) {
            (false, Some(account_id)) => AppointmentOwner::Account { account_id },
            (true, None) => {
                let missing = || StoreError::Serialization(format!("guest appointment {} lacks identity", r.id));
                AppointmentOwner::Guest(GuestDetails {
                    guest_id: r.guest_id.clone().ok_or_else(missing)?,
                    first_name: r.guest_first_name.clone().ok_or_else(missing)?,
                    last_name: r.guest_last_name.clone().ok_or_else(missing)?,
                    email: r.guest_email.clone().ok_or_else(missing)?,
                    phone: r.guest_phone.clone().ok_or_else(missing)?,
                    age: r.guest_age,
                    gender: r.guest_gender,
                })
            }
            _ => {
                return Err(StoreError::Serialization(format!(
                    "appointment {} is neither account-linked nor guest",
                    r.id
                )))
            }
        };

        Ok(Appointment {
            id: r.id,
            owner,
            scheduled_at: r.scheduled_at,
            service_type: r.service_type,
            note: r.note,
            status: r.status,
            duration_minutes: r.duration_minutes,
            therapist_id: r.therapist_id,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GuestIdRow {
    guest_id: Option<String>,
}

/// Storage over Supabase PostgREST. Uniqueness and cascade rules live in the
/// database schema; token issuance goes through the `issue_verification_token`
/// function so invalidate-then-insert runs in a single transaction.
pub struct SupabaseStore {
    client: Arc<SupabaseClient>,
}

impl SupabaseStore {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    async fn select<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        self.client
            .request::<Vec<T>>(Method::GET, path, None, None)
            .await
            .map_err(map_api_error)
    }

    async fn write<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Vec<T>, StoreError> {
        self.client
            .request_with_headers::<Vec<T>>(method, path, None, body, &[RETURN_REPRESENTATION])
            .await
            .map_err(map_api_error)
    }

    fn to_body<T: Serialize>(value: &T) -> Result<Value, StoreError> {
        serde_json::to_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn first_appointment(rows: Vec<AppointmentRow>) -> Result<Option<Appointment>, StoreError> {
        rows.into_iter().next().map(Appointment::try_from).transpose()
    }
}

#[async_trait]
impl AccountStore for SupabaseStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let rows: Vec<AccountRow> = self.select(&format!("/rest/v1/accounts?id=eq.{}", id)).await?;
        Ok(rows.into_iter().next().map(Account::from))
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let path = format!("/rest/v1/accounts?email=eq.{}", email_param(email));
        let rows: Vec<AccountRow> = self.select(&path).await?;
        Ok(rows.into_iter().next().map(Account::from))
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let body = Self::to_body(&AccountRow::from(account))?;
        let _: Vec<AccountRow> = self.write(Method::POST, "/rest/v1/accounts", Some(body)).await?;
        debug!(account_id = %account.id, "Inserted account");
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let body = Self::to_body(&AccountRow::from(account))?;
        let rows: Vec<AccountRow> = self
            .write(Method::PATCH, &format!("/rest/v1/accounts?id=eq.{}", account.id), Some(body))
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let rows: Vec<Value> = self
            .write(
                Method::PATCH,
                &format!("/rest/v1/accounts?id=eq.{}&select=id", id),
                Some(json!({ "password_hash": password_hash })),
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        let rows: Vec<Value> = self
            .write(Method::DELETE, &format!("/rest/v1/accounts?id=eq.{}&select=id", id), None)
            .await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseStore {
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let rows = self.select(&format!("/rest/v1/appointments?id=eq.{}", id)).await?;
        Self::first_appointment(rows)
    }

    async fn find_guest_appointment(
        &self,
        guest_id: &str,
        email: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?is_guest=eq.true&guest_id=eq.{}&guest_email=eq.{}",
            urlencoding::encode(guest_id),
            email_param(email)
        );
        let rows = self.select(&path).await?;
        Self::first_appointment(rows)
    }

    async fn guest_ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?select=guest_id&guest_id=like.{}*",
            urlencoding::encode(prefix)
        );
        let rows: Vec<GuestIdRow> = self.select(&path).await?;
        Ok(rows.into_iter().filter_map(|r| r.guest_id).collect())
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let body = Self::to_body(&AppointmentRow::from(appointment))?;
        let _: Vec<AppointmentRow> = self.write(Method::POST, "/rest/v1/appointments", Some(body)).await?;
        Ok(())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut row = AppointmentRow::from(appointment);
        row.version = appointment.version + 1;
        let body = Self::to_body(&row)?;
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&version=eq.{}",
            appointment.id, appointment.version
        );

        let rows: Vec<AppointmentRow> = self.write(Method::PATCH, &path, Some(body)).await?;
        match Self::first_appointment(rows)? {
            Some(updated) => Ok(updated),
            None => match self.find_appointment(appointment.id).await? {
                Some(_) => {
                    warn!(appointment_id = %appointment.id, "Optimistic update lost the race");
                    Err(StoreError::StaleVersion(appointment.id))
                }
                None => Err(StoreError::NotFound),
            },
        }
    }

    async fn find_active_at(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut path = format!(
            "/rest/v1/appointments?account_id=eq.{}&scheduled_at=eq.{}&status=in.(scheduled,confirmed)",
            account_id,
            timestamp_param(at)
        );
        if let Some(id) = excluding {
            path.push_str(&format!("&id=neq.{}", id));
        }
        let rows: Vec<AppointmentRow> = self.select(&path).await?;
        rows.into_iter().map(Appointment::try_from).collect()
    }

    async fn insert_treatment_plan(&self, plan: &TreatmentPlan) -> Result<(), StoreError> {
        let body = Self::to_body(plan)?;
        let _: Vec<TreatmentPlan> = self.write(Method::POST, "/rest/v1/treatment_plans", Some(body)).await?;
        Ok(())
    }

    async fn find_treatment_plan(&self, id: Uuid) -> Result<Option<TreatmentPlan>, StoreError> {
        let rows: Vec<TreatmentPlan> = self.select(&format!("/rest/v1/treatment_plans?id=eq.{}", id)).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_treatment_plan(&self, plan: &TreatmentPlan) -> Result<TreatmentPlan, StoreError> {
        let mut next = plan.clone();
        next.version = plan.version + 1;
        let body = Self::to_body(&next)?;
        let path = format!("/rest/v1/treatment_plans?id=eq.{}&version=eq.{}", plan.id, plan.version);

        let rows: Vec<TreatmentPlan> = self.write(Method::PATCH, &path, Some(body)).await?;
        match rows.into_iter().next() {
            Some(updated) => Ok(updated),
            None => match self.find_treatment_plan(plan.id).await? {
                Some(_) => {
                    warn!(plan_id = %plan.id, "Optimistic update lost the race");
                    Err(StoreError::StaleVersion(plan.id))
                }
                None => Err(StoreError::NotFound),
            },
        }
    }
}

#[async_trait]
impl VerificationStore for SupabaseStore {
    async fn replace_active_token(
        &self,
        token: &VerificationToken,
        _now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        // The function stamps consumed_at with the transaction time.
        let body = json!({
            "p_id": token.id,
            "p_account_id": token.account_id,
            "p_kind": token.kind,
            "p_token": token.token,
            "p_code": token.code,
            "p_target_email": token.target_email,
            "p_created_at": token.created_at,
            "p_expires_at": token.expires_at,
        });
        let invalidated: u64 = self
            .client
            .request(Method::POST, "/rest/v1/rpc/issue_verification_token", None, Some(body))
            .await
            .map_err(map_api_error)?;
        debug!(token_id = %token.id, invalidated, "Issued verification token");
        Ok(invalidated)
    }

    async fn find_token_by_value(&self, token: &str) -> Result<Option<VerificationToken>, StoreError> {
        let path = format!("/rest/v1/verification_tokens?token=eq.{}", urlencoding::encode(token));
        let rows: Vec<VerificationToken> = self.select(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_unconsumed_by_code(
        &self,
        code: &str,
        kind: VerificationType,
        email: Option<&str>,
    ) -> Result<Option<VerificationToken>, StoreError> {
        let mut path = format!(
            "/rest/v1/verification_tokens?code=eq.{}&kind=eq.{}&consumed=eq.false",
            urlencoding::encode(code),
            kind
        );
        if let Some(email) = email {
            path.push_str(&format!("&target_email=eq.{}", email_param(email)));
        }
        path.push_str("&order=created_at.desc&limit=1");
        let rows: Vec<VerificationToken> = self.select(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn mark_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/verification_tokens?id=eq.{}&consumed=eq.false&select=id", id);
        let rows: Vec<Value> = self
            .write(Method::PATCH, &path, Some(json!({ "consumed": true, "consumed_at": now })))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn release_consumed(&self, id: Uuid, consumed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let path = format!(
            "/rest/v1/verification_tokens?id=eq.{}&consumed=eq.true&consumed_at=eq.{}&select=id",
            id,
            timestamp_param(consumed_at)
        );
        let result: Result<Vec<Value>, StoreError> = self
            .write(Method::PATCH, &path, Some(json!({ "consumed": false, "consumed_at": null })))
            .await;
        match result {
            Ok(rows) => Ok(!rows.is_empty()),
            // A newer live token already holds the one-live-token index.
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
