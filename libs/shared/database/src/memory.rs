use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shared_models::{Account, Appointment, TreatmentPlan, VerificationToken, VerificationType};

use crate::store::{AccountStore, AppointmentStore, StoreError, VerificationStore};

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    password_hashes: HashMap<Uuid, String>,
    appointments: HashMap<Uuid, Appointment>,
    treatment_plans: HashMap<Uuid, TreatmentPlan>,
    tokens: Vec<VerificationToken>,
}

impl Tables {
    fn email_or_username_taken(&self, account: &Account) -> bool {
        self.accounts.values().any(|other| {
            other.id != account.id
                && (other.email.eq_ignore_ascii_case(&account.email)
                    || other.username.eq_ignore_ascii_case(&account.username))
        })
    }

    fn slot_taken(&self, appointment: &Appointment) -> bool {
        let Some(account_id) = appointment.owner.account_id() else {
            return false;
        };
        appointment.status.is_active()
            && self.appointments.values().any(|other| {
                other.id != appointment.id
                    && other.owner.account_id() == Some(account_id)
                    && other.scheduled_at == appointment.scheduled_at
                    && other.status.is_active()
            })
    }

    fn guest_id_taken(&self, appointment: &Appointment) -> bool {
        let Some(guest_id) = appointment.guest_id() else {
            return false;
        };
        self.appointments
            .values()
            .any(|other| other.id != appointment.id && other.guest_id() == Some(guest_id))
    }
}

/// Store backed by process memory. Every operation runs under one lock, so
/// the multi-step contracts of the storage traits hold trivially.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn password_hash(&self, account_id: Uuid) -> Option<String> {
        self.tables.lock().await.password_hashes.get(&account_id).cloned()
    }

    pub async fn tokens_for(&self, account_id: Uuid, kind: VerificationType) -> Vec<VerificationToken> {
        self.tables
            .lock()
            .await
            .tokens
            .iter()
            .filter(|t| t.account_id == account_id && t.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn appointment_count(&self) -> usize {
        self.tables.lock().await.appointments.len()
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn find_account(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let email = email.trim();
        Ok(self
            .tables
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.contains_key(&account.id) || tables.email_or_username_taken(account) {
            return Err(StoreError::Conflict(format!("account {} already exists", account.email)));
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&account.id) {
            return Err(StoreError::NotFound);
        }
        if tables.email_or_username_taken(account) {
            return Err(StoreError::Conflict(format!("email {} already in use", account.email)));
        }
        tables.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.accounts.contains_key(&id) {
            return Err(StoreError::NotFound);
        }
        tables.password_hashes.insert(id, password_hash.to_string());
        Ok(())
    }

    async fn delete_account(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.accounts.remove(&id).is_none() {
            return Err(StoreError::NotFound);
        }
        tables.password_hashes.remove(&id);

        let owned: Vec<Uuid> = tables
            .appointments
            .values()
            .filter(|a| a.owner.account_id() == Some(id))
            .map(|a| a.id)
            .collect();
        for appointment_id in &owned {
            tables.appointments.remove(appointment_id);
        }
        tables.treatment_plans.retain(|_, plan| !owned.contains(&plan.appointment_id));
        tables.tokens.retain(|t| t.account_id != id);

        debug!(account_id = %id, appointments = owned.len(), "Deleted account with owned records");
        Ok(())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn find_appointment(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.tables.lock().await.appointments.get(&id).cloned())
    }

    async fn find_guest_appointment(
        &self,
        guest_id: &str,
        email: &str,
    ) -> Result<Option<Appointment>, StoreError> {
        let email = email.trim();
        Ok(self
            .tables
            .lock()
            .await
            .appointments
            .values()
            .find(|a| {
                a.owner
                    .guest()
                    .map(|g| g.guest_id == guest_id && g.email.eq_ignore_ascii_case(email))
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn guest_ids_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .appointments
            .values()
            .filter_map(|a| a.guest_id())
            .filter(|id| id.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }

    async fn insert_appointment(&self, appointment: &Appointment) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.guest_id_taken(appointment) {
            return Err(StoreError::Conflict(format!(
                "guest id {} already issued",
                appointment.guest_id().unwrap_or_default()
            )));
        }
        if tables.slot_taken(appointment) {
            return Err(StoreError::Conflict(format!(
                "account already booked at {}",
                appointment.scheduled_at
            )));
        }
        tables.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn update_appointment(&self, appointment: &Appointment) -> Result<Appointment, StoreError> {
        let mut tables = self.tables.lock().await;
        let stored_version = tables
            .appointments
            .get(&appointment.id)
            .map(|a| a.version)
            .ok_or(StoreError::NotFound)?;
        if stored_version != appointment.version {
            return Err(StoreError::StaleVersion(appointment.id));
        }
        if tables.slot_taken(appointment) {
            return Err(StoreError::Conflict(format!(
                "account already booked at {}",
                appointment.scheduled_at
            )));
        }
        let mut updated = appointment.clone();
        updated.version += 1;
        tables.appointments.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn find_active_at(
        &self,
        account_id: Uuid,
        at: DateTime<Utc>,
        excluding: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .appointments
            .values()
            .filter(|a| {
                a.owner.account_id() == Some(account_id)
                    && a.scheduled_at == at
                    && a.status.is_active()
                    && Some(a.id) != excluding
            })
            .cloned()
            .collect())
    }

    async fn insert_treatment_plan(&self, plan: &TreatmentPlan) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.appointments.contains_key(&plan.appointment_id) {
            return Err(StoreError::NotFound);
        }
        tables.treatment_plans.insert(plan.id, plan.clone());
        Ok(())
    }

    async fn find_treatment_plan(&self, id: Uuid) -> Result<Option<TreatmentPlan>, StoreError> {
        Ok(self.tables.lock().await.treatment_plans.get(&id).cloned())
    }

    async fn update_treatment_plan(&self, plan: &TreatmentPlan) -> Result<TreatmentPlan, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.treatment_plans.get_mut(&plan.id) {
            Some(stored) if stored.version != plan.version => Err(StoreError::StaleVersion(plan.id)),
            Some(stored) => {
                let mut updated = plan.clone();
                updated.version += 1;
                *stored = updated.clone();
                Ok(updated)
            }
            None => Err(StoreError::NotFound),
        }
    }
}

#[async_trait]
impl VerificationStore for InMemoryStore {
    async fn replace_active_token(
        &self,
        token: &VerificationToken,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.tokens.iter().any(|t| t.token == token.token) {
            return Err(StoreError::Conflict("token value already issued".to_string()));
        }

        let mut invalidated = 0;
        for existing in tables
            .tokens
            .iter_mut()
            .filter(|t| t.account_id == token.account_id && t.kind == token.kind && !t.consumed)
        {
            existing.consumed = true;
            existing.consumed_at = Some(now);
            invalidated += 1;
        }
        tables.tokens.push(token.clone());
        Ok(invalidated)
    }

    async fn find_token_by_value(&self, token: &str) -> Result<Option<VerificationToken>, StoreError> {
        Ok(self.tables.lock().await.tokens.iter().find(|t| t.token == token).cloned())
    }

    async fn find_unconsumed_by_code(
        &self,
        code: &str,
        kind: VerificationType,
        email: Option<&str>,
    ) -> Result<Option<VerificationToken>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .tokens
            .iter()
            .filter(|t| t.code == code && t.kind == kind && !t.consumed)
            .filter(|t| match email {
                Some(email) => t
                    .target_email
                    .as_deref()
                    .map(|target| target.eq_ignore_ascii_case(email.trim()))
                    .unwrap_or(false),
                None => true,
            })
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn mark_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tokens.iter_mut().find(|t| t.id == id) {
            Some(token) if !token.consumed => {
                token.consumed = true;
                token.consumed_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound),
        }
    }

    async fn release_consumed(&self, id: Uuid, consumed_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(index) = tables.tokens.iter().position(|t| t.id == id) else {
            return Err(StoreError::NotFound);
        };
        let (account_id, kind) = (tables.tokens[index].account_id, tables.tokens[index].kind);
        let superseded = tables
            .tokens
            .iter()
            .any(|t| t.id != id && t.account_id == account_id && t.kind == kind && !t.consumed);

        let token = &mut tables.tokens[index];
        if superseded || !token.consumed || token.consumed_at != Some(consumed_at) {
            return Ok(false);
        }
        token.consumed = false;
        token.consumed_at = None;
        debug!(token_id = %id, "Released consumed token");
        Ok(true)
    }
}
