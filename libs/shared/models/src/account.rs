use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Therapist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Therapist => "therapist",
            Role::Admin => "admin",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Therapist | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "therapist" => Ok(Role::Therapist),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "other" => Ok(Gender::Other),
            other => Err(format!("unknown gender: {}", other)),
        }
    }
}

/// How an account came to exist. Booking-created accounts skip the email
/// verification step and are recorded as such.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountOrigin {
    SelfRegistered,
    Booking,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub medical_history: Option<String>,
    pub treatment_reason: Option<String>,
    pub condition_description: Option<String>,
    pub current_medications: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub origin: AccountOrigin,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Incoming profile values. `None` and blank strings leave the stored value alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone_number: Option<String>,
    pub gender: Option<Gender>,
    pub medical_history: Option<String>,
    pub treatment_reason: Option<String>,
    pub condition_description: Option<String>,
    pub current_medications: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Account {
    /// Builds a fresh account with the email doubling as username.
    pub fn new(email: &str, role: Role, origin: AccountOrigin, now: DateTime<Utc>) -> Self {
        let email = email.trim().to_ascii_lowercase();
        Self {
            id: Uuid::new_v4(),
            username: email.clone(),
            email,
            role,
            first_name: String::new(),
            last_name: String::new(),
            phone_number: None,
            date_of_birth: None,
            gender: None,
            medical_history: None,
            treatment_reason: None,
            condition_description: None,
            current_medications: None,
            is_active: false,
            email_verified: false,
            origin,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Applies `update`, never replacing a stored value with a blank one.
    /// Returns whether anything changed.
    pub fn merge_profile(&mut self, update: &ProfileUpdate) -> bool {
        let mut changed = false;

        if let Some(v) = non_blank(&update.first_name) {
            changed |= self.first_name != v;
            self.first_name = v;
        }
        if let Some(v) = non_blank(&update.last_name) {
            changed |= self.last_name != v;
            self.last_name = v;
        }
        if let Some(gender) = update.gender {
            changed |= self.gender != Some(gender);
            self.gender = Some(gender);
        }

        for (slot, incoming) in [
            (&mut self.phone_number, &update.phone_number),
            (&mut self.medical_history, &update.medical_history),
            (&mut self.treatment_reason, &update.treatment_reason),
            (&mut self.condition_description, &update.condition_description),
            (&mut self.current_medications, &update.current_medications),
        ] {
            if let Some(v) = non_blank(incoming) {
                changed |= slot.as_deref() != Some(v.as_str());
                *slot = Some(v);
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_values_when_incoming_is_blank() {
        let mut account = Account::new("Jane@Example.com", Role::Patient, AccountOrigin::Booking, Utc::now());
        account.first_name = "Jane".into();
        account.phone_number = Some("5551234567".into());

        let changed = account.merge_profile(&ProfileUpdate {
            first_name: Some("   ".into()),
            last_name: Some("Doe".into()),
            phone_number: Some(String::new()),
            ..ProfileUpdate::default()
        });

        assert!(changed);
        assert_eq!(account.first_name, "Jane");
        assert_eq!(account.last_name, "Doe");
        assert_eq!(account.phone_number.as_deref(), Some("5551234567"));
        assert_eq!(account.email, "jane@example.com");
        assert_eq!(account.username, account.email);
    }

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!("Therapist".parse::<Role>(), Ok(Role::Therapist));
        assert!(Role::Admin.is_staff());
        assert!(!Role::Patient.is_staff());
        assert!("doctor".parse::<Role>().is_err());
    }
}
