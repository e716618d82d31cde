use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::{AppointmentStatus, ErrorClass, FieldError, Gender, ServiceType};

// ==============================================================================
// BOOKING INPUT
// ==============================================================================

/// Raw booking form. Everything is optional and loosely typed so that
/// validation can report every problem in one pass.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingPayload {
    #[serde(default)]
    pub is_guest: bool,
    #[serde(alias = "guest_first_name")]
    pub first_name: Option<String>,
    #[serde(alias = "guest_last_name")]
    pub last_name: Option<String>,
    #[serde(alias = "guest_email")]
    pub email: Option<String>,
    #[serde(alias = "guest_phone", alias = "phone_number")]
    pub phone: Option<String>,
    #[serde(alias = "guest_age")]
    pub age: Option<Value>,
    #[serde(alias = "guest_gender")]
    pub gender: Option<String>,
    #[serde(alias = "service")]
    pub service_type: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration: Option<Value>,
    #[serde(alias = "notes")]
    pub note: Option<String>,
    pub condition: Option<String>,
    pub symptoms: Option<String>,
    pub previous_treatment: Option<String>,
    pub current_medications: Option<String>,
    pub urgency: Option<String>,
}

/// Who the booking is for, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingIdentity {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
}

impl BookingIdentity {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Optional clinical context supplied with a booking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClinicalContext {
    pub condition: Option<String>,
    pub symptoms: Option<String>,
    pub previous_treatment: Option<String>,
    pub current_medications: Option<String>,
    pub urgency: Option<String>,
}

impl ClinicalContext {
    pub fn labelled_lines(&self) -> Vec<String> {
        [
            ("Condition", &self.condition),
            ("Symptoms", &self.symptoms),
            ("Previous Treatment", &self.previous_treatment),
            ("Current Medications", &self.current_medications),
            ("Urgency", &self.urgency),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookingIntake {
    pub wants_guest: bool,
    pub identity: BookingIdentity,
    pub clinical: ClinicalContext,
    pub service_type: ServiceType,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub note: String,
}

// ==============================================================================
// OTHER REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleRequest {
    /// RFC 3339, or `YYYY-MM-DD HH:MM` in clinic time.
    pub new_date: String,
    #[serde(default)]
    pub reschedule_reason: String,
    pub new_service_type: Option<String>,
    pub new_duration: Option<Value>,
    pub new_note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTherapistRequest {
    pub therapist_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuestLookupQuery {
    pub guest_id: String,
    pub email: String,
}

/// Guest self-service edit. Every key besides the credentials lands in `patch`
/// and is checked against the editable allow-list.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestUpdateRequest {
    pub guest_id: String,
    pub email: String,
    #[serde(flatten)]
    pub patch: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTreatmentPlanRequest {
    #[serde(default)]
    pub details: String,
    pub total_sessions: u32,
}

// ==============================================================================
// RESPONSES
// ==============================================================================

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BookingResponse {
    pub appointment_id: Uuid,
    pub guest_id: Option<String>,
    pub account_id: Option<Uuid>,
    pub account_created: bool,
    pub status: AppointmentStatus,
    pub service_type: ServiceType,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
}

// ==============================================================================
// ERRORS
// ==============================================================================

/// A rule a requested slot breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotViolation {
    PastDate,
    HorizonExceeded { max_days: i64 },
    OutsideBusinessHours { open_hour: u32, close_hour: u32 },
}

impl SlotViolation {
    pub fn code(&self) -> &'static str {
        match self {
            SlotViolation::PastDate => "past_date",
            SlotViolation::HorizonExceeded { .. } => "horizon_exceeded",
            SlotViolation::OutsideBusinessHours { .. } => "outside_business_hours",
        }
    }

    pub fn to_field_error(&self, date_field: &str, time_field: &str) -> FieldError {
        let field = match self {
            SlotViolation::OutsideBusinessHours { .. } => time_field,
            _ => date_field,
        };
        FieldError::new(field, self.code(), self.to_string())
    }
}

impl fmt::Display for SlotViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotViolation::PastDate => write!(f, "Appointment must be in the future"),
            SlotViolation::HorizonExceeded { max_days } => {
                write!(f, "Appointment cannot be booked more than {} days ahead", max_days)
            }
            SlotViolation::OutsideBusinessHours { open_hour, close_hour } => write!(
                f,
                "Appointment must start between {:02}:00 and {:02}:00",
                open_hour, close_hour
            ),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Invalid input")]
    InvalidInput(Vec<FieldError>),

    #[error("Guest booking is missing {0}")]
    MissingGuestField(&'static str),

    #[error("Appointment not found")]
    NotFound,

    #[error("Not allowed to modify this appointment")]
    Forbidden,

    #[error("The account already has an appointment at this time")]
    SlotConflict,

    #[error("Cannot change appointment status from {from} to {to}")]
    InvalidStatusTransition { from: AppointmentStatus, to: AppointmentStatus },

    #[error("Assigned account must hold the therapist role")]
    NotATherapist,

    #[error("Appointment was modified concurrently, reload and retry")]
    ConcurrentModification,

    #[error("Could not assign a guest id after {attempts} attempts")]
    GuestIdExhausted { attempts: u32 },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl AppointmentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppointmentError::InvalidInput(_) | AppointmentError::MissingGuestField(_) => ErrorClass::Validation,
            AppointmentError::Forbidden
            | AppointmentError::SlotConflict
            | AppointmentError::InvalidStatusTransition { .. }
            | AppointmentError::NotATherapist
            | AppointmentError::ConcurrentModification => ErrorClass::State,
            AppointmentError::NotFound | AppointmentError::Store(StoreError::NotFound) => ErrorClass::NotFound,
            AppointmentError::GuestIdExhausted { .. } | AppointmentError::Store(_) => ErrorClass::Transient,
        }
    }

    /// Codes of every field problem carried by `InvalidInput`.
    pub fn field_codes(&self) -> Vec<&str> {
        match self {
            AppointmentError::InvalidInput(errors) => errors.iter().map(|e| e.code.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}
