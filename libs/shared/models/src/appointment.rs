use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::Gender;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Statuses that occupy a slot for conflict purposes.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            other => Err(format!("unknown appointment status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    ManualTherapy,
    PhysicalTherapy,
    Rehabilitation,
    Consultation,
    FollowUp,
    Assessment,
}

impl ServiceType {
    pub const ALL: [ServiceType; 6] = [
        ServiceType::ManualTherapy,
        ServiceType::PhysicalTherapy,
        ServiceType::Rehabilitation,
        ServiceType::Consultation,
        ServiceType::FollowUp,
        ServiceType::Assessment,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ServiceType::ManualTherapy => "manual-therapy",
            ServiceType::PhysicalTherapy => "physical-therapy",
            ServiceType::Rehabilitation => "rehabilitation",
            ServiceType::Consultation => "consultation",
            ServiceType::FollowUp => "follow-up",
            ServiceType::Assessment => "assessment",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ServiceType::ManualTherapy => "Manual Therapy",
            ServiceType::PhysicalTherapy => "Physical Therapy",
            ServiceType::Rehabilitation => "Rehabilitation",
            ServiceType::Consultation => "Consultation",
            ServiceType::FollowUp => "Follow-up",
            ServiceType::Assessment => "Assessment",
        }
    }

    /// Accepts either the code or the human-readable label, ignoring case.
    pub fn from_input(raw: &str) -> Option<Self> {
        let needle = raw.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.code().eq_ignore_ascii_case(needle) || s.label().eq_ignore_ascii_case(needle))
    }
}

/// Identity captured for a booking made without an account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestDetails {
    pub guest_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub age: Option<u8>,
    pub gender: Option<Gender>,
}

/// Who an appointment belongs to. Exactly one shape exists per appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppointmentOwner {
    Account { account_id: Uuid },
    Guest(GuestDetails),
}

impl AppointmentOwner {
    pub fn account_id(&self) -> Option<Uuid> {
        match self {
            AppointmentOwner::Account { account_id } => Some(*account_id),
            AppointmentOwner::Guest(_) => None,
        }
    }

    pub fn guest(&self) -> Option<&GuestDetails> {
        match self {
            AppointmentOwner::Guest(details) => Some(details),
            AppointmentOwner::Account { .. } => None,
        }
    }

    pub fn contact_email(&self) -> Option<&str> {
        self.guest().map(|g| g.email.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub owner: AppointmentOwner,
    pub scheduled_at: DateTime<Utc>,
    pub service_type: ServiceType,
    pub note: String,
    pub status: AppointmentStatus,
    pub duration_minutes: i32,
    pub therapist_id: Option<Uuid>,
    /// Optimistic concurrency counter, bumped by the store on every update.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn guest_id(&self) -> Option<&str> {
        self.owner.guest().map(|g| g.guest_id.as_str())
    }

    pub fn is_guest(&self) -> bool {
        self.owner.guest().is_some()
    }

    /// Appends a line to the note, keeping whatever was there.
    pub fn append_note(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if !self.note.is_empty() {
            self.note.push('\n');
        }
        self.note.push_str(line);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreatmentPlan {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub details: String,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    /// Bumped by every successful write; updates must carry the version they read.
    #[serde(default)]
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TreatmentPlan {
    pub fn progress_percentage(&self) -> u32 {
        if self.total_sessions == 0 {
            return 0;
        }
        let completed = self.completed_sessions.min(self.total_sessions) as u64;
        ((completed * 100) / self.total_sessions as u64) as u32
    }

    pub fn is_finished(&self) -> bool {
        self.total_sessions > 0 && self.completed_sessions >= self.total_sessions
    }
}
