use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{dispatch, BookingSummary, EmailTemplates, Notifier};
use shared_config::{AppConfig, BookingPolicy};
use shared_database::{AccountStore, AppointmentStore, StoreError};
use shared_models::{Appointment, AppointmentOwner, AppointmentStatus, FieldError, ProfileUpdate};
use shared_utils::clock::Clock;
use shared_utils::validation::{normalize_email, normalize_phone};

use crate::models::{AppointmentError, BookingIntake, BookingPayload, BookingResponse};
use crate::services::guest::{guest_details, GuestIdentityResolver, ResolvedIdentity};
use crate::services::intake::validate_booking;
use crate::services::policy::clinic_day;

/// Fields a guest may change after booking.
pub const GUEST_EDITABLE_FIELDS: [&str; 2] = ["phone", "note"];

fn profile_from(intake: &BookingIntake) -> ProfileUpdate {
    ProfileUpdate {
        first_name: Some(intake.identity.first_name.clone()),
        last_name: Some(intake.identity.last_name.clone()),
        phone_number: intake.identity.phone.clone(),
        gender: intake.identity.gender,
        medical_history: intake.clinical.previous_treatment.clone(),
        treatment_reason: None,
        condition_description: intake.clinical.condition.clone(),
        current_medications: intake.clinical.current_medications.clone(),
    }
}

/// Note lines for a new appointment. Guests keep all clinical context on the
/// appointment; account bookings keep only what has no profile field.
fn initial_note(intake: &BookingIntake) -> String {
    let mut lines = Vec::new();
    if !intake.note.is_empty() {
        lines.push(intake.note.clone());
    }
    if intake.wants_guest {
        lines.extend(intake.clinical.labelled_lines());
    } else {
        if let Some(symptoms) = &intake.clinical.symptoms {
            lines.push(format!("Symptoms: {}", symptoms));
        }
        if let Some(urgency) = &intake.clinical.urgency {
            lines.push(format!("Urgency: {}", urgency));
        }
    }
    lines.join("\n")
}

/// Entry point for new bookings and guest self-service.
pub struct BookingService {
    appointments: Arc<dyn AppointmentStore>,
    resolver: GuestIdentityResolver,
    notifier: Arc<dyn Notifier>,
    templates: EmailTemplates,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn new(
        config: &AppConfig,
        accounts: Arc<dyn AccountStore>,
        appointments: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver: GuestIdentityResolver::new(accounts, appointments.clone(), clock.clone()),
            appointments,
            notifier,
            templates: EmailTemplates::new(&config.email.public_app_url, config.booking.clinic_offset()),
            clock,
            policy: config.booking.clone(),
        }
    }

    fn new_appointment(&self, owner: AppointmentOwner, intake: &BookingIntake) -> Appointment {
        let now = self.clock.now();
        Appointment {
            id: Uuid::new_v4(),
            owner,
            scheduled_at: intake.scheduled_at,
            service_type: intake.service_type,
            note: initial_note(intake),
            status: AppointmentStatus::Scheduled,
            duration_minutes: intake.duration_minutes,
            therapist_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Validates, resolves the identity and stores the appointment. The
    /// confirmation email is sent in the background.
    #[instrument(skip(self, payload), fields(is_guest = payload.is_guest))]
    pub async fn book(&self, payload: BookingPayload) -> Result<BookingResponse, AppointmentError> {
        let intake =
            validate_booking(&payload, self.clock.now(), &self.policy).map_err(AppointmentError::InvalidInput)?;

        let resolved = self
            .resolver
            .resolve(&intake.identity, &profile_from(&intake), intake.wants_guest)
            .await?;

        let (appointment, recipient_name, account_created) = match resolved {
            ResolvedIdentity::Guest(identity) => {
                let appointment = self.insert_guest_appointment(&intake).await?;
                (appointment, identity.full_name(), false)
            }
            ResolvedIdentity::Account { account, created } => {
                let appointment = self.new_appointment(AppointmentOwner::Account { account_id: account.id }, &intake);
                self.appointments.insert_appointment(&appointment).await.map_err(|e| match e {
                    StoreError::Conflict(_) => AppointmentError::SlotConflict,
                    other => other.into(),
                })?;
                (appointment, account.full_name(), created)
            }
        };

        info!(
            appointment_id = %appointment.id,
            guest_id = ?appointment.guest_id(),
            scheduled_at = %appointment.scheduled_at,
            "Appointment booked"
        );
        self.send_confirmation(&appointment, &recipient_name, &intake.identity.email);

        Ok(BookingResponse {
            appointment_id: appointment.id,
            guest_id: appointment.guest_id().map(str::to_string),
            account_id: appointment.owner.account_id(),
            account_created,
            status: appointment.status,
            service_type: appointment.service_type,
            scheduled_at: appointment.scheduled_at,
            duration_minutes: appointment.duration_minutes,
        })
    }

    /// Assigns the next guest id for the appointment's clinic day and inserts,
    /// recomputing the id when a concurrent booking took it first.
    async fn insert_guest_appointment(&self, intake: &BookingIntake) -> Result<Appointment, AppointmentError> {
        let day = clinic_day(intake.scheduled_at, self.policy.clinic_offset());
        let max_attempts = self.policy.guest_id_max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let guest_id = self.resolver.assign_guest_id(day).await?;
            let owner = AppointmentOwner::Guest(guest_details(&intake.identity, guest_id.clone()));
            let appointment = self.new_appointment(owner, intake);

            match self.appointments.insert_appointment(&appointment).await {
                Ok(()) => return Ok(appointment),
                Err(StoreError::Conflict(reason)) if attempt < max_attempts => {
                    warn!(
                        "Guest id {} taken on attempt {}/{}: {}, retrying",
                        guest_id, attempt, max_attempts, reason
                    );
                    continue;
                }
                Err(StoreError::Conflict(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppointmentError::GuestIdExhausted {
            attempts: max_attempts,
        })
    }

    fn send_confirmation(&self, appointment: &Appointment, recipient_name: &str, to: &str) {
        let summary = BookingSummary {
            recipient_name,
            service_label: appointment.service_type.label(),
            scheduled_at: appointment.scheduled_at,
            duration_minutes: appointment.duration_minutes,
            guest_id: appointment.guest_id(),
        };
        dispatch(self.notifier.clone(), self.templates.booking_confirmation(to, &summary));
    }

    /// Guest appointment matching both the guest id and the booking email.
    pub async fn lookup_guest(&self, guest_id: &str, email: &str) -> Result<Appointment, AppointmentError> {
        let (guest_id, email) = (guest_id.trim(), normalize_email(email));
        if guest_id.is_empty() || email.is_empty() {
            return Err(AppointmentError::NotFound);
        }
        self.appointments
            .find_guest_appointment(guest_id, &email)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// Applies a guest's edit. Only `phone` and `note` may change; the note
    /// edit is appended.
    #[instrument(skip(self, email, patch))]
    pub async fn update_guest(
        &self,
        guest_id: &str,
        email: &str,
        patch: &Map<String, Value>,
    ) -> Result<Appointment, AppointmentError> {
        let mut errors = Vec::new();
        if patch.is_empty() {
            errors.push(FieldError::new("phone", "required", "Provide a phone number or a note to update"));
        }
        for key in patch.keys().filter(|k| !GUEST_EDITABLE_FIELDS.contains(&k.as_str())) {
            errors.push(FieldError::new(key, "immutable", format!("{} cannot be changed after booking", key)));
        }

        let phone = match patch.get("phone") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => normalize_phone(raw).or_else(|| {
                errors.push(FieldError::new("phone", "invalid", "Phone number must have 7 to 15 digits"));
                None
            }),
            Some(_) => {
                errors.push(FieldError::new("phone", "invalid", "Phone number must be text"));
                None
            }
        };
        let note = match patch.get("note") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(raw.trim().to_string()),
            Some(_) => {
                errors.push(FieldError::new("note", "invalid", "Note must be text"));
                None
            }
        };
        if !errors.is_empty() {
            return Err(AppointmentError::InvalidInput(errors));
        }

        let mut appointment = self.lookup_guest(guest_id, email).await?;
        if let (Some(phone), AppointmentOwner::Guest(details)) = (phone, &mut appointment.owner) {
            details.phone = phone;
        }
        if let Some(note) = note {
            appointment.append_note(&note);
        }
        appointment.updated_at = self.clock.now();

        let saved = self.appointments.update_appointment(&appointment).await.map_err(|e| match e {
            StoreError::StaleVersion(_) => AppointmentError::ConcurrentModification,
            other => other.into(),
        })?;
        debug!(appointment_id = %saved.id, "Guest appointment updated");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared_models::ServiceType;

    use crate::models::{BookingIdentity, ClinicalContext};

    fn intake(wants_guest: bool) -> BookingIntake {
        BookingIntake {
            wants_guest,
            identity: BookingIdentity {
                first_name: "A".into(),
                last_name: "B".into(),
                email: "a@b.com".into(),
                phone: Some("5551234567".into()),
                age: None,
                gender: None,
            },
            clinical: ClinicalContext {
                condition: Some("Back pain".into()),
                symptoms: Some("Stiffness".into()),
                ..ClinicalContext::default()
            },
            service_type: ServiceType::Assessment,
            scheduled_at: Utc.with_ymd_and_hms(2030, 3, 5, 10, 0, 0).unwrap(),
            duration_minutes: 60,
            note: "First visit".into(),
        }
    }

    #[test]
    fn guest_note_carries_all_clinical_lines() {
        assert_eq!(
            initial_note(&intake(true)),
            "First visit\nCondition: Back pain\nSymptoms: Stiffness"
        );
    }

    #[test]
    fn account_note_leaves_profile_fields_out() {
        assert_eq!(initial_note(&intake(false)), "First visit\nSymptoms: Stiffness");
        assert_eq!(profile_from(&intake(false)).condition_description.as_deref(), Some("Back pain"));
    }
}
