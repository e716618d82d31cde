use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared_config::BookingPolicy;
use shared_database::{AccountStore, AppointmentStore, StoreError};
use shared_models::auth::User;
use shared_models::{Appointment, AppointmentStatus, FieldError, Role};
use shared_utils::clock::Clock;

use crate::models::{AppointmentError, RescheduleRequest, SlotViolation};
use crate::services::intake::{parse_duration, parse_service_type, parse_timestamp};
use crate::services::policy;

/// Statuses reachable from `current` through a staff status update.
/// Rescheduling resets to `Scheduled` from anywhere and is not listed here.
pub fn get_valid_transitions(current: AppointmentStatus) -> Vec<AppointmentStatus> {
    match current {
        AppointmentStatus::Scheduled => vec![
            AppointmentStatus::Confirmed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Completed,
        ],
        AppointmentStatus::Confirmed => vec![AppointmentStatus::Completed, AppointmentStatus::Cancelled],
        AppointmentStatus::Completed | AppointmentStatus::Cancelled => vec![],
    }
}

pub fn validate_status_transition(from: AppointmentStatus, to: AppointmentStatus) -> Result<(), AppointmentError> {
    if get_valid_transitions(from).contains(&to) {
        Ok(())
    } else {
        warn!("Invalid status transition attempted: {} -> {}", from, to);
        Err(AppointmentError::InvalidStatusTransition { from, to })
    }
}

/// The owning account or any staff member may act on an appointment.
pub fn can_act_on(appointment: &Appointment, requester: &User) -> bool {
    if requester.is_staff() {
        return true;
    }
    match (appointment.owner.account_id(), requester.account_id()) {
        (Some(owner), Some(caller)) => owner == caller,
        _ => false,
    }
}

fn local_label(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

fn write_error(err: StoreError) -> AppointmentError {
    match err {
        StoreError::StaleVersion(_) => AppointmentError::ConcurrentModification,
        StoreError::Conflict(_) => AppointmentError::SlotConflict,
        StoreError::NotFound => AppointmentError::NotFound,
        other => AppointmentError::Store(other),
    }
}

/// Admission, rescheduling and status changes for existing appointments.
pub struct AppointmentScheduler {
    appointments: Arc<dyn AppointmentStore>,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl AppointmentScheduler {
    pub fn new(
        appointments: Arc<dyn AppointmentStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            appointments,
            accounts,
            clock,
            policy,
        }
    }

    pub fn validate_new_slot(&self, ts: DateTime<Utc>) -> Vec<SlotViolation> {
        policy::validate_new_slot(ts, self.clock.now(), &self.policy)
    }

    async fn load(&self, id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .find_appointment(id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// Moves an appointment to a new slot and resets it to `Scheduled`.
    /// The previous time and the reason are appended to the note.
    #[instrument(skip(self, requester, request), fields(requester = %requester.id))]
    pub async fn reschedule(
        &self,
        id: Uuid,
        requester: &User,
        request: RescheduleRequest,
    ) -> Result<Appointment, AppointmentError> {
        let mut appointment = self.load(id).await?;
        if !can_act_on(&appointment, requester) {
            warn!(appointment_id = %id, "Reschedule refused for non-owner");
            return Err(AppointmentError::Forbidden);
        }

        let offset = self.policy.clinic_offset();
        let mut errors = Vec::new();

        let reason = request.reschedule_reason.trim();
        if reason.is_empty() {
            errors.push(FieldError::required("reschedule_reason"));
        }

        let new_ts = match parse_timestamp(&request.new_date, offset) {
            Some(ts) => {
                errors.extend(
                    self.validate_new_slot(ts)
                        .iter()
                        .map(|v| v.to_field_error("new_date", "new_date")),
                );
                Some(ts)
            }
            None => {
                errors.push(FieldError::new(
                    "new_date",
                    "invalid",
                    "Use an RFC 3339 timestamp or YYYY-MM-DD HH:MM",
                ));
                None
            }
        };

        let service_type = match request.new_service_type.as_deref().filter(|s| !s.trim().is_empty()) {
            None => Some(appointment.service_type),
            Some(raw) => parse_service_type(Some(raw), "new_service_type")
                .map_err(|e| errors.push(e))
                .ok(),
        };

        let duration = match request.new_duration.as_ref() {
            None => Some(appointment.duration_minutes),
            Some(value) => parse_duration(Some(value), "new_duration", &self.policy)
                .map_err(|e| errors.push(e))
                .ok(),
        };

        let (new_ts, service_type, duration) = match (new_ts, service_type, duration) {
            (Some(ts), Some(service), Some(duration)) if errors.is_empty() => (ts, service, duration),
            _ => return Err(AppointmentError::InvalidInput(errors)),
        };

        // Guests carry no account to collide with.
        if let Some(account_id) = appointment.owner.account_id() {
            let clashes = self.appointments.find_active_at(account_id, new_ts, Some(id)).await?;
            if !clashes.is_empty() {
                info!(appointment_id = %id, "Reschedule target already taken");
                return Err(AppointmentError::SlotConflict);
            }
        }

        let previous = appointment.scheduled_at;
        appointment.append_note(&format!(
            "Rescheduled from {} to {}. Reason: {}",
            local_label(previous, offset),
            local_label(new_ts, offset),
            reason
        ));
        if let Some(note) = request.new_note.as_deref() {
            appointment.append_note(note);
        }
        appointment.scheduled_at = new_ts;
        appointment.service_type = service_type;
        appointment.duration_minutes = duration;
        appointment.status = AppointmentStatus::Scheduled;
        appointment.updated_at = self.clock.now();

        let saved = self.appointments.update_appointment(&appointment).await.map_err(write_error)?;
        info!(appointment_id = %id, from = %previous, to = %new_ts, "Appointment rescheduled");
        Ok(saved)
    }

    /// Staff-only status change along the lifecycle table.
    #[instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn update_status(
        &self,
        id: Uuid,
        requester: &User,
        status: AppointmentStatus,
    ) -> Result<Appointment, AppointmentError> {
        if !requester.is_staff() {
            return Err(AppointmentError::Forbidden);
        }
        let mut appointment = self.load(id).await?;
        validate_status_transition(appointment.status, status)?;

        let from = appointment.status;
        appointment.status = status;
        appointment.updated_at = self.clock.now();

        let saved = self.appointments.update_appointment(&appointment).await.map_err(write_error)?;
        info!(appointment_id = %id, %from, to = %status, "Appointment status updated");
        Ok(saved)
    }

    #[instrument(skip(self, requester), fields(requester = %requester.id))]
    pub async fn assign_therapist(
        &self,
        id: Uuid,
        requester: &User,
        therapist_id: Uuid,
    ) -> Result<Appointment, AppointmentError> {
        if !requester.is_staff() {
            return Err(AppointmentError::Forbidden);
        }
        let therapist = self.accounts.find_account(therapist_id).await?;
        if !matches!(therapist, Some(ref account) if account.role == Role::Therapist) {
            debug!(%therapist_id, "Assignment target is not a therapist");
            return Err(AppointmentError::NotATherapist);
        }

        let mut appointment = self.load(id).await?;
        appointment.therapist_id = Some(therapist_id);
        appointment.updated_at = self.clock.now();

        let saved = self.appointments.update_appointment(&appointment).await.map_err(write_error)?;
        info!(appointment_id = %id, %therapist_id, "Therapist assigned");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_table() {
        use AppointmentStatus::*;

        assert!(validate_status_transition(Scheduled, Confirmed).is_ok());
        assert!(validate_status_transition(Scheduled, Completed).is_ok());
        assert!(validate_status_transition(Confirmed, Cancelled).is_ok());
        assert!(validate_status_transition(Confirmed, Scheduled).is_err());
        assert!(get_valid_transitions(Cancelled).is_empty());
        assert!(get_valid_transitions(Completed).is_empty());
    }
}
