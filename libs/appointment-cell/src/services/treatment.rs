use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use shared_database::{AppointmentStore, StoreError};
use shared_models::auth::User;
use shared_models::{FieldError, TreatmentPlan};
use shared_utils::clock::Clock;

use crate::models::AppointmentError;

const MAX_SESSION_ATTEMPTS: u32 = 3;

pub struct TreatmentPlanService {
    appointments: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
}

impl TreatmentPlanService {
    pub fn new(appointments: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { appointments, clock }
    }

    pub async fn create_plan(
        &self,
        appointment_id: Uuid,
        requester: &User,
        details: &str,
        total_sessions: u32,
    ) -> Result<TreatmentPlan, AppointmentError> {
        if !requester.is_staff() {
            return Err(AppointmentError::Forbidden);
        }
        if total_sessions == 0 {
            return Err(AppointmentError::InvalidInput(vec![FieldError::new(
                "total_sessions",
                "out_of_range",
                "A plan needs at least one session",
            )]));
        }
        self.appointments
            .find_appointment(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let now = self.clock.now();
        let plan = TreatmentPlan {
            id: Uuid::new_v4(),
            appointment_id,
            details: details.trim().to_string(),
            total_sessions,
            completed_sessions: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.appointments.insert_treatment_plan(&plan).await?;
        info!(plan_id = %plan.id, %appointment_id, total_sessions, "Treatment plan created");
        Ok(plan)
    }

    /// Counts one more completed session, never past the plan total. A
    /// concurrent write forces a re-read so no session is lost.
    pub async fn record_session(&self, plan_id: Uuid, requester: &User) -> Result<TreatmentPlan, AppointmentError> {
        if !requester.is_staff() {
            return Err(AppointmentError::Forbidden);
        }

        for attempt in 1..=MAX_SESSION_ATTEMPTS {
            let mut plan = self
                .appointments
                .find_treatment_plan(plan_id)
                .await?
                .ok_or(AppointmentError::NotFound)?;

            if plan.is_finished() {
                return Ok(plan);
            }
            plan.completed_sessions += 1;
            plan.updated_at = self.clock.now();

            match self.appointments.update_treatment_plan(&plan).await {
                Ok(saved) => {
                    info!(
                        %plan_id,
                        completed = saved.completed_sessions,
                        progress = saved.progress_percentage(),
                        "Treatment session recorded"
                    );
                    return Ok(saved);
                }
                Err(StoreError::StaleVersion(_)) if attempt < MAX_SESSION_ATTEMPTS => {
                    warn!("Plan {} changed during attempt {}/{}, re-reading", plan_id, attempt, MAX_SESSION_ATTEMPTS);
                    continue;
                }
                Err(StoreError::StaleVersion(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppointmentError::ConcurrentModification)
    }
}
