use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};

use notification_cell::Notifier;
use shared_config::AppConfig;
use shared_database::{AccountStore, AppointmentStore};
use shared_utils::clock::Clock;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::{AppointmentScheduler, BookingService, TreatmentPlanService};

pub struct AppointmentState {
    pub config: Arc<AppConfig>,
    pub booking: BookingService,
    pub scheduler: AppointmentScheduler,
    pub treatment: TreatmentPlanService,
}

impl AppointmentState {
    pub fn new(
        config: Arc<AppConfig>,
        accounts: Arc<dyn AccountStore>,
        appointments: Arc<dyn AppointmentStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            booking: BookingService::new(&config, accounts.clone(), appointments.clone(), notifier, clock.clone()),
            scheduler: AppointmentScheduler::new(appointments.clone(), accounts, clock.clone(), config.booking.clone()),
            treatment: TreatmentPlanService::new(appointments, clock),
            config,
        }
    }
}

pub fn appointment_routes(state: Arc<AppointmentState>) -> Router {
    // Guests authenticate with guest id plus email, not a bearer token
    let public_routes = Router::new()
        .route("/book", post(handlers::book_appointment))
        .route("/guest/lookup", get(handlers::lookup_guest_appointment))
        .route("/guest", patch(handlers::update_guest_appointment));

    let protected_routes = Router::new()
        .route("/{appointment_id}/reschedule", patch(handlers::reschedule_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_appointment_status))
        .route("/{appointment_id}/therapist", patch(handlers::assign_therapist))
        .route("/{appointment_id}/treatment-plans", post(handlers::create_treatment_plan))
        .route("/treatment-plans/{plan_id}/sessions", post(handlers::record_treatment_session))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
