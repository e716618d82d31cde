use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_database::StoreError;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_models::{ErrorClass, FieldError};

use crate::models::{
    AppointmentError, AssignTherapistRequest, BookingPayload, CreateTreatmentPlanRequest, GuestLookupQuery,
    GuestUpdateRequest, RescheduleRequest, StatusUpdateRequest,
};
use crate::router::AppointmentState;

fn to_app_error(e: AppointmentError) -> AppError {
    if e.class() == ErrorClass::Transient {
        warn!(error = %e, "Appointment request failed, retry may succeed");
    }
    match e {
        AppointmentError::InvalidInput(errors) => AppError::InvalidInput(errors),
        AppointmentError::MissingGuestField(field) => AppError::InvalidInput(vec![FieldError::required(field)]),
        AppointmentError::NotFound | AppointmentError::Store(StoreError::NotFound) => {
            AppError::NotFound("Appointment not found".to_string())
        }
        AppointmentError::Forbidden => AppError::Forbidden(e.to_string()),
        AppointmentError::NotATherapist => AppError::BadRequest(e.to_string()),
        AppointmentError::SlotConflict
        | AppointmentError::InvalidStatusTransition { .. }
        | AppointmentError::ConcurrentModification
        | AppointmentError::GuestIdExhausted { .. } => AppError::Conflict(e.to_string()),
        AppointmentError::Store(store) => AppError::Database(store.to_string()),
    }
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentState>>,
    Json(payload): Json<BookingPayload>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let booking = state.booking.book(payload).await.map_err(to_app_error)?;

    let message = match &booking.guest_id {
        Some(guest_id) => format!("Appointment booked. Keep your guest id {} to manage it.", guest_id),
        None => "Appointment booked.".to_string(),
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "appointment": booking,
            "message": message
        })),
    ))
}

#[axum::debug_handler]
pub async fn lookup_guest_appointment(
    State(state): State<Arc<AppointmentState>>,
    Query(query): Query<GuestLookupQuery>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .lookup_guest(&query.guest_id, &query.email)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn update_guest_appointment(
    State(state): State<Arc<AppointmentState>>,
    Json(request): Json<GuestUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking
        .update_guest(&request.guest_id, &request.email, &request.patch)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<RescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .reschedule(appointment_id, &user, request)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rescheduled"
    })))
}

#[axum::debug_handler]
pub async fn update_appointment_status(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .update_status(appointment_id, &user, request.status)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn assign_therapist(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<AssignTherapistRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .scheduler
        .assign_therapist(appointment_id, &user, request.therapist_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({ "success": true, "appointment": appointment })))
}

#[axum::debug_handler]
pub async fn create_treatment_plan(
    State(state): State<Arc<AppointmentState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateTreatmentPlanRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let plan = state
        .treatment
        .create_plan(appointment_id, &user, &request.details, request.total_sessions)
        .await
        .map_err(to_app_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "treatment_plan": plan,
            "progress_percentage": plan.progress_percentage()
        })),
    ))
}

#[axum::debug_handler]
pub async fn record_treatment_session(
    State(state): State<Arc<AppointmentState>>,
    Path(plan_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let plan = state
        .treatment
        .record_session(plan_id, &user)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "treatment_plan": plan,
        "progress_percentage": plan.progress_percentage(),
        "finished": plan.is_finished()
    })))
}
