pub mod account;
pub mod appointment;
pub mod auth;
pub mod error;
pub mod verification;

pub use account::{Account, AccountOrigin, Gender, ProfileUpdate, Role};
pub use appointment::{
    Appointment, AppointmentOwner, AppointmentStatus, GuestDetails, ServiceType, TreatmentPlan,
};
pub use error::{AppError, ErrorClass, FieldError};
pub use verification::{VerificationToken, VerificationType};
