pub mod error;
pub mod models;
pub mod services;

pub use error::NotificationError;
pub use models::EmailMessage;
pub use services::*;
