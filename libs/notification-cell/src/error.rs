use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("Email provider is not configured")]
    NotConfigured,

    #[error("Email transport failed: {0}")]
    Transport(String),

    #[error("Email provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },
}
