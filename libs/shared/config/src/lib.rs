use std::env;
use std::str::FromStr;

use chrono::{Duration, FixedOffset, Offset, Utc};
use tracing::warn;

/// Admission rules for new and rescheduled bookings.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingPolicy {
    pub horizon_days: i64,
    pub open_hour: u32,
    pub close_hour: u32,
    /// Offset of the clinic's wall clock from UTC, in minutes.
    pub utc_offset_minutes: i32,
    pub default_duration_minutes: i32,
    pub min_duration_minutes: i32,
    pub guest_id_max_attempts: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            horizon_days: 180,
            open_hour: 8,
            close_hour: 20,
            utc_offset_minutes: 0,
            default_duration_minutes: 60,
            min_duration_minutes: 15,
            guest_id_max_attempts: 5,
        }
    }
}

impl BookingPolicy {
    pub fn clinic_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| {
            warn!("Clinic UTC offset {} out of range, falling back to UTC", self.utc_offset_minutes);
            Utc.fix()
        })
    }
}

/// Lifetimes of the one-time verification tokens, per token type.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationPolicy {
    pub registration_ttl_hours: i64,
    pub password_reset_ttl_hours: i64,
    pub email_change_ttl_hours: i64,
    pub min_password_length: usize,
    pub max_password_length: usize,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            registration_ttl_hours: 24,
            password_reset_ttl_hours: 2,
            email_change_ttl_hours: 24,
            min_password_length: 8,
            max_password_length: 128,
        }
    }
}

impl VerificationPolicy {
    pub fn registration_ttl(&self) -> Duration {
        Duration::hours(self.registration_ttl_hours)
    }

    pub fn password_reset_ttl(&self) -> Duration {
        Duration::hours(self.password_reset_ttl_hours)
    }

    pub fn email_change_ttl(&self) -> Duration {
        Duration::hours(self.email_change_ttl_hours)
    }
}

/// Outbound email provider settings.
#[derive(Debug, Clone, Default)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub from_address: String,
    pub public_app_url: String,
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.api_url.is_empty() && !self.api_key.is_empty() && !self.from_address.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub port: u16,
    pub booking: BookingPolicy,
    pub verification: VerificationPolicy,
    pub email: EmailConfig,
}

fn env_or_empty(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", key);
        String::new()
    })
}

fn env_parsed<T: FromStr + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let booking_defaults = BookingPolicy::default();
        let verification_defaults = VerificationPolicy::default();

        let config = Self {
            supabase_url: env_or_empty("SUPABASE_URL"),
            supabase_anon_key: env_or_empty("SUPABASE_ANON_PUBLIC_KEY"),
            supabase_jwt_secret: env_or_empty("SUPABASE_JWT_SECRET"),
            port: env_parsed("PORT", 3000),
            booking: BookingPolicy {
                horizon_days: env_parsed("BOOKING_HORIZON_DAYS", booking_defaults.horizon_days),
                open_hour: env_parsed("BUSINESS_OPEN_HOUR", booking_defaults.open_hour),
                close_hour: env_parsed("BUSINESS_CLOSE_HOUR", booking_defaults.close_hour),
                utc_offset_minutes: env_parsed("CLINIC_UTC_OFFSET_MINUTES", booking_defaults.utc_offset_minutes),
                default_duration_minutes: env_parsed(
                    "DEFAULT_APPOINTMENT_MINUTES",
                    booking_defaults.default_duration_minutes,
                ),
                min_duration_minutes: booking_defaults.min_duration_minutes,
                guest_id_max_attempts: env_parsed("GUEST_ID_MAX_ATTEMPTS", booking_defaults.guest_id_max_attempts),
            },
            verification: VerificationPolicy {
                registration_ttl_hours: env_parsed(
                    "REGISTRATION_TOKEN_TTL_HOURS",
                    verification_defaults.registration_ttl_hours,
                ),
                password_reset_ttl_hours: env_parsed(
                    "PASSWORD_RESET_TOKEN_TTL_HOURS",
                    verification_defaults.password_reset_ttl_hours,
                ),
                email_change_ttl_hours: env_parsed(
                    "EMAIL_CHANGE_TOKEN_TTL_HOURS",
                    verification_defaults.email_change_ttl_hours,
                ),
                ..verification_defaults
            },
            email: EmailConfig {
                api_url: env_or_empty("EMAIL_API_URL"),
                api_key: env_or_empty("EMAIL_API_KEY"),
                from_address: env_or_empty("EMAIL_FROM"),
                public_app_url: env::var("PUBLIC_APP_URL").unwrap_or_else(|_| {
                    warn!("PUBLIC_APP_URL not set, using default");
                    "http://localhost:3000".to_string()
                }),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.booking.open_hour >= config.booking.close_hour {
            warn!(
                "Business hours [{}, {}) are empty - every booking will be rejected",
                config.booking.open_hour, config.booking.close_hour
            );
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }
}
