use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::Value;

use shared_config::BookingPolicy;
use shared_models::{FieldError, Gender, ServiceType};
use shared_utils::validation::{is_valid_email, normalize_email, normalize_phone};

use crate::models::{BookingIdentity, BookingIntake, BookingPayload, ClinicalContext};
use crate::services::policy::validate_new_slot;

const MIN_AGE: i64 = 1;
const MAX_AGE: i64 = 120;

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Integer from a JSON number or a numeric string.
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<Utc>> {
    offset.from_local_datetime(&local).single().map(|ts| ts.with_timezone(&Utc))
}

/// Parses a reschedule target: RFC 3339, or a naive `YYYY-MM-DD[T ]HH:MM[:SS]`
/// read in clinic time.
pub fn parse_timestamp(raw: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .and_then(|local| local_to_utc(local, offset))
}

/// Duration in minutes, falling back to the default when absent.
pub fn parse_duration(value: Option<&Value>, field: &str, policy: &BookingPolicy) -> Result<i32, FieldError> {
    let value = match value {
        None | Some(Value::Null) => return Ok(policy.default_duration_minutes),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(policy.default_duration_minutes),
        Some(v) => v,
    };
    match integer(value).and_then(|d| i32::try_from(d).ok()) {
        Some(minutes) if minutes >= policy.min_duration_minutes => Ok(minutes),
        Some(_) => Err(FieldError::new(
            field,
            "too_short",
            format!("Duration must be at least {} minutes", policy.min_duration_minutes),
        )),
        None => Err(FieldError::new(field, "invalid", "Duration must be a whole number of minutes")),
    }
}

pub fn parse_service_type(raw: Option<&str>, field: &str) -> Result<ServiceType, FieldError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Err(FieldError::required(field)),
        Some(raw) => ServiceType::from_input(raw).ok_or_else(|| {
            let allowed: Vec<&str> = ServiceType::ALL.iter().map(|s| s.label()).collect();
            FieldError::new(field, "invalid_choice", format!("Choose one of: {}", allowed.join(", ")))
        }),
    }
}

/// Validates a raw booking form, reporting every problem found.
pub fn validate_booking(
    payload: &BookingPayload,
    now: DateTime<Utc>,
    policy: &BookingPolicy,
) -> Result<BookingIntake, Vec<FieldError>> {
    let mut errors = Vec::new();
    let wants_guest = payload.is_guest;

    let first_name = non_blank(&payload.first_name);
    let last_name = non_blank(&payload.last_name);
    if wants_guest {
        if first_name.is_none() {
            errors.push(FieldError::required("first_name"));
        }
        if last_name.is_none() {
            errors.push(FieldError::required("last_name"));
        }
    }

    let email = match non_blank(&payload.email) {
        None => {
            errors.push(FieldError::required("email"));
            None
        }
        Some(email) if !is_valid_email(&email) => {
            errors.push(FieldError::new("email", "invalid", "Enter a valid email address"));
            None
        }
        Some(email) => Some(normalize_email(&email)),
    };

    let phone = match non_blank(&payload.phone) {
        None => {
            if wants_guest {
                errors.push(FieldError::required("phone"));
            }
            None
        }
        Some(raw) => match normalize_phone(&raw) {
            Some(phone) => Some(phone),
            None => {
                errors.push(FieldError::new("phone", "invalid", "Phone number must have 7 to 15 digits"));
                None
            }
        },
    };

    let age = match payload.age.as_ref().filter(|v| !v.is_null()) {
        None => None,
        Some(value) => match integer(value) {
            Some(age) if (MIN_AGE..=MAX_AGE).contains(&age) => u8::try_from(age).ok(),
            Some(_) => {
                errors.push(FieldError::new(
                    "age",
                    "out_of_range",
                    format!("Age must be between {} and {}", MIN_AGE, MAX_AGE),
                ));
                None
            }
            None => {
                errors.push(FieldError::new("age", "invalid", "Age must be a whole number"));
                None
            }
        },
    };

    let gender = match non_blank(&payload.gender) {
        None => None,
        Some(raw) => match raw.parse::<Gender>() {
            Ok(gender) => Some(gender),
            Err(_) => {
                errors.push(FieldError::new("gender", "invalid_choice", "Gender must be male, female or other"));
                None
            }
        },
    };

    let service_type = parse_service_type(payload.service_type.as_deref(), "service_type")
        .map_err(|e| errors.push(e))
        .ok();

    let offset = policy.clinic_offset();
    let date = match non_blank(&payload.date) {
        None => {
            errors.push(FieldError::required("date"));
            None
        }
        Some(raw) => parse_date(&raw).or_else(|| {
            errors.push(FieldError::new("date", "invalid", "Date must be formatted YYYY-MM-DD"));
            None
        }),
    };
    let time = match non_blank(&payload.time) {
        None => {
            errors.push(FieldError::required("time"));
            None
        }
        Some(raw) => parse_time(&raw).or_else(|| {
            errors.push(FieldError::new("time", "invalid", "Time must be formatted HH:MM"));
            None
        }),
    };

    let scheduled_at = match (date, time) {
        (Some(date), Some(time)) => match local_to_utc(date.and_time(time), offset) {
            Some(ts) => {
                errors.extend(
                    validate_new_slot(ts, now, policy)
                        .iter()
                        .map(|v| v.to_field_error("date", "time")),
                );
                Some(ts)
            }
            None => {
                errors.push(FieldError::new("date", "invalid", "Date and time do not form a valid instant"));
                None
            }
        },
        _ => None,
    };

    let duration_minutes = parse_duration(payload.duration.as_ref(), "duration", policy)
        .map_err(|e| errors.push(e))
        .ok();

    let clinical = ClinicalContext {
        condition: non_blank(&payload.condition),
        symptoms: non_blank(&payload.symptoms),
        previous_treatment: non_blank(&payload.previous_treatment),
        current_medications: non_blank(&payload.current_medications),
        urgency: non_blank(&payload.urgency),
    };

    match (email, service_type, scheduled_at, duration_minutes) {
        (Some(email), Some(service_type), Some(scheduled_at), Some(duration_minutes)) if errors.is_empty() => {
            Ok(BookingIntake {
                wants_guest,
                identity: BookingIdentity {
                    first_name: first_name.unwrap_or_default(),
                    last_name: last_name.unwrap_or_default(),
                    email,
                    phone,
                    age,
                    gender,
                },
                clinical,
                service_type,
                scheduled_at,
                duration_minutes,
                note: non_blank(&payload.note).unwrap_or_default(),
            })
        }
        _ => Err(errors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 3, 4, 9, 0, 0).unwrap()
    }

    fn guest_payload() -> BookingPayload {
        BookingPayload {
            is_guest: true,
            first_name: Some("A".into()),
            last_name: Some("B".into()),
            email: Some("A@B.com".into()),
            phone: Some("555-123-4567".into()),
            age: Some(json!(30)),
            gender: Some("male".into()),
            service_type: Some("Consultation".into()),
            date: Some("2030-03-05".into()),
            time: Some("10:00".into()),
            ..BookingPayload::default()
        }
    }

    fn codes(errors: &[FieldError]) -> Vec<(&str, &str)> {
        errors.iter().map(|e| (e.field.as_str(), e.code.as_str())).collect()
    }

    #[test]
    fn valid_guest_form_is_normalized() {
        let intake = validate_booking(&guest_payload(), now(), &BookingPolicy::default()).unwrap();
        assert_eq!(intake.identity.email, "a@b.com");
        assert_eq!(intake.identity.phone.as_deref(), Some("5551234567"));
        assert_eq!(intake.identity.age, Some(30));
        assert_eq!(intake.service_type, ServiceType::Consultation);
        assert_eq!(intake.scheduled_at, Utc.with_ymd_and_hms(2030, 3, 5, 10, 0, 0).unwrap());
        assert_eq!(intake.duration_minutes, 60);
    }

    #[test]
    fn every_problem_is_reported() {
        let payload = BookingPayload {
            is_guest: true,
            email: Some("not-an-email".into()),
            phone: Some("12".into()),
            age: Some(json!("200")),
            gender: Some("robot".into()),
            service_type: Some("Massage".into()),
            date: Some("05/03/2030".into()),
            time: Some("10:00".into()),
            duration: Some(json!(5)),
            ..BookingPayload::default()
        };

        let errors = validate_booking(&payload, now(), &BookingPolicy::default()).unwrap_err();
        let found = codes(&errors);
        for expected in [
            ("first_name", "required"),
            ("last_name", "required"),
            ("email", "invalid"),
            ("phone", "invalid"),
            ("age", "out_of_range"),
            ("gender", "invalid_choice"),
            ("service_type", "invalid_choice"),
            ("date", "invalid"),
            ("duration", "too_short"),
        ] {
            assert!(found.contains(&expected), "missing {:?} in {:?}", expected, found);
        }
    }

    #[test]
    fn slot_rules_become_field_errors() {
        let mut payload = guest_payload();
        payload.date = Some("2030-03-01".into());
        payload.time = Some("21:30".into());

        let errors = validate_booking(&payload, now(), &BookingPolicy::default()).unwrap_err();
        assert_eq!(
            codes(&errors),
            vec![("date", "past_date"), ("time", "outside_business_hours")]
        );
    }

    #[test]
    fn account_booking_only_needs_an_email() {
        let payload = BookingPayload {
            email: Some("pat@example.com".into()),
            service_type: Some("follow-up".into()),
            date: Some("2030-03-05".into()),
            time: Some("14:30:00".into()),
            duration: Some(json!("45")),
            ..BookingPayload::default()
        };
        let intake = validate_booking(&payload, now(), &BookingPolicy::default()).unwrap();
        assert!(!intake.wants_guest);
        assert_eq!(intake.service_type, ServiceType::FollowUp);
        assert_eq!(intake.duration_minutes, 45);
    }

    #[test]
    fn local_times_shift_to_utc() {
        let policy = BookingPolicy {
            utc_offset_minutes: 180,
            ..BookingPolicy::default()
        };
        let intake = validate_booking(&guest_payload(), now(), &policy).unwrap();
        assert_eq!(intake.scheduled_at, Utc.with_ymd_and_hms(2030, 3, 5, 7, 0, 0).unwrap());
    }

    #[test]
    fn timestamps_accept_rfc3339_and_clinic_local_forms() {
        let utc = FixedOffset::east_opt(0).unwrap();
        let expected = now() + Duration::days(1);
        assert_eq!(parse_timestamp("2030-03-05T09:00:00Z", utc), Some(expected));
        assert_eq!(parse_timestamp("2030-03-05 09:00", utc), Some(expected));
        assert_eq!(parse_timestamp("2030-03-05T12:00:00+03:00", utc), Some(expected));
        assert_eq!(parse_timestamp("tomorrow", utc), None);
    }
}
