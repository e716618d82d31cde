use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};

use shared_config::BookingPolicy;

use crate::models::SlotViolation;

pub fn is_future(ts: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    ts > now
}

pub fn within_horizon(ts: DateTime<Utc>, now: DateTime<Utc>, max_days: i64) -> bool {
    ts <= now + Duration::days(max_days)
}

/// Local hour of `ts` lies in `[open_hour, close_hour)`.
pub fn within_business_hours(ts: DateTime<Utc>, open_hour: u32, close_hour: u32, offset: FixedOffset) -> bool {
    let hour = ts.with_timezone(&offset).hour();
    (open_hour..close_hour).contains(&hour)
}

/// Clinic-local calendar day of `ts`.
pub fn clinic_day(ts: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    ts.with_timezone(&offset).date_naive()
}

/// Runs every admission rule and returns all the ones `ts` breaks.
pub fn validate_new_slot(ts: DateTime<Utc>, now: DateTime<Utc>, policy: &BookingPolicy) -> Vec<SlotViolation> {
    let mut violations = Vec::new();

    if !is_future(ts, now) {
        violations.push(SlotViolation::PastDate);
    }
    if !within_horizon(ts, now, policy.horizon_days) {
        violations.push(SlotViolation::HorizonExceeded {
            max_days: policy.horizon_days,
        });
    }
    if !within_business_hours(ts, policy.open_hour, policy.close_hour, policy.clinic_offset()) {
        violations.push(SlotViolation::OutsideBusinessHours {
            open_hour: policy.open_hour,
            close_hour: policy.close_hour,
        });
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn future_is_strict() {
        let now = at(2030, 3, 4, 9, 0);
        assert!(!is_future(now, now));
        assert!(is_future(now + Duration::seconds(1), now));
    }

    #[test]
    fn horizon_is_inclusive() {
        let now = at(2030, 3, 4, 9, 0);
        assert!(within_horizon(now + Duration::days(180), now, 180));
        assert!(!within_horizon(now + Duration::days(180) + Duration::minutes(1), now, 180));
    }

    #[test]
    fn business_hours_use_the_clinic_offset() {
        let utc = FixedOffset::east_opt(0).unwrap();
        assert!(within_business_hours(at(2030, 3, 5, 8, 0), 8, 20, utc));
        assert!(within_business_hours(at(2030, 3, 5, 19, 59), 8, 20, utc));
        assert!(!within_business_hours(at(2030, 3, 5, 20, 0), 8, 20, utc));
        assert!(!within_business_hours(at(2030, 3, 5, 7, 59), 8, 20, utc));

        // 06:00 UTC is 09:00 at +03:00
        let east = FixedOffset::east_opt(3 * 3600).unwrap();
        assert!(within_business_hours(at(2030, 3, 5, 6, 0), 8, 20, east));
    }

    #[test]
    fn clinic_day_follows_local_midnight() {
        let east = FixedOffset::east_opt(3 * 3600).unwrap();
        assert_eq!(
            clinic_day(at(2030, 3, 5, 22, 30), east),
            NaiveDate::from_ymd_opt(2030, 3, 6).unwrap()
        );
    }

    #[test]
    fn all_violations_are_collected() {
        let policy = BookingPolicy::default();
        let now = at(2030, 3, 4, 9, 0);

        let past_at_night = at(2030, 3, 1, 22, 0);
        assert_eq!(
            validate_new_slot(past_at_night, now, &policy),
            vec![
                SlotViolation::PastDate,
                SlotViolation::OutsideBusinessHours { open_hour: 8, close_hour: 20 }
            ]
        );

        let far_and_early = now + Duration::days(400) - Duration::hours(3);
        assert_eq!(validate_new_slot(far_and_early, now, &policy).len(), 2);

        assert!(validate_new_slot(at(2030, 3, 5, 10, 0), now, &policy).is_empty());
    }
}
