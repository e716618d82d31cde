use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use shared_database::{AccountStore, AppointmentStore, StoreError};
use shared_models::{Account, AccountOrigin, GuestDetails, ProfileUpdate, Role};
use shared_utils::clock::Clock;

use crate::models::{AppointmentError, BookingIdentity};

/// Outcome of matching a booking identity.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedIdentity {
    /// Anonymous booking; the guest id is assigned at insert time.
    Guest(BookingIdentity),
    Account { account: Account, created: bool },
}

pub fn guest_id_prefix(day: NaiveDate) -> String {
    format!("GUEST-{}-", day.format("%Y%m%d"))
}

/// Next free id for `day`: one past the highest sequence already issued.
pub fn next_guest_id(day: NaiveDate, existing: &[String]) -> String {
    let prefix = guest_id_prefix(day);
    let highest = existing
        .iter()
        .filter_map(|id| id.strip_prefix(&prefix))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:03}", prefix, highest + 1)
}

pub fn guest_details(identity: &BookingIdentity, guest_id: String) -> GuestDetails {
    GuestDetails {
        guest_id,
        first_name: identity.first_name.clone(),
        last_name: identity.last_name.clone(),
        email: identity.email.clone(),
        phone: identity.phone.clone().unwrap_or_default(),
        age: identity.age,
        gender: identity.gender,
    }
}

/// Matches a booking to a guest record or to an account, creating the
/// account when none exists for the email.
pub struct GuestIdentityResolver {
    accounts: Arc<dyn AccountStore>,
    appointments: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
}

impl GuestIdentityResolver {
    pub fn new(accounts: Arc<dyn AccountStore>, appointments: Arc<dyn AppointmentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts,
            appointments,
            clock,
        }
    }

    pub async fn resolve(
        &self,
        identity: &BookingIdentity,
        profile: &ProfileUpdate,
        wants_guest: bool,
    ) -> Result<ResolvedIdentity, AppointmentError> {
        if wants_guest {
            for (field, value) in [
                ("first_name", Some(&identity.first_name)),
                ("last_name", Some(&identity.last_name)),
                ("email", Some(&identity.email)),
                ("phone", identity.phone.as_ref()),
            ] {
                if value.map(|v| v.trim().is_empty()).unwrap_or(true) {
                    return Err(AppointmentError::MissingGuestField(field));
                }
            }
            return Ok(ResolvedIdentity::Guest(identity.clone()));
        }

        if let Some(mut account) = self.accounts.find_account_by_email(&identity.email).await? {
            if account.merge_profile(profile) {
                account.updated_at = self.clock.now();
                self.accounts.update_account(&account).await?;
                debug!(account_id = %account.id, "Merged booking details into profile");
            }
            return Ok(ResolvedIdentity::Account { account, created: false });
        }

        let mut account = Account::new(&identity.email, Role::Patient, AccountOrigin::Booking, self.clock.now());
        account.merge_profile(profile);
        // Booking-created accounts skip the token step; the origin marks them.
        account.is_active = true;
        account.email_verified = true;

        match self.accounts.insert_account(&account).await {
            Ok(()) => {
                info!(
                    account_id = %account.id,
                    origin = ?AccountOrigin::Booking,
                    "Created pre-activated account from booking"
                );
                Ok(ResolvedIdentity::Account { account, created: true })
            }
            Err(StoreError::Conflict(_)) => {
                // Lost a race with a concurrent booking for the same email.
                let account = self
                    .accounts
                    .find_account_by_email(&identity.email)
                    .await?
                    .ok_or(AppointmentError::Store(StoreError::NotFound))?;
                Ok(ResolvedIdentity::Account { account, created: false })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn assign_guest_id(&self, day: NaiveDate) -> Result<String, AppointmentError> {
        let existing = self.appointments.guest_ids_with_prefix(&guest_id_prefix(day)).await?;
        let id = next_guest_id(day, &existing);
        if existing.len() >= 999 {
            warn!(%day, issued = existing.len(), "Guest id sequence past three digits");
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 3, 5).unwrap()
    }

    #[test]
    fn first_id_of_the_day() {
        assert_eq!(next_guest_id(day(), &[]), "GUEST-20300305-001");
    }

    #[test]
    fn sequence_continues_past_the_highest() {
        let existing = vec![
            "GUEST-20300305-001".to_string(),
            "GUEST-20300305-004".to_string(),
            "GUEST-20300304-009".to_string(),
        ];
        assert_eq!(next_guest_id(day(), &existing), "GUEST-20300305-005");
    }
}
