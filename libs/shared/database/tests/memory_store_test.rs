use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use uuid::Uuid;

use shared_database::{AccountStore, AppointmentStore, InMemoryStore, StoreError, VerificationStore};
use shared_models::{
    Account, AccountOrigin, Appointment, AppointmentOwner, AppointmentStatus, GuestDetails, Role,
    ServiceType, TreatmentPlan, VerificationToken, VerificationType,
};

fn account(email: &str) -> Account {
    Account::new(email, Role::Patient, AccountOrigin::SelfRegistered, Utc::now())
}

fn appointment(owner: AppointmentOwner, at: chrono::DateTime<Utc>) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        owner,
        scheduled_at: at,
        service_type: ServiceType::Consultation,
        note: String::new(),
        status: AppointmentStatus::Scheduled,
        duration_minutes: 60,
        therapist_id: None,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn guest(guest_id: &str) -> AppointmentOwner {
    AppointmentOwner::Guest(GuestDetails {
        guest_id: guest_id.to_string(),
        first_name: "A".into(),
        last_name: "B".into(),
        email: "a@b.com".into(),
        phone: "5551234567".into(),
        age: Some(30),
        gender: None,
    })
}

fn token(account_id: Uuid, kind: VerificationType, value: &str) -> VerificationToken {
    let now = Utc::now();
    VerificationToken {
        id: Uuid::new_v4(),
        account_id,
        kind,
        token: value.to_string(),
        code: "123456".into(),
        target_email: Some("a@b.com".into()),
        created_at: now,
        expires_at: Some(now + Duration::hours(2)),
        consumed: false,
        consumed_at: None,
    }
}

#[tokio::test]
async fn duplicate_email_is_rejected_case_insensitively() {
    let store = InMemoryStore::new();
    store.insert_account(&account("jane@example.com")).await.unwrap();

    let err = store.insert_account(&account("JANE@example.com")).await.unwrap_err();
    assert_matches!(err, StoreError::Conflict(_));
}

#[tokio::test]
async fn duplicate_guest_id_is_a_conflict() {
    let store = InMemoryStore::new();
    let at = Utc.with_ymd_and_hms(2030, 1, 2, 10, 0, 0).unwrap();
    store.insert_appointment(&appointment(guest("GUEST-20300102-001"), at)).await.unwrap();

    let err = store
        .insert_appointment(&appointment(guest("GUEST-20300102-001"), at))
        .await
        .unwrap_err();
    assert_matches!(err, StoreError::Conflict(_));
}

#[tokio::test]
async fn active_slot_collision_ignores_cancelled_appointments() {
    let store = InMemoryStore::new();
    let owner = AppointmentOwner::Account { account_id: Uuid::new_v4() };
    let at = Utc.with_ymd_and_hms(2030, 1, 2, 10, 0, 0).unwrap();

    let mut first = appointment(owner.clone(), at);
    store.insert_appointment(&first).await.unwrap();
    assert_matches!(
        store.insert_appointment(&appointment(owner.clone(), at)).await,
        Err(StoreError::Conflict(_))
    );

    first.status = AppointmentStatus::Cancelled;
    store.update_appointment(&first).await.unwrap();
    store.insert_appointment(&appointment(owner, at)).await.unwrap();
}

#[tokio::test]
async fn update_with_stale_version_is_refused() {
    let store = InMemoryStore::new();
    let at = Utc.with_ymd_and_hms(2030, 1, 2, 10, 0, 0).unwrap();
    let original = appointment(AppointmentOwner::Account { account_id: Uuid::new_v4() }, at);
    store.insert_appointment(&original).await.unwrap();

    let updated = store.update_appointment(&original).await.unwrap();
    assert_eq!(updated.version, 1);

    let err = store.update_appointment(&original).await.unwrap_err();
    assert_matches!(err, StoreError::StaleVersion(id) if id == original.id);
}

#[tokio::test]
async fn replacing_a_token_consumes_the_previous_one_of_the_same_type() {
    let store = InMemoryStore::new();
    let account_id = Uuid::new_v4();
    let now = Utc::now();

    store
        .replace_active_token(&token(account_id, VerificationType::PasswordReset, "first"), now)
        .await
        .unwrap();
    store
        .replace_active_token(&token(account_id, VerificationType::Registration, "other-kind"), now)
        .await
        .unwrap();
    let invalidated = store
        .replace_active_token(&token(account_id, VerificationType::PasswordReset, "second"), now)
        .await
        .unwrap();
    assert_eq!(invalidated, 1);

    let first = store.find_token_by_value("first").await.unwrap().unwrap();
    assert!(first.consumed);
    assert_eq!(first.consumed_at, Some(now));
    let other = store.find_token_by_value("other-kind").await.unwrap().unwrap();
    assert!(!other.consumed);
}

#[tokio::test]
async fn mark_consumed_only_succeeds_once() {
    let store = InMemoryStore::new();
    let issued = token(Uuid::new_v4(), VerificationType::Registration, "once");
    store.replace_active_token(&issued, Utc::now()).await.unwrap();

    assert!(store.mark_consumed(issued.id, Utc::now()).await.unwrap());
    assert!(!store.mark_consumed(issued.id, Utc::now()).await.unwrap());
    assert_matches!(
        store.find_unconsumed_by_code("123456", VerificationType::Registration, None).await,
        Ok(None)
    );
}

#[tokio::test]
async fn code_lookup_can_be_scoped_by_email() {
    let store = InMemoryStore::new();
    let issued = token(Uuid::new_v4(), VerificationType::Registration, "scoped");
    store.replace_active_token(&issued, Utc::now()).await.unwrap();

    let found = store
        .find_unconsumed_by_code("123456", VerificationType::Registration, Some("A@B.com"))
        .await
        .unwrap();
    assert_eq!(found.map(|t| t.id), Some(issued.id));

    let missing = store
        .find_unconsumed_by_code("123456", VerificationType::Registration, Some("x@y.com"))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn deleting_an_account_cascades() {
    let store = InMemoryStore::new();
    let owner = account("owner@example.com");
    store.insert_account(&owner).await.unwrap();

    let at = Utc.with_ymd_and_hms(2030, 1, 2, 10, 0, 0).unwrap();
    let booked = appointment(AppointmentOwner::Account { account_id: owner.id }, at);
    store.insert_appointment(&booked).await.unwrap();
    let plan = TreatmentPlan {
        id: Uuid::new_v4(),
        appointment_id: booked.id,
        details: "Lower back".into(),
        total_sessions: 4,
        completed_sessions: 0,
        version: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.insert_treatment_plan(&plan).await.unwrap();
    store
        .replace_active_token(&token(owner.id, VerificationType::Registration, "gone"), Utc::now())
        .await
        .unwrap();

    store.delete_account(owner.id).await.unwrap();

    assert!(store.find_appointment(booked.id).await.unwrap().is_none());
    assert!(store.find_treatment_plan(plan.id).await.unwrap().is_none());
    assert!(store.find_token_by_value("gone").await.unwrap().is_none());
}
