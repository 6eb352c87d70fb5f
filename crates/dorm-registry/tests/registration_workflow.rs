//! End-to-end specifications for the registration, allocation, payment, and
//! expiry lifecycle, driven through the engine's public facade the way the
//! HTTP layer drives it.

mod common {
    use std::sync::{Arc, Mutex};

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};

    use dorm_registry::engine::domain::{
        Building, BuildingId, Gender, GenderRestriction, Room, RoomId, RoomStatus, Semester,
        SemesterId, Student, StudentId, WindowBounds,
    };
    use dorm_registry::engine::memory::MemoryStore;
    use dorm_registry::engine::payment::InMemoryReferenceStore;
    use dorm_registry::engine::store::{
        Notification, NotificationSender, NotifyError, RegistryStore, StoreError, StoreTx,
    };
    use dorm_registry::engine::{Engine, EngineConfig};

    pub(super) const SEMESTER: SemesterId = SemesterId(1);
    pub(super) const ROOM_R: RoomId = RoomId(1);
    pub(super) const OCCUPANT: StudentId = StudentId(1);
    pub(super) const MALE_APPLICANT: StudentId = StudentId(2);
    pub(super) const FEMALE_APPLICANT: StudentId = StudentId(3);

    #[derive(Default)]
    pub(super) struct RecordingNotifier {
        events: Mutex<Vec<Notification>>,
    }

    impl RecordingNotifier {
        pub(super) fn events(&self) -> Vec<Notification> {
            self.events.lock().expect("notifier mutex poisoned").clone()
        }
    }

    impl NotificationSender for RecordingNotifier {
        fn send(&self, notification: Notification) -> Result<(), NotifyError> {
            self.events
                .lock()
                .expect("notifier mutex poisoned")
                .push(notification);
            Ok(())
        }
    }

    pub(super) struct Stack {
        pub(super) store: Arc<MemoryStore>,
        pub(super) notifier: Arc<RecordingNotifier>,
        pub(super) engine: Arc<Engine<MemoryStore, RecordingNotifier, InMemoryReferenceStore>>,
    }

    /// One MALE-restricted building with room R (capacity 2) holding one
    /// male occupant, plus one male and one female applicant.
    pub(super) fn stack() -> Stack {
        let store = Arc::new(MemoryStore::default());
        store
            .transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), StoreError> {
                tx.insert_semester(Semester {
                    id: SEMESTER,
                    name: "2026A".to_string(),
                    start_date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("valid date"),
                    end_date: NaiveDate::from_ymd_opt(2027, 1, 15).expect("valid date"),
                    active: true,
                    normal_window: Some(WindowBounds {
                        opens_at: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
                        closes_at: Utc.with_ymd_and_hms(2026, 8, 31, 0, 0, 0).unwrap(),
                    }),
                    priority_window: None,
                    renewal_window: None,
                })?;
                tx.insert_building(Building {
                    id: BuildingId(1),
                    name: "A".to_string(),
                    gender_restriction: GenderRestriction::Male,
                })?;
                tx.insert_room(Room {
                    id: ROOM_R,
                    building_id: BuildingId(1),
                    name: "A-101".to_string(),
                    max_capacity: 2,
                    price_per_semester: 1350,
                    status: RoomStatus::Available,
                })?;
                for (id, name, gender) in [
                    (OCCUPANT, "Quang Ho", Gender::Male),
                    (MALE_APPLICANT, "Minh Nguyen", Gender::Male),
                    (FEMALE_APPLICANT, "Linh Tran", Gender::Female),
                ] {
                    tx.insert_student(Student {
                        id,
                        full_name: name.to_string(),
                        gender,
                    })?;
                }
                tx.insert_stay(dorm_registry::engine::store::NewStay {
                    student_id: OCCUPANT,
                    room_id: ROOM_R,
                    semester_id: SEMESTER,
                    start_date: NaiveDate::from_ymd_opt(2026, 9, 1).expect("valid date"),
                    end_date: NaiveDate::from_ymd_opt(2027, 1, 15).expect("valid date"),
                    status: dorm_registry::engine::domain::StayStatus::Active,
                })?;
                Ok(())
            })
            .expect("seed commits");

        let notifier = Arc::new(RecordingNotifier::default());
        let references = Arc::new(InMemoryReferenceStore::default());
        let engine = Arc::new(Engine::new(
            store.clone(),
            notifier.clone(),
            references,
            EngineConfig::default(),
        ));
        Stack {
            store,
            notifier,
            engine,
        }
    }

    pub(super) fn in_window() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, 9, 0, 0).unwrap()
    }
}

use chrono::Duration;
use common::*;
use dorm_registry::engine::domain::{
    InvoiceCategory, InvoiceId, InvoiceStatus, RegistrationStatus, RegistrationSubmission,
    RegistrationType, StayStatus,
};
use dorm_registry::engine::store::{RegistryStore, StoreError, StoreTx};
use dorm_registry::engine::{EngineError, JOB_EXPIRED_HOLDS};

fn submission(student: dorm_registry::engine::domain::StudentId) -> RegistrationSubmission {
    RegistrationSubmission {
        student_id: student,
        registration_type: RegistrationType::Normal,
        desired_room_id: Some(ROOM_R),
        desired_building_id: None,
        priority_category: None,
        evidence_key: None,
    }
}

#[test]
fn female_applicant_is_rejected_from_the_male_room_with_no_rows_written() {
    let stack = stack();

    let error = stack
        .engine
        .service
        .submit(submission(FEMALE_APPLICANT), in_window())
        .expect_err("gender mismatch");

    assert!(matches!(error, EngineError::Constraint(_)));
    assert!(error
        .to_string()
        .contains("room does not match the applicant's gender"));

    let leftovers = stack
        .store
        .transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<(usize, bool), StoreError> {
                let registrations = tx.registrations_for_student(FEMALE_APPLICANT, SEMESTER)?;
                let invoice = tx.invoice(InvoiceId(1))?;
                Ok((registrations.len(), invoice.is_some()))
            },
        )
        .expect("reads commit");
    assert_eq!(leftovers, (0, false));
}

#[test]
fn male_applicant_gets_a_pending_registration_with_a_priced_invoice() {
    let stack = stack();

    let receipt = stack
        .engine
        .service
        .submit(submission(MALE_APPLICANT), in_window())
        .expect("male applicant admitted");

    let invoice_id = receipt.invoice_id.expect("room-fee invoice issued");
    let invoice = stack
        .engine
        .service
        .invoice(invoice_id)
        .expect("invoice readable");
    assert_eq!(invoice.category, InvoiceCategory::RoomFee);
    assert_eq!(invoice.total_amount, 1350, "amount equals the room price");
    assert_eq!(invoice.status, InvoiceStatus::Published);

    let registration = stack
        .engine
        .service
        .get(receipt.id)
        .expect("registration readable");
    assert_eq!(registration.status, RegistrationStatus::Pending);
}

#[test]
fn paying_within_the_hold_confirms_the_stay() {
    let stack = stack();
    let receipt = stack
        .engine
        .service
        .submit(submission(MALE_APPLICANT), in_window())
        .expect("submission succeeds");
    let invoice_id = receipt.invoice_id.expect("invoice linked");

    let issued = stack
        .engine
        .broker
        .issue(invoice_id, MALE_APPLICANT, in_window() + Duration::hours(1))
        .expect("reference issued");
    stack
        .engine
        .broker
        .redeem(
            &issued.payment_ref,
            invoice_id,
            MALE_APPLICANT,
            in_window() + Duration::hours(1) + Duration::minutes(3),
        )
        .expect("redeem succeeds");

    let stay = stack
        .store
        .transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<Option<dorm_registry::engine::domain::StayRecord>, StoreError> {
                tx.active_stay_for_student(MALE_APPLICANT, SEMESTER)
            },
        )
        .expect("read commits")
        .expect("stay created");
    assert_eq!(stay.room_id, ROOM_R);
    assert_eq!(stay.status, StayStatus::Active);

    // Capacity invariant: the room now holds exactly its two occupants.
    let occupancy = stack
        .store
        .transaction(&mut |tx: &mut dyn StoreTx| -> Result<usize, StoreError> {
            Ok(tx.active_stays_for_room(ROOM_R, SEMESTER)?.len())
        })
        .expect("read commits");
    assert_eq!(occupancy, 2);

    // And the room is full for the next applicant.
    let error = stack
        .engine
        .service
        .submit(submission(FEMALE_APPLICANT), in_window() + Duration::hours(2))
        .expect_err("room is full now");
    assert!(matches!(error, EngineError::Constraint(_)));
}

#[test]
fn unpaid_hold_expires_and_the_student_is_notified() {
    let stack = stack();
    let receipt = stack
        .engine
        .service
        .submit(submission(MALE_APPLICANT), in_window())
        .expect("submission succeeds");

    stack
        .engine
        .scheduler
        .run_job(JOB_EXPIRED_HOLDS, in_window() + Duration::hours(25))
        .expect("reaper runs");

    let registration = stack
        .engine
        .service
        .get(receipt.id)
        .expect("registration readable");
    assert_eq!(registration.status, RegistrationStatus::Rejected);

    let events = stack.notifier.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].title.contains("expired"));

    // The slot is free again for the next male applicant.
    let retry = stack
        .engine
        .service
        .submit(
            RegistrationSubmission {
                student_id: MALE_APPLICANT,
                ..submission(MALE_APPLICANT)
            },
            in_window() + Duration::hours(26),
        )
        .expect("student can re-apply after rejection");
    assert!(retry.invoice_id.is_some());
}
