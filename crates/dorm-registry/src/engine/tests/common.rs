use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::engine::domain::{
    Building, BuildingId, Gender, GenderRestriction, RegistrationSubmission, RegistrationType,
    Room, RoomId, RoomStatus, Semester, SemesterId, StayStatus, Student, StudentId, WindowBounds,
};
use crate::engine::memory::MemoryStore;
use crate::engine::payment::InMemoryReferenceStore;
use crate::engine::router::Engine;
use crate::engine::store::{
    NewStay, Notification, NotificationSender, NotifyError, RegistryStore, StoreError, StoreTx,
};
use crate::engine::EngineConfig;

pub(super) struct MemoryNotifier {
    events: Mutex<Vec<Notification>>,
}

impl Default for MemoryNotifier {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryNotifier {
    pub(super) fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationSender for MemoryNotifier {
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        self.events
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct TestContext {
    pub(super) store: Arc<MemoryStore>,
    pub(super) notifier: Arc<MemoryNotifier>,
    pub(super) references: Arc<InMemoryReferenceStore>,
    pub(super) engine: Arc<Engine<MemoryStore, MemoryNotifier, InMemoryReferenceStore>>,
}

/// Store seeded with one active semester, three buildings (MALE, FEMALE,
/// MIXED), a handful of rooms, and five students.
pub(super) fn context() -> TestContext {
    let store = Arc::new(MemoryStore::default());
    seed(&store);
    let notifier = Arc::new(MemoryNotifier::default());
    let references = Arc::new(InMemoryReferenceStore::default());
    let engine = Arc::new(Engine::new(
        store.clone(),
        notifier.clone(),
        references.clone(),
        EngineConfig::default(),
    ));
    TestContext {
        store,
        notifier,
        references,
        engine,
    }
}

pub(super) const SEMESTER: SemesterId = SemesterId(1);
pub(super) const BUILDING_MALE: BuildingId = BuildingId(1);
pub(super) const BUILDING_FEMALE: BuildingId = BuildingId(2);
pub(super) const BUILDING_MIXED: BuildingId = BuildingId(3);
pub(super) const ROOM_A101: RoomId = RoomId(101); // MALE building, capacity 2
pub(super) const ROOM_A102: RoomId = RoomId(102); // MALE building, capacity 3
pub(super) const ROOM_B201: RoomId = RoomId(201); // FEMALE building, capacity 2
pub(super) const ROOM_C301: RoomId = RoomId(301); // MIXED building, capacity 2
pub(super) const ROOM_C303: RoomId = RoomId(303); // MIXED building, capacity 1
pub(super) const MINH: StudentId = StudentId(1); // male
pub(super) const TUAN: StudentId = StudentId(2); // male
pub(super) const LINH: StudentId = StudentId(3); // female
pub(super) const MAI: StudentId = StudentId(4); // female
pub(super) const HUY: StudentId = StudentId(5); // male

fn seed(store: &MemoryStore) {
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
                priority_window: Some(WindowBounds {
                    opens_at: Utc.with_ymd_and_hms(2026, 7, 15, 0, 0, 0).unwrap(),
                    closes_at: Utc.with_ymd_and_hms(2026, 8, 31, 0, 0, 0).unwrap(),
                }),
                renewal_window: None,
            })?;

            tx.insert_building(Building {
                id: BUILDING_MALE,
                name: "A".to_string(),
                gender_restriction: GenderRestriction::Male,
            })?;
            tx.insert_building(Building {
                id: BUILDING_FEMALE,
                name: "B".to_string(),
                gender_restriction: GenderRestriction::Female,
            })?;
            tx.insert_building(Building {
                id: BUILDING_MIXED,
                name: "C".to_string(),
                gender_restriction: GenderRestriction::Mixed,
            })?;

            for (id, building, name, capacity, price) in [
                (ROOM_A101, BUILDING_MALE, "A-101", 2u32, 1200u32),
                (ROOM_A102, BUILDING_MALE, "A-102", 3, 1000),
                (ROOM_B201, BUILDING_FEMALE, "B-201", 2, 1200),
                (ROOM_C301, BUILDING_MIXED, "C-301", 2, 1500),
                (ROOM_C303, BUILDING_MIXED, "C-303", 1, 2000),
            ] {
                tx.insert_room(Room {
                    id,
                    building_id: building,
                    name: name.to_string(),
                    max_capacity: capacity,
                    price_per_semester: price,
                    status: RoomStatus::Available,
                })?;
            }

            for (id, name, gender) in [
                (MINH, "Minh Nguyen", Gender::Male),
                (TUAN, "Tuan Pham", Gender::Male),
                (LINH, "Linh Tran", Gender::Female),
                (MAI, "Mai Le", Gender::Female),
                (HUY, "Huy Vo", Gender::Male),
            ] {
                tx.insert_student(Student {
                    id,
                    full_name: name.to_string(),
                    gender,
                })?;
            }

            Ok(())
        })
        .expect("seed commits");
}

/// A moment inside both the normal and priority windows.
pub(super) fn open_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 10, 12, 0, 0).unwrap()
}

pub(super) fn normal_with_room(student: StudentId, room: RoomId) -> RegistrationSubmission {
    RegistrationSubmission {
        student_id: student,
        registration_type: RegistrationType::Normal,
        desired_room_id: Some(room),
        desired_building_id: None,
        priority_category: None,
        evidence_key: None,
    }
}

pub(super) fn normal_without_room(student: StudentId) -> RegistrationSubmission {
    RegistrationSubmission {
        student_id: student,
        registration_type: RegistrationType::Normal,
        desired_room_id: None,
        desired_building_id: None,
        priority_category: None,
        evidence_key: None,
    }
}

pub(super) fn priority(student: StudentId) -> RegistrationSubmission {
    RegistrationSubmission {
        student_id: student,
        registration_type: RegistrationType::Priority,
        desired_room_id: None,
        desired_building_id: None,
        priority_category: Some("scholarship".to_string()),
        evidence_key: Some("uploads/evidence/1.pdf".to_string()),
    }
}

pub(super) fn priority_with_room(student: StudentId, room: RoomId) -> RegistrationSubmission {
    RegistrationSubmission {
        desired_room_id: Some(room),
        ..priority(student)
    }
}

pub(super) fn priority_in_building(
    student: StudentId,
    building: BuildingId,
) -> RegistrationSubmission {
    RegistrationSubmission {
        desired_building_id: Some(building),
        ..priority(student)
    }
}

/// Register an extra student beyond the seeded five.
pub(super) fn add_student(store: &MemoryStore, id: StudentId, name: &str, gender: Gender) {
    store
        .transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), StoreError> {
            tx.insert_student(Student {
                id,
                full_name: name.to_string(),
                gender,
            })?;
            Ok(())
        })
        .expect("student seed commits");
}

/// Move a student straight into a room, bypassing registration, to model
/// pre-existing occupancy.
pub(super) fn occupy(store: &MemoryStore, student: StudentId, room: RoomId) {
    store
        .transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), StoreError> {
            let semester = tx.semester(SEMESTER)?.ok_or(StoreError::NotFound("semester"))?;
            tx.insert_stay(NewStay {
                student_id: student,
                room_id: room,
                semester_id: SEMESTER,
                start_date: semester.start_date,
                end_date: semester.end_date,
                status: StayStatus::Active,
            })?;
            Ok(())
        })
        .expect("occupancy seed commits");
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json payload")
}
