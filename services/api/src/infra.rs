use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

use dorm_registry::engine::domain::{
    Building, BuildingId, Gender, GenderRestriction, Room, RoomId, RoomStatus, Semester,
    SemesterId, Student, StudentId, WindowBounds,
};
use dorm_registry::engine::memory::MemoryStore;
use dorm_registry::engine::store::{
    Notification, NotificationSender, NotifyError, RegistryStore, StoreError, StoreTx,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Delivery is an external collaborator; the service logs what it would
/// hand off so operators can trace notification fan-out.
#[derive(Default)]
pub(crate) struct LoggingNotificationSender;

impl NotificationSender for LoggingNotificationSender {
    fn send(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            target: "notification",
            title = %notification.title,
            body = %notification.body,
            scope = ?notification.target,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Seed an active semester with every window open around now, three
/// buildings, a handful of rooms, and a few students so the endpoints can be
/// exercised against a fresh process.
pub(crate) fn seed_demo_data(store: &MemoryStore) -> Result<(), StoreError> {
    let now = Utc::now();
    let open = WindowBounds {
        opens_at: now - Duration::days(7),
        closes_at: now + Duration::days(30),
    };

    store.transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), StoreError> {
        tx.insert_semester(Semester {
            id: SemesterId(1),
            name: "demo semester".to_string(),
            start_date: (now + Duration::days(30)).date_naive(),
            end_date: (now + Duration::days(150)).date_naive(),
            active: true,
            normal_window: Some(open),
            priority_window: Some(open),
            renewal_window: Some(open),
        })?;

        tx.insert_building(Building {
            id: BuildingId(1),
            name: "A".to_string(),
            gender_restriction: GenderRestriction::Male,
        })?;
        tx.insert_building(Building {
            id: BuildingId(2),
            name: "B".to_string(),
            gender_restriction: GenderRestriction::Female,
        })?;
        tx.insert_building(Building {
            id: BuildingId(3),
            name: "C".to_string(),
            gender_restriction: GenderRestriction::Mixed,
        })?;

        for (id, building, name, capacity, price) in [
            (1i64, 1i64, "A-101", 2u32, 1200u32),
            (2, 1, "A-102", 4, 900),
            (3, 2, "B-201", 2, 1200),
            (4, 3, "C-301", 3, 1500),
        ] {
            tx.insert_room(Room {
                id: RoomId(id),
                building_id: BuildingId(building),
                name: name.to_string(),
                max_capacity: capacity,
                price_per_semester: price,
                status: RoomStatus::Available,
            })?;
        }

        for (id, name, gender) in [
            (1i64, "Minh Nguyen", Gender::Male),
            (2, "Tuan Pham", Gender::Male),
            (3, "Linh Tran", Gender::Female),
            (4, "Mai Le", Gender::Female),
        ] {
            tx.insert_student(Student {
                id: StudentId(id),
                full_name: name.to_string(),
                gender,
            })?;
        }

        Ok(())
    })
}
