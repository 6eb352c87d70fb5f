use std::collections::BTreeMap;
use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::domain::{
    Building, BuildingId, CycleId, CycleStatus, Invoice, InvoiceId, InvoiceStatus, Registration,
    RegistrationId, RegistrationStatus, RegistrationType, Room, RoomFeeDetail, RoomId, Semester,
    SemesterId, StayRecord, StayRecordId, StayStatus, Student, StudentId, UtilityCycle,
    UtilityDetail,
};
use super::store::{
    NewInvoice, NewRegistration, NewStay, RegistryStore, StoreError, StoreTx,
};

/// Every relational table the engine persists, as typed maps. Cloned wholesale
/// at transaction start so rollback is a dropped snapshot.
#[derive(Debug, Default, Clone)]
struct Tables {
    semesters: BTreeMap<i64, Semester>,
    students: BTreeMap<i64, Student>,
    buildings: BTreeMap<i64, Building>,
    rooms: BTreeMap<i64, Room>,
    registrations: BTreeMap<i64, Registration>,
    invoices: BTreeMap<i64, Invoice>,
    room_fee_details: BTreeMap<i64, RoomFeeDetail>,
    utility_details: BTreeMap<i64, UtilityDetail>,
    stays: BTreeMap<i64, StayRecord>,
    cycles: BTreeMap<i64, UtilityCycle>,
    next_registration: i64,
    next_invoice: i64,
    next_stay: i64,
    next_cycle: i64,
}

/// In-memory transactional backend. One global table lock stands in for the
/// database's row locks: transactions serialize, acquisition is bounded, and
/// writes land on a snapshot that replaces the live tables only on commit.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            lock_timeout,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl RegistryStore for MemoryStore {
    fn transaction<T, E>(
        &self,
        op: &mut dyn FnMut(&mut dyn StoreTx) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let started = Instant::now();
        let mut guard = loop {
            match self.tables.try_lock() {
                Ok(guard) => break guard,
                Err(TryLockError::WouldBlock) => {
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::Busy {
                            waited_ms: self.lock_timeout.as_millis() as u64,
                        }
                        .into());
                    }
                    std::thread::sleep(Duration::from_micros(500));
                }
                Err(TryLockError::Poisoned(_)) => {
                    return Err(
                        StoreError::Unavailable("table lock poisoned".to_string()).into()
                    );
                }
            }
        };

        let mut work = guard.clone();
        let mut tx = MemoryTx { tables: &mut work };
        let result = op(&mut tx)?;
        *guard = work;
        Ok(result)
    }
}

struct MemoryTx<'a> {
    tables: &'a mut Tables,
}

impl MemoryTx<'_> {
    fn cycle_ordinal(&self, cycle_id: CycleId) -> Option<(i32, u32)> {
        self.tables
            .cycles
            .get(&cycle_id.0)
            .map(|cycle| (cycle.year, cycle.month))
    }
}

impl StoreTx for MemoryTx<'_> {
    fn active_semester(&self) -> Result<Option<Semester>, StoreError> {
        Ok(self
            .tables
            .semesters
            .values()
            .find(|semester| semester.active)
            .cloned())
    }

    fn semester(&self, id: SemesterId) -> Result<Option<Semester>, StoreError> {
        Ok(self.tables.semesters.get(&id.0).cloned())
    }

    fn student(&self, id: StudentId) -> Result<Option<Student>, StoreError> {
        Ok(self.tables.students.get(&id.0).cloned())
    }

    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError> {
        Ok(self.tables.buildings.get(&id.0).cloned())
    }

    fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        Ok(self.tables.rooms.get(&id.0).cloned())
    }

    fn rooms(&self) -> Result<Vec<Room>, StoreError> {
        Ok(self.tables.rooms.values().cloned().collect())
    }

    fn occupied_room_ids(&self) -> Result<Vec<RoomId>, StoreError> {
        let mut ids: Vec<RoomId> = self
            .tables
            .stays
            .values()
            .filter(|stay| stay.status == StayStatus::Active)
            .map(|stay| stay.room_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    fn registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError> {
        Ok(self.tables.registrations.get(&id.0).cloned())
    }

    fn registration_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Registration>, StoreError> {
        Ok(self
            .tables
            .registrations
            .values()
            .find(|registration| registration.invoice_id == Some(invoice_id))
            .cloned())
    }

    fn registrations_for_student(
        &self,
        student_id: StudentId,
        semester_id: SemesterId,
    ) -> Result<Vec<Registration>, StoreError> {
        Ok(self
            .tables
            .registrations
            .values()
            .filter(|registration| {
                registration.student_id == student_id && registration.semester_id == semester_id
            })
            .cloned()
            .collect())
    }

    fn pending_unassigned(
        &self,
        semester_id: SemesterId,
    ) -> Result<Vec<Registration>, StoreError> {
        let mut pending: Vec<Registration> = self
            .tables
            .registrations
            .values()
            .filter(|registration| {
                registration.semester_id == semester_id
                    && registration.status == RegistrationStatus::Pending
                    && registration.invoice_id.is_none()
            })
            .cloned()
            .collect();
        pending.sort_by_key(|registration| (registration.created_at, registration.id));
        Ok(pending)
    }

    fn pending_room_holds(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Registration>, StoreError> {
        let mut holds: Vec<Registration> = self
            .tables
            .registrations
            .values()
            .filter(|registration| {
                registration.kind == RegistrationType::Normal
                    && registration.status == RegistrationStatus::Pending
                    && registration.desired_room_id.is_some()
                    && registration.created_at < older_than
            })
            .cloned()
            .collect();
        holds.sort_by_key(|registration| (registration.created_at, registration.id));
        Ok(holds)
    }

    fn invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError> {
        Ok(self.tables.invoices.get(&id.0).cloned())
    }

    fn room_fee_detail(&self, invoice_id: InvoiceId) -> Result<Option<RoomFeeDetail>, StoreError> {
        Ok(self.tables.room_fee_details.get(&invoice_id.0).cloned())
    }

    fn active_stays_for_room(
        &self,
        room_id: RoomId,
        semester_id: SemesterId,
    ) -> Result<Vec<StayRecord>, StoreError> {
        Ok(self
            .tables
            .stays
            .values()
            .filter(|stay| {
                stay.room_id == room_id
                    && stay.semester_id == semester_id
                    && stay.status == StayStatus::Active
            })
            .cloned()
            .collect())
    }

    fn active_stay_for_student(
        &self,
        student_id: StudentId,
        semester_id: SemesterId,
    ) -> Result<Option<StayRecord>, StoreError> {
        Ok(self
            .tables
            .stays
            .values()
            .find(|stay| {
                stay.student_id == student_id
                    && stay.semester_id == semester_id
                    && stay.status == StayStatus::Active
            })
            .cloned())
    }

    fn cycle_for(&self, month: u32, year: i32) -> Result<Option<UtilityCycle>, StoreError> {
        Ok(self
            .tables
            .cycles
            .values()
            .find(|cycle| cycle.month == month && cycle.year == year)
            .cloned())
    }

    fn latest_metered_detail(&self, room_id: RoomId) -> Result<Option<UtilityDetail>, StoreError> {
        let mut latest: Option<((i32, u32), UtilityDetail)> = None;
        for detail in self.tables.utility_details.values() {
            if detail.room_id != room_id {
                continue;
            }
            let published = self
                .tables
                .invoices
                .get(&detail.invoice_id.0)
                .map(|invoice| invoice.status != InvoiceStatus::Draft)
                .unwrap_or(false);
            if !published {
                continue;
            }
            let Some(ordinal) = self.cycle_ordinal(detail.cycle_id) else {
                continue;
            };
            if latest
                .as_ref()
                .map(|(seen, _)| ordinal > *seen)
                .unwrap_or(true)
            {
                latest = Some((ordinal, detail.clone()));
            }
        }
        Ok(latest.map(|(_, detail)| detail))
    }

    fn utility_details_for_cycle(
        &self,
        cycle_id: CycleId,
    ) -> Result<Vec<UtilityDetail>, StoreError> {
        Ok(self
            .tables
            .utility_details
            .values()
            .filter(|detail| detail.cycle_id == cycle_id)
            .cloned()
            .collect())
    }

    fn insert_semester(&mut self, semester: Semester) -> Result<SemesterId, StoreError> {
        if self.tables.semesters.contains_key(&semester.id.0) {
            return Err(StoreError::Conflict(format!("semester {}", semester.id.0)));
        }
        if semester.active && self.tables.semesters.values().any(|existing| existing.active) {
            return Err(StoreError::Conflict(
                "another semester is already active".to_string(),
            ));
        }
        let id = semester.id;
        self.tables.semesters.insert(id.0, semester);
        Ok(id)
    }

    fn update_semester(&mut self, semester: Semester) -> Result<(), StoreError> {
        if !self.tables.semesters.contains_key(&semester.id.0) {
            return Err(StoreError::NotFound("semester"));
        }
        self.tables.semesters.insert(semester.id.0, semester);
        Ok(())
    }

    fn insert_student(&mut self, student: Student) -> Result<StudentId, StoreError> {
        if self.tables.students.contains_key(&student.id.0) {
            return Err(StoreError::Conflict(format!("student {}", student.id.0)));
        }
        let id = student.id;
        self.tables.students.insert(id.0, student);
        Ok(id)
    }

    fn insert_building(&mut self, building: Building) -> Result<BuildingId, StoreError> {
        if self.tables.buildings.contains_key(&building.id.0) {
            return Err(StoreError::Conflict(format!("building {}", building.id.0)));
        }
        let id = building.id;
        self.tables.buildings.insert(id.0, building);
        Ok(id)
    }

    fn insert_room(&mut self, room: Room) -> Result<RoomId, StoreError> {
        if self.tables.rooms.contains_key(&room.id.0) {
            return Err(StoreError::Conflict(format!("room {}", room.id.0)));
        }
        if !self.tables.buildings.contains_key(&room.building_id.0) {
            return Err(StoreError::NotFound("building"));
        }
        let id = room.id;
        self.tables.rooms.insert(id.0, room);
        Ok(id)
    }

    fn insert_registration(
        &mut self,
        registration: NewRegistration,
    ) -> Result<RegistrationId, StoreError> {
        self.tables.next_registration += 1;
        let id = RegistrationId(self.tables.next_registration);
        self.tables.registrations.insert(
            id.0,
            Registration {
                id,
                student_id: registration.student_id,
                semester_id: registration.semester_id,
                kind: registration.kind,
                desired_room_id: registration.desired_room_id,
                desired_building_id: registration.desired_building_id,
                priority_category: registration.priority_category,
                evidence_key: registration.evidence_key,
                status: registration.status,
                invoice_id: None,
                admin_note: None,
                created_at: registration.created_at,
            },
        );
        Ok(id)
    }

    fn update_registration(&mut self, registration: Registration) -> Result<(), StoreError> {
        if !self.tables.registrations.contains_key(&registration.id.0) {
            return Err(StoreError::NotFound("registration"));
        }
        self.tables
            .registrations
            .insert(registration.id.0, registration);
        Ok(())
    }

    fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError> {
        self.tables.next_invoice += 1;
        let id = InvoiceId(self.tables.next_invoice);
        let row = Invoice {
            id,
            code: format!("INV-{:06}", id.0),
            category: invoice.category,
            total_amount: invoice.total_amount,
            status: invoice.status,
            paid_at: None,
            paid_by: None,
        };
        self.tables.invoices.insert(id.0, row.clone());
        Ok(row)
    }

    fn update_invoice(&mut self, invoice: Invoice) -> Result<(), StoreError> {
        if !self.tables.invoices.contains_key(&invoice.id.0) {
            return Err(StoreError::NotFound("invoice"));
        }
        self.tables.invoices.insert(invoice.id.0, invoice);
        Ok(())
    }

    fn insert_room_fee_detail(&mut self, detail: RoomFeeDetail) -> Result<(), StoreError> {
        if self.tables.room_fee_details.contains_key(&detail.invoice_id.0) {
            return Err(StoreError::Conflict(format!(
                "room fee detail for invoice {}",
                detail.invoice_id.0
            )));
        }
        self.tables
            .room_fee_details
            .insert(detail.invoice_id.0, detail);
        Ok(())
    }

    fn insert_stay(&mut self, stay: NewStay) -> Result<StayRecordId, StoreError> {
        let duplicate = self.tables.stays.values().any(|existing| {
            existing.student_id == stay.student_id
                && existing.semester_id == stay.semester_id
                && existing.status == StayStatus::Active
        });
        if duplicate && stay.status == StayStatus::Active {
            return Err(StoreError::Conflict(format!(
                "active stay for student {} in semester {}",
                stay.student_id.0, stay.semester_id.0
            )));
        }
        self.tables.next_stay += 1;
        let id = StayRecordId(self.tables.next_stay);
        self.tables.stays.insert(
            id.0,
            StayRecord {
                id,
                student_id: stay.student_id,
                room_id: stay.room_id,
                semester_id: stay.semester_id,
                start_date: stay.start_date,
                end_date: stay.end_date,
                status: stay.status,
            },
        );
        Ok(id)
    }

    fn insert_cycle(&mut self, month: u32, year: i32) -> Result<CycleId, StoreError> {
        if self
            .tables
            .cycles
            .values()
            .any(|cycle| cycle.month == month && cycle.year == year)
        {
            return Err(StoreError::Conflict(format!("cycle {year}-{month:02}")));
        }
        self.tables.next_cycle += 1;
        let id = CycleId(self.tables.next_cycle);
        self.tables.cycles.insert(
            id.0,
            UtilityCycle {
                id,
                month,
                year,
                status: CycleStatus::Draft,
            },
        );
        Ok(id)
    }

    fn insert_utility_detail(&mut self, detail: UtilityDetail) -> Result<(), StoreError> {
        if self.tables.utility_details.contains_key(&detail.invoice_id.0) {
            return Err(StoreError::Conflict(format!(
                "utility detail for invoice {}",
                detail.invoice_id.0
            )));
        }
        self.tables
            .utility_details
            .insert(detail.invoice_id.0, detail);
        Ok(())
    }
}
