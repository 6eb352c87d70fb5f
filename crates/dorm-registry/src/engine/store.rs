use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Building, BuildingId, CycleId, Invoice, InvoiceCategory, InvoiceId, InvoiceStatus,
    Registration, RegistrationId, RegistrationStatus, RegistrationType, Room, RoomFeeDetail,
    RoomId, Semester, SemesterId, StayRecord, StayRecordId, StayStatus, Student, StudentId,
    UtilityCycle, UtilityDetail,
};

/// Error enumeration for storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("store busy, safe to retry: lock not acquired within {waited_ms} ms")]
    Busy { waited_ms: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Transient failures where the transaction never committed and the
    /// whole operation can be retried as-is.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy { .. } | StoreError::Unavailable(_))
    }
}

/// Registration row before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRegistration {
    pub student_id: StudentId,
    pub semester_id: SemesterId,
    pub kind: RegistrationType,
    pub desired_room_id: Option<RoomId>,
    pub desired_building_id: Option<BuildingId>,
    pub priority_category: Option<String>,
    pub evidence_key: Option<String>,
    pub status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
}

/// Invoice row before the store assigns an id and unique code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewInvoice {
    pub category: InvoiceCategory,
    pub total_amount: u32,
    pub status: InvoiceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewStay {
    pub student_id: StudentId,
    pub room_id: RoomId,
    pub semester_id: SemesterId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: StayStatus,
}

/// One open transaction over the relational tables. Reads observe the
/// transaction's own writes; nothing becomes visible to other callers until
/// the enclosing [`RegistryStore::transaction`] commits.
pub trait StoreTx {
    fn active_semester(&self) -> Result<Option<Semester>, StoreError>;
    fn semester(&self, id: SemesterId) -> Result<Option<Semester>, StoreError>;
    fn student(&self, id: StudentId) -> Result<Option<Student>, StoreError>;
    fn building(&self, id: BuildingId) -> Result<Option<Building>, StoreError>;
    fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;
    fn rooms(&self) -> Result<Vec<Room>, StoreError>;
    /// Rooms holding at least one ACTIVE stay record, in id order.
    fn occupied_room_ids(&self) -> Result<Vec<RoomId>, StoreError>;

    fn registration(&self, id: RegistrationId) -> Result<Option<Registration>, StoreError>;
    fn registration_for_invoice(
        &self,
        invoice_id: InvoiceId,
    ) -> Result<Option<Registration>, StoreError>;
    fn registrations_for_student(
        &self,
        student_id: StudentId,
        semester_id: SemesterId,
    ) -> Result<Vec<Registration>, StoreError>;
    /// PENDING registrations without an invoice hold, ordered by
    /// (`created_at`, id) ascending. This is the batch matcher's input.
    fn pending_unassigned(&self, semester_id: SemesterId)
        -> Result<Vec<Registration>, StoreError>;
    /// PENDING NORMAL registrations holding a chosen room whose `created_at`
    /// predates the cutoff. This is the reaper's input.
    fn pending_room_holds(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Registration>, StoreError>;

    fn invoice(&self, id: InvoiceId) -> Result<Option<Invoice>, StoreError>;
    fn room_fee_detail(&self, invoice_id: InvoiceId) -> Result<Option<RoomFeeDetail>, StoreError>;

    fn active_stays_for_room(
        &self,
        room_id: RoomId,
        semester_id: SemesterId,
    ) -> Result<Vec<StayRecord>, StoreError>;
    fn active_stay_for_student(
        &self,
        student_id: StudentId,
        semester_id: SemesterId,
    ) -> Result<Option<StayRecord>, StoreError>;

    fn cycle_for(&self, month: u32, year: i32) -> Result<Option<UtilityCycle>, StoreError>;
    /// The room's most recent utility detail whose invoice left DRAFT,
    /// ordered by cycle (year, month). Used to carry meter readings forward.
    fn latest_metered_detail(&self, room_id: RoomId) -> Result<Option<UtilityDetail>, StoreError>;
    fn utility_details_for_cycle(&self, cycle_id: CycleId)
        -> Result<Vec<UtilityDetail>, StoreError>;

    fn insert_semester(&mut self, semester: Semester) -> Result<SemesterId, StoreError>;
    fn update_semester(&mut self, semester: Semester) -> Result<(), StoreError>;
    fn insert_student(&mut self, student: Student) -> Result<StudentId, StoreError>;
    fn insert_building(&mut self, building: Building) -> Result<BuildingId, StoreError>;
    fn insert_room(&mut self, room: Room) -> Result<RoomId, StoreError>;

    fn insert_registration(
        &mut self,
        registration: NewRegistration,
    ) -> Result<RegistrationId, StoreError>;
    fn update_registration(&mut self, registration: Registration) -> Result<(), StoreError>;
    fn insert_invoice(&mut self, invoice: NewInvoice) -> Result<Invoice, StoreError>;
    fn update_invoice(&mut self, invoice: Invoice) -> Result<(), StoreError>;
    fn insert_room_fee_detail(&mut self, detail: RoomFeeDetail) -> Result<(), StoreError>;
    fn insert_stay(&mut self, stay: NewStay) -> Result<StayRecordId, StoreError>;
    fn insert_cycle(&mut self, month: u32, year: i32) -> Result<CycleId, StoreError>;
    fn insert_utility_detail(&mut self, detail: UtilityDetail) -> Result<(), StoreError>;
}

/// Storage abstraction so the engine can be exercised in isolation and later
/// moved onto a relational database without touching callers.
pub trait RegistryStore: Send + Sync {
    /// Run `op` inside one transaction. The transaction commits only when
    /// `op` returns `Ok`; any error rolls every write back.
    fn transaction<T, E>(
        &self,
        op: &mut dyn FnMut(&mut dyn StoreTx) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>;
}

/// Who a notification is addressed to. Validated once at the boundary; the
/// wire shape is `{"scope": "...", "ids": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTarget", into = "RawTarget")]
pub enum NotificationTarget {
    Individual(Vec<StudentId>),
    Room(Vec<RoomId>),
    Building(Vec<BuildingId>),
    All,
}

impl NotificationTarget {
    pub fn student(id: StudentId) -> Self {
        NotificationTarget::Individual(vec![id])
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTarget {
    scope: String,
    #[serde(default)]
    ids: Vec<i64>,
}

impl TryFrom<RawTarget> for NotificationTarget {
    type Error = String;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        match raw.scope.as_str() {
            "INDIVIDUAL" => Ok(NotificationTarget::Individual(
                raw.ids.into_iter().map(StudentId).collect(),
            )),
            "ROOM" => Ok(NotificationTarget::Room(
                raw.ids.into_iter().map(RoomId).collect(),
            )),
            "BUILDING" => Ok(NotificationTarget::Building(
                raw.ids.into_iter().map(BuildingId).collect(),
            )),
            "ALL" => Ok(NotificationTarget::All),
            other => Err(format!("unknown notification scope '{other}'")),
        }
    }
}

impl From<NotificationTarget> for RawTarget {
    fn from(target: NotificationTarget) -> Self {
        match target {
            NotificationTarget::Individual(ids) => RawTarget {
                scope: "INDIVIDUAL".to_string(),
                ids: ids.into_iter().map(|id| id.0).collect(),
            },
            NotificationTarget::Room(ids) => RawTarget {
                scope: "ROOM".to_string(),
                ids: ids.into_iter().map(|id| id.0).collect(),
            },
            NotificationTarget::Building(ids) => RawTarget {
                scope: "BUILDING".to_string(),
                ids: ids.into_iter().map(|id| id.0).collect(),
            },
            NotificationTarget::All => RawTarget {
                scope: "ALL".to_string(),
                ids: Vec::new(),
            },
        }
    }
}

/// Notification payload handed to the injected sender. Delivery (email, push,
/// in-app) lives outside this engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub target: NotificationTarget,
    pub title: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Outbound notification hook, constructor-injected into the issuer,
/// allocator, broker, and scheduler.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: Notification) -> Result<(), NotifyError>;
}
