use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier wrapper for academic terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemesterId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildingId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StayRecordId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(pub i64);

/// Applicant gender as recorded on the student file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "MALE"),
            Gender::Female => write!(f, "FEMALE"),
        }
    }
}

/// Building-level gender policy. MIXED buildings still keep individual rooms
/// single-gender once the first occupant moves in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenderRestriction {
    Male,
    Female,
    Mixed,
}

impl fmt::Display for GenderRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenderRestriction::Male => write!(f, "MALE"),
            GenderRestriction::Female => write!(f, "FEMALE"),
            GenderRestriction::Mixed => write!(f, "MIXED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationType {
    Normal,
    Priority,
    Renewal,
}

impl fmt::Display for RegistrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationType::Normal => write!(f, "NORMAL"),
            RegistrationType::Priority => write!(f, "PRIORITY"),
            RegistrationType::Renewal => write!(f, "RENEWAL"),
        }
    }
}

/// Lifecycle of a registration. APPROVED and REJECTED are terminal; RETURN
/// hands the request back to the student for more information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    Pending,
    Approved,
    Rejected,
    Return,
}

impl RegistrationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RegistrationStatus::Approved | RegistrationStatus::Rejected)
    }

    pub fn label(self) -> &'static str {
        match self {
            RegistrationStatus::Pending => "PENDING",
            RegistrationStatus::Approved => "APPROVED",
            RegistrationStatus::Rejected => "REJECTED",
            RegistrationStatus::Return => "RETURN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceCategory {
    RoomFee,
    Utility,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Published,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StayStatus {
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Available,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    Draft,
    Published,
}

/// One configured (open, close) pair for a registration type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub opens_at: DateTime<Utc>,
    pub closes_at: DateTime<Utc>,
}

/// Academic term. Exactly one semester is active at a time; dates and window
/// configuration are managed outside this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Semester {
    pub id: SemesterId,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
    pub normal_window: Option<WindowBounds>,
    pub priority_window: Option<WindowBounds>,
    pub renewal_window: Option<WindowBounds>,
}

impl Semester {
    pub fn window(&self, kind: RegistrationType) -> Option<&WindowBounds> {
        match kind {
            RegistrationType::Normal => self.normal_window.as_ref(),
            RegistrationType::Priority => self.priority_window.as_ref(),
            RegistrationType::Renewal => self.renewal_window.as_ref(),
        }
    }
}

/// Minimal student file the engine needs: identity plus the gender used by
/// room compatibility checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub full_name: String,
    pub gender: Gender,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: BuildingId,
    pub name: String,
    pub gender_restriction: GenderRestriction,
}

/// Occupancy is derived by counting ACTIVE stay records, never stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub building_id: BuildingId,
    pub name: String,
    pub max_capacity: u32,
    pub price_per_semester: u32,
    pub status: RoomStatus,
}

/// One student's request for a stay in a semester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub student_id: StudentId,
    pub semester_id: SemesterId,
    pub kind: RegistrationType,
    pub desired_room_id: Option<RoomId>,
    pub desired_building_id: Option<BuildingId>,
    pub priority_category: Option<String>,
    pub evidence_key: Option<String>,
    pub status: RegistrationStatus,
    pub invoice_id: Option<InvoiceId>,
    pub admin_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub code: String,
    pub category: InvoiceCategory,
    pub total_amount: u32,
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<StudentId>,
}

/// Satellite row for ROOM_FEE invoices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomFeeDetail {
    pub invoice_id: InvoiceId,
    pub room_id: RoomId,
    pub semester_id: SemesterId,
    pub price: u32,
}

/// Monthly metering period for utility billing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityCycle {
    pub id: CycleId,
    pub month: u32,
    pub year: i32,
    pub status: CycleStatus,
}

/// Satellite row for UTILITY invoices. `None` readings mean the baseline has
/// to be entered manually before the cycle can publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityDetail {
    pub invoice_id: InvoiceId,
    pub cycle_id: CycleId,
    pub room_id: RoomId,
    pub electricity_old: Option<u32>,
    pub electricity_new: Option<u32>,
    pub water_old: Option<u32>,
    pub water_new: Option<u32>,
}

/// The authoritative occupancy fact. At most one ACTIVE record exists per
/// (student, semester).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayRecord {
    pub id: StayRecordId,
    pub student_id: StudentId,
    pub room_id: RoomId,
    pub semester_id: SemesterId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: StayStatus,
}

/// Inbound payload for `POST /registrations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationSubmission {
    pub student_id: StudentId,
    pub registration_type: RegistrationType,
    #[serde(default)]
    pub desired_room_id: Option<RoomId>,
    #[serde(default)]
    pub desired_building_id: Option<BuildingId>,
    #[serde(default)]
    pub priority_category: Option<String>,
    #[serde(default)]
    pub evidence_key: Option<String>,
}

/// What the issuer hands back: the registration row and, for room-selecting
/// normal registrations, the linked room-fee invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub id: RegistrationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
}

/// Why the batch matcher could not place a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentFailure {
    RoomUnavailable,
    GenderMismatch,
    NoCapacity,
    NoEligibleRoom,
    NoLongerPending,
}

impl fmt::Display for AssignmentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentFailure::RoomUnavailable => write!(f, "room unavailable"),
            AssignmentFailure::GenderMismatch => write!(f, "gender mismatch"),
            AssignmentFailure::NoCapacity => write!(f, "no capacity"),
            AssignmentFailure::NoEligibleRoom => write!(f, "no eligible room"),
            AssignmentFailure::NoLongerPending => write!(f, "registration no longer pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned { room_id: RoomId, room_name: String },
    Failed { reason: AssignmentFailure },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentDetail {
    pub registration_id: RegistrationId,
    pub student_id: StudentId,
    #[serde(flatten)]
    pub outcome: AssignmentOutcome,
}

/// Per-run report of `autoAssign`: counts plus the per-student detail list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentReport {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub details: Vec<AssignmentDetail>,
}
