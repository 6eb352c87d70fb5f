use super::domain::{Building, Gender, GenderRestriction, Room, RoomId, RoomStatus, SemesterId, Student};
use super::store::StoreTx;
use super::EngineError;

/// Why a room cannot accept the applicant. Each variant carries enough to
/// state the concrete reason back to the student.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("room is not open for registration")]
    RoomUnavailable,
    #[error("room is already at its capacity of {capacity}")]
    RoomFull { capacity: u32 },
    #[error("room does not match the applicant's gender: building accepts {required} only")]
    BuildingGenderRestricted { required: GenderRestriction },
    #[error("room does not match the applicant's gender: current occupants are {occupants}")]
    OccupantGenderMismatch { occupants: Gender },
}

/// The validated room, returned so the caller can price the invoice without
/// re-reading inside the same transaction.
#[derive(Debug, Clone)]
pub struct RoomCheck {
    pub room: Room,
    pub building: Building,
    pub occupancy: u32,
}

/// Does the building policy and the room's current (single-gender) occupancy
/// admit an applicant of this gender? Shared by the submit path and the
/// batch matcher's snapshot walk.
pub fn gender_admits(
    restriction: GenderRestriction,
    occupants: Option<Gender>,
    applicant: Gender,
) -> bool {
    let building_ok = match restriction {
        GenderRestriction::Mixed => true,
        GenderRestriction::Male => applicant == Gender::Male,
        GenderRestriction::Female => applicant == Gender::Female,
    };
    let occupancy_ok = occupants.map_or(true, |gender| gender == applicant);
    building_ok && occupancy_ok
}

/// Validate a chosen room for the applicant. All reads run against the
/// caller's open transaction so the capacity observed here is the capacity
/// the eventual write commits against.
pub fn check_room(
    tx: &dyn StoreTx,
    room_id: RoomId,
    semester_id: SemesterId,
    applicant: &Student,
) -> Result<RoomCheck, EngineError> {
    let room = tx.room(room_id)?.ok_or(EngineError::NotFound("room"))?;
    if room.status != RoomStatus::Available {
        return Err(ConstraintViolation::RoomUnavailable.into());
    }

    let stays = tx.active_stays_for_room(room_id, semester_id)?;
    let occupancy = stays.len() as u32;
    if occupancy >= room.max_capacity {
        return Err(ConstraintViolation::RoomFull {
            capacity: room.max_capacity,
        }
        .into());
    }

    let building = tx
        .building(room.building_id)?
        .ok_or(EngineError::NotFound("building"))?;
    match building.gender_restriction {
        GenderRestriction::Mixed => {}
        GenderRestriction::Male if applicant.gender == Gender::Male => {}
        GenderRestriction::Female if applicant.gender == Gender::Female => {}
        restriction => {
            return Err(ConstraintViolation::BuildingGenderRestricted {
                required: restriction,
            }
            .into())
        }
    }

    // Rooms stay single-gender once occupied, MIXED buildings included.
    for stay in &stays {
        let occupant = tx
            .student(stay.student_id)?
            .ok_or(EngineError::NotFound("student"))?;
        if occupant.gender != applicant.gender {
            return Err(ConstraintViolation::OccupantGenderMismatch {
                occupants: occupant.gender,
            }
            .into());
        }
    }

    Ok(RoomCheck {
        room,
        building,
        occupancy,
    })
}
