use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    AssignmentDetail, AssignmentFailure, AssignmentOutcome, AssignmentReport, Gender,
    GenderRestriction, Registration, RegistrationStatus, RoomId, RoomStatus, Semester, SemesterId,
    StayStatus, StudentId,
};
use super::eligibility::gender_admits;
use super::store::{
    NewStay, Notification, NotificationSender, NotificationTarget, RegistryStore, StoreTx,
};
use super::EngineError;

/// Availability snapshot for one room, decremented in memory as the batch
/// walks so later registrations see earlier assignments without re-querying.
#[derive(Debug, Clone)]
struct RoomSlot {
    room_id: RoomId,
    building_id: super::domain::BuildingId,
    name: String,
    capacity: u32,
    occupancy: u32,
    occupant_gender: Option<Gender>,
    restriction: GenderRestriction,
    available: bool,
}

impl RoomSlot {
    fn has_capacity(&self) -> bool {
        self.occupancy < self.capacity
    }

    fn admits(&self, applicant: Gender) -> bool {
        gender_admits(self.restriction, self.occupant_gender, applicant)
    }

    fn admit(&mut self, applicant: Gender) {
        self.occupancy += 1;
        self.occupant_gender = Some(applicant);
    }
}

/// Greedy FIFO batch matcher. Manager-triggered; a run is single-flight and
/// a second concurrent invocation fails fast instead of interleaving with
/// the in-memory snapshot.
pub struct RoomAllocator<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    running: Mutex<()>,
}

impl<S, N> RoomAllocator<S, N>
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self {
            store,
            notifier,
            running: Mutex::new(()),
        }
    }

    pub fn auto_assign(
        &self,
        semester_id: SemesterId,
        _now: DateTime<Utc>,
    ) -> Result<AssignmentReport, EngineError> {
        let _guard = self.running.try_lock().map_err(|_| {
            EngineError::Conflict("room allocation is already running".to_string())
        })?;

        let (semester, pending, genders, mut slots) = self.snapshot(semester_id)?;

        let mut details = Vec::with_capacity(pending.len());
        let mut success = 0u32;
        let mut failed = 0u32;

        for registration in &pending {
            let Some(&gender) = genders.get(&registration.student_id) else {
                warn!(
                    registration = registration.id.0,
                    "skipping registration with missing student file"
                );
                failed += 1;
                details.push(AssignmentDetail {
                    registration_id: registration.id,
                    student_id: registration.student_id,
                    outcome: AssignmentOutcome::Failed {
                        reason: AssignmentFailure::NoEligibleRoom,
                    },
                });
                continue;
            };

            match choose_slot(&slots, registration, gender) {
                Ok(index) => {
                    let chosen = slots[index].clone();
                    match self.commit_assignment(registration, &chosen, &semester) {
                        Ok(()) => {
                            slots[index].admit(gender);
                            success += 1;
                            details.push(AssignmentDetail {
                                registration_id: registration.id,
                                student_id: registration.student_id,
                                outcome: AssignmentOutcome::Assigned {
                                    room_id: chosen.room_id,
                                    room_name: chosen.name.clone(),
                                },
                            });
                            self.notify_assigned(registration.student_id, &chosen.name);
                        }
                        Err(EngineError::Conflict(_)) => {
                            // Decided elsewhere (manager or payment) between
                            // snapshot and commit; record and move on.
                            failed += 1;
                            details.push(AssignmentDetail {
                                registration_id: registration.id,
                                student_id: registration.student_id,
                                outcome: AssignmentOutcome::Failed {
                                    reason: AssignmentFailure::NoLongerPending,
                                },
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
                Err(reason) => {
                    failed += 1;
                    details.push(AssignmentDetail {
                        registration_id: registration.id,
                        student_id: registration.student_id,
                        outcome: AssignmentOutcome::Failed { reason },
                    });
                }
            }
        }

        let report = AssignmentReport {
            total: pending.len() as u32,
            success,
            failed,
            details,
        };
        info!(
            semester = semester_id.0,
            total = report.total,
            success = report.success,
            failed = report.failed,
            "room allocation batch finished"
        );
        Ok(report)
    }

    /// One transaction reads everything the walk needs: the pending queue in
    /// FIFO order, applicant genders, and per-room occupancy with occupant
    /// gender.
    #[allow(clippy::type_complexity)]
    fn snapshot(
        &self,
        semester_id: SemesterId,
    ) -> Result<
        (
            Semester,
            Vec<Registration>,
            HashMap<StudentId, Gender>,
            Vec<RoomSlot>,
        ),
        EngineError,
    > {
        self.store.transaction(&mut |tx: &mut dyn StoreTx| {
            let semester = tx
                .semester(semester_id)?
                .ok_or(EngineError::NotFound("semester"))?;
            let pending = tx.pending_unassigned(semester_id)?;

            let mut genders = HashMap::new();
            for registration in &pending {
                if let Some(student) = tx.student(registration.student_id)? {
                    genders.insert(student.id, student.gender);
                }
            }

            let mut slots = Vec::new();
            for room in tx.rooms()? {
                let building = tx
                    .building(room.building_id)?
                    .ok_or(EngineError::NotFound("building"))?;
                let stays = tx.active_stays_for_room(room.id, semester_id)?;
                let occupant_gender = match stays.first() {
                    Some(stay) => tx.student(stay.student_id)?.map(|student| student.gender),
                    None => None,
                };
                slots.push(RoomSlot {
                    room_id: room.id,
                    building_id: room.building_id,
                    name: room.name.clone(),
                    capacity: room.max_capacity,
                    occupancy: stays.len() as u32,
                    occupant_gender,
                    restriction: building.gender_restriction,
                    available: room.status == RoomStatus::Available,
                });
            }

            Ok((semester, pending, genders, slots))
        })
    }

    /// Per-registration transaction: re-check the row is still PENDING, then
    /// approve it and insert the stay.
    fn commit_assignment(
        &self,
        registration: &Registration,
        slot: &RoomSlot,
        semester: &Semester,
    ) -> Result<(), EngineError> {
        self.store
            .transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), EngineError> {
                let mut fresh = tx
                    .registration(registration.id)?
                    .ok_or(EngineError::NotFound("registration"))?;
                if fresh.status != RegistrationStatus::Pending {
                    return Err(EngineError::Conflict(
                        "registration is no longer pending".to_string(),
                    ));
                }
                fresh.status = RegistrationStatus::Approved;
                fresh.admin_note = Some(format!("auto-assigned to room {}", slot.name));
                tx.update_registration(fresh)?;

                tx.insert_stay(NewStay {
                    student_id: registration.student_id,
                    room_id: slot.room_id,
                    semester_id: semester.id,
                    start_date: semester.start_date,
                    end_date: semester.end_date,
                    status: StayStatus::Active,
                })?;
                Ok(())
            })
    }

    fn notify_assigned(&self, student_id: StudentId, room_name: &str) {
        let outcome = self.notifier.send(Notification {
            target: NotificationTarget::student(student_id),
            title: "Room assigned".to_string(),
            body: format!("You have been assigned to room {room_name}."),
        });
        if let Err(err) = outcome {
            warn!(%err, student = student_id.0, "assignment notification failed");
        }
    }
}

/// Pick a slot for one registration: the named room first, then the
/// preferred building, then the whole stock, filling partially-occupied
/// rooms before opening empty ones.
fn choose_slot(
    slots: &[RoomSlot],
    registration: &Registration,
    gender: Gender,
) -> Result<usize, AssignmentFailure> {
    let mut named_failure = None;
    if let Some(room_id) = registration.desired_room_id {
        match slots.iter().position(|slot| slot.room_id == room_id) {
            Some(index) => {
                let slot = &slots[index];
                if !slot.available {
                    named_failure = Some(AssignmentFailure::RoomUnavailable);
                } else if !slot.has_capacity() {
                    named_failure = Some(AssignmentFailure::NoCapacity);
                } else if !slot.admits(gender) {
                    named_failure = Some(AssignmentFailure::GenderMismatch);
                } else {
                    return Ok(index);
                }
            }
            None => named_failure = Some(AssignmentFailure::RoomUnavailable),
        }
    }

    let mut candidates: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter(|(_, slot)| {
            slot.available
                && slot.has_capacity()
                && slot.admits(gender)
                && registration
                    .desired_building_id
                    .map_or(true, |building| slot.building_id == building)
        })
        .map(|(index, _)| index)
        .collect();
    // Highest occupancy first so partially-filled rooms close out before an
    // empty room opens; room id breaks ties deterministically.
    candidates.sort_by_key(|&index| (std::cmp::Reverse(slots[index].occupancy), slots[index].room_id));

    candidates
        .first()
        .copied()
        .ok_or(named_failure.unwrap_or(AssignmentFailure::NoEligibleRoom))
}
