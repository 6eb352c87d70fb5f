use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::domain::{
    Invoice, InvoiceCategory, InvoiceId, InvoiceStatus, Registration, RegistrationId,
    RegistrationStatus, RegistrationSubmission, RegistrationType, RoomFeeDetail,
    SubmissionReceipt,
};
use super::eligibility::check_room;
use super::store::{
    NewInvoice, NewRegistration, Notification, NotificationSender, NotificationTarget,
    RegistryStore, StoreTx,
};
use super::window::resolve_window;
use super::EngineError;

/// Validates and transactionally creates registrations together with their
/// derived room-fee invoices, and applies manager status decisions.
pub struct RegistrationService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
}

impl<S, N> RegistrationService<S, N>
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        Self { store, notifier }
    }

    /// Submit a registration. Window gate, constraint checks, the
    /// registration insert, and the optional invoice insert all run in one
    /// transaction: both rows commit or neither does.
    pub fn submit(
        &self,
        submission: RegistrationSubmission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, EngineError> {
        let receipt = self.store.transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<SubmissionReceipt, EngineError> {
                let semester = tx.active_semester()?.ok_or_else(|| {
                    EngineError::Validation("no active semester is configured".to_string())
                })?;
                let student = tx
                    .student(submission.student_id)?
                    .ok_or(EngineError::NotFound("student"))?;

                resolve_window(&semester, submission.registration_type, now)
                    .require_open(submission.registration_type)?;

                if submission.registration_type == RegistrationType::Priority
                    && submission.priority_category.is_none()
                {
                    return Err(EngineError::Validation(
                        "priority_category is required for PRIORITY registrations".to_string(),
                    ));
                }

                let open = tx
                    .registrations_for_student(student.id, semester.id)?
                    .into_iter()
                    .any(|registration| !registration.status.is_terminal());
                if open {
                    return Err(EngineError::Conflict(
                        "student already has an open registration for this semester".to_string(),
                    ));
                }
                if tx.active_stay_for_student(student.id, semester.id)?.is_some() {
                    return Err(EngineError::Conflict(
                        "student already has an active stay for this semester".to_string(),
                    ));
                }

                if let Some(building_id) = submission.desired_building_id {
                    tx.building(building_id)?
                        .ok_or(EngineError::NotFound("building"))?;
                }

                let priced_room = match (submission.registration_type, submission.desired_room_id)
                {
                    (RegistrationType::Normal, Some(room_id)) => {
                        Some(check_room(tx, room_id, semester.id, &student)?)
                    }
                    (_, Some(room_id)) => {
                        // Preferred room for the batch matcher; existence is
                        // all that is checked now, eligibility at match time.
                        tx.room(room_id)?.ok_or(EngineError::NotFound("room"))?;
                        None
                    }
                    (_, None) => None,
                };

                let registration_id = tx.insert_registration(NewRegistration {
                    student_id: student.id,
                    semester_id: semester.id,
                    kind: submission.registration_type,
                    desired_room_id: submission.desired_room_id,
                    desired_building_id: submission.desired_building_id,
                    priority_category: submission.priority_category.clone(),
                    evidence_key: submission.evidence_key.clone(),
                    status: RegistrationStatus::Pending,
                    created_at: now,
                })?;

                let invoice_id = match priced_room {
                    Some(check) => {
                        let invoice = tx.insert_invoice(NewInvoice {
                            category: InvoiceCategory::RoomFee,
                            total_amount: check.room.price_per_semester,
                            status: InvoiceStatus::Published,
                        })?;
                        tx.insert_room_fee_detail(RoomFeeDetail {
                            invoice_id: invoice.id,
                            room_id: check.room.id,
                            semester_id: semester.id,
                            price: check.room.price_per_semester,
                        })?;

                        let mut registration = tx
                            .registration(registration_id)?
                            .ok_or(EngineError::NotFound("registration"))?;
                        registration.invoice_id = Some(invoice.id);
                        tx.update_registration(registration)?;
                        Some(invoice.id)
                    }
                    None => None,
                };

                Ok(SubmissionReceipt {
                    id: registration_id,
                    invoice_id,
                })
            },
        )?;

        info!(
            registration = receipt.id.0,
            invoice = receipt.invoice_id.map(|id| id.0),
            student = submission.student_id.0,
            "registration submitted"
        );
        Ok(receipt)
    }

    /// Manager decision on a registration. Terminal registrations stay
    /// immutable; the student is notified of the outcome.
    pub fn set_status(
        &self,
        id: RegistrationId,
        status: RegistrationStatus,
        admin_note: Option<String>,
    ) -> Result<Registration, EngineError> {
        let updated = self.store.transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<Registration, EngineError> {
                let mut registration = tx
                    .registration(id)?
                    .ok_or(EngineError::NotFound("registration"))?;
                if registration.status.is_terminal() {
                    return Err(EngineError::Conflict(format!(
                        "registration is already {}",
                        registration.status.label()
                    )));
                }
                registration.status = status;
                registration.admin_note = admin_note.clone();
                tx.update_registration(registration.clone())?;
                Ok(registration)
            },
        )?;

        let body = match &updated.admin_note {
            Some(note) => format!(
                "Your registration is now {}: {note}",
                updated.status.label()
            ),
            None => format!("Your registration is now {}", updated.status.label()),
        };
        if let Err(err) = self.notifier.send(Notification {
            target: NotificationTarget::student(updated.student_id),
            title: "Registration update".to_string(),
            body,
        }) {
            warn!(%err, registration = updated.id.0, "status notification failed");
        }

        Ok(updated)
    }

    /// Read a registration for API responses.
    pub fn get(&self, id: RegistrationId) -> Result<Registration, EngineError> {
        self.store
            .transaction(&mut |tx: &mut dyn StoreTx| -> Result<Registration, EngineError> {
                tx.registration(id)?
                    .ok_or(EngineError::NotFound("registration"))
            })
    }

    /// Peek at the invoice backing a receipt, used by routes and the demo.
    pub fn invoice(&self, id: InvoiceId) -> Result<Invoice, EngineError> {
        self.store
            .transaction(&mut |tx: &mut dyn StoreTx| -> Result<Invoice, EngineError> {
                tx.invoice(id)?.ok_or(EngineError::NotFound("invoice"))
            })
    }
}
