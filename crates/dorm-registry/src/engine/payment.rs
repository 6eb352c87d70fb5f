use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use super::domain::{
    Invoice, InvoiceId, InvoiceStatus, RegistrationId, RegistrationStatus, StayRecordId,
    StayStatus, StudentId,
};
use super::store::{
    NewStay, Notification, NotificationSender, NotificationTarget, RegistryStore, StoreTx,
};
use super::EngineError;

const TOKEN_LENGTH: usize = 24;
// One in this many issue calls also purges expired entries.
const SWEEP_RATIO: u32 = 8;

/// Ephemeral binding of an invoice/student pair to a redeemable token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReference {
    pub token: String,
    pub invoice_id: InvoiceId,
    pub student_id: StudentId,
    pub amount: u32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("payment reference not found")]
    NotFound,
    #[error("payment reference expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("payment reference does not match the given invoice and student")]
    Mismatch,
    #[error("reference store unavailable: {0}")]
    Unavailable(String),
}

/// TTL store for payment references. The in-memory implementation below is
/// single-process; a multi-process deployment swaps in a shared TTL-capable
/// store that keeps `take` atomic.
pub trait PaymentReferenceStore: Send + Sync {
    fn put(&self, reference: PaymentReference) -> Result<(), ReferenceError>;
    /// Atomic check-and-delete: validates binding and expiry, consuming the
    /// entry on success or expiry. A mismatch leaves the entry in place.
    fn take(
        &self,
        token: &str,
        invoice_id: InvoiceId,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<PaymentReference, ReferenceError>;
    /// Non-consuming lookup for the verify endpoint. Evicts expired entries.
    fn peek(&self, token: &str, now: DateTime<Utc>) -> Result<PaymentReference, ReferenceError>;
    /// Drop every expired entry, returning how many were purged.
    fn sweep(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct InMemoryReferenceStore {
    entries: Mutex<HashMap<String, PaymentReference>>,
}

impl InMemoryReferenceStore {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PaymentReference>>, ReferenceError> {
        self.entries
            .lock()
            .map_err(|_| ReferenceError::Unavailable("reference map poisoned".to_string()))
    }
}

impl PaymentReferenceStore for InMemoryReferenceStore {
    fn put(&self, reference: PaymentReference) -> Result<(), ReferenceError> {
        self.lock()?.insert(reference.token.clone(), reference);
        Ok(())
    }

    fn take(
        &self,
        token: &str,
        invoice_id: InvoiceId,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<PaymentReference, ReferenceError> {
        let mut entries = self.lock()?;
        let reference = entries.get(token).ok_or(ReferenceError::NotFound)?;
        if now >= reference.expires_at {
            let expired_at = reference.expires_at;
            entries.remove(token);
            return Err(ReferenceError::Expired { expired_at });
        }
        if reference.invoice_id != invoice_id || reference.student_id != student_id {
            return Err(ReferenceError::Mismatch);
        }
        Ok(entries.remove(token).expect("entry present under lock"))
    }

    fn peek(&self, token: &str, now: DateTime<Utc>) -> Result<PaymentReference, ReferenceError> {
        let mut entries = self.lock()?;
        let reference = entries.get(token).ok_or(ReferenceError::NotFound)?;
        if now >= reference.expires_at {
            let expired_at = reference.expires_at;
            entries.remove(token);
            return Err(ReferenceError::Expired { expired_at });
        }
        Ok(reference.clone())
    }

    fn sweep(&self, now: DateTime<Utc>) -> usize {
        match self.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, reference| reference.expires_at > now);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }
}

/// What `issue` returns: the reference plus a renderable QR payload. The
/// payload carries invoice identity and amount only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedReference {
    pub payment_ref: String,
    pub qr_code: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub invoice_id: InvoiceId,
    pub invoice_code: String,
    pub amount: u32,
    pub paid_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_id: Option<RegistrationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stay_record_id: Option<StayRecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceView {
    pub valid: bool,
    pub expires_at: DateTime<Utc>,
    pub amount: u32,
}

/// Issues and redeems short-lived payment references. Redemption is
/// single-use and converts a room-fee invoice into a confirmed stay.
pub struct PaymentBroker<S, N, P> {
    store: Arc<S>,
    notifier: Arc<N>,
    references: Arc<P>,
    ttl: Duration,
}

impl<S, N, P> PaymentBroker<S, N, P>
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, references: Arc<P>, ttl: Duration) -> Self {
        Self {
            store,
            notifier,
            references,
            ttl,
        }
    }

    pub fn issue(
        &self,
        invoice_id: InvoiceId,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<IssuedReference, EngineError> {
        let invoice = self.store.transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<Invoice, EngineError> {
                tx.student(student_id)?
                    .ok_or(EngineError::NotFound("student"))?;
                let invoice = tx
                    .invoice(invoice_id)?
                    .ok_or(EngineError::NotFound("invoice"))?;
                match invoice.status {
                    InvoiceStatus::Published => Ok(invoice),
                    InvoiceStatus::Draft => Err(EngineError::Conflict(
                        "invoice is not published yet".to_string(),
                    )),
                    InvoiceStatus::Paid => {
                        Err(EngineError::Conflict("invoice is already paid".to_string()))
                    }
                }
            },
        )?;

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        let expires_at = now + self.ttl;
        self.references.put(PaymentReference {
            token: token.clone(),
            invoice_id,
            student_id,
            amount: invoice.total_amount,
            expires_at,
        })?;

        if rand::thread_rng().gen_ratio(1, SWEEP_RATIO) {
            let purged = self.references.sweep(now);
            if purged > 0 {
                debug!(purged, "purged expired payment references");
            }
        }

        let qr_code = serde_json::json!({
            "invoice_code": invoice.code,
            "amount": invoice.total_amount,
            "payment_ref": token,
        })
        .to_string();

        Ok(IssuedReference {
            payment_ref: token,
            qr_code,
            expires_at,
        })
    }

    pub fn redeem(
        &self,
        token: &str,
        invoice_id: InvoiceId,
        student_id: StudentId,
        now: DateTime<Utc>,
    ) -> Result<PaymentConfirmation, EngineError> {
        let reference = self.references.take(token, invoice_id, student_id, now)?;

        let result = self.store.transaction(
            &mut |tx: &mut dyn StoreTx| -> Result<PaymentConfirmation, EngineError> {
                let mut invoice = tx
                    .invoice(invoice_id)?
                    .ok_or(EngineError::NotFound("invoice"))?;
                if invoice.status != InvoiceStatus::Published {
                    return Err(EngineError::Conflict(
                        "invoice is no longer payable".to_string(),
                    ));
                }

                invoice.status = InvoiceStatus::Paid;
                invoice.paid_at = Some(now);
                invoice.paid_by = Some(student_id);
                let code = invoice.code.clone();
                let amount = invoice.total_amount;
                tx.update_invoice(invoice)?;

                let mut registration_id = None;
                let mut stay_record_id = None;
                if let Some(mut registration) = tx.registration_for_invoice(invoice_id)? {
                    // Reaper and payment both lock this row; whoever commits
                    // first wins and the loser's precondition fails here.
                    if registration.status != RegistrationStatus::Pending {
                        return Err(EngineError::Conflict(
                            "registration is no longer pending; the room hold may have expired"
                                .to_string(),
                        ));
                    }
                    let detail = tx
                        .room_fee_detail(invoice_id)?
                        .ok_or(EngineError::NotFound("room fee detail"))?;
                    let semester = tx
                        .semester(registration.semester_id)?
                        .ok_or(EngineError::NotFound("semester"))?;

                    registration.status = RegistrationStatus::Approved;
                    registration.admin_note =
                        Some("room fee paid; stay confirmed".to_string());
                    registration_id = Some(registration.id);
                    let student = registration.student_id;
                    tx.update_registration(registration)?;

                    stay_record_id = Some(tx.insert_stay(NewStay {
                        student_id: student,
                        room_id: detail.room_id,
                        semester_id: detail.semester_id,
                        start_date: semester.start_date,
                        end_date: semester.end_date,
                        status: StayStatus::Active,
                    })?);
                }

                Ok(PaymentConfirmation {
                    invoice_id,
                    invoice_code: code,
                    amount,
                    paid_at: now,
                    registration_id,
                    stay_record_id,
                })
            },
        );

        match result {
            Ok(confirmation) => {
                let outcome = self.notifier.send(Notification {
                    target: NotificationTarget::student(student_id),
                    title: "Payment received".to_string(),
                    body: format!(
                        "Invoice {} ({}) was paid successfully.",
                        confirmation.invoice_code, confirmation.amount
                    ),
                });
                if let Err(err) = outcome {
                    warn!(%err, invoice = invoice_id.0, "payment notification failed");
                }
                Ok(confirmation)
            }
            Err(err) => {
                // The transaction never committed on a transient failure, so
                // hand the reference back for the caller's retry.
                if matches!(&err, EngineError::Store(store_err) if store_err.is_transient()) {
                    if let Err(put_err) = self.references.put(reference) {
                        warn!(%put_err, "failed to restore payment reference after transient error");
                    }
                }
                Err(err)
            }
        }
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<ReferenceView, ReferenceError> {
        let reference = self.references.peek(token, now)?;
        Ok(ReferenceView {
            valid: true,
            expires_at: reference.expires_at,
            amount: reference.amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference(token: &str, expires_at: DateTime<Utc>) -> PaymentReference {
        PaymentReference {
            token: token.to_string(),
            invoice_id: InvoiceId(1),
            student_id: StudentId(7),
            amount: 1500,
            expires_at,
        }
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, hour, minute, 0).unwrap()
    }

    #[test]
    fn take_is_single_use() {
        let store = InMemoryReferenceStore::default();
        store
            .put(reference("tok", at(10, 5)))
            .expect("put succeeds");

        store
            .take("tok", InvoiceId(1), StudentId(7), at(10, 0))
            .expect("first take succeeds");
        let second = store.take("tok", InvoiceId(1), StudentId(7), at(10, 0));
        assert_eq!(second, Err(ReferenceError::NotFound));
    }

    #[test]
    fn take_evicts_expired_entries() {
        let store = InMemoryReferenceStore::default();
        store
            .put(reference("tok", at(10, 5)))
            .expect("put succeeds");

        let result = store.take("tok", InvoiceId(1), StudentId(7), at(10, 5));
        assert!(matches!(result, Err(ReferenceError::Expired { .. })));
        // Entry is gone, so a later attempt reports NOT_FOUND.
        let result = store.take("tok", InvoiceId(1), StudentId(7), at(10, 6));
        assert_eq!(result, Err(ReferenceError::NotFound));
    }

    #[test]
    fn mismatch_leaves_the_entry_redeemable() {
        let store = InMemoryReferenceStore::default();
        store
            .put(reference("tok", at(10, 5)))
            .expect("put succeeds");

        let wrong = store.take("tok", InvoiceId(2), StudentId(7), at(10, 0));
        assert_eq!(wrong, Err(ReferenceError::Mismatch));

        store
            .take("tok", InvoiceId(1), StudentId(7), at(10, 0))
            .expect("correct binding still redeems");
    }

    #[test]
    fn sweep_purges_only_expired_entries() {
        let store = InMemoryReferenceStore::default();
        store
            .put(reference("old", at(10, 0)))
            .expect("put succeeds");
        store
            .put(reference("live", at(11, 0)))
            .expect("put succeeds");

        assert_eq!(store.sweep(at(10, 30)), 1);
        assert!(store.peek("live", at(10, 30)).is_ok());
        assert_eq!(store.peek("old", at(10, 30)), Err(ReferenceError::NotFound));
    }
}
