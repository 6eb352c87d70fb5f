//! Registration and room allocation engine.
//!
//! The flow: a student submission is gated by the [`window`] resolver,
//! validated by the [`eligibility`] checker, and committed by the
//! [`service`] issuer together with its room-fee invoice in one transaction.
//! The student later redeems a [`payment`] reference to confirm the stay, or
//! the [`scheduler`]'s reaper reclaims the room when the hold lapses.
//! Managers batch-place the remaining queue through the [`allocator`].

pub mod allocator;
pub mod domain;
pub mod eligibility;
pub mod memory;
pub mod payment;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod window;

#[cfg(test)]
mod tests;

use eligibility::ConstraintViolation;
use payment::ReferenceError;
use store::StoreError;
use window::WindowDenied;

pub use allocator::RoomAllocator;
pub use domain::{
    AssignmentFailure, AssignmentReport, RegistrationStatus, RegistrationSubmission,
    RegistrationType, SubmissionReceipt,
};
pub use memory::MemoryStore;
pub use payment::{InMemoryReferenceStore, PaymentBroker, PaymentReferenceStore};
pub use router::{engine_router, Engine};
pub use scheduler::{Scheduler, JOB_EXPIRED_HOLDS, JOB_UTILITY_CYCLE};
pub use service::RegistrationService;
pub use store::{NotificationSender, NotifyError, Notification, NotificationTarget, RegistryStore};

/// Engine knobs shared by the issuer, broker, and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long an unpaid room hold survives before the reaper rejects it.
    pub room_hold_hours: i64,
    /// Payment reference lifetime.
    pub payment_ref_ttl_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            room_hold_hours: 24,
            payment_ref_ttl_minutes: 5,
        }
    }
}

/// The engine's error taxonomy. Every variant maps to one HTTP status in
/// [`router`]; store errors are the only retryable class.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Window(#[from] WindowDenied),
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
