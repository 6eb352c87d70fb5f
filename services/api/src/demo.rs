use crate::infra::{seed_demo_data, LoggingNotificationSender};
use chrono::{Duration, Utc};
use clap::Args;
use std::sync::Arc;

use dorm_registry::engine::domain::{
    BuildingId, RegistrationSubmission, RegistrationType, RoomId, SemesterId, StudentId,
};
use dorm_registry::engine::memory::MemoryStore;
use dorm_registry::engine::payment::InMemoryReferenceStore;
use dorm_registry::engine::router::Engine;
use dorm_registry::engine::{EngineConfig, EngineError, JOB_EXPIRED_HOLDS, JOB_UTILITY_CYCLE};
use dorm_registry::error::AppError;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print full assignment details instead of the counts only
    #[arg(long)]
    pub(crate) verbose: bool,
}

/// Scripted walkthrough against an in-memory stack: submit, batch-assign,
/// pay, and run both scheduled jobs.
pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let store = Arc::new(MemoryStore::default());
    seed_demo_data(&store).map_err(dorm_registry::engine::EngineError::from)?;

    let engine = Engine::new(
        store,
        Arc::new(LoggingNotificationSender),
        Arc::new(InMemoryReferenceStore::default()),
        EngineConfig::default(),
    );

    let now = Utc::now();
    println!("Dormitory registry demo");

    // A normal registration with a chosen room carries a room-fee invoice.
    let held = engine.service.submit(
        RegistrationSubmission {
            student_id: StudentId(1),
            registration_type: RegistrationType::Normal,
            desired_room_id: Some(RoomId(1)),
            desired_building_id: None,
            priority_category: None,
            evidence_key: None,
        },
        now,
    )?;
    let invoice_id = held
        .invoice_id
        .ok_or(AppError::Engine(EngineError::NotFound("invoice")))?;
    let invoice = engine.service.invoice(invoice_id)?;
    println!(
        "- registration {} holds room 1 behind invoice {} ({})",
        held.id.0, invoice.code, invoice.total_amount
    );

    // Pay it through the reference broker.
    let issued = engine.broker.issue(invoice_id, StudentId(1), now)?;
    println!(
        "- payment reference {} expires at {}",
        issued.payment_ref, issued.expires_at
    );
    let confirmation = engine.broker.redeem(
        &issued.payment_ref,
        invoice_id,
        StudentId(1),
        now + Duration::minutes(1),
    )?;
    println!(
        "- invoice {} paid, stay record {:?} created",
        confirmation.invoice_code,
        confirmation.stay_record_id.map(|id| id.0)
    );

    // Two more students queue without invoices and get batch-assigned.
    engine.service.submit(
        RegistrationSubmission {
            student_id: StudentId(2),
            registration_type: RegistrationType::Normal,
            desired_room_id: None,
            desired_building_id: Some(BuildingId(1)),
            priority_category: None,
            evidence_key: None,
        },
        now,
    )?;
    engine.service.submit(
        RegistrationSubmission {
            student_id: StudentId(3),
            registration_type: RegistrationType::Priority,
            desired_room_id: None,
            desired_building_id: None,
            priority_category: Some("scholarship".to_string()),
            evidence_key: Some("uploads/evidence/3.pdf".to_string()),
        },
        now,
    )?;
    let report = engine
        .allocator
        .auto_assign(SemesterId(1), now + Duration::minutes(5))?;
    println!(
        "- batch allocation: {} total, {} assigned, {} failed",
        report.total, report.success, report.failed
    );
    if args.verbose {
        for detail in &report.details {
            println!(
                "    {}",
                serde_json::to_string(detail).unwrap_or_else(|_| "<unprintable>".to_string())
            );
        }
    }

    // Both scheduled jobs, exactly as the admin endpoint would run them.
    let bootstrap = engine
        .scheduler
        .run_job(JOB_UTILITY_CYCLE, now + Duration::minutes(10))?;
    println!(
        "- utility cycle bootstrap: {}",
        serde_json::to_string(&bootstrap).unwrap_or_else(|_| "<unprintable>".to_string())
    );
    let reap = engine
        .scheduler
        .run_job(JOB_EXPIRED_HOLDS, now + Duration::minutes(10))?;
    println!(
        "- expired-hold reaper: {}",
        serde_json::to_string(&reap).unwrap_or_else(|_| "<unprintable>".to_string())
    );

    Ok(())
}
