use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::domain::{
    InvoiceCategory, InvoiceStatus, Registration, RegistrationStatus, StudentId, UtilityDetail,
};
use super::store::{
    NewInvoice, Notification, NotificationSender, NotificationTarget, RegistryStore, StoreTx,
};
use super::EngineError;

pub const JOB_UTILITY_CYCLE: &str = "utility-cycle-bootstrap";
pub const JOB_EXPIRED_HOLDS: &str = "expired-hold-reaper";

const REAPER_NOTE: &str = "room hold expired without payment";

/// How often a job comes due again after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Hourly,
    Monthly,
}

impl Cadence {
    fn next_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Hourly => now + Duration::hours(1),
            Cadence::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(now + Duration::days(31))
            }
        }
    }
}

struct JobSlot {
    name: &'static str,
    cadence: Cadence,
    // Non-blocking single-flight guard: an overlapping run skips.
    guard: Mutex<()>,
    next_run: Mutex<Option<DateTime<Utc>>>,
}

/// Outcome of one job run, returned to the admin endpoint and logged by the
/// periodic loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobReport {
    UtilityBootstrap {
        created_cycle: bool,
        month: u32,
        year: i32,
        drafted_rooms: u32,
    },
    ExpiredHolds {
        examined: u32,
        rejected: u32,
    },
}

/// Explicit scheduler holding the two periodic jobs: monthly utility-cycle
/// bootstrap and hourly expiry of unpaid room holds.
pub struct Scheduler<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    hold: Duration,
    jobs: Vec<JobSlot>,
}

impl<S, N> Scheduler<S, N>
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, room_hold_hours: i64) -> Self {
        Self {
            store,
            notifier,
            hold: Duration::hours(room_hold_hours),
            jobs: vec![
                JobSlot {
                    name: JOB_UTILITY_CYCLE,
                    cadence: Cadence::Monthly,
                    guard: Mutex::new(()),
                    next_run: Mutex::new(None),
                },
                JobSlot {
                    name: JOB_EXPIRED_HOLDS,
                    cadence: Cadence::Hourly,
                    guard: Mutex::new(()),
                    next_run: Mutex::new(None),
                },
            ],
        }
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|job| job.name).collect()
    }

    /// Run every job whose `next_run` has passed. Failures are logged and
    /// retried on the next tick; they never take the process down.
    pub fn run_due(&self, now: DateTime<Utc>) {
        for job in &self.jobs {
            let due = {
                let next = job.next_run.lock().expect("next_run mutex poisoned");
                next.map_or(true, |at| now >= at)
            };
            if !due {
                continue;
            }
            match self.run_named(job, now) {
                Ok(report) => info!(job = job.name, ?report, "scheduled job finished"),
                Err(EngineError::Conflict(_)) => {
                    warn!(job = job.name, "previous run still in flight, skipping")
                }
                Err(err) => error!(job = job.name, %err, "scheduled job failed"),
            }
        }
    }

    /// Manual invocation for the admin endpoint.
    pub fn run_job(&self, name: &str, now: DateTime<Utc>) -> Result<JobReport, EngineError> {
        let job = self
            .jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or(EngineError::NotFound("job"))?;
        self.run_named(job, now)
    }

    fn run_named(&self, job: &JobSlot, now: DateTime<Utc>) -> Result<JobReport, EngineError> {
        let _flight = job
            .guard
            .try_lock()
            .map_err(|_| EngineError::Conflict(format!("job {} is already running", job.name)))?;

        let report = match job.name {
            JOB_UTILITY_CYCLE => self.bootstrap_utility_cycle(now),
            JOB_EXPIRED_HOLDS => self.reap_expired_holds(now),
            _ => Err(EngineError::NotFound("job")),
        }?;

        let mut next = job.next_run.lock().expect("next_run mutex poisoned");
        *next = Some(job.cadence.next_after(now));
        Ok(report)
    }

    /// Create the current month's DRAFT cycle if it is missing, with one
    /// draft utility invoice per occupied room carrying the previous cycle's
    /// closing readings forward as this cycle's opening readings.
    fn bootstrap_utility_cycle(&self, now: DateTime<Utc>) -> Result<JobReport, EngineError> {
        let month = now.month();
        let year = now.year();

        self.store
            .transaction(&mut |tx: &mut dyn StoreTx| -> Result<JobReport, EngineError> {
                if tx.cycle_for(month, year)?.is_some() {
                    return Ok(JobReport::UtilityBootstrap {
                        created_cycle: false,
                        month,
                        year,
                        drafted_rooms: 0,
                    });
                }

                let cycle_id = tx.insert_cycle(month, year)?;
                let mut drafted = 0u32;
                for room_id in tx.occupied_room_ids()? {
                    let baseline = tx.latest_metered_detail(room_id)?;
                    let invoice = tx.insert_invoice(NewInvoice {
                        category: InvoiceCategory::Utility,
                        total_amount: 0,
                        status: InvoiceStatus::Draft,
                    })?;
                    tx.insert_utility_detail(UtilityDetail {
                        invoice_id: invoice.id,
                        cycle_id,
                        room_id,
                        electricity_old: baseline.as_ref().and_then(|d| d.electricity_new),
                        electricity_new: None,
                        water_old: baseline.as_ref().and_then(|d| d.water_new),
                        water_new: None,
                    })?;
                    drafted += 1;
                }

                Ok(JobReport::UtilityBootstrap {
                    created_cycle: true,
                    month,
                    year,
                    drafted_rooms: drafted,
                })
            })
    }

    /// Reject PENDING NORMAL registrations whose unpaid room hold outlived
    /// the configured duration. Each row is re-checked in its own
    /// transaction so a payment committing in the same instant wins.
    fn reap_expired_holds(&self, now: DateTime<Utc>) -> Result<JobReport, EngineError> {
        let cutoff = now - self.hold;
        let expired = self
            .store
            .transaction(
                &mut |tx: &mut dyn StoreTx| -> Result<Vec<Registration>, EngineError> {
                    Ok(tx.pending_room_holds(cutoff)?)
                },
            )?;

        let mut rejected: Vec<StudentId> = Vec::new();
        for hold in &expired {
            let outcome = self.store.transaction(
                &mut |tx: &mut dyn StoreTx| -> Result<bool, EngineError> {
                    let Some(mut fresh) = tx.registration(hold.id)? else {
                        return Ok(false);
                    };
                    if fresh.status != RegistrationStatus::Pending || fresh.created_at >= cutoff {
                        return Ok(false);
                    }
                    fresh.status = RegistrationStatus::Rejected;
                    fresh.admin_note = Some(REAPER_NOTE.to_string());
                    tx.update_registration(fresh)?;
                    Ok(true)
                },
            )?;
            if outcome {
                rejected.push(hold.student_id);
            }
        }

        for student in &rejected {
            let outcome = self.notifier.send(Notification {
                target: NotificationTarget::student(*student),
                title: "Registration expired".to_string(),
                body: "Your room hold expired without payment and the registration was rejected."
                    .to_string(),
            });
            if let Err(err) = outcome {
                warn!(%err, student = student.0, "reaper notification failed");
            }
        }

        Ok(JobReport::ExpiredHolds {
            examined: expired.len() as u32,
            rejected: rejected.len() as u32,
        })
    }

    /// Periodic driver: checks due jobs on a fixed tick until the process
    /// shuts down.
    pub async fn run_loop(&self, tick: std::time::Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.run_due(Utc::now());
        }
    }
}
