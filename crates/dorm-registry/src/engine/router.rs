use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::allocator::RoomAllocator;
use super::domain::{
    InvoiceId, RegistrationId, RegistrationStatus, RegistrationSubmission, SemesterId, StudentId,
};
use super::payment::{PaymentBroker, PaymentReferenceStore, ReferenceError};
use super::scheduler::Scheduler;
use super::service::RegistrationService;
use super::store::{NotificationSender, RegistryStore};
use super::{EngineConfig, EngineError};

/// Everything the HTTP surface needs, built once at startup.
pub struct Engine<S, N, P> {
    pub service: RegistrationService<S, N>,
    pub allocator: RoomAllocator<S, N>,
    pub broker: PaymentBroker<S, N, P>,
    pub scheduler: Scheduler<S, N>,
}

impl<S, N, P> Engine<S, N, P>
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, references: Arc<P>, config: EngineConfig) -> Self {
        Self {
            service: RegistrationService::new(store.clone(), notifier.clone()),
            allocator: RoomAllocator::new(store.clone(), notifier.clone()),
            broker: PaymentBroker::new(
                store.clone(),
                notifier.clone(),
                references,
                chrono::Duration::minutes(config.payment_ref_ttl_minutes),
            ),
            scheduler: Scheduler::new(store, notifier, config.room_hold_hours),
        }
    }
}

/// Router builder exposing the registration, allocation, payment, and admin
/// job endpoints.
pub fn engine_router<S, N, P>(engine: Arc<Engine<S, N, P>>) -> Router
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    Router::new()
        .route("/api/v1/registrations", post(submit_handler::<S, N, P>))
        .route(
            "/api/v1/registrations/auto-assign",
            post(auto_assign_handler::<S, N, P>),
        )
        .route(
            "/api/v1/registrations/:id/status",
            put(status_handler::<S, N, P>),
        )
        .route(
            "/api/v1/payments/qrcode/:invoice_id",
            post(qrcode_handler::<S, N, P>),
        )
        .route("/api/v1/payments/confirm", post(confirm_handler::<S, N, P>))
        .route(
            "/api/v1/payments/verify/:payment_ref",
            get(verify_handler::<S, N, P>),
        )
        .route(
            "/api/v1/admin/jobs/:name/run",
            post(run_job_handler::<S, N, P>),
        )
        .with_state(engine)
}

fn error_response(error: &EngineError) -> Response {
    let status = match error {
        EngineError::Validation(_)
        | EngineError::Window(_)
        | EngineError::Constraint(_)
        | EngineError::Conflict(_)
        | EngineError::Reference(_) => StatusCode::BAD_REQUEST,
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({ "error": error.to_string() });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn submit_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    axum::Json(submission): axum::Json<RegistrationSubmission>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine.service.submit(submission, Utc::now()) {
        Ok(receipt) => (StatusCode::CREATED, axum::Json(receipt)).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
struct AutoAssignRequest {
    semester_id: SemesterId,
}

pub(crate) async fn auto_assign_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    axum::Json(request): axum::Json<AutoAssignRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine.allocator.auto_assign(request.semester_id, Utc::now()) {
        Ok(report) => {
            (StatusCode::OK, axum::Json(json!({ "result": report }))).into_response()
        }
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: RegistrationStatus,
    #[serde(default)]
    admin_note: Option<String>,
}

pub(crate) async fn status_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    Path(id): Path<i64>,
    axum::Json(request): axum::Json<StatusUpdateRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine
        .service
        .set_status(RegistrationId(id), request.status, request.admin_note)
    {
        Ok(updated) => {
            let payload = json!({
                "id": updated.id,
                "status": updated.status,
                "admin_note": updated.admin_note,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrCodeRequest {
    student_id: StudentId,
}

pub(crate) async fn qrcode_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    Path(invoice_id): Path<i64>,
    axum::Json(request): axum::Json<QrCodeRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine
        .broker
        .issue(InvoiceId(invoice_id), request.student_id, Utc::now())
    {
        Ok(issued) => (StatusCode::OK, axum::Json(issued)).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    payment_ref: String,
    invoice_id: InvoiceId,
    student_id: StudentId,
}

pub(crate) async fn confirm_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    axum::Json(request): axum::Json<ConfirmRequest>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine.broker.redeem(
        &request.payment_ref,
        request.invoice_id,
        request.student_id,
        Utc::now(),
    ) {
        Ok(confirmation) => (StatusCode::OK, axum::Json(confirmation)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn verify_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    Path(payment_ref): Path<String>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine.broker.verify(&payment_ref, Utc::now()) {
        Ok(view) => (StatusCode::OK, axum::Json(view)).into_response(),
        Err(ReferenceError::NotFound) => {
            let payload = json!({ "error": "payment reference not found" });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error @ ReferenceError::Expired { .. }) => {
            let payload = json!({ "valid": false, "error": error.to_string() });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        Err(error @ ReferenceError::Mismatch) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
        }
        Err(error @ ReferenceError::Unavailable(_)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn run_job_handler<S, N, P>(
    State(engine): State<Arc<Engine<S, N, P>>>,
    Path(name): Path<String>,
) -> Response
where
    S: RegistryStore + 'static,
    N: NotificationSender + 'static,
    P: PaymentReferenceStore + 'static,
{
    match engine.scheduler.run_job(&name, Utc::now()) {
        Ok(report) => {
            let payload = json!({ "job": name, "report": report });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(&error),
    }
}
