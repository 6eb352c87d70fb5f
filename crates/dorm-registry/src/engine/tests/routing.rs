use super::common::*;
use crate::engine::router::engine_router;
use axum::http::StatusCode;
use serde_json::{json, Value};
use tower::ServiceExt;

fn post_json(uri: &str, body: Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::post(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("request builds")
}

fn put_json(uri: &str, body: Value) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::put(uri)
        .header(axum::http::header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("request builds")
}

#[tokio::test]
async fn submit_route_returns_created_with_invoice_link() {
    let ctx = context();
    let router = engine_router(ctx.engine.clone());

    // The live router stamps wall-clock time, so pin the semester window
    // around it for this test.
    widen_windows_to_now(&ctx);

    let response = router
        .oneshot(post_json(
            "/api/v1/registrations",
            json!({
                "student_id": MINH.0,
                "registration_type": "NORMAL",
                "desired_room_id": ROOM_A101.0,
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert!(payload.get("id").is_some());
    assert!(payload.get("invoice_id").is_some());
}

#[tokio::test]
async fn submit_route_maps_window_denials_to_bad_request() {
    let ctx = context();
    let router = engine_router(ctx.engine.clone());

    // The seeded windows live in August 2026; wall-clock now is outside
    // them, so the route reports the window denial.
    let response = router
        .oneshot(post_json(
            "/api/v1/registrations",
            json!({
                "student_id": MINH.0,
                "registration_type": "RENEWAL",
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let payload = read_json_body(response).await;
    assert!(payload
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .contains("not configured"));
}

#[tokio::test]
async fn auto_assign_route_reports_counts() {
    let ctx = context();
    widen_windows_to_now(&ctx);
    ctx.engine
        .service
        .submit(priority(LINH), chrono::Utc::now())
        .expect("submission succeeds");

    let router = engine_router(ctx.engine.clone());
    let response = router
        .oneshot(post_json(
            "/api/v1/registrations/auto-assign",
            json!({ "semester_id": SEMESTER.0 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let result = payload.get("result").expect("result object");
    assert_eq!(result.get("total"), Some(&json!(1)));
    assert_eq!(result.get("success"), Some(&json!(1)));
    assert_eq!(result.get("failed"), Some(&json!(0)));
    assert_eq!(
        result
            .get("details")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(1)
    );
}

#[tokio::test]
async fn status_route_applies_manager_decisions() {
    let ctx = context();
    widen_windows_to_now(&ctx);
    let receipt = ctx
        .engine
        .service
        .submit(priority(LINH), chrono::Utc::now())
        .expect("submission succeeds");

    let router = engine_router(ctx.engine.clone());
    let response = router
        .oneshot(put_json(
            &format!("/api/v1/registrations/{}/status", receipt.id.0),
            json!({ "status": "RETURN", "admin_note": "need the scholarship letter" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("status"), Some(&json!("RETURN")));
    assert_eq!(
        payload.get("admin_note"),
        Some(&json!("need the scholarship letter"))
    );
}

#[tokio::test]
async fn payment_routes_cover_the_full_lifecycle() {
    let ctx = context();
    widen_windows_to_now(&ctx);
    let receipt = ctx
        .engine
        .service
        .submit(normal_with_room(MINH, ROOM_A101), chrono::Utc::now())
        .expect("submission succeeds");
    let invoice_id = receipt.invoice_id.expect("invoice linked");

    let router = engine_router(ctx.engine.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            &format!("/api/v1/payments/qrcode/{}", invoice_id.0),
            json!({ "studentId": MINH.0 }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    let payment_ref = payload
        .get("paymentRef")
        .and_then(Value::as_str)
        .expect("paymentRef returned")
        .to_string();
    assert!(payload.get("qrCode").is_some());
    assert!(payload.get("expiresAt").is_some());

    let response = router
        .clone()
        .oneshot(
            axum::http::Request::get(format!("/api/v1/payments/verify/{payment_ref}"))
                .body(axum::body::Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("valid"), Some(&json!(true)));
    assert_eq!(payload.get("amount"), Some(&json!(1200)));

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/payments/confirm",
            json!({
                "paymentRef": payment_ref,
                "invoiceId": invoice_id.0,
                "studentId": MINH.0,
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("invoiceId"), Some(&json!(invoice_id.0)));
    assert!(payload.get("registrationId").is_some());

    // Single use: confirming again is a 400.
    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/payments/confirm",
            json!({
                "paymentRef": payment_ref,
                "invoiceId": invoice_id.0,
                "studentId": MINH.0,
            }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // And the consumed reference no longer verifies.
    let response = router
        .oneshot(
            axum::http::Request::get(format!("/api/v1/payments/verify/{payment_ref}"))
                .body(axum::body::Body::empty())
                .expect("request builds"),
        )
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_job_route_runs_and_rejects_unknown_jobs() {
    let ctx = context();
    let router = engine_router(ctx.engine.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/api/v1/admin/jobs/expired-hold-reaper/run",
            json!({}),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.get("job"), Some(&json!("expired-hold-reaper")));

    let response = router
        .oneshot(post_json("/api/v1/admin/jobs/unknown/run", json!({})))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// The HTTP layer stamps `Utc::now()`, so route-level tests stretch the
/// seeded windows around the present instead of freezing the clock.
fn widen_windows_to_now(ctx: &TestContext) {
    use crate::engine::domain::WindowBounds;
    use crate::engine::store::{RegistryStore, StoreError, StoreTx};
    use chrono::{Duration, Utc};

    ctx.store
        .transaction(&mut |tx: &mut dyn StoreTx| -> Result<(), StoreError> {
            let mut semester = tx
                .semester(SEMESTER)?
                .ok_or(StoreError::NotFound("semester"))?;
            let bounds = WindowBounds {
                opens_at: Utc::now() - Duration::days(1),
                closes_at: Utc::now() + Duration::days(1),
            };
            semester.normal_window = Some(bounds);
            semester.priority_window = Some(bounds);
            tx.update_semester(semester)?;
            Ok(())
        })
        .expect("window widening commits");
}
