use crate::cli::ServeArgs;
use crate::infra::{seed_demo_data, AppState, LoggingNotificationSender};
use crate::routes::with_engine_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use dorm_registry::config::AppConfig;
use dorm_registry::engine::memory::MemoryStore;
use dorm_registry::engine::payment::InMemoryReferenceStore;
use dorm_registry::engine::router::Engine;
use dorm_registry::error::AppError;
use dorm_registry::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(MemoryStore::new(Duration::from_millis(
        config.engine.store_lock_timeout_ms,
    )));
    if args.seed_demo {
        seed_demo_data(&store).map_err(dorm_registry::engine::EngineError::from)?;
        info!("seeded demo semester, rooms, and students");
    }

    let notifier = Arc::new(LoggingNotificationSender);
    let references = Arc::new(InMemoryReferenceStore::default());
    let engine = Arc::new(Engine::new(
        store,
        notifier,
        references,
        config.engine.engine_config(),
    ));

    let tick = Duration::from_secs(config.engine.scheduler_tick_seconds);
    let jobs = engine.clone();
    tokio::spawn(async move {
        jobs.scheduler.run_loop(tick).await;
    });

    let app = with_engine_routes(engine)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "dormitory registry ready");

    axum::serve(listener, app).await?;
    Ok(())
}
