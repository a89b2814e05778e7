use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::services::{AppointmentHooks, AppointmentStore, StoreSettings};
use queue_cell::services::{QueueBroadcaster, QueueEngine};
use schedule_cell::services::ClinicDirectory;
use shared_config::AppConfig;
use shared_utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting clinic queue API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Wire the cells: directory -> appointment store -> queue engine
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let directory = Arc::new(ClinicDirectory::new(config.default_utc_offset_minutes));
    let store = Arc::new(AppointmentStore::new(
        directory.clone(),
        clock.clone(),
        StoreSettings::from_config(&config),
    ));
    let engine = Arc::new(QueueEngine::new(
        store.clone(),
        clock,
        QueueBroadcaster::new(config.queue_broadcast_capacity),
        config.minutes_per_patient,
    ));
    let hooks: Arc<dyn AppointmentHooks> = engine.clone();
    store.set_hooks(&hooks);

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(router::Services {
        config: config.clone(),
        directory,
        store,
        engine,
    })
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(trace::DefaultMakeSpan::new()
                .level(Level::INFO))
            .on_response(trace::DefaultOnResponse::new()
                .level(Level::INFO)),
    )
    .layer(cors);

    // Run the server
    let listener = TcpListener::bind(config.bind_address.as_str())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
