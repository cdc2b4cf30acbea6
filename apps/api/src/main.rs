use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_status_cell::{InMemoryStatusStore, RedisStatusStore, StatusEngine, StatusStore};
use coordination_cell::{AppointmentCoordinator, CoordinatorOptions};
use reminder_cell::{
    InMemoryReminderPlanStore, LogNotificationChannel, NotificationChannel, RedisReminderPlanStore,
    ReminderOrchestrator, ReminderPlanStore, ReminderPlanner, ReminderPolicy, TokioClock,
    WebhookNotificationChannel,
};
use shared_config::{AppConfig, StoreBackend};
use shared_database::create_redis_pool;

async fn build_coordinator(config: &AppConfig) -> anyhow::Result<AppointmentCoordinator> {
    let (status_store, plan_store): (Arc<dyn StatusStore>, Arc<dyn ReminderPlanStore>) = match config.store_backend {
        StoreBackend::Redis => {
            let pool = create_redis_pool(config)
                .await
                .context("Failed to initialize Redis store")?;
            (
                Arc::new(RedisStatusStore::new(pool.clone())),
                Arc::new(RedisReminderPlanStore::new(pool)),
            )
        }
        StoreBackend::Memory => {
            warn!("Using in-memory stores; status history and reminders are lost on restart");
            (
                Arc::new(InMemoryStatusStore::new()),
                Arc::new(InMemoryReminderPlanStore::new()),
            )
        }
    };

    let channel: Arc<dyn NotificationChannel> = match WebhookNotificationChannel::from_config(config)
        .context("Failed to build notification webhook client")?
    {
        Some(webhook) => {
            info!("Delivering reminders to {}", webhook.endpoint());
            Arc::new(webhook)
        }
        None => {
            warn!("NOTIFICATION_WEBHOOK_URL not set, reminders will only be logged");
            Arc::new(LogNotificationChannel::new())
        }
    };

    let policy = ReminderPolicy::from_config(config);
    policy.validate()?;

    let clock = Arc::new(TokioClock::new());
    let engine = Arc::new(StatusEngine::new(status_store));
    let planner = Arc::new(ReminderPlanner::new(plan_store, clock.clone(), policy));
    let orchestrator = ReminderOrchestrator::new(planner, clock, channel, config.event_channel_capacity);

    Ok(AppointmentCoordinator::new(
        engine,
        orchestrator,
        CoordinatorOptions::from_config(config),
    ))
}

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

    info!("Starting Amae appointment engine");

    // Load configuration
    let config = AppConfig::from_env();

    let coordinator = Arc::new(build_coordinator(&config).await?);
    coordinator
        .restore_timers()
        .await
        .context("Failed to restore reminder timers")?;
    let _reminder_events = coordinator.forward_reminder_events();

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(coordinator)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
