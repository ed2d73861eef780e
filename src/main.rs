use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursenotify_api::config::Config;
use coursenotify_api::services::email::EmailService;
use coursenotify_api::services::{dispatch_scheduler, metrics};
use coursenotify_api::{db, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let email = EmailService::new(&config).map(Arc::new);
    if email.is_some() {
        info!("SMTP email service configured");
    } else {
        info!("SMTP not configured — notification sends disabled");
    }

    dispatch_scheduler::start(pool.clone(), email.clone(), config.clone());
    metrics::start(pool.clone(), config.stuck_threshold_mins);
    info!(
        "Dispatch loop armed: every {}s, batch limit {}",
        config.dispatch_interval_secs, config.dispatch_batch_limit
    );

    let state = AppState {
        db: pool,
        config: config.clone(),
        email,
    };

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Operational surface
        .route("/ops/stuck", get(routes::ops::stuck_schedules))
        .route("/ops/dispatch", post(routes::ops::trigger_dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("coursenotify API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
