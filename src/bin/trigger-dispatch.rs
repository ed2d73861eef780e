/// Run one notification dispatch batch immediately.
/// Useful from cron (*/5 * * * * /app/trigger-dispatch) or for manual runs.
///
/// Usage: trigger-dispatch [--user UUID] [--limit N]
///   --user UUID : only process schedules for this user
///   --limit N   : batch size cap (default from DISPATCH_BATCH_LIMIT)

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use coursenotify_api::config::Config;
use coursenotify_api::services::dispatch::DispatchService;
use coursenotify_api::services::email::EmailService;

#[derive(Parser)]
#[command(name = "trigger-dispatch", about = "Run one notification dispatch batch")]
struct Args {
    /// Only process schedules for this user (optional)
    #[arg(long)]
    user: Option<Uuid>,

    /// Batch size cap (optional)
    #[arg(long)]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let email = EmailService::new(&config);
    let limit = args.limit.unwrap_or(config.dispatch_batch_limit);

    tracing::info!("Starting dispatch batch (limit {limit})...");

    let outcome = DispatchService::run(&pool, email.as_ref(), limit, args.user).await?;

    tracing::info!(
        "Dispatch batch complete: {} due, {} sent, {} suppressed, {} failed",
        outcome.selected,
        outcome.sent,
        outcome.suppressed,
        outcome.failed
    );

    Ok(())
}
