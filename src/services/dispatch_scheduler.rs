use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::services::dispatch::DispatchService;
use crate::services::email::EmailService;

/// Spawn the periodic trigger: a background task that runs one dispatch
/// batch every `dispatch_interval_secs`. The loop never overlaps
/// invocations; the next sleep only starts once a run finishes.
pub fn start(pool: PgPool, email: Option<Arc<EmailService>>, config: Arc<Config>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(
                config.dispatch_interval_secs,
            ))
            .await;

            match DispatchService::run(
                &pool,
                email.as_deref(),
                config.dispatch_batch_limit,
                None,
            )
            .await
            {
                Ok(outcome) if outcome.selected > 0 => {
                    info!(
                        "Dispatch run complete: {}/{} sent",
                        outcome.sent, outcome.selected
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Dispatch run failed: {e:#}"),
            }
        }
    });
}
