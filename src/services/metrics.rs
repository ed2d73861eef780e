use lazy_static::lazy_static;
use prometheus::{register_counter, register_gauge, register_gauge_vec, Counter, Gauge, GaugeVec};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::models::schedule::ScheduleStatus;
use crate::services::schedule_store::ScheduleStore;

lazy_static! {
    // ── Event counters (increment on each dispatch outcome) ─────────────────
    pub static ref SENT_COUNTER: Counter = register_counter!(
        "notify_sent_total",
        "Notifications sent successfully"
    ).unwrap();

    pub static ref FAILED_COUNTER: Counter = register_counter!(
        "notify_failed_total",
        "Notification sends that failed and stayed queued"
    ).unwrap();

    pub static ref SUPPRESSED_COUNTER: Counter = register_counter!(
        "notify_suppressed_total",
        "Schedule rows halted by their suppression gate"
    ).unwrap();

    // ── Queue state ─────────────────────────────────────────────────────────
    pub static ref SCHEDULES_GAUGE: GaugeVec = register_gauge_vec!(
        "notify_schedules_total",
        "Schedule rows by status",
        &["status"]
    ).unwrap();

    pub static ref STUCK_GAUGE: Gauge = register_gauge!(
        "notify_schedules_stuck_total",
        "QUEUED rows due longer than the stuck threshold"
    ).unwrap();
}

/// Spawn the background metrics collector (refreshes every 5 minutes).
pub fn start(pool: PgPool, stuck_threshold_mins: i64) {
    tokio::spawn(async move {
        if let Err(e) = collect(&pool, stuck_threshold_mins).await {
            warn!("Metrics: initial collection failed: {}", e);
        }
        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(300)).await;
            if let Err(e) = collect(&pool, stuck_threshold_mins).await {
                warn!("Metrics: collection failed: {}", e);
            }
        }
    });
}

fn status_label(status: ScheduleStatus) -> &'static str {
    match status {
        ScheduleStatus::Failed => "failed",
        ScheduleStatus::Disabled => "disabled",
        ScheduleStatus::Queued => "queued",
        ScheduleStatus::Sent => "sent",
    }
}

async fn collect(pool: &PgPool, stuck_threshold_mins: i64) -> anyhow::Result<()> {
    for status in [
        ScheduleStatus::Failed,
        ScheduleStatus::Disabled,
        ScheduleStatus::Queued,
        ScheduleStatus::Sent,
    ] {
        SCHEDULES_GAUGE
            .with_label_values(&[status_label(status)])
            .set(0.0);
    }

    for (status, count) in ScheduleStore::counts_by_status(pool).await? {
        SCHEDULES_GAUGE
            .with_label_values(&[status_label(status.into())])
            .set(count as f64);
    }

    let stuck = ScheduleStore::stuck(
        pool,
        chrono::Utc::now(),
        chrono::Duration::minutes(stuck_threshold_mins),
    )
    .await?;
    STUCK_GAUGE.set(stuck.len() as f64);

    info!("Metrics: schedule gauges refreshed");
    Ok(())
}
