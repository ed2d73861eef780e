use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::schedule::{Schedule, ScheduleStatus};
use crate::models::template::Interval;

const SCHEDULE_COLUMNS: &str = "id, instance_id, user_id, interval_type, status, schedule_time, \
     notified_time, notify_count, suppress_reached, created_at";

/// The persistent notification queue: one active row per (instance, user),
/// SENT rows kept as send history.
pub struct ScheduleStore;

impl ScheduleStore {
    /// The active (QUEUED or DISABLED) row for a pair, if any.
    pub async fn active_row(
        pool: &PgPool,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<Schedule>> {
        let row = sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE instance_id = $1 AND user_id = $2 AND status IN ($3, $4)"
        ))
        .bind(instance_id)
        .bind(user_id)
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(i16::from(ScheduleStatus::Disabled))
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Create or re-arm the schedule row for a pair.
    ///
    /// An existing active row is updated in place (re-armed to QUEUED), which
    /// keeps repeated qualification checks idempotent. When only SENT history
    /// exists, a fresh row is created only for explicit new-schedule callers
    /// (the dispatch loop's recurrence continuation or a newly enrolled
    /// user); plain re-syncs return `None` instead of resurrecting the pair.
    pub async fn upsert(
        pool: &PgPool,
        instance_id: Uuid,
        user_id: Uuid,
        schedule_time: DateTime<Utc>,
        interval: Interval,
        notify_count: i32,
        is_new_schedule_request: bool,
    ) -> anyhow::Result<Option<Uuid>> {
        let mut tx = pool.begin().await.context("begin schedule upsert")?;

        let active: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM schedules
             WHERE instance_id = $1 AND user_id = $2 AND status IN ($3, $4)
             FOR UPDATE",
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(i16::from(ScheduleStatus::Disabled))
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = active {
            sqlx::query(
                "UPDATE schedules
                 SET status = $2, schedule_time = $3, interval_type = $4, notify_count = $5
                 WHERE id = $1",
            )
            .bind(id)
            .bind(i16::from(ScheduleStatus::Queued))
            .bind(schedule_time)
            .bind(interval.to_string())
            .bind(notify_count)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(Some(id));
        }

        let already_sent: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                 SELECT 1 FROM schedules
                 WHERE instance_id = $1 AND user_id = $2 AND status = $3
             )",
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(i16::from(ScheduleStatus::Sent))
        .fetch_one(&mut *tx)
        .await?;

        if already_sent && !is_new_schedule_request {
            tx.commit().await?;
            return Ok(None);
        }

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO schedules
                 (instance_id, user_id, interval_type, status, schedule_time, notify_count)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(interval.to_string())
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(schedule_time)
        .bind(notify_count)
        .fetch_one(&mut *tx)
        .await
        .context("insert schedule row")?;

        tx.commit().await?;
        Ok(Some(id))
    }

    /// Park the active row when a user stops qualifying. Re-qualifying later
    /// re-arms the same row through `upsert` without recomputation.
    pub async fn disable(pool: &PgPool, instance_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE schedules SET status = $3
             WHERE instance_id = $1 AND user_id = $2 AND status = $4",
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(i16::from(ScheduleStatus::Disabled))
        .bind(i16::from(ScheduleStatus::Queued))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Hard-delete active rows (unenrolment). Send history stays.
    pub async fn remove(pool: &PgPool, instance_id: Uuid, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM schedules
             WHERE instance_id = $1 AND user_id = $2 AND status IN ($3, $4)",
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(i16::from(ScheduleStatus::Disabled))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Due QUEUED rows, oldest-created first, joined against the instance,
    /// template, course and enrolment still being live. `user_filter` narrows
    /// to one user for interactive "trigger now" runs.
    pub async fn select_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
        user_filter: Option<Uuid>,
    ) -> anyhow::Result<Vec<Schedule>> {
        let rows = sqlx::query_as::<_, Schedule>(
            "SELECT s.id, s.instance_id, s.user_id, s.interval_type, s.status,
                    s.schedule_time, s.notified_time, s.notify_count,
                    s.suppress_reached, s.created_at
             FROM schedules s
             JOIN instances i ON i.id = s.instance_id
             JOIN templates t ON t.id = i.template_id
             JOIN courses c ON c.id = i.course_id
             JOIN enrolments e ON e.course_id = i.course_id AND e.user_id = s.user_id
             WHERE s.status = $1
               AND s.schedule_time <= $2
               AND s.suppress_reached = FALSE
               AND i.status = TRUE
               AND t.status = TRUE AND t.visible = TRUE
               AND c.is_active = TRUE AND c.visible = TRUE
               AND e.status = 'active'
               AND ($4::uuid IS NULL OR s.user_id = $4)
             ORDER BY s.created_at ASC
             LIMIT $3",
        )
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(now)
        .bind(limit)
        .bind(user_filter)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Transition a row to SENT and bump its notify count.
    pub async fn mark_sent(
        pool: &PgPool,
        schedule_id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE schedules
             SET status = $2, notified_time = $3, notify_count = notify_count + 1
             WHERE id = $1",
        )
        .bind(schedule_id)
        .bind(i16::from(ScheduleStatus::Sent))
        .bind(sent_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Flag a row whose suppression gate was reached; it stays QUEUED but is
    /// no longer selected, so clearing the flag resumes it cheaply.
    pub async fn mark_suppressed(pool: &PgPool, schedule_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE schedules SET suppress_reached = TRUE WHERE id = $1")
            .bind(schedule_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Disable every active row of an instance (template or instance turned
    /// off, or a template deletion leaving the instance detached).
    pub async fn disable_for_instance(pool: &PgPool, instance_id: Uuid) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE schedules SET status = $2 WHERE instance_id = $1 AND status = $3",
        )
        .bind(instance_id)
        .bind(i16::from(ScheduleStatus::Disabled))
        .bind(i16::from(ScheduleStatus::Queued))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// QUEUED rows due for longer than `older_than`: the operational signal
    /// for stuck work.
    pub async fn stuck(
        pool: &PgPool,
        now: DateTime<Utc>,
        older_than: Duration,
    ) -> anyhow::Result<Vec<Schedule>> {
        let cutoff = now - older_than;
        let rows = sqlx::query_as::<_, Schedule>(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE status = $1 AND schedule_time < $2
             ORDER BY schedule_time ASC"
        ))
        .bind(i16::from(ScheduleStatus::Queued))
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Row counts per status, for the metrics collector.
    pub async fn counts_by_status(pool: &PgPool) -> anyhow::Result<Vec<(i16, i64)>> {
        let rows: Vec<(i16, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*)::BIGINT FROM schedules GROUP BY status",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
