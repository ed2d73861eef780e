use chrono::{DateTime, Utc};
use lettre::message::Mailbox;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::condition::ConditionOperator;
use crate::models::course::Course;
use crate::models::schedule::Schedule;
use crate::models::template::{Interval, NotificationConfig, SenderPolicy};
use crate::models::user::User;
use crate::services::content::ContentRenderer;
use crate::services::email::EmailService;
use crate::services::enrollment::EnrollmentService;
use crate::services::instances::InstanceService;
use crate::services::metrics;
use crate::services::recurrence::{self, DelaySpec, IntervalSpec};
use crate::services::schedule_store::ScheduleStore;

#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchOutcome {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub suppressed: usize,
}

enum RowResult {
    Sent,
    Suppressed,
}

/// The periodic batch job: drain due schedule rows, send each notification,
/// and let every successful send queue its own successor.
pub struct DispatchService;

impl DispatchService {
    /// One batch run. Rows are processed oldest-created first; a failed send
    /// leaves its row QUEUED and due in the past, so the next run simply
    /// picks it up again.
    pub async fn run(
        pool: &PgPool,
        email: Option<&EmailService>,
        batch_limit: i64,
        user_filter: Option<Uuid>,
    ) -> anyhow::Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        let Some(email) = email else {
            warn!("SMTP not configured — dispatch run skipped");
            return Ok(outcome);
        };

        let now = Utc::now();
        let due = ScheduleStore::select_due(pool, now, batch_limit, user_filter).await?;
        outcome.selected = due.len();

        for row in &due {
            match Self::process_row(pool, email, row, now).await {
                Ok(RowResult::Sent) => {
                    outcome.sent += 1;
                    metrics::SENT_COUNTER.inc();
                }
                Ok(RowResult::Suppressed) => {
                    outcome.suppressed += 1;
                    metrics::SUPPRESSED_COUNTER.inc();
                }
                Err(e) => {
                    // row left QUEUED; retried on the next invocation
                    warn!("Dispatch: schedule {} not sent: {e:#}", row.id);
                    outcome.failed += 1;
                    metrics::FAILED_COUNTER.inc();
                }
            }
        }

        if outcome.selected > 0 {
            info!(
                "Dispatch: {} due, {} sent, {} suppressed, {} failed",
                outcome.selected, outcome.sent, outcome.suppressed, outcome.failed
            );
        }
        Ok(outcome)
    }

    async fn process_row(
        pool: &PgPool,
        email: &EmailService,
        row: &Schedule,
        now: DateTime<Utc>,
    ) -> anyhow::Result<RowResult> {
        let effective = InstanceService::effective(pool, row.instance_id).await?;
        let config = &effective.config;

        if !config.suppress_modules.is_empty() {
            let completed: HashSet<Uuid> =
                EnrollmentService::completed_among(pool, row.user_id, &config.suppress_modules)
                    .await?
                    .into_iter()
                    .collect();
            if suppression_reached(config.suppress_operator, &config.suppress_modules, &completed)
            {
                ScheduleStore::mark_suppressed(pool, row.id).await?;
                return Ok(RowResult::Suppressed);
            }
        }

        let course = fetch_course(pool, effective.instance.course_id).await?;
        let user = fetch_user(pool, row.user_id).await?;

        let rendered = ContentRenderer::render(pool, config, &user, &course).await?;
        let from = Self::resolve_sender(pool, email, config, &course, &user).await?;
        let to = EmailService::parse_mailbox(&user.full_name(), &user.email)
            .ok_or_else(|| anyhow::anyhow!("invalid recipient address: {}", user.email))?;
        let cc = Self::role_mailboxes(pool, course.id, &config.cc).await?;
        let bcc = Self::role_mailboxes(pool, course.id, &config.bcc).await?;

        email
            .send_notification(
                to,
                from,
                &rendered.subject,
                &rendered.text,
                &rendered.html,
                &cc,
                &bcc,
            )
            .await?;

        ScheduleStore::mark_sent(pool, row.id, now).await?;

        let next_count = row.notify_count + 1;
        if should_continue(config.notify_interval, config.notify_limit, next_count) {
            let anchor = match config.anchor_module {
                Some(module_id) => EnrollmentService::module_start_time(pool, module_id).await?,
                None => None,
            };
            // the successor is computed from the actual send time, not from a
            // fixed timer, so cadence never drifts from failures or late runs
            let next = recurrence::next_run(
                &IntervalSpec::from_config(config),
                Some(now),
                None,
                &DelaySpec::from_config(config),
                anchor,
                now,
            );
            ScheduleStore::upsert(
                pool,
                row.instance_id,
                row.user_id,
                next,
                config.notify_interval,
                next_count,
                true,
            )
            .await?;
        }

        Ok(RowResult::Sent)
    }

    async fn resolve_sender(
        pool: &PgPool,
        email: &EmailService,
        config: &NotificationConfig,
        course: &Course,
        user: &User,
    ) -> anyhow::Result<Mailbox> {
        let mailbox = match config.sender {
            SenderPolicy::CourseTeacher => EnrollmentService::course_teacher(pool, course.id)
                .await?
                .map(|t| email.sender_mailbox(&t.full_name())),
            SenderPolicy::GroupTeacher => {
                let teacher = match EnrollmentService::group_teacher(pool, course.id, user.id)
                    .await?
                {
                    Some(t) => Some(t),
                    None => EnrollmentService::course_teacher(pool, course.id).await?,
                };
                teacher.map(|t| email.sender_mailbox(&t.full_name()))
            }
            SenderPolicy::TenantRole => Some(email.sender_mailbox(&course.fullname)),
            SenderPolicy::CustomEmail => config
                .sender_email
                .as_deref()
                .and_then(|addr| addr.parse::<Mailbox>().ok()),
        };
        Ok(mailbox.unwrap_or_else(|| email.sender_mailbox(&course.fullname)))
    }

    async fn role_mailboxes(
        pool: &PgPool,
        course_id: Uuid,
        roles: &[String],
    ) -> anyhow::Result<Vec<Mailbox>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let users = EnrollmentService::users_with_roles(pool, course_id, roles).await?;
        Ok(users
            .iter()
            .filter_map(|u| EmailService::parse_mailbox(&u.full_name(), &u.email))
            .collect())
    }
}

/// Does a successful send queue a successor row? ONCE intervals are terminal,
/// and a non-zero notify limit caps the recurrence.
pub fn should_continue(interval: Interval, notify_limit: i32, notify_count: i32) -> bool {
    interval != Interval::Once && (notify_limit == 0 || notify_count < notify_limit)
}

/// Has the suppression gate been reached for this user?
pub fn suppression_reached(
    operator: ConditionOperator,
    modules: &[Uuid],
    completed: &HashSet<Uuid>,
) -> bool {
    if modules.is_empty() {
        return false;
    }
    match operator {
        ConditionOperator::All => modules.iter().all(|m| completed.contains(m)),
        ConditionOperator::Any => modules.iter().any(|m| completed.contains(m)),
    }
}

async fn fetch_course(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Course> {
    let course = sqlx::query_as::<_, Course>(
        "SELECT id, fullname, shortname, category_id, visible, is_active, created_at
         FROM courses WHERE id = $1",
    )
    .bind(course_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ConfigError::CourseNotFound(course_id))?;
    Ok(course)
}

async fn fetch_user(pool: &PgPool, user_id: Uuid) -> anyhow::Result<User> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, first_name, last_name, is_active, created_at
         FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(ConfigError::UserNotFound(user_id))?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_interval_is_terminal() {
        // even with unlimited notify budget, ONCE never continues
        assert!(!should_continue(Interval::Once, 0, 1));
        assert!(!should_continue(Interval::Once, 5, 1));
    }

    #[test]
    fn notify_limit_caps_recurrence() {
        assert!(should_continue(Interval::Daily, 3, 1));
        assert!(should_continue(Interval::Daily, 3, 2));
        assert!(!should_continue(Interval::Daily, 3, 3));
        assert!(!should_continue(Interval::Daily, 3, 4));
    }

    #[test]
    fn zero_limit_means_unlimited() {
        assert!(should_continue(Interval::Weekly, 0, 1_000));
    }

    #[test]
    fn suppression_any_vs_all() {
        let m1 = Uuid::new_v4();
        let m2 = Uuid::new_v4();
        let modules = vec![m1, m2];
        let mut completed = HashSet::new();
        completed.insert(m1);

        assert!(suppression_reached(
            ConditionOperator::Any,
            &modules,
            &completed
        ));
        assert!(!suppression_reached(
            ConditionOperator::All,
            &modules,
            &completed
        ));

        completed.insert(m2);
        assert!(suppression_reached(
            ConditionOperator::All,
            &modules,
            &completed
        ));
    }

    #[test]
    fn no_suppress_modules_never_suppresses() {
        assert!(!suppression_reached(
            ConditionOperator::All,
            &[],
            &HashSet::new()
        ));
    }
}
