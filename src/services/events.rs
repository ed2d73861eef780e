use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::instance::EffectiveInstance;
use crate::services::conditions::ConditionEngine;
use crate::services::enrollment::EnrollmentService;
use crate::services::instances::InstanceService;
use crate::services::recurrence::{self, DelaySpec, IntervalSpec};
use crate::services::schedule_store::ScheduleStore;

/// Entry points the host wires to its enrolment and editing events. Each one
/// funnels into the same qualification-check-and-schedule path, so repeated
/// invocations stay idempotent.
pub struct EventService;

impl EventService {
    /// A user was enrolled into a course: schedule them for every live
    /// instance they qualify for. New users are subject to FUTURE conditions.
    pub async fn user_enrolled(
        pool: &PgPool,
        engine: &ConditionEngine,
        course_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<()> {
        for instance in InstanceService::list_for_course(pool, course_id).await? {
            let effective = match InstanceService::effective(pool, instance.id).await {
                Ok(e) => e,
                // detached instance: nothing to schedule
                Err(e) if e.downcast_ref::<ConfigError>().is_some() => continue,
                Err(e) => return Err(e),
            };
            if !effective.is_enabled() {
                continue;
            }
            Self::sync_user(pool, engine, &effective, user_id, true, true).await?;
        }
        Ok(())
    }

    /// Unenrolment removes active schedules; send history stays for auditing.
    pub async fn user_unenrolled(
        pool: &PgPool,
        course_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<()> {
        for instance in InstanceService::list_for_course(pool, course_id).await? {
            ScheduleStore::remove(pool, instance.id, user_id).await?;
        }
        Ok(())
    }

    /// Re-evaluate every enrolled user after an instance edit. Users who no
    /// longer qualify are parked, qualifying users are re-armed in place, and
    /// pairs with only SENT history are left alone (this is a re-sync, not a
    /// new-schedule request).
    pub async fn instance_saved(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
    ) -> anyhow::Result<()> {
        let effective = InstanceService::effective(pool, instance_id).await?;
        if !effective.is_enabled() {
            ScheduleStore::disable_for_instance(pool, instance_id).await?;
            return Ok(());
        }

        let users =
            EnrollmentService::active_enrolled_users(pool, effective.instance.course_id).await?;
        let mut scheduled = 0usize;
        for user in &users {
            if Self::sync_user(pool, engine, &effective, user.id, false, false)
                .await?
                .is_some()
            {
                scheduled += 1;
            }
        }
        info!(
            "Instance {instance_id}: re-synced {} user(s), {scheduled} queued",
            users.len()
        );
        Ok(())
    }

    /// Template edits fan out to every attached instance.
    pub async fn template_saved(
        pool: &PgPool,
        engine: &ConditionEngine,
        template_id: Uuid,
    ) -> anyhow::Result<()> {
        let instance_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM instances WHERE template_id = $1")
                .bind(template_id)
                .fetch_all(pool)
                .await?;
        for instance_id in instance_ids {
            Self::instance_saved(pool, engine, instance_id).await?;
        }
        Ok(())
    }

    /// The qualification-check-and-schedule path. Returns the schedule id
    /// when the user ends up queued.
    pub async fn sync_user(
        pool: &PgPool,
        engine: &ConditionEngine,
        effective: &EffectiveInstance,
        user_id: Uuid,
        is_new_user: bool,
        is_new_schedule_request: bool,
    ) -> anyhow::Result<Option<Uuid>> {
        let instance_id = effective.instance.id;
        let course_id = effective.instance.course_id;
        let config = &effective.config;

        // only recipient roles are ever scheduled
        let role = EnrollmentService::enrolment_role(pool, course_id, user_id).await?;
        let is_recipient = role
            .map(|r| config.recipients.contains(&r))
            .unwrap_or(false);
        if !is_recipient {
            ScheduleStore::disable(pool, instance_id, user_id).await?;
            return Ok(None);
        }

        if !engine.evaluate(pool, effective, user_id, is_new_user).await? {
            debug!("User {user_id} no longer qualifies for instance {instance_id}");
            ScheduleStore::disable(pool, instance_id, user_id).await?;
            return Ok(None);
        }

        let anchor = match config.anchor_module {
            Some(module_id) => EnrollmentService::module_start_time(pool, module_id).await?,
            None => None,
        };

        let next = recurrence::next_run(
            &IntervalSpec::from_config(config),
            None,
            None,
            &DelaySpec::from_config(config),
            anchor,
            Utc::now(),
        );

        let notify_count = ScheduleStore::active_row(pool, instance_id, user_id)
            .await?
            .map(|row| row.notify_count)
            .unwrap_or(0);

        ScheduleStore::upsert(
            pool,
            instance_id,
            user_id,
            next,
            config.notify_interval,
            notify_count,
            is_new_schedule_request,
        )
        .await
    }
}
