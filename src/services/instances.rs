use anyhow::Context;
use serde_json::Value;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::condition::{ConditionConfig, InstanceConditionRow};
use crate::models::instance::{EffectiveInstance, Instance};
use crate::models::template::{NotificationConfig, Template};
use crate::services::conditions::ConditionEngine;
use crate::services::events::EventService;
use crate::services::overrides::OverrideResolver;
use crate::services::schedule_store::ScheduleStore;
use crate::services::templates::TemplateService;

const INSTANCE_COLUMNS: &str =
    "id, template_id, course_id, status, created_at, updated_at";

pub struct InstanceService;

impl InstanceService {
    pub async fn get(pool: &PgPool, instance_id: Uuid) -> anyhow::Result<Instance> {
        let instance = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = $1"
        ))
        .bind(instance_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ConfigError::InstanceNotFound(instance_id))?;
        Ok(instance)
    }

    pub async fn list_for_course(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Vec<Instance>> {
        let instances = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM instances WHERE course_id = $1 ORDER BY created_at ASC"
        ))
        .bind(course_id)
        .fetch_all(pool)
        .await?;
        Ok(instances)
    }

    /// Attach a template to a course. Schedules existing qualifying users
    /// right away via the saved hook.
    pub async fn create(
        pool: &PgPool,
        engine: &ConditionEngine,
        template_id: Uuid,
        course_id: Uuid,
    ) -> anyhow::Result<Instance> {
        // fail fast on a dangling reference
        TemplateService::get(pool, template_id).await?;

        let instance = sqlx::query_as::<_, Instance>(&format!(
            "INSERT INTO instances (template_id, course_id)
             VALUES ($1, $2)
             RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(template_id)
        .bind(course_id)
        .fetch_one(pool)
        .await
        .context("insert instance")?;

        EventService::instance_saved(pool, engine, instance.id).await?;
        Ok(instance)
    }

    /// Resolve the instance's overrides against its template, field by field.
    /// The returned value is what every consumer works from; callers pass it
    /// along instead of re-reading global state.
    pub async fn effective(
        pool: &PgPool,
        instance_id: Uuid,
    ) -> anyhow::Result<EffectiveInstance> {
        let instance = Self::get(pool, instance_id).await?;
        let template_id = instance
            .template_id
            .ok_or(ConfigError::TemplateDetached(instance_id))?;
        let template = TemplateService::get(pool, template_id).await?;
        let overrides = OverrideResolver::load(pool, instance_id).await?;

        let config = Self::merge_config(&template, &overrides)?;
        let conditions = Self::merge_conditions(pool, &template, instance_id).await?;

        Ok(EffectiveInstance {
            template_visible: template.visible,
            template_enabled: template.status,
            instance,
            config,
            conditions,
        })
    }

    fn merge_config(
        template: &Template,
        overrides: &HashMap<String, Option<Value>>,
    ) -> anyhow::Result<NotificationConfig> {
        let base = serde_json::to_value(template.default_config())
            .context("serialize template defaults")?;
        let base = base
            .as_object()
            .cloned()
            .unwrap_or_default();
        let merged = OverrideResolver::resolve(overrides, &base);
        let config = serde_json::from_value(Value::Object(merged))
            .context("deserialize merged notification config")?;
        Ok(config)
    }

    /// Condition sets merge through the same resolver, keyed by component.
    async fn merge_conditions(
        pool: &PgPool,
        template: &Template,
        instance_id: Uuid,
    ) -> anyhow::Result<BTreeMap<String, ConditionConfig>> {
        let rows = sqlx::query_as::<_, InstanceConditionRow>(
            "SELECT instance_id, component, status, upcoming_time, additional, is_overridden
             FROM instance_conditions WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_all(pool)
        .await?;

        let mut condition_overrides: HashMap<String, Option<Value>> = HashMap::new();
        for row in rows {
            let config = ConditionConfig::from(row.clone());
            condition_overrides.insert(
                row.component,
                Some(serde_json::to_value(config).context("serialize condition override")?),
            );
        }

        let base = template
            .trigger_conditions
            .as_object()
            .cloned()
            .unwrap_or_default();
        let merged = OverrideResolver::resolve(&condition_overrides, &base);

        let conditions = serde_json::from_value(Value::Object(merged))
            .context("deserialize merged condition set")?;
        Ok(conditions)
    }

    /// Write a batch of field overrides in one transaction, then re-sync the
    /// instance's schedules. `None` values store the explicit-clear marker.
    pub async fn save_overrides(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
        changes: &HashMap<String, Option<Value>>,
    ) -> anyhow::Result<()> {
        for field in changes.keys() {
            if !NotificationConfig::is_valid_field(field) {
                return Err(ConfigError::UnknownField(field.clone()).into());
            }
        }
        Self::get(pool, instance_id).await?;

        let mut tx = pool.begin().await.context("begin override save")?;
        for (field, value) in changes {
            OverrideResolver::set(&mut *tx, instance_id, field, value.as_ref()).await?;
        }
        sqlx::query("UPDATE instances SET updated_at = NOW() WHERE id = $1")
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        EventService::instance_saved(pool, engine, instance_id).await?;
        Ok(())
    }

    /// Un-check overrides: the fields inherit from the template again.
    pub async fn remove_overrides(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
        fields: &[String],
    ) -> anyhow::Result<()> {
        OverrideResolver::remove_overrides(pool, instance_id, fields).await?;
        EventService::instance_saved(pool, engine, instance_id).await?;
        Ok(())
    }

    /// Set or replace one condition override on the instance.
    pub async fn set_condition(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
        component: &str,
        config: &ConditionConfig,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO instance_conditions
                 (instance_id, component, status, upcoming_time, additional, is_overridden)
             VALUES ($1, $2, $3, $4, $5, TRUE)
             ON CONFLICT (instance_id, component) DO UPDATE SET
                 status = EXCLUDED.status,
                 upcoming_time = EXCLUDED.upcoming_time,
                 additional = EXCLUDED.additional,
                 is_overridden = TRUE",
        )
        .bind(instance_id)
        .bind(component)
        .bind(i16::from(config.status))
        .bind(config.upcoming_time)
        .bind(&config.additional)
        .execute(pool)
        .await?;

        EventService::instance_saved(pool, engine, instance_id).await?;
        Ok(())
    }

    /// Drop a condition override: the component inherits from the template's
    /// trigger set again.
    pub async fn remove_condition(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
        component: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM instance_conditions WHERE instance_id = $1 AND component = $2",
        )
        .bind(instance_id)
        .bind(component)
        .execute(pool)
        .await?;

        EventService::instance_saved(pool, engine, instance_id).await?;
        Ok(())
    }

    /// Enable or disable the instance.
    pub async fn set_status(
        pool: &PgPool,
        engine: &ConditionEngine,
        instance_id: Uuid,
        enabled: bool,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE instances SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(instance_id)
            .bind(enabled)
            .execute(pool)
            .await?;

        if enabled {
            EventService::instance_saved(pool, engine, instance_id).await?;
        } else {
            ScheduleStore::disable_for_instance(pool, instance_id).await?;
        }
        Ok(())
    }

    /// Delete the instance; overrides, condition rows and schedules go with
    /// it (FK cascade).
    pub async fn delete(pool: &PgPool, instance_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(instance_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
