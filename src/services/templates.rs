use anyhow::Context;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::models::template::{NewTemplate, Template};
use crate::services::conditions::ConditionEngine;
use crate::services::events::EventService;
use crate::services::schedule_store::ScheduleStore;

const TEMPLATE_COLUMNS: &str = "id, name, notes, recipients, cc, bcc, subject, header_content, \
     static_content, footer_content, sender, sender_email, notify_interval, weekday, month_date, \
     time_of_day, delay, delay_duration_secs, notify_limit, suppress_modules, suppress_operator, \
     dynamic_module, anchor_module, trigger_conditions, trigger_operator, visible, status, \
     category_id, created_at, updated_at";

pub struct TemplateService;

impl TemplateService {
    pub async fn get(pool: &PgPool, template_id: Uuid) -> anyhow::Result<Template> {
        let template = sqlx::query_as::<_, Template>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
        ))
        .bind(template_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ConfigError::TemplateNotFound(template_id))?;
        Ok(template)
    }

    pub async fn list(pool: &PgPool) -> anyhow::Result<Vec<Template>> {
        let templates = sqlx::query_as::<_, Template>(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY created_at ASC"
        ))
        .fetch_all(pool)
        .await?;
        Ok(templates)
    }

    pub async fn create(pool: &PgPool, new: &NewTemplate) -> anyhow::Result<Template> {
        let c = &new.config;
        let conditions = serde_json::to_value(&new.conditions)
            .context("serialize trigger conditions")?;

        let template = sqlx::query_as::<_, Template>(&format!(
            "INSERT INTO templates
                 (name, notes, recipients, cc, bcc, subject, header_content, static_content,
                  footer_content, sender, sender_email, notify_interval, weekday, month_date,
                  time_of_day, delay, delay_duration_secs, notify_limit, suppress_modules,
                  suppress_operator, dynamic_module, anchor_module, trigger_conditions,
                  trigger_operator, visible, status, category_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                     $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27)
             RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(&new.notes)
        .bind(&c.recipients)
        .bind(&c.cc)
        .bind(&c.bcc)
        .bind(&c.subject)
        .bind(&c.header_content)
        .bind(&c.static_content)
        .bind(&c.footer_content)
        .bind(c.sender.to_string())
        .bind(&c.sender_email)
        .bind(c.notify_interval.to_string())
        .bind(c.weekday.map(i16::from))
        .bind(c.month_date.map(i16::from))
        .bind(c.time_of_day)
        .bind(c.delay.to_string())
        .bind(c.delay_duration_secs)
        .bind(c.notify_limit)
        .bind(&c.suppress_modules)
        .bind(c.suppress_operator.to_string())
        .bind(c.dynamic_module)
        .bind(c.anchor_module)
        .bind(conditions)
        .bind(c.trigger_operator.to_string())
        .bind(new.visible)
        .bind(new.status)
        .bind(new.category_id)
        .fetch_one(pool)
        .await
        .context("insert template")?;

        Ok(template)
    }

    /// Replace a template's defaults. Every instance inheriting a field picks
    /// the new value up immediately; overridden fields are untouched.
    pub async fn update(
        pool: &PgPool,
        engine: &ConditionEngine,
        template_id: Uuid,
        new: &NewTemplate,
    ) -> anyhow::Result<Template> {
        let c = &new.config;
        let conditions = serde_json::to_value(&new.conditions)
            .context("serialize trigger conditions")?;

        let template = sqlx::query_as::<_, Template>(&format!(
            "UPDATE templates SET
                 name = $2, notes = $3, recipients = $4, cc = $5, bcc = $6, subject = $7,
                 header_content = $8, static_content = $9, footer_content = $10, sender = $11,
                 sender_email = $12, notify_interval = $13, weekday = $14, month_date = $15,
                 time_of_day = $16, delay = $17, delay_duration_secs = $18, notify_limit = $19,
                 suppress_modules = $20, suppress_operator = $21, dynamic_module = $22,
                 anchor_module = $23, trigger_conditions = $24, trigger_operator = $25,
                 visible = $26, status = $27, category_id = $28, updated_at = NOW()
             WHERE id = $1
             RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(template_id)
        .bind(&new.name)
        .bind(&new.notes)
        .bind(&c.recipients)
        .bind(&c.cc)
        .bind(&c.bcc)
        .bind(&c.subject)
        .bind(&c.header_content)
        .bind(&c.static_content)
        .bind(&c.footer_content)
        .bind(c.sender.to_string())
        .bind(&c.sender_email)
        .bind(c.notify_interval.to_string())
        .bind(c.weekday.map(i16::from))
        .bind(c.month_date.map(i16::from))
        .bind(c.time_of_day)
        .bind(c.delay.to_string())
        .bind(c.delay_duration_secs)
        .bind(c.notify_limit)
        .bind(&c.suppress_modules)
        .bind(c.suppress_operator.to_string())
        .bind(c.dynamic_module)
        .bind(c.anchor_module)
        .bind(conditions)
        .bind(c.trigger_operator.to_string())
        .bind(new.visible)
        .bind(new.status)
        .bind(new.category_id)
        .fetch_optional(pool)
        .await?
        .ok_or(ConfigError::TemplateNotFound(template_id))?;

        EventService::template_saved(pool, engine, template_id).await?;
        Ok(template)
    }

    /// Delete a template. Its instances keep their identity but lose all
    /// override and condition rows, get disabled, and their queued schedules
    /// are parked.
    pub async fn delete(pool: &PgPool, template_id: Uuid) -> anyhow::Result<()> {
        let instance_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM instances WHERE template_id = $1")
                .bind(template_id)
                .fetch_all(pool)
                .await?;

        let mut tx = pool.begin().await.context("begin template delete")?;

        sqlx::query(
            "DELETE FROM instance_overrides WHERE instance_id = ANY($1)",
        )
        .bind(&instance_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM instance_conditions WHERE instance_id = ANY($1)",
        )
        .bind(&instance_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE instances SET status = FALSE, updated_at = NOW() WHERE id = ANY($1)")
            .bind(&instance_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(template_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        for instance_id in instance_ids {
            ScheduleStore::disable_for_instance(pool, instance_id).await?;
        }
        Ok(())
    }
}
