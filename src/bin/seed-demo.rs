/// Seed a demo course with users, a notification template and an instance,
/// then fire the enrolment hooks so schedules get queued. Intended for local
/// environments only.
///
/// Usage: seed-demo

use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde_json::json;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use coursenotify_api::config::Config;
use coursenotify_api::models::condition::{ConditionConfig, ConditionStatus};
use coursenotify_api::models::template::{Interval, NewTemplate, NotificationConfig};
use coursenotify_api::services::conditions::ConditionEngine;
use coursenotify_api::services::events::EventService;
use coursenotify_api::services::instances::InstanceService;
use coursenotify_api::services::templates::TemplateService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    coursenotify_api::db::run_migrations(&pool).await?;

    let course_id = create_course(&pool).await?;
    let teacher_id = create_user(&pool, "teacher@demo.test", "Taylor", "Nguyen").await?;
    let alice_id = create_user(&pool, "alice@demo.test", "Alice", "Martin").await?;
    let bob_id = create_user(&pool, "bob@demo.test", "Bob", "Tremblay").await?;

    enrol(&pool, course_id, teacher_id, "teacher").await?;
    enrol(&pool, course_id, alice_id, "student").await?;
    enrol(&pool, course_id, bob_id, "student").await?;

    let cohort_id = create_cohort(&pool, "Demo cohort", &[alice_id]).await?;
    let session_id = create_module(&pool, course_id, "Kickoff session", true).await?;
    let quiz_id = create_module(&pool, course_id, "Intro quiz", false).await?;

    // Weekly reminder, Monday 09:00, capped at 4 sends, gated on cohort
    // membership, suppressed once the intro quiz is completed.
    let mut conditions = BTreeMap::new();
    conditions.insert(
        "cohort".to_string(),
        ConditionConfig {
            status: ConditionStatus::All,
            upcoming_time: None,
            is_overridden: false,
            additional: json!({ "cohorts": [cohort_id] }),
        },
    );

    let template = TemplateService::create(
        &pool,
        &NewTemplate {
            name: "Weekly course reminder".to_string(),
            notes: Some("Demo data".to_string()),
            config: NotificationConfig {
                subject: "Your weekly course update".to_string(),
                header_content: "<p>Here is what's happening this week.</p>".to_string(),
                static_content: "<p>Keep working through the course material.</p>".to_string(),
                notify_interval: Interval::Weekly,
                weekday: Some(1),
                time_of_day: NaiveTime::from_hms_opt(9, 0, 0),
                notify_limit: 4,
                suppress_modules: vec![quiz_id],
                dynamic_module: Some(quiz_id),
                anchor_module: Some(session_id),
                ..NotificationConfig::default()
            },
            conditions,
            visible: true,
            status: true,
            category_id: None,
        },
    )
    .await?;
    tracing::info!("Created template {}", template.id);

    let engine = ConditionEngine::new();
    let instance = InstanceService::create(&pool, &engine, template.id, course_id).await?;
    tracing::info!("Created instance {} on course {}", instance.id, course_id);

    // enrolment hooks queue the qualifying users (Alice is in the cohort)
    for user_id in [alice_id, bob_id] {
        EventService::user_enrolled(&pool, &engine, course_id, user_id).await?;
    }

    tracing::info!("Demo data seeded");
    Ok(())
}

async fn create_course(pool: &PgPool) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO courses (fullname, shortname)
         VALUES ('Demo Course 101', 'demo101')
         ON CONFLICT (shortname) DO UPDATE SET fullname = EXCLUDED.fullname
         RETURNING id",
    )
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn create_user(
    pool: &PgPool,
    email: &str,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO users (email, first_name, last_name)
         VALUES ($1, $2, $3)
         ON CONFLICT (email) DO UPDATE SET first_name = EXCLUDED.first_name
         RETURNING id",
    )
    .bind(email)
    .bind(first_name)
    .bind(last_name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn enrol(pool: &PgPool, course_id: Uuid, user_id: Uuid, role: &str) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO enrolments (course_id, user_id, role)
         VALUES ($1, $2, $3)
         ON CONFLICT (course_id, user_id) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(course_id)
    .bind(user_id)
    .bind(role)
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_cohort(pool: &PgPool, name: &str, members: &[Uuid]) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query_scalar("INSERT INTO cohorts (name) VALUES ($1) RETURNING id")
        .bind(name)
        .fetch_one(pool)
        .await?;
    for user_id in members {
        sqlx::query(
            "INSERT INTO cohort_members (cohort_id, user_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;
    }
    Ok(id)
}

async fn create_module(
    pool: &PgPool,
    course_id: Uuid,
    name: &str,
    with_start: bool,
) -> anyhow::Result<Uuid> {
    let start = with_start.then(|| chrono::Utc::now() + chrono::Duration::days(7));
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO course_modules (course_id, name, intro, start_time)
         VALUES ($1, $2, $3, $4)
         RETURNING id",
    )
    .bind(course_id)
    .bind(name)
    .bind(format!("<p>{name} — details inside the course.</p>"))
    .bind(start)
    .fetch_one(pool)
    .await?;
    Ok(id)
}
