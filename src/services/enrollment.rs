use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::user::User;

const USER_COLUMNS: &str = "u.id, u.email, u.first_name, u.last_name, u.is_active, u.created_at";

/// Read-side boundary over enrolments, roles and course activities.
pub struct EnrollmentService;

impl EnrollmentService {
    /// Active, non-suspended users holding any of the given roles in a course.
    pub async fn users_with_roles(
        pool: &PgPool,
        course_id: Uuid,
        roles: &[String],
    ) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u
             JOIN enrolments e ON e.user_id = u.id
             WHERE e.course_id = $1
               AND e.role = ANY($2)
               AND e.status = 'active'
               AND u.is_active = TRUE
             ORDER BY u.created_at ASC"
        ))
        .bind(course_id)
        .bind(roles)
        .fetch_all(pool)
        .await?;
        Ok(users)
    }

    pub async fn active_enrolled_users(
        pool: &PgPool,
        course_id: Uuid,
    ) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u
             JOIN enrolments e ON e.user_id = u.id
             WHERE e.course_id = $1 AND e.status = 'active' AND u.is_active = TRUE
             ORDER BY u.created_at ASC"
        ))
        .bind(course_id)
        .fetch_all(pool)
        .await?;
        Ok(users)
    }

    pub async fn enrolment_create_time(
        pool: &PgPool,
        course_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let time: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT time_created FROM enrolments WHERE course_id = $1 AND user_id = $2",
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(time)
    }

    pub async fn enrolment_role(
        pool: &PgPool,
        course_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<String>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM enrolments
             WHERE course_id = $1 AND user_id = $2 AND status = 'active'",
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(role)
    }

    /// First teacher-role user of the course, by enrolment age.
    pub async fn course_teacher(pool: &PgPool, course_id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u
             JOIN enrolments e ON e.user_id = u.id
             WHERE e.course_id = $1 AND e.role = 'teacher' AND e.status = 'active'
               AND u.is_active = TRUE
             ORDER BY e.time_created ASC
             LIMIT 1"
        ))
        .bind(course_id)
        .fetch_optional(pool)
        .await?;
        Ok(user)
    }

    /// A teacher sharing a course group with the user. Callers fall back to
    /// the course teacher when the user has no grouped teacher.
    pub async fn group_teacher(
        pool: &PgPool,
        course_id: Uuid,
        user_id: Uuid,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users u
             JOIN enrolments e ON e.user_id = u.id
             JOIN group_members gm ON gm.user_id = u.id
             JOIN course_groups g ON g.id = gm.group_id
             WHERE g.course_id = $1
               AND e.course_id = $1 AND e.role = 'teacher' AND e.status = 'active'
               AND u.is_active = TRUE
               AND gm.group_id IN (
                   SELECT group_id FROM group_members WHERE user_id = $2
               )
             ORDER BY e.time_created ASC
             LIMIT 1"
        ))
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(user)
    }

    /// Start time of a session-style module, the external anchor consulted
    /// by BEFORE/AFTER delays.
    pub async fn module_start_time(
        pool: &PgPool,
        module_id: Uuid,
    ) -> anyhow::Result<Option<DateTime<Utc>>> {
        let time: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT start_time FROM course_modules WHERE id = $1")
                .bind(module_id)
                .fetch_optional(pool)
                .await?;
        Ok(time.flatten())
    }

    /// Completed module ids for one user, limited to the given set.
    pub async fn completed_among(
        pool: &PgPool,
        user_id: Uuid,
        module_ids: &[Uuid],
    ) -> anyhow::Result<Vec<Uuid>> {
        let completed: Vec<Uuid> = sqlx::query_scalar(
            "SELECT module_id FROM module_completions
             WHERE user_id = $1 AND module_id = ANY($2)",
        )
        .bind(user_id)
        .bind(module_ids)
        .fetch_all(pool)
        .await?;
        Ok(completed)
    }
}
