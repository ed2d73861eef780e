use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Course {
    pub id: Uuid,
    pub fullname: String,
    pub shortname: String,
    pub category_id: Option<Uuid>,
    pub visible: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Course activity. `start_time` is set for session-style modules and is the
/// anchor consulted by BEFORE/AFTER delays; `intro` feeds dynamic content.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourseModule {
    pub id: Uuid,
    pub course_id: Uuid,
    pub name: String,
    pub intro: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
