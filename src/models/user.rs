use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Role archetypes an enrolment can carry.
pub const ENROL_ROLES: &[&str] = &["student", "teacher", "manager"];

/// DB row struct. `role` and `status` stored as TEXT to sidestep Postgres
/// enum OID pinning in sqlx.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrolment {
    pub id: Uuid,
    pub course_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub status: String,
    pub time_created: DateTime<Utc>,
}

impl Enrolment {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}
