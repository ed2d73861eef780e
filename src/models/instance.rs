use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::condition::{ConditionConfig, ConditionOperator};
use crate::models::template::NotificationConfig;

/// A template bound to one course. Configuration lives on the template plus
/// the sparse override rows; this row only carries identity and status.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Instance {
    pub id: Uuid,
    pub template_id: Option<Uuid>,
    pub course_id: Uuid,
    pub status: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An instance with its overrides resolved against the template: the record
/// every consumer (condition engine, dispatch, events) works from. Callers
/// hold and pass this value; nothing is cached process-wide.
#[derive(Debug, Clone)]
pub struct EffectiveInstance {
    pub instance: Instance,
    pub template_visible: bool,
    pub template_enabled: bool,
    pub config: NotificationConfig,
    pub conditions: BTreeMap<String, ConditionConfig>,
}

impl EffectiveInstance {
    pub fn trigger_operator(&self) -> ConditionOperator {
        self.config.trigger_operator
    }

    /// Instance and template are both switched on and the template visible.
    pub fn is_enabled(&self) -> bool {
        self.instance.status && self.template_enabled && self.template_visible
    }
}
