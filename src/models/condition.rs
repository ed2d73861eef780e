use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How a condition applies to the users of a course.
/// `Future` only gates users enrolled after the condition's `upcoming_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "i16", into = "i16")]
pub enum ConditionStatus {
    #[default]
    Disabled,
    All,
    Future,
}

impl From<i16> for ConditionStatus {
    fn from(v: i16) -> Self {
        match v {
            1 => ConditionStatus::All,
            2 => ConditionStatus::Future,
            _ => ConditionStatus::Disabled,
        }
    }
}

impl From<ConditionStatus> for i16 {
    fn from(v: ConditionStatus) -> Self {
        match v {
            ConditionStatus::Disabled => 0,
            ConditionStatus::All => 1,
            ConditionStatus::Future => 2,
        }
    }
}

/// Aggregation rule across an instance's active conditions (and across
/// suppression modules).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    All,
    #[default]
    Any,
}

impl std::fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionOperator::All => "all",
            ConditionOperator::Any => "any",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ConditionOperator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ConditionOperator::All),
            "any" => Ok(ConditionOperator::Any),
            _ => Err(anyhow::anyhow!("Unknown operator: {s}")),
        }
    }
}

/// One condition entry, either inherited from the template's trigger set or
/// explicitly overridden on the instance (`is_overridden`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConditionConfig {
    pub status: ConditionStatus,
    /// Only meaningful when `status` is `Future`: users enrolled before this
    /// cutoff are exempt.
    pub upcoming_time: Option<DateTime<Utc>>,
    pub is_overridden: bool,
    /// Plugin-specific payload (cohort ids, module ids, ...).
    pub additional: serde_json::Value,
}

/// Raw `instance_conditions` row.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceConditionRow {
    pub instance_id: Uuid,
    pub component: String,
    pub status: i16,
    pub upcoming_time: Option<DateTime<Utc>>,
    pub additional: serde_json::Value,
    pub is_overridden: bool,
}

impl From<InstanceConditionRow> for ConditionConfig {
    fn from(row: InstanceConditionRow) -> Self {
        ConditionConfig {
            status: row.status.into(),
            upcoming_time: row.upcoming_time,
            is_overridden: row.is_overridden,
            additional: row.additional,
        }
    }
}
