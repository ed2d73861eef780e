use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::condition::{ConditionConfig, ConditionOperator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::Once => "once",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Interval {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "once" => Ok(Interval::Once),
            "daily" => Ok(Interval::Daily),
            "weekly" => Ok(Interval::Weekly),
            "monthly" => Ok(Interval::Monthly),
            _ => Err(anyhow::anyhow!("Unknown interval: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DelayKind {
    #[default]
    None,
    Before,
    After,
}

impl std::fmt::Display for DelayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DelayKind::None => "none",
            DelayKind::Before => "before",
            DelayKind::After => "after",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DelayKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(DelayKind::None),
            "before" => Ok(DelayKind::Before),
            "after" => Ok(DelayKind::After),
            _ => Err(anyhow::anyhow!("Unknown delay kind: {s}")),
        }
    }
}

/// Who the notification appears to come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SenderPolicy {
    #[default]
    CourseTeacher,
    GroupTeacher,
    TenantRole,
    CustomEmail,
}

impl std::fmt::Display for SenderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SenderPolicy::CourseTeacher => "course_teacher",
            SenderPolicy::GroupTeacher => "group_teacher",
            SenderPolicy::TenantRole => "tenant_role",
            SenderPolicy::CustomEmail => "custom_email",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SenderPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course_teacher" => Ok(SenderPolicy::CourseTeacher),
            "group_teacher" => Ok(SenderPolicy::GroupTeacher),
            "tenant_role" => Ok(SenderPolicy::TenantRole),
            "custom_email" => Ok(SenderPolicy::CustomEmail),
            _ => Err(anyhow::anyhow!("Unknown sender policy: {s}")),
        }
    }
}

/// The merged, per-instance notification configuration. Every field here can
/// be overridden individually by an instance; serde names double as the
/// override-row field keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Role archetypes receiving the notification.
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub header_content: String,
    pub static_content: String,
    pub footer_content: String,
    pub sender: SenderPolicy,
    pub sender_email: Option<String>,
    pub notify_interval: Interval,
    /// ISO weekday (Monday = 1), for weekly intervals.
    pub weekday: Option<u8>,
    /// Day of month 1..=31; 31 means "last day of the month".
    pub month_date: Option<u8>,
    pub time_of_day: Option<NaiveTime>,
    pub delay: DelayKind,
    pub delay_duration_secs: i64,
    /// 0 = unlimited.
    pub notify_limit: i32,
    pub suppress_modules: Vec<Uuid>,
    pub suppress_operator: ConditionOperator,
    pub dynamic_module: Option<Uuid>,
    /// Session-style module whose start time anchors BEFORE/AFTER delays.
    pub anchor_module: Option<Uuid>,
    pub trigger_operator: ConditionOperator,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            recipients: vec!["student".to_string()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            header_content: String::new(),
            static_content: String::new(),
            footer_content: String::new(),
            sender: SenderPolicy::CourseTeacher,
            sender_email: None,
            notify_interval: Interval::Once,
            weekday: None,
            month_date: None,
            time_of_day: None,
            delay: DelayKind::None,
            delay_duration_secs: 0,
            notify_limit: 0,
            suppress_modules: Vec::new(),
            suppress_operator: ConditionOperator::Any,
            dynamic_module: None,
            anchor_module: None,
            trigger_operator: ConditionOperator::Any,
        }
    }
}

impl NotificationConfig {
    /// The valid override-row field keys, matching this struct's serde names.
    pub const FIELDS: &'static [&'static str] = &[
        "recipients",
        "cc",
        "bcc",
        "subject",
        "header_content",
        "static_content",
        "footer_content",
        "sender",
        "sender_email",
        "notify_interval",
        "weekday",
        "month_date",
        "time_of_day",
        "delay",
        "delay_duration_secs",
        "notify_limit",
        "suppress_modules",
        "suppress_operator",
        "dynamic_module",
        "anchor_module",
        "trigger_operator",
    ];

    pub fn is_valid_field(field: &str) -> bool {
        Self::FIELDS.contains(&field)
    }
}

/// DB row struct. Enum-ish columns are TEXT and parsed on the way out
/// (same OID-mismatch avoidance as the user role column).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub notes: Option<String>,
    pub recipients: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub header_content: String,
    pub static_content: String,
    pub footer_content: String,
    pub sender: String,
    pub sender_email: Option<String>,
    pub notify_interval: String,
    pub weekday: Option<i16>,
    pub month_date: Option<i16>,
    pub time_of_day: Option<NaiveTime>,
    pub delay: String,
    pub delay_duration_secs: i64,
    pub notify_limit: i32,
    pub suppress_modules: Vec<Uuid>,
    pub suppress_operator: String,
    pub dynamic_module: Option<Uuid>,
    pub anchor_module: Option<Uuid>,
    pub trigger_conditions: serde_json::Value,
    pub trigger_operator: String,
    pub visible: bool,
    pub status: bool,
    pub category_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// The template's defaults as a merged-config base record.
    pub fn default_config(&self) -> NotificationConfig {
        NotificationConfig {
            recipients: self.recipients.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            subject: self.subject.clone(),
            header_content: self.header_content.clone(),
            static_content: self.static_content.clone(),
            footer_content: self.footer_content.clone(),
            sender: self.sender.parse().unwrap_or_default(),
            sender_email: self.sender_email.clone(),
            notify_interval: self.notify_interval.parse().unwrap_or_default(),
            weekday: self.weekday.map(|d| d as u8),
            month_date: self.month_date.map(|d| d as u8),
            time_of_day: self.time_of_day,
            delay: self.delay.parse().unwrap_or_default(),
            delay_duration_secs: self.delay_duration_secs,
            notify_limit: self.notify_limit,
            suppress_modules: self.suppress_modules.clone(),
            suppress_operator: self.suppress_operator.parse().unwrap_or_default(),
            dynamic_module: self.dynamic_module,
            anchor_module: self.anchor_module,
            trigger_operator: self.trigger_operator.parse().unwrap_or_default(),
        }
    }

    /// The template's default trigger-condition set, keyed by component name.
    pub fn default_conditions(&self) -> BTreeMap<String, ConditionConfig> {
        serde_json::from_value(self.trigger_conditions.clone()).unwrap_or_default()
    }
}

/// Payload for creating a new template.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub notes: Option<String>,
    pub config: NotificationConfig,
    pub conditions: BTreeMap<String, ConditionConfig>,
    pub visible: bool,
    pub status: bool,
    pub category_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_roundtrips_through_json() {
        let config = NotificationConfig {
            subject: "Weekly digest".to_string(),
            notify_interval: Interval::Weekly,
            weekday: Some(1),
            time_of_day: NaiveTime::from_hms_opt(9, 0, 0),
            notify_limit: 4,
            delay: DelayKind::After,
            delay_duration_secs: 3600,
            ..NotificationConfig::default()
        };

        let value = serde_json::to_value(&config).unwrap();
        let back: NotificationConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        // a merged record with cleared fields deserializes to the defaults
        let config: NotificationConfig =
            serde_json::from_value(json!({ "subject": "Hello" })).unwrap();
        assert_eq!(config.subject, "Hello");
        assert_eq!(config.notify_interval, Interval::Once);
        assert_eq!(config.notify_limit, 0);
        assert_eq!(config.recipients, vec!["student".to_string()]);
        assert!(config.cc.is_empty());
    }

    #[test]
    fn every_config_field_is_overridable() {
        let value = serde_json::to_value(NotificationConfig::default()).unwrap();
        let map = value.as_object().unwrap();
        for field in NotificationConfig::FIELDS {
            assert!(map.contains_key(*field), "missing serde field: {field}");
        }
        assert_eq!(map.len(), NotificationConfig::FIELDS.len());
    }
}
