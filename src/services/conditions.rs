use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

use crate::models::condition::{ConditionConfig, ConditionOperator, ConditionStatus};
use crate::models::instance::EffectiveInstance;

/// Everything a condition plugin may read about one user in one course,
/// prefetched in a single pass so the plugins stay pure.
#[derive(Debug, Clone)]
pub struct UserCompletionInfo {
    pub user_id: Uuid,
    pub course_id: Uuid,
    pub cohort_ids: HashSet<Uuid>,
    pub completed_modules: HashSet<Uuid>,
    pub enrolment_created: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

/// A condition plugin answers one question: has this user satisfied this
/// condition. Plugins are stateless; all external data arrives through the
/// prefetched snapshot.
pub trait ConditionPlugin: Send + Sync {
    fn component(&self) -> &'static str;
    fn is_user_completed(&self, config: &ConditionConfig, info: &UserCompletionInfo) -> bool;
    /// Whether the condition is offered when building trigger sets.
    fn include_condition(&self) -> bool {
        true
    }
}

#[derive(Debug, Deserialize, Default)]
struct CohortData {
    #[serde(default)]
    cohorts: Vec<Uuid>,
}

/// Satisfied when the user belongs to any of the configured cohorts.
struct CohortCondition;

impl ConditionPlugin for CohortCondition {
    fn component(&self) -> &'static str {
        "cohort"
    }

    fn is_user_completed(&self, config: &ConditionConfig, info: &UserCompletionInfo) -> bool {
        let data: CohortData =
            serde_json::from_value(config.additional.clone()).unwrap_or_default();
        data.cohorts.iter().any(|c| info.cohort_ids.contains(c))
    }
}

#[derive(Debug, Deserialize)]
struct ActivityCompletionData {
    #[serde(default)]
    modules: Vec<Uuid>,
    #[serde(default = "default_require_all")]
    require_all: bool,
}

fn default_require_all() -> bool {
    true
}

impl Default for ActivityCompletionData {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            require_all: true,
        }
    }
}

/// Satisfied when the configured course activities are completed.
struct ActivityCompletionCondition;

impl ConditionPlugin for ActivityCompletionCondition {
    fn component(&self) -> &'static str {
        "activity_completion"
    }

    fn is_user_completed(&self, config: &ConditionConfig, info: &UserCompletionInfo) -> bool {
        let data: ActivityCompletionData =
            serde_json::from_value(config.additional.clone()).unwrap_or_default();
        if data.modules.is_empty() {
            return false;
        }
        if data.require_all {
            data.modules
                .iter()
                .all(|m| info.completed_modules.contains(m))
        } else {
            data.modules
                .iter()
                .any(|m| info.completed_modules.contains(m))
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct EnrolmentData {
    /// Minimum seconds the user must have been enrolled. 0 = enrolled at all.
    #[serde(default)]
    enrolled_for_secs: i64,
}

/// Satisfied once the user's enrolment is old enough.
struct EnrolmentCondition;

impl ConditionPlugin for EnrolmentCondition {
    fn component(&self) -> &'static str {
        "enrolment"
    }

    fn is_user_completed(&self, config: &ConditionConfig, info: &UserCompletionInfo) -> bool {
        let data: EnrolmentData =
            serde_json::from_value(config.additional.clone()).unwrap_or_default();
        match info.enrolment_created {
            Some(created) => {
                created + chrono::Duration::seconds(data.enrolled_for_secs) <= info.now
            }
            None => false,
        }
    }
}

/// Capability table keyed by component name.
pub struct ConditionRegistry {
    plugins: HashMap<&'static str, Box<dyn ConditionPlugin>>,
}

impl ConditionRegistry {
    pub fn builtin() -> Self {
        let builtin: [Box<dyn ConditionPlugin>; 3] = [
            Box::new(CohortCondition),
            Box::new(ActivityCompletionCondition),
            Box::new(EnrolmentCondition),
        ];
        let mut plugins: HashMap<&'static str, Box<dyn ConditionPlugin>> = HashMap::new();
        for plugin in builtin {
            plugins.insert(plugin.component(), plugin);
        }
        Self { plugins }
    }

    pub fn get(&self, component: &str) -> Option<&dyn ConditionPlugin> {
        self.plugins.get(component).map(|p| p.as_ref())
    }

    pub fn components(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.plugins.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

pub struct ConditionEngine {
    registry: ConditionRegistry,
}

impl Default for ConditionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionEngine {
    pub fn new() -> Self {
        Self {
            registry: ConditionRegistry::builtin(),
        }
    }

    pub fn registry(&self) -> &ConditionRegistry {
        &self.registry
    }

    /// Prefetch the user's cohort memberships, activity completions and
    /// enrolment time for one course.
    pub async fn snapshot(
        pool: &PgPool,
        course_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<UserCompletionInfo> {
        let cohort_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT cohort_id FROM cohort_members WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(pool)
                .await?;

        let completed_modules: Vec<Uuid> = sqlx::query_scalar(
            "SELECT mc.module_id
             FROM module_completions mc
             JOIN course_modules cm ON cm.id = mc.module_id
             WHERE mc.user_id = $1 AND cm.course_id = $2",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_all(pool)
        .await?;

        let enrolment_created: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT time_created FROM enrolments WHERE course_id = $1 AND user_id = $2",
        )
        .bind(course_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(UserCompletionInfo {
            user_id,
            course_id,
            cohort_ids: cohort_ids.into_iter().collect(),
            completed_modules: completed_modules.into_iter().collect(),
            enrolment_created,
            now,
        })
    }

    /// Does this user currently qualify for this instance's notification.
    pub async fn evaluate(
        &self,
        pool: &PgPool,
        effective: &EffectiveInstance,
        user_id: Uuid,
        is_new_user: bool,
    ) -> anyhow::Result<bool> {
        let info =
            Self::snapshot(pool, effective.instance.course_id, user_id, Utc::now()).await?;
        Ok(self.qualifies(
            &effective.conditions,
            effective.trigger_operator(),
            &info,
            is_new_user,
        ))
    }

    /// Aggregate the instance's condition map. Disabled conditions are
    /// skipped. A FUTURE condition does not apply retroactively: an existing
    /// user enrolled before its cutoff is exempt. An instance with zero
    /// active conditions qualifies everyone, whichever operator is set.
    pub fn qualifies(
        &self,
        conditions: &BTreeMap<String, ConditionConfig>,
        operator: ConditionOperator,
        info: &UserCompletionInfo,
        is_new_user: bool,
    ) -> bool {
        let mut enabled = 0usize;
        let mut satisfied = 0usize;

        for (component, config) in conditions {
            if config.status == ConditionStatus::Disabled {
                continue;
            }

            if config.status == ConditionStatus::Future && !is_new_user {
                if let (Some(enrolled), Some(cutoff)) =
                    (info.enrolment_created, config.upcoming_time)
                {
                    if enrolled < cutoff {
                        continue;
                    }
                }
            }

            let Some(plugin) = self.registry.get(component) else {
                warn!("No condition plugin registered for '{component}', skipping");
                continue;
            };

            enabled += 1;
            if plugin.is_user_completed(config, info) {
                satisfied += 1;
                if operator == ConditionOperator::Any {
                    return true;
                }
            }
        }

        if enabled == 0 {
            return true;
        }

        match operator {
            ConditionOperator::All => enabled == satisfied,
            ConditionOperator::Any => satisfied >= 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn info() -> UserCompletionInfo {
        UserCompletionInfo {
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            cohort_ids: HashSet::new(),
            completed_modules: HashSet::new(),
            enrolment_created: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
            now: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    fn cohort_condition(status: ConditionStatus, cohorts: &[Uuid]) -> ConditionConfig {
        ConditionConfig {
            status,
            upcoming_time: None,
            is_overridden: false,
            additional: json!({ "cohorts": cohorts }),
        }
    }

    #[test]
    fn zero_active_conditions_qualifies_everyone() {
        let engine = ConditionEngine::new();
        let mut conditions = BTreeMap::new();
        conditions.insert(
            "cohort".to_string(),
            cohort_condition(ConditionStatus::Disabled, &[Uuid::new_v4()]),
        );

        for op in [ConditionOperator::All, ConditionOperator::Any] {
            assert!(engine.qualifies(&conditions, op, &info(), false));
        }
    }

    #[test]
    fn all_requires_every_condition_any_needs_one() {
        let engine = ConditionEngine::new();
        let member_of = Uuid::new_v4();
        let mut user = info();
        user.cohort_ids.insert(member_of);

        let mut conditions = BTreeMap::new();
        // A: satisfied (user in cohort)
        conditions.insert(
            "cohort".to_string(),
            cohort_condition(ConditionStatus::All, &[member_of]),
        );
        // B: unsatisfied (no completed modules)
        conditions.insert(
            "activity_completion".to_string(),
            ConditionConfig {
                status: ConditionStatus::All,
                upcoming_time: None,
                is_overridden: false,
                additional: json!({ "modules": [Uuid::new_v4()] }),
            },
        );

        assert!(!engine.qualifies(&conditions, ConditionOperator::All, &user, false));
        assert!(engine.qualifies(&conditions, ConditionOperator::Any, &user, false));
    }

    #[test]
    fn future_condition_exempts_users_enrolled_before_cutoff() {
        let engine = ConditionEngine::new();
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        let mut conditions = BTreeMap::new();
        conditions.insert(
            "activity_completion".to_string(),
            ConditionConfig {
                status: ConditionStatus::Future,
                upcoming_time: Some(cutoff),
                is_overridden: false,
                additional: json!({ "modules": [Uuid::new_v4()] }),
            },
        );

        // enrolled 2024-01-10, before the cutoff: exempt even though the
        // module is incomplete and the user is evaluated as not-new
        assert!(engine.qualifies(&conditions, ConditionOperator::All, &info(), false));

        // a new user is subject to the condition regardless of the cutoff
        assert!(!engine.qualifies(&conditions, ConditionOperator::All, &info(), true));

        // an existing user enrolled after the cutoff is subject to it too
        let mut late = info();
        late.enrolment_created = Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert!(!engine.qualifies(&conditions, ConditionOperator::All, &late, false));
    }

    #[test]
    fn cohort_plugin_matches_any_listed_cohort() {
        let plugin = CohortCondition;
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let mut user = info();
        user.cohort_ids.insert(c2);

        let config = cohort_condition(ConditionStatus::All, &[c1, c2]);
        assert!(plugin.is_user_completed(&config, &user));

        let config = cohort_condition(ConditionStatus::All, &[c1]);
        assert!(!plugin.is_user_completed(&config, &user));
    }

    #[test]
    fn activity_plugin_honours_require_all() {
        let plugin = ActivityCompletionCondition;
        let m1 = Uuid::new_v4();
        let m2 = Uuid::new_v4();
        let mut user = info();
        user.completed_modules.insert(m1);

        let all = ConditionConfig {
            status: ConditionStatus::All,
            upcoming_time: None,
            is_overridden: false,
            additional: json!({ "modules": [m1, m2] }),
        };
        assert!(!plugin.is_user_completed(&all, &user));

        let any = ConditionConfig {
            additional: json!({ "modules": [m1, m2], "require_all": false }),
            ..all.clone()
        };
        assert!(plugin.is_user_completed(&any, &user));
    }

    #[test]
    fn enrolment_plugin_requires_minimum_age() {
        let plugin = EnrolmentCondition;
        let user = info();

        let fresh = ConditionConfig {
            status: ConditionStatus::All,
            upcoming_time: None,
            is_overridden: false,
            additional: json!({}),
        };
        assert!(plugin.is_user_completed(&fresh, &user));

        // requires a year of enrolment; user has ~5 months
        let aged = ConditionConfig {
            additional: json!({ "enrolled_for_secs": 365 * 86_400 }),
            ..fresh.clone()
        };
        assert!(!plugin.is_user_completed(&aged, &user));

        let mut unenrolled = info();
        unenrolled.enrolment_created = None;
        assert!(!plugin.is_user_completed(&fresh, &unenrolled));
    }
}
