use serde_json::{Map, Value};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

/// Field-wise merge of a sparse override map over a base record. The same
/// mechanism serves instance config, condition sets and action config: the
/// base is whatever JSON object the template side serializes to.
pub struct OverrideResolver;

impl OverrideResolver {
    /// For every field present in `overrides`, use it; otherwise fall back to
    /// the base value. `None` (or JSON null) means "explicitly cleared": the
    /// field is dropped from the result so deserialization takes its empty
    /// default instead of the template value.
    pub fn resolve(
        overrides: &HashMap<String, Option<Value>>,
        base: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut merged = base.clone();
        for (field, value) in overrides {
            match value {
                Some(Value::Null) | None => {
                    merged.remove(field);
                }
                Some(v) => {
                    merged.insert(field.clone(), v.clone());
                }
            }
        }
        merged
    }

    /// Load the sparse override map for one instance. Absent fields inherit;
    /// a stored SQL NULL is the explicit-clear marker.
    pub async fn load(
        pool: &PgPool,
        instance_id: Uuid,
    ) -> anyhow::Result<HashMap<String, Option<Value>>> {
        let rows: Vec<(String, Option<Value>)> = sqlx::query_as(
            "SELECT field, value FROM instance_overrides WHERE instance_id = $1",
        )
        .bind(instance_id)
        .fetch_all(pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    /// Write one override row. `value = None` stores the explicit-clear
    /// marker, which is distinct from deleting the row (inherit).
    pub async fn set<'e, E>(
        executor: E,
        instance_id: Uuid,
        field: &str,
        value: Option<&Value>,
    ) -> anyhow::Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        sqlx::query(
            "INSERT INTO instance_overrides (instance_id, field, value)
             VALUES ($1, $2, $3)
             ON CONFLICT (instance_id, field) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(instance_id)
        .bind(field)
        .bind(value)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Delete override rows so the fields track subsequent template edits
    /// again. Distinct from storing NULL: after removal the field inherits.
    pub async fn remove_overrides(
        pool: &PgPool,
        instance_id: Uuid,
        fields: &[String],
    ) -> anyhow::Result<()> {
        sqlx::query(
            "DELETE FROM instance_overrides WHERE instance_id = $1 AND field = ANY($2)",
        )
        .bind(instance_id)
        .bind(fields)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("subject".into(), json!("Welcome"));
        m.insert("notify_limit".into(), json!(3));
        m.insert("recipients".into(), json!(["student"]));
        m
    }

    #[test]
    fn override_wins_field_by_field() {
        let mut overrides = HashMap::new();
        overrides.insert("subject".into(), Some(json!("Reminder")));

        let merged = OverrideResolver::resolve(&overrides, &base());
        assert_eq!(merged["subject"], json!("Reminder"));
        // untouched fields fall back to the base
        assert_eq!(merged["notify_limit"], json!(3));
        assert_eq!(merged["recipients"], json!(["student"]));
    }

    #[test]
    fn explicit_clear_drops_the_field() {
        let mut overrides = HashMap::new();
        overrides.insert("subject".into(), None);
        overrides.insert("recipients".into(), Some(Value::Null));

        let merged = OverrideResolver::resolve(&overrides, &base());
        assert!(!merged.contains_key("subject"));
        assert!(!merged.contains_key("recipients"));
        assert_eq!(merged["notify_limit"], json!(3));
    }

    #[test]
    fn removed_override_tracks_base_again() {
        let mut overrides = HashMap::new();
        overrides.insert("subject".into(), Some(json!("Reminder")));
        let merged = OverrideResolver::resolve(&overrides, &base());
        assert_eq!(merged["subject"], json!("Reminder"));

        // un-checking the override removes the entry entirely
        overrides.remove("subject");
        let mut changed_base = base();
        changed_base.insert("subject".into(), json!("Welcome v2"));
        let merged = OverrideResolver::resolve(&overrides, &changed_base);
        assert_eq!(merged["subject"], json!("Welcome v2"));
    }

    #[test]
    fn empty_override_map_is_identity() {
        let overrides = HashMap::new();
        assert_eq!(OverrideResolver::resolve(&overrides, &base()), base());
    }
}
