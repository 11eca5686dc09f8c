use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};

use super::{provider_defaults_tool, provider_keys_tool, ToolRecord, ValveStore};
use crate::access::AccessControlPolicy;
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

/// key: valves-store-postgres
/// Reads and writes the host application's own tables: `tool` for admin valves
/// and policies, `"user".settings` for per-user valves, `group_member` for
/// group membership.
#[derive(Clone)]
pub struct PgValveStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ToolRow {
    id: String,
    name: String,
    meta: Option<String>,
    valves: Option<String>,
    access_control: Option<String>,
}

impl ToolRow {
    fn into_record(self) -> ToolRecord {
        let valves = match self.valves.as_deref().map(serde_json::from_str::<Value>) {
            Some(Ok(value @ Value::Object(_))) => value,
            Some(Ok(Value::Null)) | None => Value::Object(Map::new()),
            Some(Ok(_)) | Some(Err(_)) => {
                warn!(tool_id = %self.id, "malformed valves payload; treating as empty");
                Value::Object(Map::new())
            }
        };
        let access_control = match self.access_control.as_deref() {
            None => AccessControlPolicy::Open,
            Some(raw) => match serde_json::from_str::<Value>(raw) {
                Ok(value) => AccessControlPolicy::from_value(&value),
                Err(err) => {
                    warn!(tool_id = %self.id, ?err, "unparseable access_control; treating record as closed");
                    AccessControlPolicy::closed()
                }
            },
        };
        let description = self
            .meta
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .and_then(|meta| meta.get("description").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        ToolRecord {
            id: self.id,
            name: self.name,
            description,
            valves,
            access_control,
        }
    }
}

impl PgValveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensures the admin group, its membership of every admin-role user and
    /// both provider-key records. Safe to run on every boot; the admin record's
    /// policy is refreshed each time. Skipped while the host schema is absent.
    pub async fn seed_provider_tools(&self, config: &GatewayConfig) -> anyhow::Result<()> {
        let tool_table: Option<String> = sqlx::query_scalar("SELECT to_regclass('tool')::text")
            .fetch_one(&self.pool)
            .await?;
        if tool_table.is_none() {
            info!("host schema not migrated yet; skipping provider key seeding");
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO "group" (id, user_id, name, description, data, meta, permissions, created_at, updated_at)
               VALUES ($1, 'system', 'Open Persona Admins', 'Admins allowed to manage Open Persona defaults.', '{}', '{}', '{}', $2, $2)
               ON CONFLICT (id) DO NOTHING"#,
        )
        .bind(&config.admin_group_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let admin_ids: Vec<String> =
            sqlx::query_scalar(r#"SELECT id FROM "user" WHERE role = 'admin'"#)
                .fetch_all(&mut *tx)
                .await?;
        for user_id in &admin_ids {
            sqlx::query(
                "INSERT INTO group_member (id, group_id, user_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $4) ON CONFLICT (id) DO NOTHING",
            )
            .bind(format!("{}:{}", config.admin_group_id, user_id))
            .bind(&config.admin_group_id)
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (record, refresh_policy) in [
            (provider_keys_tool(config), false),
            (provider_defaults_tool(config), true),
        ] {
            let access_control = match &record.access_control {
                AccessControlPolicy::Open => None,
                policy => Some(policy.to_value().to_string()),
            };
            let update_policy = if refresh_policy {
                ", access_control = EXCLUDED.access_control"
            } else {
                ""
            };
            let statement = format!(
                "INSERT INTO tool (id, user_id, name, content, specs, meta, valves, access_control, created_at, updated_at) \
                 VALUES ($1, 'system', $2, '', '[]'::json, $3::json, '{{}}'::json, $4::json, $5, $5) \
                 ON CONFLICT (id) DO UPDATE SET meta = EXCLUDED.meta, specs = EXCLUDED.specs, updated_at = EXCLUDED.updated_at{update_policy}"
            );
            sqlx::query(&statement)
                .bind(&record.id)
                .bind(&record.name)
                .bind(record.meta().to_string())
                .bind(access_control)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            admin_group = %config.admin_group_id,
            admins = admin_ids.len(),
            "provider key records provisioned"
        );
        Ok(())
    }
}

fn user_tool_valves(settings: &Value, tool_id: &str) -> Option<Value> {
    settings
        .get("tools")?
        .get("valves")?
        .get(tool_id)
        .filter(|value| !value.is_null())
        .cloned()
}

#[async_trait]
impl ValveStore for PgValveStore {
    async fn tool(&self, tool_id: &str) -> AppResult<Option<ToolRecord>> {
        let row = sqlx::query_as::<_, ToolRow>(
            "SELECT id, name, meta::text AS meta, valves::text AS valves, access_control::text AS access_control FROM tool WHERE id = $1",
        )
        .bind(tool_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(?e, tool_id, "DB error fetching tool record");
            AppError::Db(e)
        })?;
        Ok(row.map(ToolRow::into_record))
    }

    async fn user_valves(&self, tool_id: &str, user_id: &str) -> AppResult<Option<Value>> {
        let settings: Option<Option<String>> =
            sqlx::query_scalar(r#"SELECT settings::text FROM "user" WHERE id = $1"#)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!(?e, "DB error fetching user settings");
                    AppError::Db(e)
                })?;
        let Some(raw) = settings.flatten() else {
            return Ok(None);
        };
        let settings: Value = serde_json::from_str(&raw).map_err(|e| {
            warn!(?e, "malformed user settings payload");
            AppError::ConfigurationUnavailable("user settings are not valid JSON".into())
        })?;
        Ok(user_tool_valves(&settings, tool_id))
    }

    async fn user_group_ids(&self, user_id: &str) -> AppResult<BTreeSet<String>> {
        let rows = sqlx::query("SELECT group_id FROM group_member WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!(?e, "DB error fetching group membership");
                AppError::Db(e)
            })?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("group_id")).collect())
    }

    async fn update_valves(&self, tool_id: &str, valves: Value) -> AppResult<()> {
        let result = sqlx::query("UPDATE tool SET valves = $1::json, updated_at = $2 WHERE id = $3")
            .bind(valves.to_string())
            .bind(Utc::now().timestamp())
            .bind(tool_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(?e, tool_id, "DB error updating valves");
                AppError::Db(e)
            })?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn update_user_valves(&self, tool_id: &str, user_id: &str, valves: Value) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        let settings: Option<Option<String>> =
            sqlx::query_scalar(r#"SELECT settings::text FROM "user" WHERE id = $1 FOR UPDATE"#)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(raw) = settings else {
            return Err(AppError::NotFound);
        };

        let mut settings = raw
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new()));
        set_user_tool_valves(&mut settings, tool_id, valves);

        sqlx::query(r#"UPDATE "user" SET settings = $1::json, updated_at = $2 WHERE id = $3"#)
            .bind(settings.to_string())
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

fn set_user_tool_valves(settings: &mut Value, tool_id: &str, valves: Value) {
    let mut root = into_object(settings.take());
    let mut tools = into_object(root.remove("tools").unwrap_or_default());
    let mut by_tool = into_object(tools.remove("valves").unwrap_or_default());
    by_tool.insert(tool_id.to_string(), valves);
    tools.insert("valves".to_string(), Value::Object(by_tool));
    root.insert("tools".to_string(), Value::Object(tools));
    *settings = Value::Object(root);
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_valves_are_read_from_settings_tree() {
        let settings = json!({
            "ui": {"theme": "dark"},
            "tools": {"valves": {"open_persona_provider_keys": {"openai_api_key": "sk-u"}}}
        });
        assert_eq!(
            user_tool_valves(&settings, "open_persona_provider_keys"),
            Some(json!({"openai_api_key": "sk-u"}))
        );
        assert_eq!(user_tool_valves(&settings, "other"), None);
        assert_eq!(user_tool_valves(&json!({}), "open_persona_provider_keys"), None);
    }

    #[test]
    fn writing_user_valves_preserves_other_settings() {
        let mut settings = json!({"ui": {"theme": "dark"}, "tools": "garbage"});
        set_user_tool_valves(&mut settings, "t1", json!({"openai_api_key": "sk"}));
        assert_eq!(settings["ui"]["theme"], "dark");
        assert_eq!(settings["tools"]["valves"]["t1"]["openai_api_key"], "sk");
    }

    #[test]
    fn tool_rows_degrade_safely() {
        let row = ToolRow {
            id: "t1".into(),
            name: "Tool".into(),
            meta: Some(r#"{"description": "d"}"#.into()),
            valves: Some("[1,2]".into()),
            access_control: Some("not json".into()),
        };
        let record = row.into_record();
        assert_eq!(record.valves, json!({}));
        assert_eq!(record.description, "d");
        assert!(!record.access_control.is_open());

        let row = ToolRow {
            id: "t2".into(),
            name: "Tool".into(),
            meta: None,
            valves: None,
            access_control: Some("null".into()),
        };
        assert!(row.into_record().access_control.is_open());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL with Postgres server"]
    async fn seeding_provisions_group_and_records(pool: PgPool) {
        for statement in [
            r#"CREATE TABLE "user" (id TEXT PRIMARY KEY, role TEXT, settings JSON, updated_at BIGINT)"#,
            r#"CREATE TABLE "group" (id TEXT PRIMARY KEY, user_id TEXT, name TEXT, description TEXT, data JSON, meta JSON, permissions JSON, created_at BIGINT, updated_at BIGINT)"#,
            "CREATE TABLE group_member (id TEXT PRIMARY KEY, group_id TEXT, user_id TEXT, created_at BIGINT, updated_at BIGINT)",
            "CREATE TABLE tool (id TEXT PRIMARY KEY, user_id TEXT, name TEXT, content TEXT, specs JSON, meta JSON, valves JSON, access_control JSON, created_at BIGINT, updated_at BIGINT)",
            r#"INSERT INTO "user" (id, role, settings) VALUES ('admin-1', 'admin', '{}'), ('u1', 'user', NULL)"#,
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }

        let config = GatewayConfig::default();
        let store = PgValveStore::new(pool.clone());
        store.seed_provider_tools(&config).await.unwrap();
        store.seed_provider_tools(&config).await.unwrap();

        let admin_groups = store.user_group_ids("admin-1").await.unwrap();
        assert!(admin_groups.contains("open_persona_admins"));
        assert!(store.user_group_ids("u1").await.unwrap().is_empty());

        let admin_tool = store.tool(&config.admin_tool_id).await.unwrap().unwrap();
        assert!(!admin_tool.access_control.is_open());
        let user_tool = store.tool(&config.user_tool_id).await.unwrap().unwrap();
        assert!(user_tool.access_control.is_open());

        store
            .update_user_valves(&config.user_tool_id, "u1", json!({"openai_api_key": "sk-u1"}))
            .await
            .unwrap();
        assert_eq!(
            store.user_valves(&config.user_tool_id, "u1").await.unwrap(),
            Some(json!({"openai_api_key": "sk-u1"}))
        );
    }
}
