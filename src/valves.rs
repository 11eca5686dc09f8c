use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::access::{AccessControlEnforcer, ValveOperation};
use crate::config::GatewayConfig;
use crate::credentials::Provider;
use crate::error::{AppError, AppResult};
use crate::store::{ToolRecord, ValveStore};

/// key: valves-service
/// Read/write operations behind the configuration endpoints. Admin-scoped
/// values pass through the access-control gate; per-user overrides are only
/// ever addressed under the caller's own identity.
#[derive(Clone)]
pub struct ValveService {
    config: Arc<GatewayConfig>,
    store: Arc<dyn ValveStore>,
    enforcer: AccessControlEnforcer,
}

impl ValveService {
    pub fn new(config: Arc<GatewayConfig>, store: Arc<dyn ValveStore>) -> Self {
        let enforcer = AccessControlEnforcer::from_config(&config);
        Self {
            config,
            store,
            enforcer,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn read_valves(&self, tool_id: &str, user_id: &str) -> AppResult<Value> {
        let record = self.gate(tool_id, user_id, ValveOperation::ReadValues).await?;
        Ok(record.valves)
    }

    pub async fn read_valves_spec(&self, tool_id: &str, user_id: &str) -> AppResult<Value> {
        self.gate(tool_id, user_id, ValveOperation::ReadSpec).await?;
        Ok(valves_schema(&self.config.providers))
    }

    pub async fn update_valves(&self, tool_id: &str, user_id: &str, payload: Value) -> AppResult<Value> {
        self.gate(tool_id, user_id, ValveOperation::WriteValues).await?;
        let valves = validate_valves(&self.config, payload)?;
        self.store.update_valves(tool_id, valves.clone()).await?;
        info!(tool_id, user_id, fields = valves_len(&valves), "valves updated");
        Ok(valves)
    }

    pub async fn read_user_valves(&self, tool_id: &str, user_id: &str) -> AppResult<Value> {
        self.record(tool_id).await?;
        let valves = self.store.user_valves(tool_id, user_id).await?;
        Ok(valves
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    pub async fn update_user_valves(&self, tool_id: &str, user_id: &str, payload: Value) -> AppResult<Value> {
        self.record(tool_id).await?;
        let valves = validate_valves(&self.config, payload)?;
        self.store
            .update_user_valves(tool_id, user_id, valves.clone())
            .await?;
        info!(tool_id, user_id, fields = valves_len(&valves), "user valves updated");
        Ok(valves)
    }

    async fn record(&self, tool_id: &str) -> AppResult<ToolRecord> {
        self.store.tool(tool_id).await?.ok_or(AppError::NotFound)
    }

    /// Loads the record and enforces its policy for `operation`. Group
    /// membership is only looked up when the policy is restricted.
    async fn gate(&self, tool_id: &str, user_id: &str, operation: ValveOperation) -> AppResult<ToolRecord> {
        let record = self.record(tool_id).await?;
        let groups = if record.access_control.is_open() || self.enforcer.is_bypassed() {
            BTreeSet::new()
        } else {
            self.store.user_group_ids(user_id).await.map_err(|err| {
                warn!(%err, user_id, "group membership unavailable");
                AppError::ConfigurationUnavailable("group membership lookup failed".into())
            })?
        };
        self.enforcer
            .require(tool_id, user_id, &groups, operation, &record.access_control)?;
        Ok(record)
    }
}

fn valves_len(valves: &Value) -> usize {
    valves.as_object().map(Map::len).unwrap_or(0)
}

/// JSON schema for the valve payload: one nullable string per provider.
pub fn valves_schema(providers: &[Provider]) -> Value {
    let properties: Map<String, Value> = providers
        .iter()
        .map(|provider| {
            let field = provider.valve_field();
            let property = json!({
                "title": field_title(&field),
                "type": ["string", "null"],
                "default": null,
                "description": format!(
                    "Provider API key for {}. Stored in the host database. Forwarded only to the internal open-persona-sidecar service.",
                    provider.display_name()
                ),
            });
            (field, property)
        })
        .collect();
    json!({
        "title": "Valves",
        "type": "object",
        "properties": properties,
    })
}

fn field_title(field: &str) -> String {
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accepts only an object of known valve fields holding strings or nulls.
pub fn validate_valves(config: &GatewayConfig, payload: Value) -> AppResult<Value> {
    let Value::Object(fields) = payload else {
        return Err(AppError::BadRequest("valves must be a JSON object".into()));
    };
    for (field, value) in &fields {
        if config.provider_for_field(field).is_none() {
            return Err(AppError::BadRequest(format!("unknown valve field `{field}`")));
        }
        if !(value.is_string() || value.is_null()) {
            return Err(AppError::BadRequest(format!(
                "valve field `{field}` must be a string or null"
            )));
        }
    }
    Ok(Value::Object(fields))
}
