//! Host-owned configuration records consumed by the gateway.

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::access::{AccessControlPolicy, GrantSet};
use crate::config::GatewayConfig;
use crate::error::AppResult;

pub use memory::MemoryValveStore;
pub use postgres::PgValveStore;

/// key: valves-record
/// A configuration record ("tool" in the host) holding admin-scoped valves and
/// the access-control policy guarding them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Admin-scoped valve payload, always a JSON object.
    pub valves: Value,
    pub access_control: AccessControlPolicy,
}

impl ToolRecord {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        access_control: AccessControlPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            valves: Value::Object(Map::new()),
            access_control,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_valves(mut self, valves: Value) -> Self {
        self.valves = valves;
        self
    }

    pub fn meta(&self) -> Value {
        json!({ "description": self.description })
    }
}

/// Collaborator interface onto the host's configuration storage. Every call is
/// a single short read or write; nothing is cached between requests.
#[async_trait]
pub trait ValveStore: Send + Sync {
    /// Admin-default record (valves plus policy) by logical identifier.
    async fn tool(&self, tool_id: &str) -> AppResult<Option<ToolRecord>>;

    /// Per-user override payload for `user_id` on `tool_id`.
    async fn user_valves(&self, tool_id: &str, user_id: &str) -> AppResult<Option<Value>>;

    async fn user_group_ids(&self, user_id: &str) -> AppResult<BTreeSet<String>>;

    /// Replaces the admin-scoped valves. `NotFound` when the record is missing.
    async fn update_valves(&self, tool_id: &str, valves: Value) -> AppResult<()>;

    /// Replaces the caller's own override payload.
    async fn update_user_valves(
        &self,
        tool_id: &str,
        user_id: &str,
        valves: Value,
    ) -> AppResult<()>;
}

/// Per-user provider keys. Open policy: each caller only ever addresses the
/// override stored under their own identity.
pub fn provider_keys_tool(config: &GatewayConfig) -> ToolRecord {
    ToolRecord::new(
        config.user_tool_id.clone(),
        "Open Persona Provider Keys",
        AccessControlPolicy::Open,
    )
    .with_description("Per-user provider keys for Open Persona")
}

/// Admin defaults, closed to everyone outside the admin group.
pub fn provider_defaults_tool(config: &GatewayConfig) -> ToolRecord {
    ToolRecord::new(
        config.admin_tool_id.clone(),
        "Open Persona Provider Defaults",
        admin_access_policy(config),
    )
    .with_description("Admin defaults for Open Persona provider keys")
}

pub fn admin_access_policy(config: &GatewayConfig) -> AccessControlPolicy {
    AccessControlPolicy::restricted_to(GrantSet::groups([config.admin_group_id.clone()]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_records_carry_expected_policies() {
        let config = GatewayConfig::default();
        let user_tool = provider_keys_tool(&config);
        assert_eq!(user_tool.id, "open_persona_provider_keys");
        assert!(user_tool.access_control.is_open());
        assert_eq!(user_tool.valves, json!({}));

        let admin_tool = provider_defaults_tool(&config);
        assert_eq!(admin_tool.id, "open_persona_provider_defaults");
        assert_eq!(
            admin_tool.access_control.to_value(),
            json!({
                "read": {"group_ids": ["open_persona_admins"], "user_ids": []},
                "write": {"group_ids": ["open_persona_admins"], "user_ids": []},
            })
        );
        assert_eq!(
            admin_tool.meta(),
            json!({"description": "Admin defaults for Open Persona provider keys"})
        );
    }
}
