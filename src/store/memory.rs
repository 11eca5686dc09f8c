use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{provider_defaults_tool, provider_keys_tool, ToolRecord, ValveStore};
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

/// In-process store for development and tests.
#[derive(Default)]
pub struct MemoryValveStore {
    tools: DashMap<String, ToolRecord>,
    user_valves: DashMap<(String, String), Value>,
    memberships: DashMap<String, BTreeSet<String>>,
}

impl MemoryValveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with both provider-key records.
    pub fn seeded(config: &GatewayConfig) -> Self {
        let store = Self::new();
        store.insert_tool(provider_keys_tool(config));
        store.insert_tool(provider_defaults_tool(config));
        store
    }

    pub fn insert_tool(&self, record: ToolRecord) {
        self.tools.insert(record.id.clone(), record);
    }

    pub fn set_user_valves(&self, tool_id: &str, user_id: &str, valves: Value) {
        self.user_valves
            .insert((tool_id.to_string(), user_id.to_string()), valves);
    }

    pub fn add_member(&self, group_id: &str, user_id: &str) {
        self.memberships
            .entry(user_id.to_string())
            .or_default()
            .insert(group_id.to_string());
    }
}

#[async_trait]
impl ValveStore for MemoryValveStore {
    async fn tool(&self, tool_id: &str) -> AppResult<Option<ToolRecord>> {
        Ok(self.tools.get(tool_id).map(|entry| entry.value().clone()))
    }

    async fn user_valves(&self, tool_id: &str, user_id: &str) -> AppResult<Option<Value>> {
        Ok(self
            .user_valves
            .get(&(tool_id.to_string(), user_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn user_group_ids(&self, user_id: &str) -> AppResult<BTreeSet<String>> {
        Ok(self
            .memberships
            .get(user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn update_valves(&self, tool_id: &str, valves: Value) -> AppResult<()> {
        let mut record = self.tools.get_mut(tool_id).ok_or(AppError::NotFound)?;
        record.valves = valves;
        Ok(())
    }

    async fn update_user_valves(&self, tool_id: &str, user_id: &str, valves: Value) -> AppResult<()> {
        if !self.tools.contains_key(tool_id) {
            return Err(AppError::NotFound);
        }
        self.set_user_valves(tool_id, user_id, valves);
        Ok(())
    }
}
