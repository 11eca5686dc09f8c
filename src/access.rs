use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

// key: valves-access-control -> read/write gate for key configuration records

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    Write,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "read",
            AccessMode::Write => "write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operations against admin-scoped configuration that pass through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveOperation {
    ReadValues,
    ReadSpec,
    WriteValues,
}

impl ValveOperation {
    pub fn mode(&self) -> AccessMode {
        match self {
            ValveOperation::ReadValues | ValveOperation::ReadSpec => AccessMode::Read,
            ValveOperation::WriteValues => AccessMode::Write,
        }
    }
}

/// Principals granted one access mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSet {
    #[serde(default)]
    pub group_ids: BTreeSet<String>,
    #[serde(default)]
    pub user_ids: BTreeSet<String>,
}

impl GrantSet {
    pub fn groups(group_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            group_ids: group_ids.into_iter().map(Into::into).collect(),
            user_ids: BTreeSet::new(),
        }
    }

    pub fn users(user_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            group_ids: BTreeSet::new(),
            user_ids: user_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn permits<'a>(
        &self,
        user_id: &str,
        user_group_ids: impl IntoIterator<Item = &'a String>,
    ) -> bool {
        self.user_ids.contains(user_id)
            || user_group_ids
                .into_iter()
                .any(|group| self.group_ids.contains(group))
    }
}

/// Wire shape of a present policy: `{"read": {...}, "write": {...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControlDocument {
    #[serde(default)]
    pub read: GrantSet,
    #[serde(default)]
    pub write: GrantSet,
}

/// Access-control policy attached to a configuration record.
///
/// `Open` is stored as JSON `null` and is reserved for per-user records, where
/// callers can only ever address their own identity. `Restricted` closes the
/// record to everyone not named in the grant for the requested mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Option<AccessControlDocument>",
    into = "Option<AccessControlDocument>"
)]
pub enum AccessControlPolicy {
    Open,
    Restricted { read: GrantSet, write: GrantSet },
}

impl From<Option<AccessControlDocument>> for AccessControlPolicy {
    fn from(value: Option<AccessControlDocument>) -> Self {
        match value {
            None => AccessControlPolicy::Open,
            Some(doc) => AccessControlPolicy::Restricted {
                read: doc.read,
                write: doc.write,
            },
        }
    }
}

impl From<AccessControlPolicy> for Option<AccessControlDocument> {
    fn from(value: AccessControlPolicy) -> Self {
        match value {
            AccessControlPolicy::Open => None,
            AccessControlPolicy::Restricted { read, write } => {
                Some(AccessControlDocument { read, write })
            }
        }
    }
}

impl AccessControlPolicy {
    /// Same principals for read and write.
    pub fn restricted_to(grant: GrantSet) -> Self {
        AccessControlPolicy::Restricted {
            read: grant.clone(),
            write: grant,
        }
    }

    /// Restricted with no principals in either mode.
    pub fn closed() -> Self {
        AccessControlPolicy::Restricted {
            read: GrantSet::default(),
            write: GrantSet::default(),
        }
    }

    /// Parses a stored policy. A value that is neither `null` nor a valid
    /// policy object closes the record instead of opening it.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value::<AccessControlPolicy>(value.clone()) {
            Ok(policy) => policy,
            Err(error) => {
                tracing::warn!(%error, "malformed access_control payload; treating record as closed");
                AccessControlPolicy::closed()
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, AccessControlPolicy::Open)
    }

    pub fn grant(&self, mode: AccessMode) -> Option<&GrantSet> {
        match self {
            AccessControlPolicy::Open => None,
            AccessControlPolicy::Restricted { read, write } => Some(match mode {
                AccessMode::Read => read,
                AccessMode::Write => write,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decides whether `user_id` (member of `user_group_ids`) may access a record
/// guarded by `policy` in `mode`.
pub fn authorize(
    user_id: &str,
    user_group_ids: &BTreeSet<String>,
    mode: AccessMode,
    policy: &AccessControlPolicy,
) -> AccessDecision {
    match policy.grant(mode) {
        None => AccessDecision::Allow,
        Some(grant) if grant.permits(user_id, user_group_ids) => AccessDecision::Allow,
        Some(_) => AccessDecision::Deny,
    }
}

/// Policy gate in front of the valve endpoints. Built once from the startup
/// configuration; with the bypass flag set every call is allowed.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessControlEnforcer {
    bypass: bool,
}

impl AccessControlEnforcer {
    pub fn new(bypass: bool) -> Self {
        Self { bypass }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.bypass_access_control)
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypass
    }

    pub fn authorize(
        &self,
        user_id: &str,
        user_group_ids: &BTreeSet<String>,
        mode: AccessMode,
        policy: &AccessControlPolicy,
    ) -> AccessDecision {
        if self.bypass {
            return AccessDecision::Allow;
        }
        authorize(user_id, user_group_ids, mode, policy)
    }

    /// Turns a denial into a hard `AccessProhibited` error for the boundary.
    pub fn require(
        &self,
        record_id: &str,
        user_id: &str,
        user_group_ids: &BTreeSet<String>,
        operation: ValveOperation,
        policy: &AccessControlPolicy,
    ) -> AppResult<()> {
        let mode = operation.mode();
        match self.authorize(user_id, user_group_ids, mode, policy) {
            AccessDecision::Allow => Ok(()),
            AccessDecision::Deny => {
                tracing::info!(record_id, user_id, %mode, ?operation, "valves access denied");
                Err(AppError::AccessProhibited)
            }
        }
    }
}
