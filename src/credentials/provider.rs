use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// key: provider-credentials-model
/// Named upstream provider whose API key can be forwarded to the sidecar.
///
/// Names are lower-case ASCII alphanumerics plus `-`/`_`; every other
/// identifier (valve field, header, environment variable) is derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provider(String);

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim().to_ascii_lowercase();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(Self(name))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Valve field carrying this provider's key, e.g. `openai_api_key`.
    pub fn valve_field(&self) -> String {
        format!("{}_api_key", self.0.replace('-', "_"))
    }

    /// Transport header for the resolved key, e.g. `x-openpersona-openai-api-key`.
    pub fn header_name(&self) -> String {
        format!("x-openpersona-{}-api-key", self.0.replace('_', "-"))
    }

    /// Environment fallback variable, e.g. `OPEN_PERSONA_DEFAULT_OPENAI_API_KEY`.
    pub fn env_fallback_var(&self) -> String {
        format!(
            "OPEN_PERSONA_DEFAULT_{}_API_KEY",
            self.0.replace('-', "_").to_ascii_uppercase()
        )
    }

    pub fn display_name(&self) -> String {
        match self.0.as_str() {
            "openai" => "OpenAI".to_string(),
            "anthropic" => "Anthropic".to_string(),
            "openrouter" => "OpenRouter".to_string(),
            other => other.to_string(),
        }
    }

    /// Reads this provider's key out of a valve payload. Non-string values are
    /// treated as absent.
    pub fn valve_value<'a>(&self, valves: Option<&'a Value>) -> Option<&'a str> {
        valves?.get(self.valve_field())?.as_str()
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw tier values for one provider, before precedence and sanitisation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderInputs {
    pub user_override: Option<String>,
    pub admin_default: Option<String>,
    pub env_fallback: Option<String>,
}

impl ProviderInputs {
    pub fn new(
        user_override: Option<&str>,
        admin_default: Option<&str>,
        env_fallback: Option<&str>,
    ) -> Self {
        Self {
            user_override: user_override.map(str::to_string),
            admin_default: admin_default.map(str::to_string),
            env_fallback: env_fallback.map(str::to_string),
        }
    }

    /// Picks this provider's fields out of the per-user and admin valve payloads.
    pub fn from_valves(
        provider: &Provider,
        user_valves: Option<&Value>,
        admin_valves: Option<&Value>,
        env_fallback: Option<&str>,
    ) -> Self {
        Self::new(
            provider.valve_value(user_valves),
            provider.valve_value(admin_valves),
            env_fallback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derived_identifiers_follow_naming_rules() {
        let provider = Provider::parse(" OpenRouter ").unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.valve_field(), "openrouter_api_key");
        assert_eq!(provider.header_name(), "x-openpersona-openrouter-api-key");
        assert_eq!(
            provider.env_fallback_var(),
            "OPEN_PERSONA_DEFAULT_OPENROUTER_API_KEY"
        );
        assert_eq!(provider.display_name(), "OpenRouter");

        let custom = Provider::parse("azure-openai").unwrap();
        assert_eq!(custom.valve_field(), "azure_openai_api_key");
        assert_eq!(custom.header_name(), "x-openpersona-azure-openai-api-key");
        assert_eq!(
            custom.env_fallback_var(),
            "OPEN_PERSONA_DEFAULT_AZURE_OPENAI_API_KEY"
        );
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(Provider::parse("").is_none());
        assert!(Provider::parse("open ai").is_none());
        assert!(Provider::parse("openai\r\n").is_some());
        assert!(Provider::parse("key:value").is_none());
    }

    #[test]
    fn valve_values_ignore_non_strings() {
        let provider = Provider::parse("openai").unwrap();
        let valves = json!({"openai_api_key": 42});
        assert_eq!(provider.valve_value(Some(&valves)), None);
        let valves = json!({"openai_api_key": null});
        assert_eq!(provider.valve_value(Some(&valves)), None);
        let valves = json!({"openai_api_key": "sk-1"});
        assert_eq!(provider.valve_value(Some(&valves)), Some("sk-1"));
        assert_eq!(provider.valve_value(None), None);
    }

    #[test]
    fn inputs_are_picked_from_both_payloads() {
        let provider = Provider::parse("anthropic").unwrap();
        let user = json!({"anthropic_api_key": "sk-user"});
        let admin = json!({"anthropic_api_key": "sk-admin", "openai_api_key": "sk-other"});
        let inputs = ProviderInputs::from_valves(&provider, Some(&user), Some(&admin), Some("sk-env"));
        assert_eq!(inputs.user_override.as_deref(), Some("sk-user"));
        assert_eq!(inputs.admin_default.as_deref(), Some("sk-admin"));
        assert_eq!(inputs.env_fallback.as_deref(), Some("sk-env"));
    }
}
