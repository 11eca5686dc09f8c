use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, warn};

use crate::allowlist::host_of;
use crate::config::GatewayConfig;
use crate::credentials::{fingerprint, resolve_with_tier, sanitize, Provider, ProviderInputs};
use crate::store::ValveStore;

pub const USER_ID_HEADER: &str = "x-openwebui-user-id";
pub const ORIGINAL_MODEL_HEADER: &str = "x-openpersona-original-model-id";
pub const META_HEADER: &str = "x-openpersona-meta-b64";

/// JSON pointer of the persona sub-object inside the host's per-call metadata.
pub const PERSONA_META_POINTER: &str = "/model/info/meta/openpersona";

/// key: forwarding-decision
/// Per-request outcome. Never persisted; headers hold sanitised values only.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct ForwardingDecision {
    pub host_allowed: bool,
    pub headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for ForwardingDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingDecision")
            .field("host_allowed", &self.host_allowed)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ForwardingDecision {
    fn rejected() -> Self {
        Self::default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Converts to a transport header map. Entries that are not valid header
    /// names or values are dropped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(mut value)) => {
                    if name.as_str().ends_with("-api-key") {
                        value.set_sensitive(true);
                    }
                    map.insert(name, value);
                }
                _ => warn!(header = %name, "skipping header that is not valid on the wire"),
            }
        }
        map
    }

    /// Attaches the decided headers to an outbound request.
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.headers.is_empty() {
            return request;
        }
        request.headers(self.to_header_map())
    }
}

/// Outcome of evaluating the destination against the allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Allowed { host: String },
    Rejected { host: Option<String> },
}

impl Destination {
    pub fn evaluate(config: &GatewayConfig, destination_url: &str) -> Self {
        match host_of(destination_url) {
            Some(host) if config.allowlist.allows(&host) => Destination::Allowed { host },
            host => Destination::Rejected { host },
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Destination::Allowed { .. })
    }
}

/// Caller context for one outbound request.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext<'a> {
    pub user_id: Option<&'a str>,
    pub model_id: Option<&'a str>,
    pub metadata: Option<&'a Value>,
}

/// Decides the headers for one request from already-fetched tier inputs.
pub fn build_headers(
    config: &GatewayConfig,
    destination_url: &str,
    context: RequestContext<'_>,
    providers: &[(Provider, ProviderInputs)],
) -> ForwardingDecision {
    match Destination::evaluate(config, destination_url) {
        Destination::Allowed { .. } => allowed_headers(context, providers),
        Destination::Rejected { host } => reject(host.as_deref()),
    }
}

fn reject(host: Option<&str>) -> ForwardingDecision {
    debug!(
        host = host.unwrap_or("<unparseable>"),
        "destination not on sidecar allowlist; forwarding without identity or credential headers"
    );
    ForwardingDecision::rejected()
}

fn allowed_headers(
    context: RequestContext<'_>,
    providers: &[(Provider, ProviderInputs)],
) -> ForwardingDecision {
    let mut headers = BTreeMap::new();
    let mut put = |name: &str, raw: Option<&str>| {
        if let Some(value) = raw.map(sanitize).filter(|value| !value.is_empty()) {
            headers.insert(name.to_string(), value);
        }
    };
    put(USER_ID_HEADER, context.user_id);
    put(ORIGINAL_MODEL_HEADER, context.model_id);
    put(
        META_HEADER,
        context.metadata.and_then(persona_meta_b64).as_deref(),
    );

    for (provider, inputs) in providers {
        if let Some(resolved) = resolve_with_tier(provider, inputs) {
            debug!(
                provider = %provider,
                tier = resolved.tier.as_str(),
                fingerprint = %fingerprint(&resolved.value),
                "attaching provider credential"
            );
            headers.insert(provider.header_name(), resolved.value);
        }
    }

    ForwardingDecision {
        host_allowed: true,
        headers,
    }
}

/// Base64 of the compact JSON persona sub-object, when metadata carries one.
pub fn persona_meta_b64(metadata: &Value) -> Option<String> {
    let scoped = metadata.pointer(PERSONA_META_POINTER)?;
    if !scoped.is_object() {
        return None;
    }
    let encoded = serde_json::to_vec(scoped).ok()?;
    Some(STANDARD.encode(encoded))
}

/// key: forwarding-service
/// Fetches tier inputs from the store and applies the forwarding policy.
/// Nothing is cached between calls so rotated keys apply immediately.
#[derive(Clone)]
pub struct ForwardingService {
    config: Arc<GatewayConfig>,
    store: Arc<dyn ValveStore>,
}

impl ForwardingService {
    pub fn new(config: Arc<GatewayConfig>, store: Arc<dyn ValveStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn decide(&self, destination_url: &str, context: RequestContext<'_>) -> ForwardingDecision {
        if let Destination::Rejected { host } = Destination::evaluate(&self.config, destination_url) {
            return reject(host.as_deref());
        }
        let providers = self.provider_inputs(context.user_id).await;
        allowed_headers(context, &providers)
    }

    /// Tier inputs for every configured provider. Fetch failures degrade to an
    /// absent tier.
    pub async fn provider_inputs(&self, user_id: Option<&str>) -> Vec<(Provider, ProviderInputs)> {
        let admin_valves = match self.store.tool(&self.config.admin_tool_id).await {
            Ok(Some(record)) => Some(record.valves),
            Ok(None) => {
                warn!(tool_id = %self.config.admin_tool_id, "admin defaults record missing");
                None
            }
            Err(err) => {
                warn!(%err, "admin defaults unavailable; continuing without them");
                None
            }
        };

        let user_valves = match user_id.filter(|id| !id.is_empty()) {
            Some(user_id) => match self.store.user_valves(&self.config.user_tool_id, user_id).await {
                Ok(valves) => valves,
                Err(err) => {
                    warn!(%err, "user overrides unavailable; continuing without them");
                    None
                }
            },
            None => None,
        };

        self.config
            .providers
            .iter()
            .map(|provider| {
                let inputs = ProviderInputs::from_valves(
                    provider,
                    user_valves.as_ref(),
                    admin_valves.as_ref(),
                    self.config.env_fallback(provider),
                );
                (provider.clone(), inputs)
            })
            .collect()
    }
}
