pub mod access;
pub mod allowlist;
pub mod config;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod forwarding;
pub mod routes;
pub mod store;
pub mod valves;

#[cfg(test)]
mod test_support;

pub use access::{AccessControlEnforcer, AccessControlPolicy, AccessDecision, AccessMode, GrantSet};
pub use allowlist::{is_trusted, AllowlistPolicy};
pub use config::GatewayConfig;
pub use credentials::{resolve, sanitize, Provider, ProviderInputs};
pub use forwarding::{build_headers, ForwardingDecision, ForwardingService, RequestContext};
pub use valves::ValveService;
