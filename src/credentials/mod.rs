//! Provider credential vocabulary and tiered resolution.

pub mod provider;
pub mod resolver;

pub use provider::{Provider, ProviderInputs};
pub use resolver::{
    fingerprint, first_present, resolve, resolve_with_tier, sanitize, CredentialTier,
    ResolvedCredential, MAX_CREDENTIAL_LEN,
};
