use serde::Serialize;
use sha2::{Digest, Sha256};

use super::provider::{Provider, ProviderInputs};

/// Longest value, in characters, that may be placed in a credential header.
pub const MAX_CREDENTIAL_LEN: usize = 4096;

/// Source tier of a resolved credential, in precedence order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialTier {
    UserOverride,
    AdminDefault,
    EnvironmentFallback,
}

impl CredentialTier {
    pub const PRECEDENCE: [CredentialTier; 3] = [
        CredentialTier::UserOverride,
        CredentialTier::AdminDefault,
        CredentialTier::EnvironmentFallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialTier::UserOverride => "user_override",
            CredentialTier::AdminDefault => "admin_default",
            CredentialTier::EnvironmentFallback => "environment_fallback",
        }
    }
}

/// Effective, sanitised key for one provider. Never log `value`.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub provider: Provider,
    pub tier: CredentialTier,
    pub value: String,
}

impl std::fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("provider", &self.provider)
            .field("tier", &self.tier)
            .field("fingerprint", &fingerprint(&self.value))
            .finish()
    }
}

/// Left fold over candidates: the first value that is present and not blank,
/// with its position in the chain.
pub fn first_present<T, I>(candidates: I) -> Option<(usize, T)>
where
    T: AsRef<str>,
    I: IntoIterator<Item = Option<T>>,
{
    candidates
        .into_iter()
        .enumerate()
        .find_map(|(index, candidate)| match candidate {
            Some(value) if !value.as_ref().trim().is_empty() => Some((index, value)),
            _ => None,
        })
}

/// Makes a value safe for a transport header.
///
/// Drops CR, LF and every other non-printable character, trims surrounding
/// whitespace and silently truncates to [`MAX_CREDENTIAL_LEN`] characters.
/// The result is a fixed point: `sanitize(&sanitize(x)) == sanitize(x)`.
/// When the cut lands right after whitespace that whitespace is trimmed too,
/// so the result can be shorter than the limit.
pub fn sanitize(value: &str) -> String {
    let printable: String = value.chars().filter(|c| is_printable(*c)).collect();
    let trimmed = printable.trim();
    if trimmed.chars().count() <= MAX_CREDENTIAL_LEN {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(MAX_CREDENTIAL_LEN).collect();
    truncated.trim_end().to_string()
}

fn is_printable(c: char) -> bool {
    !c.is_control() && !matches!(c, '\u{2028}' | '\u{2029}')
}

/// Effective key for `provider`: user override, then admin default, then the
/// environment fallback. Each tier is sanitised first and skipped when nothing
/// printable remains; `None` means no header is emitted.
pub fn resolve(
    provider: &str,
    user_override: Option<&str>,
    admin_default: Option<&str>,
    env_fallback: Option<&str>,
) -> Option<String> {
    let (index, value) = first_sanitized([user_override, admin_default, env_fallback])?;
    tracing::trace!(
        provider,
        tier = CredentialTier::PRECEDENCE[index].as_str(),
        fingerprint = %fingerprint(&value),
        "provider credential resolved"
    );
    Some(value)
}

/// Like [`resolve`] but reports which tier won.
pub fn resolve_with_tier(
    provider: &Provider,
    inputs: &ProviderInputs,
) -> Option<ResolvedCredential> {
    let (index, value) = first_sanitized([
        inputs.user_override.as_deref(),
        inputs.admin_default.as_deref(),
        inputs.env_fallback.as_deref(),
    ])?;
    Some(ResolvedCredential {
        provider: provider.clone(),
        tier: CredentialTier::PRECEDENCE[index],
        value,
    })
}

fn first_sanitized(tiers: [Option<&str>; 3]) -> Option<(usize, String)> {
    first_present(tiers.into_iter().map(|tier| tier.map(sanitize)))
}

/// Short SHA-256 fingerprint used to correlate a key in logs without exposing it.
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..4])
}
