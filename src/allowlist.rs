use std::collections::BTreeSet;

use url::Url;

// key: forwarding-allowlist -> trusted-destinations

/// Trusted destination labels plus the cluster-domain suffix rule.
///
/// Labels are stored ASCII-lowercased. No IDNA/punycode normalisation is
/// applied to either side of the comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistPolicy {
    labels: BTreeSet<String>,
    cluster_suffix: String,
}

impl AllowlistPolicy {
    pub fn new(
        labels: impl IntoIterator<Item = impl AsRef<str>>,
        cluster_suffix: impl Into<String>,
    ) -> Self {
        let labels = labels
            .into_iter()
            .filter_map(|label| {
                let normalized = label.as_ref().trim().to_ascii_lowercase();
                if normalized.is_empty() {
                    None
                } else {
                    Some(normalized)
                }
            })
            .collect();
        Self {
            labels,
            cluster_suffix: normalize_suffix(&cluster_suffix.into()),
        }
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn cluster_suffix(&self) -> &str {
        &self.cluster_suffix
    }

    pub fn allows(&self, candidate_host: &str) -> bool {
        is_trusted(candidate_host, &self.labels, &self.cluster_suffix)
    }

    /// Evaluates the host component of `destination_url`. Unparseable URLs and
    /// URLs without a host are never trusted.
    pub fn allows_url(&self, destination_url: &str) -> bool {
        host_of(destination_url)
            .map(|host| self.allows(&host))
            .unwrap_or(false)
    }
}

/// Returns true when `candidate_host` may receive identity and secret headers.
///
/// A host matches when it equals a trusted label, or when it ends with
/// `cluster_suffix` and its leading label (text before the first `.`) is a
/// trusted label. Comparison is ASCII case-insensitive.
pub fn is_trusted(
    candidate_host: &str,
    trusted_labels: &BTreeSet<String>,
    cluster_suffix: &str,
) -> bool {
    if candidate_host.is_empty() {
        return false;
    }
    let host = candidate_host.to_ascii_lowercase();
    if trusted_labels.contains(&host) {
        return true;
    }

    let suffix = normalize_suffix(cluster_suffix);
    if suffix.len() <= 1 || !host.ends_with(&suffix) {
        return false;
    }
    match host.split('.').next() {
        Some(base) if !base.is_empty() => trusted_labels.contains(base),
        _ => false,
    }
}

/// Host component of a destination URL, lowercased. `None` when the URL does
/// not parse or carries no host.
pub fn host_of(destination_url: &str) -> Option<String> {
    let parsed = Url::parse(destination_url.trim()).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

fn normalize_suffix(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.is_empty() || trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AllowlistPolicy {
        AllowlistPolicy::new(
            ["open-persona-sidecar", "localhost", "127.0.0.1"],
            ".svc.cluster.local",
        )
    }

    #[test]
    fn exact_labels_match_case_insensitively() {
        let policy = policy();
        assert!(policy.allows("open-persona-sidecar"));
        assert!(policy.allows("Open-Persona-Sidecar"));
        assert!(policy.allows("LOCALHOST"));
        assert!(policy.allows("127.0.0.1"));
    }

    #[test]
    fn cluster_local_names_match_on_leading_label() {
        let policy = policy();
        assert!(policy.allows("open-persona-sidecar.default.svc.cluster.local"));
        assert!(policy.allows("OPEN-PERSONA-SIDECAR.ns.SVC.cluster.local"));
        assert!(!policy.allows("other.default.svc.cluster.local"));
    }

    #[test]
    fn lookalike_hosts_are_rejected() {
        let policy = policy();
        assert!(!policy.allows("open-persona-sidecar.evil.com"));
        assert!(!policy.allows("example.com"));
        assert!(!policy.allows("evil-open-persona-sidecar"));
        assert!(!policy.allows("localhost.attacker.net"));
        assert!(!policy.allows("svc.cluster.local"));
        assert!(!policy.allows(".svc.cluster.local"));
    }

    #[test]
    fn empty_host_never_matches() {
        let policy = policy();
        assert!(!policy.allows(""));
        assert!(!is_trusted("", &BTreeSet::new(), ".svc.cluster.local"));
    }

    #[test]
    fn empty_suffix_disables_suffix_rule() {
        let policy = AllowlistPolicy::new(["sidecar"], "");
        assert!(policy.allows("sidecar"));
        assert!(!policy.allows("sidecar.anything"));
    }

    #[test]
    fn suffix_without_leading_dot_is_normalized() {
        let policy = AllowlistPolicy::new(["sidecar"], "svc.cluster.local");
        assert_eq!(policy.cluster_suffix(), ".svc.cluster.local");
        assert!(policy.allows("sidecar.ns.svc.cluster.local"));
    }

    #[test]
    fn internationalized_hosts_are_compared_verbatim() {
        // Non-ASCII labels are only ASCII-lowercased; no punycode mapping happens.
        let policy = AllowlistPolicy::new(["bücher"], ".svc.cluster.local");
        assert!(policy.allows("bücher"));
        assert!(!policy.allows("xn--bcher-kva"));
        assert!(!policy.allows("BÜCHER"));
    }

    #[test]
    fn urls_are_evaluated_by_host() {
        let policy = policy();
        assert!(policy.allows_url("http://open-persona-sidecar:8080/v1/chat/completions"));
        assert!(policy.allows_url("http://127.0.0.1:3000/v1"));
        assert!(policy.allows_url("http://open-persona-sidecar.default.svc.cluster.local/v1"));
        assert!(!policy.allows_url("https://example.com/v1"));
        assert!(!policy.allows_url("https://open-persona-sidecar@evil.com/v1"));
        assert!(!policy.allows_url("not a url"));
        assert!(!policy.allows_url(""));
        assert!(!policy.allows_url("file:///etc/passwd"));
    }

    #[test]
    fn host_of_lowercases() {
        assert_eq!(
            host_of("HTTP://Open-Persona-Sidecar:8080/x").as_deref(),
            Some("open-persona-sidecar")
        );
        assert_eq!(host_of("mailto:someone"), None);
    }
}
