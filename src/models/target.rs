// src/models/target.rs

//! Monitored targets and per-domain fetch policy.

use serde::{Deserialize, Serialize};

/// How a target URL should be processed each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single product page, classified directly
    #[serde(rename = "direct")]
    DirectProduct,
    /// A category/listing page, run through product discovery
    Listing,
}

/// Browser identity class to present to a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderProfile {
    #[default]
    Desktop,
    Mobile,
}

/// Per-domain request timeout class, always capped by the global ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutClass {
    #[default]
    Standard,
    /// Extended allowance for known slow sites
    Slow,
}

/// Commerce platform fingerprint used for fallback product discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Shopify,
}

/// Immutable fetch policy for one domain.
///
/// Resolved once per request through `Config::policy_for`; domains without
/// an explicit entry get the default policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPolicy {
    /// Domain suffix this policy applies to (e.g. "very.co.uk")
    pub domain: String,

    #[serde(default)]
    pub header_profile: HeaderProfile,

    #[serde(default)]
    pub timeout_class: TimeoutClass,

    /// Fetch through the render service (JavaScript-dependent markup)
    #[serde(default)]
    pub js_render: bool,

    /// Route through the proxy collaborator (anti-bot blocked)
    #[serde(default)]
    pub proxied: bool,

    /// Known commerce platform, enables catalog-feed fallback
    #[serde(default)]
    pub platform: Option<Platform>,
}

impl DomainPolicy {
    /// Default policy for a domain with no configured entry.
    pub fn standard(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            header_profile: HeaderProfile::Desktop,
            timeout_class: TimeoutClass::Standard,
            js_render: false,
            proxied: false,
            platform: None,
        }
    }
}

/// One URL under watch, assembled from a group file and domain policy.
/// Immutable for the duration of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredTarget {
    pub url: String,
    pub kind: TargetKind,
    /// Alert-routing key
    pub group: String,
    pub policy: DomainPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_defaults() {
        let policy = DomainPolicy::standard("shop.example");
        assert_eq!(policy.header_profile, HeaderProfile::Desktop);
        assert_eq!(policy.timeout_class, TimeoutClass::Standard);
        assert!(!policy.js_render);
        assert!(!policy.proxied);
        assert!(policy.platform.is_none());
    }
}
