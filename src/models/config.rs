// src/models/config.rs

//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::target::{DomainPolicy, HeaderProfile, Platform, TargetKind, TimeoutClass};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Polling loop behavior
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// HTTP fetch policy
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Listing-page discovery settings
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Availability keyword rules
    #[serde(default)]
    pub rules: RulesConfig,

    /// Rotating header tuples per profile
    #[serde(default)]
    pub headers: HeaderPools,

    /// Alert delivery settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Render-service collaborator for JavaScript-dependent domains
    #[serde(default)]
    pub render: RenderConfig,

    /// Proxy collaborator for anti-bot-blocked domains
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Monitored URL groups (alert-routing keys)
    #[serde(default)]
    pub groups: Vec<TargetGroup>,

    /// Per-domain fetch policies
    #[serde(default = "defaults::domains")]
    pub domains: Vec<DomainPolicy>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Resolve the fetch policy for a domain.
    ///
    /// Entries match by domain suffix, so "very.co.uk" covers
    /// "www.very.co.uk". Unmatched domains get the standard policy.
    pub fn policy_for(&self, domain: &str) -> DomainPolicy {
        let domain = domain.to_lowercase();
        self.domains
            .iter()
            .find(|p| domain == p.domain || domain.ends_with(&format!(".{}", p.domain)))
            .cloned()
            .unwrap_or_else(|| DomainPolicy::standard(domain))
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.timeout_secs == 0 {
            return Err(AppError::validation("fetch.timeout_secs must be > 0"));
        }
        if self.fetch.max_timeout_secs < self.fetch.timeout_secs {
            return Err(AppError::validation(
                "fetch.max_timeout_secs must be >= fetch.timeout_secs",
            ));
        }
        if self.monitor.max_target_delay_ms < self.monitor.min_target_delay_ms {
            return Err(AppError::validation(
                "monitor.max_target_delay_ms must be >= monitor.min_target_delay_ms",
            ));
        }
        if self.headers.desktop.is_empty() || self.headers.mobile.is_empty() {
            return Err(AppError::validation("header pools must not be empty"));
        }
        if self.rules.out_terms.is_empty() || self.rules.in_terms.is_empty() {
            return Err(AppError::validation("keyword rule lists must not be empty"));
        }
        if self.extractor.min_container_links == 0 {
            return Err(AppError::validation(
                "extractor.min_container_links must be > 0",
            ));
        }
        if self.groups.is_empty() {
            return Err(AppError::validation("No target groups defined"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            fetch: FetchConfig::default(),
            extractor: ExtractorConfig::default(),
            rules: RulesConfig::default(),
            headers: HeaderPools::default(),
            dispatch: DispatchConfig::default(),
            render: RenderConfig::default(),
            proxy: ProxyConfig::default(),
            groups: Vec::new(),
            domains: defaults::domains(),
        }
    }
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause between full scan cycles in seconds
    #[serde(default = "defaults::cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Lower bound of the randomized delay between targets
    #[serde(default = "defaults::min_target_delay")]
    pub min_target_delay_ms: u64,

    /// Upper bound of the randomized delay between targets
    #[serde(default = "defaults::max_target_delay")]
    pub max_target_delay_ms: u64,

    /// Pause between consecutive alert sends
    #[serde(default = "defaults::alert_pause")]
    pub alert_pause_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: defaults::cycle_interval(),
            min_target_delay_ms: defaults::min_target_delay(),
            max_target_delay_ms: defaults::max_target_delay(),
            alert_pause_ms: defaults::alert_pause(),
        }
    }
}

/// HTTP fetch policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Standard request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Extended timeout for domains in the slow class
    #[serde(default = "defaults::slow_timeout")]
    pub slow_timeout_secs: u64,

    /// Hard ceiling applied over any per-domain timeout
    #[serde(default = "defaults::max_timeout")]
    pub max_timeout_secs: u64,

    /// Retry attempts for transient statuses (429/5xx)
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per attempt)
    #[serde(default = "defaults::backoff")]
    pub backoff_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "defaults::max_backoff")]
    pub max_backoff_ms: u64,

    /// Failure cooldown window in seconds
    #[serde(default = "defaults::failure_cooldown")]
    pub failure_cooldown_secs: u64,

    /// Minimum spacing between verification fetches for one URL
    #[serde(default = "defaults::verify_cooldown")]
    pub verify_cooldown_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout(),
            slow_timeout_secs: defaults::slow_timeout(),
            max_timeout_secs: defaults::max_timeout(),
            max_retries: defaults::max_retries(),
            backoff_ms: defaults::backoff(),
            max_backoff_ms: defaults::max_backoff(),
            failure_cooldown_secs: defaults::failure_cooldown(),
            verify_cooldown_secs: defaults::verify_cooldown(),
        }
    }
}

impl FetchConfig {
    /// Effective timeout for a timeout class, capped by the hard ceiling.
    pub fn timeout_for(&self, class: TimeoutClass) -> u64 {
        let requested = match class {
            TimeoutClass::Standard => self.timeout_secs,
            TimeoutClass::Slow => self.slow_timeout_secs,
        };
        requested.min(self.max_timeout_secs)
    }
}

/// Listing-page discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Minimum candidate links for a container selector to be accepted
    #[serde(default = "defaults::min_container_links")]
    pub min_container_links: usize,

    /// Names shorter than this are discarded
    #[serde(default = "defaults::min_name_chars")]
    pub min_name_chars: usize,

    /// Names are truncated to this length
    #[serde(default = "defaults::max_name_chars")]
    pub max_name_chars: usize,

    /// Ancestor text is collected until the card window reaches this size
    #[serde(default = "defaults::card_min_chars")]
    pub card_min_chars: usize,

    /// Maximum ancestor levels to walk for card text
    #[serde(default = "defaults::card_ancestor_levels")]
    pub card_ancestor_levels: usize,

    /// Sibling elements included on each side of the link
    #[serde(default = "defaults::card_sibling_span")]
    pub card_sibling_span: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_container_links: defaults::min_container_links(),
            min_name_chars: defaults::min_name_chars(),
            max_name_chars: defaults::max_name_chars(),
            card_min_chars: defaults::card_min_chars(),
            card_ancestor_levels: defaults::card_ancestor_levels(),
            card_sibling_span: defaults::card_sibling_span(),
        }
    }
}

/// What a keyword rule asserts when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Out-of-stock phrase
    Out,
    /// Preorder phrase
    Preorder,
    /// In-stock phrase
    In,
    /// Purchase-action control wording (add to cart family)
    Action,
    /// Store gate signature (password wall, maintenance, anti-bot page)
    Gate,
}

/// Where a rule is allowed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    /// Anywhere in the document text
    Document,
    /// Only inside the located main-product subtree
    Product,
}

/// One entry of the priority-ordered availability rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRule {
    /// Lower-cased substring to search for
    pub pattern: String,
    pub kind: RuleKind,
    /// Higher priority wins when several rules match
    pub priority: u8,
    pub scope: RuleScope,
}

/// Keyword lists feeding the availability rule table.
///
/// Kept as flat lists in configuration; `rule_table` consolidates them
/// into one inspectable, priority-ordered table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "defaults::out_terms")]
    pub out_terms: Vec<String>,

    #[serde(default = "defaults::preorder_terms")]
    pub preorder_terms: Vec<String>,

    #[serde(default = "defaults::in_terms")]
    pub in_terms: Vec<String>,

    #[serde(default = "defaults::action_terms")]
    pub action_terms: Vec<String>,

    #[serde(default = "defaults::gate_terms")]
    pub gate_terms: Vec<String>,

    /// Character window after an in-stock phrase inspected for an
    /// out-of-stock phrase ("in stock items: sold out")
    #[serde(default = "defaults::window_chars")]
    pub window_chars: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            out_terms: defaults::out_terms(),
            preorder_terms: defaults::preorder_terms(),
            in_terms: defaults::in_terms(),
            action_terms: defaults::action_terms(),
            gate_terms: defaults::gate_terms(),
            window_chars: defaults::window_chars(),
        }
    }
}

impl RulesConfig {
    /// Consolidate the keyword lists into one priority-ordered rule table.
    ///
    /// Out-of-stock always outranks action/preorder/in-stock wording, so
    /// precedence between conflicting phrases in one scope is a property
    /// of this table rather than of branch ordering.
    pub fn rule_table(&self) -> Vec<StockRule> {
        let mut table = Vec::new();
        let mut push = |terms: &[String], kind: RuleKind, priority: u8, scope: RuleScope| {
            for term in terms {
                table.push(StockRule {
                    pattern: term.to_lowercase(),
                    kind,
                    priority,
                    scope,
                });
            }
        };

        push(&self.gate_terms, RuleKind::Gate, 90, RuleScope::Document);
        push(&self.out_terms, RuleKind::Out, 80, RuleScope::Product);
        push(&self.action_terms, RuleKind::Action, 60, RuleScope::Product);
        push(
            &self.preorder_terms,
            RuleKind::Preorder,
            40,
            RuleScope::Product,
        );
        push(&self.in_terms, RuleKind::In, 20, RuleScope::Product);

        table.sort_by(|a, b| b.priority.cmp(&a.priority));
        table
    }
}

/// One rotating header tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderBundle {
    pub user_agent: String,
    pub accept_language: String,
    #[serde(default)]
    pub referer: Option<String>,
}

/// Header tuples per browser profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderPools {
    #[serde(default = "defaults::desktop_headers")]
    pub desktop: Vec<HeaderBundle>,

    #[serde(default = "defaults::mobile_headers")]
    pub mobile: Vec<HeaderBundle>,
}

impl Default for HeaderPools {
    fn default() -> Self {
        Self {
            desktop: defaults::desktop_headers(),
            mobile: defaults::mobile_headers(),
        }
    }
}

impl HeaderPools {
    /// Header tuples for a profile.
    pub fn pool(&self, profile: HeaderProfile) -> &[HeaderBundle] {
        match profile {
            HeaderProfile::Desktop => &self.desktop,
            HeaderProfile::Mobile => &self.mobile,
        }
    }
}

/// Alert delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Webhook URL; falls back to the environment variable below
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Environment variable consulted when webhook_url is unset
    #[serde(default = "defaults::webhook_env")]
    pub webhook_env: String,

    /// Delivery timeout in seconds
    #[serde(default = "defaults::dispatch_timeout")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_env: defaults::webhook_env(),
            timeout_secs: defaults::dispatch_timeout(),
        }
    }
}

impl DispatchConfig {
    /// Resolve the webhook URL from config or environment.
    pub fn resolve_webhook(&self) -> Option<String> {
        self.webhook_url
            .clone()
            .or_else(|| std::env::var(&self.webhook_env).ok())
            .filter(|u| !u.trim().is_empty())
    }
}

/// Render-service collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Endpoint accepting `GET {endpoint}?url=<target>`
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "defaults::render_timeout")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: defaults::render_timeout(),
        }
    }
}

/// Proxy collaborator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// A monitored URL group backed by a plain-text file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetGroup {
    /// Alert-routing key
    pub name: String,

    /// Path to the URL list file, one URL per line
    pub file: String,

    /// How every URL in this group is processed
    pub kind: TargetKind,
}

mod defaults {
    use super::HeaderBundle;
    use crate::models::target::{DomainPolicy, HeaderProfile, TimeoutClass};

    // Monitor defaults
    pub fn cycle_interval() -> u64 {
        30
    }
    pub fn min_target_delay() -> u64 {
        2000
    }
    pub fn max_target_delay() -> u64 {
        4000
    }
    pub fn alert_pause() -> u64 {
        1000
    }

    // Fetch defaults
    pub fn timeout() -> u64 {
        20
    }
    pub fn slow_timeout() -> u64 {
        45
    }
    pub fn max_timeout() -> u64 {
        60
    }
    pub fn max_retries() -> u32 {
        2
    }
    pub fn backoff() -> u64 {
        500
    }
    pub fn max_backoff() -> u64 {
        4000
    }
    pub fn failure_cooldown() -> u64 {
        300
    }
    pub fn verify_cooldown() -> u64 {
        600
    }

    // Extractor defaults
    pub fn min_container_links() -> usize {
        3
    }
    pub fn min_name_chars() -> usize {
        3
    }
    pub fn max_name_chars() -> usize {
        100
    }
    pub fn card_min_chars() -> usize {
        50
    }
    pub fn card_ancestor_levels() -> usize {
        5
    }
    pub fn card_sibling_span() -> usize {
        3
    }

    // Rule defaults
    pub fn out_terms() -> Vec<String> {
        [
            "out of stock",
            "sold out",
            "soldout",
            "out-of-stock",
            "unavailable",
            "currently unavailable",
            "temporarily out of stock",
            "not in stock",
            "no stock available",
            "stock: 0",
            "notify when available",
            "notify me when in stock",
            "notify me",
            "email when available",
            "waitlist",
            "wait list",
        ]
        .map(String::from)
        .to_vec()
    }
    pub fn preorder_terms() -> Vec<String> {
        [
            "pre-order",
            "preorder",
            "pre order",
            "coming soon",
            "backorder",
            "back order",
        ]
        .map(String::from)
        .to_vec()
    }
    pub fn in_terms() -> Vec<String> {
        [
            "in stock",
            "in-stock",
            "instock",
            "in stock now",
            "item in stock",
            "stock available",
            "stock: available",
            "available now",
            "available to buy",
            "ready to ship",
            "ships today",
        ]
        .map(String::from)
        .to_vec()
    }
    pub fn action_terms() -> Vec<String> {
        [
            "add to cart",
            "add to basket",
            "add to bag",
            "add to trolley",
            "add to shopping cart",
            "add to shopping bag",
            "buy now",
            "order now",
            "purchase now",
        ]
        .map(String::from)
        .to_vec()
    }
    pub fn gate_terms() -> Vec<String> {
        [
            "enter store using password",
            "opening soon",
            "under maintenance",
            "be right back",
            "checking your browser",
            "just a moment",
            "verify you are human",
            "access denied",
            "captcha",
        ]
        .map(String::from)
        .to_vec()
    }
    pub fn window_chars() -> usize {
        48
    }

    // Dispatch defaults
    pub fn webhook_env() -> String {
        "STOCKWATCH_WEBHOOK".into()
    }
    pub fn dispatch_timeout() -> u64 {
        10
    }
    pub fn render_timeout() -> u64 {
        60
    }

    // Domain policy defaults: catalog retailers known to reject desktop
    // user agents are served the mobile profile.
    pub fn domains() -> Vec<DomainPolicy> {
        ["very.co.uk", "freemans.com", "jdwilliams.co.uk", "jacamo.co.uk"]
            .into_iter()
            .map(|domain| DomainPolicy {
                domain: domain.to_string(),
                header_profile: HeaderProfile::Mobile,
                timeout_class: TimeoutClass::Standard,
                js_render: false,
                proxied: false,
                platform: None,
            })
            .collect()
    }

    // Header pool defaults
    pub fn desktop_headers() -> Vec<HeaderBundle> {
        vec![
            HeaderBundle {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36"
                    .into(),
                accept_language: "en-GB,en;q=0.9".into(),
                referer: Some("https://www.google.com/".into()),
            },
            HeaderBundle {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) \
                             Gecko/20100101 Firefox/123.0"
                    .into(),
                accept_language: "en-US,en;q=0.8".into(),
                referer: None,
            },
            HeaderBundle {
                user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                             AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Safari/605.1.15"
                    .into(),
                accept_language: "en-GB,en;q=0.9".into(),
                referer: Some("https://www.bing.com/".into()),
            },
        ]
    }
    pub fn mobile_headers() -> Vec<HeaderBundle> {
        vec![
            HeaderBundle {
                user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) \
                             AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 \
                             Mobile/15E148 Safari/604.1"
                    .into(),
                accept_language: "en-GB,en;q=0.9".into(),
                referer: None,
            },
            HeaderBundle {
                user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/122.0.0.0 Mobile Safari/537.36"
                    .into(),
                accept_language: "en-US,en;q=0.8".into(),
                referer: Some("https://www.google.com/".into()),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::target::TargetKind;

    fn config_with_group() -> Config {
        let mut config = Config::default();
        config.groups.push(TargetGroup {
            name: "pokemon".into(),
            file: "targets/pokemon.txt".into(),
            kind: TargetKind::Listing,
        });
        config
    }

    #[test]
    fn validate_accepts_configured_groups() {
        assert!(config_with_group().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_groups() {
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut config = config_with_group();
        config.monitor.min_target_delay_ms = 5000;
        config.monitor.max_target_delay_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_capped_by_ceiling() {
        let mut fetch = FetchConfig::default();
        fetch.slow_timeout_secs = 300;
        fetch.max_timeout_secs = 60;
        assert_eq!(fetch.timeout_for(TimeoutClass::Slow), 60);
        assert_eq!(fetch.timeout_for(TimeoutClass::Standard), fetch.timeout_secs);
    }

    #[test]
    fn policy_for_matches_domain_suffix() {
        let config = Config::default();
        let policy = config.policy_for("www.very.co.uk");
        assert_eq!(policy.header_profile, HeaderProfile::Mobile);

        let fallback = config.policy_for("shop.example.com");
        assert_eq!(fallback.header_profile, HeaderProfile::Desktop);
        assert_eq!(fallback.domain, "shop.example.com");
    }

    #[test]
    fn policy_suffix_match_requires_label_boundary() {
        let config = Config::default();
        // "notvery.co.uk" must not inherit the very.co.uk policy
        let policy = config.policy_for("notvery.co.uk");
        assert_eq!(policy.header_profile, HeaderProfile::Desktop);
    }

    #[test]
    fn rule_table_orders_out_above_in() {
        let table = RulesConfig::default().rule_table();
        let out_pos = table.iter().position(|r| r.kind == RuleKind::Out).unwrap();
        let in_pos = table.iter().position(|r| r.kind == RuleKind::In).unwrap();
        assert!(out_pos < in_pos);
        // Table is sorted by descending priority
        assert!(table.windows(2).all(|w| w[0].priority >= w[1].priority));
    }
}
