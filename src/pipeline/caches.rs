// src/pipeline/caches.rs

//! Process-local memoization for the polling loop.
//!
//! Four caches bound redundant network work: failure cooldown (minutes),
//! JS-only skip, verified-out (no expiry), and verification cooldown.
//! All are single-writer fields of a scheduler-owned value passed into
//! fetch/verify calls, so tests get isolated, disposable state.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::models::FetchConfig;

/// Caches owned by the monitor loop for the lifetime of the process.
#[derive(Debug)]
pub struct MonitorCaches {
    /// URL → cooldown expiry after a fetch failure
    failure_cooldown: HashMap<String, Instant>,

    /// URLs whose markup only renders with JavaScript and has no render route
    js_only: HashSet<String>,

    /// URLs directly confirmed unavailable by the verifier; cleared only
    /// on rediscovery or reconfirmed availability
    verified_out: HashSet<String>,

    /// URL → instant of the last verification fetch
    verify_cooldown: HashMap<String, Instant>,

    failure_ttl: Duration,
    verify_spacing: Duration,
}

impl MonitorCaches {
    pub fn new(failure_ttl: Duration, verify_spacing: Duration) -> Self {
        Self {
            failure_cooldown: HashMap::new(),
            js_only: HashSet::new(),
            verified_out: HashSet::new(),
            verify_cooldown: HashMap::new(),
            failure_ttl,
            verify_spacing,
        }
    }

    pub fn from_config(fetch: &FetchConfig) -> Self {
        Self::new(
            Duration::from_secs(fetch.failure_cooldown_secs),
            Duration::from_secs(fetch.verify_cooldown_secs),
        )
    }

    /// Record a fetch failure, opening the cooldown window.
    pub fn note_failure(&mut self, url: &str) {
        self.failure_cooldown
            .insert(url.to_string(), Instant::now() + self.failure_ttl);
    }

    /// Whether the URL is inside its failure cooldown window.
    /// Expired entries are removed on inspection.
    pub fn in_failure_cooldown(&mut self, url: &str) -> bool {
        match self.failure_cooldown.get(url) {
            Some(expiry) if Instant::now() < *expiry => true,
            Some(_) => {
                self.failure_cooldown.remove(url);
                false
            }
            None => false,
        }
    }

    pub fn mark_js_only(&mut self, url: &str) {
        self.js_only.insert(url.to_string());
    }

    pub fn is_js_only(&self, url: &str) -> bool {
        self.js_only.contains(url)
    }

    /// Record a direct confirmation that the product is unavailable.
    pub fn mark_verified_out(&mut self, url: &str) {
        self.verified_out.insert(url.to_string());
    }

    /// Forget a verified-out confirmation so the URL is evaluated fresh.
    pub fn clear_verified_out(&mut self, url: &str) {
        self.verified_out.remove(url);
    }

    pub fn is_verified_out(&self, url: &str) -> bool {
        self.verified_out.contains(url)
    }

    /// Whether a verification fetch is allowed for this URL right now.
    pub fn may_verify(&self, url: &str) -> bool {
        if self.verified_out.contains(url) {
            return false;
        }
        match self.verify_cooldown.get(url) {
            Some(last) => last.elapsed() >= self.verify_spacing,
            None => true,
        }
    }

    /// Stamp the start of a verification attempt.
    pub fn note_verification(&mut self, url: &str) {
        self.verify_cooldown.insert(url.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caches(failure_ms: u64, verify_ms: u64) -> MonitorCaches {
        MonitorCaches::new(
            Duration::from_millis(failure_ms),
            Duration::from_millis(verify_ms),
        )
    }

    #[test]
    fn failure_cooldown_blocks_then_expires() {
        let mut caches = caches(50, 0);
        let url = "https://shop.example/products/widget";

        assert!(!caches.in_failure_cooldown(url));
        caches.note_failure(url);
        assert!(caches.in_failure_cooldown(url));

        std::thread::sleep(Duration::from_millis(60));
        assert!(!caches.in_failure_cooldown(url));
        // Expired entry was removed, not just ignored
        assert!(!caches.failure_cooldown.contains_key(url));
    }

    #[test]
    fn verified_out_has_no_expiry() {
        let mut caches = caches(0, 0);
        let url = "https://shop.example/products/widget";

        caches.mark_verified_out(url);
        assert!(caches.is_verified_out(url));
        assert!(!caches.may_verify(url));

        caches.clear_verified_out(url);
        assert!(caches.may_verify(url));
    }

    #[test]
    fn verify_cooldown_spaces_attempts() {
        let mut caches = caches(0, 50);
        let url = "https://shop.example/products/widget";

        assert!(caches.may_verify(url));
        caches.note_verification(url);
        assert!(!caches.may_verify(url));

        std::thread::sleep(Duration::from_millis(60));
        assert!(caches.may_verify(url));
    }

    #[test]
    fn js_only_membership() {
        let mut caches = caches(0, 0);
        caches.mark_js_only("https://spa.example/products/widget");
        assert!(caches.is_js_only("https://spa.example/products/widget"));
        assert!(!caches.is_js_only("https://spa.example/products/other"));
    }
}
