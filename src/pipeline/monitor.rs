// src/pipeline/monitor.rs

//! The sequential polling loop.
//!
//! One target at a time: cooldown checks, fetch, discovery or direct
//! classification, change detection, verification, dispatch, persist.
//! Randomized delays between targets and between cycles keep request
//! rates below anti-bot thresholds; the loop never parallelizes
//! fetches, and no error kind stops it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use rand::Rng;

use crate::error::Result;
use crate::models::{
    Config, Discovery, MonitoredTarget, Platform, ProvisionalSignal, StockKind, TargetKind,
};
use crate::pipeline::caches::MonitorCaches;
use crate::pipeline::detect::ChangeDetector;
use crate::services::classifier::{requires_javascript, Classifier};
use crate::services::dispatcher::AlertSink;
use crate::services::extractor::ProductExtractor;
use crate::services::fetcher::PageFetcher;
use crate::services::verifier::{Verifier, VerifyOutcome};
use crate::storage::{ProductStore, RecordMap};
use crate::targets::TargetProvider;
use crate::utils::url::{canonicalize, domain_of};

/// Counters for one completed scan cycle.
#[derive(Debug, Default)]
pub struct CycleStats {
    pub targets: usize,
    pub fetched: usize,
    pub skipped: usize,
    pub candidates: usize,
    pub confirmed: usize,
    pub tracked: usize,
}

/// The polling loop and all state it owns.
pub struct Monitor {
    config: Config,
    provider: TargetProvider,
    classifier: Classifier,
    extractor: ProductExtractor,
    fetcher: Box<dyn PageFetcher>,
    store: Box<dyn ProductStore>,
    sink: Box<dyn AlertSink>,
    caches: MonitorCaches,
    /// group → canonical url → record, seeded from the store at startup
    records: RecordMap,
    /// listing url → product count from the previous cycle
    listing_counts: HashMap<String, usize>,
    /// (group, canonical url) of direct-product targets last refresh
    direct_targets: HashSet<(String, String)>,
    /// First cycle over an empty store builds the database silently
    seeding: bool,
}

impl Monitor {
    /// Assemble the monitor, seeding previous records from the store.
    pub async fn new(
        config: Config,
        provider: TargetProvider,
        fetcher: Box<dyn PageFetcher>,
        store: Box<dyn ProductStore>,
        sink: Box<dyn AlertSink>,
    ) -> Result<Self> {
        let records = store.load_all().await?;
        let tracked: usize = records.values().map(|group| group.len()).sum();
        let seeding = tracked == 0;
        if seeding {
            log::info!("Empty product state; first cycle will seed without alerting");
        } else {
            log::info!("Seeded {} products across {} groups", tracked, records.len());
        }
        Ok(Self {
            classifier: Classifier::new(&config.rules),
            extractor: ProductExtractor::new(config.extractor.clone()),
            caches: MonitorCaches::from_config(&config.fetch),
            config,
            provider,
            fetcher,
            store,
            sink,
            records,
            listing_counts: HashMap::new(),
            direct_targets: HashSet::new(),
            seeding,
        })
    }

    /// Run scan cycles until the process is terminated.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.run_cycle().await {
                Ok(stats) => log::info!(
                    "Cycle done: {}/{} targets fetched ({} skipped), {} candidates, \
                     {} confirmed, {} products tracked",
                    stats.fetched,
                    stats.targets,
                    stats.skipped,
                    stats.candidates,
                    stats.confirmed,
                    stats.tracked
                ),
                Err(e) => log::error!("Cycle failed: {}", e),
            }
            let pause = Duration::from_secs(self.config.monitor.cycle_interval_secs) + self.jitter();
            tokio::time::sleep(pause).await;
        }
    }

    /// One full pass over every monitored target.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        let targets = self.refresh_targets().await;
        let mut stats = CycleStats {
            targets: targets.len(),
            ..CycleStats::default()
        };

        for (index, target) in targets.iter().enumerate() {
            if index > 0 {
                let delay = self.jitter();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            self.process_target(target, &mut stats).await;
        }

        if self.seeding {
            log::info!("Seeding cycle complete; alerts are live from the next cycle");
            self.seeding = false;
        }
        stats.tracked = self.records.values().map(|group| group.len()).sum();
        Ok(stats)
    }

    /// Randomized inter-request delay.
    fn jitter(&self) -> Duration {
        let min = self.config.monitor.min_target_delay_ms;
        let max = self.config.monitor.max_target_delay_ms;
        let ms = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };
        Duration::from_millis(ms)
    }

    /// Re-read the group URL files so additions and removals take
    /// effect without a restart. Records for removed direct-product
    /// targets are dropped from the store.
    async fn refresh_targets(&mut self) -> Vec<MonitoredTarget> {
        let targets = self.provider.load(&self.config);

        let current: HashSet<(String, String)> = targets
            .iter()
            .filter(|t| t.kind == TargetKind::DirectProduct)
            .filter_map(|t| canonicalize(&t.url).map(|url| (t.group.clone(), url)))
            .collect();

        for (group, url) in self.direct_targets.difference(&current) {
            log::info!("Target removed from group {}: {}", group, url);
            if let Some(group_records) = self.records.get_mut(group) {
                group_records.remove(url);
            }
            self.caches.clear_verified_out(url);
            if let Err(e) = self.store.remove(group, url).await {
                log::warn!("State removal failed for {}: {}", url, e);
            }
        }
        let added = current.difference(&self.direct_targets).count();
        if added > 0 {
            log::info!("{} direct-product targets added", added);
        }
        self.direct_targets = current;
        targets
    }

    async fn process_target(&mut self, target: &MonitoredTarget, stats: &mut CycleStats) {
        if self.caches.in_failure_cooldown(&target.url) {
            log::debug!("{} is cooling down after a failure; skipped", target.url);
            stats.skipped += 1;
            return;
        }
        if self.caches.is_js_only(&target.url) && !target.policy.js_render {
            log::debug!("{} needs JavaScript and has no render route; skipped", target.url);
            stats.skipped += 1;
            return;
        }

        let page = match self.fetcher.fetch(&target.url, &target.policy).await {
            Ok(page) => page,
            Err(e) => {
                log::warn!("Fetch failed for {}: {}", target.url, e);
                self.caches.note_failure(&target.url);
                stats.skipped += 1;
                return;
            }
        };
        stats.fetched += 1;

        // Gate pages (anti-bot walls) also render short, so only a page
        // that is a plain JS shell earns the permanent skip.
        if !target.policy.js_render
            && requires_javascript(&page.html)
            && !self.classifier.is_gated(&page.html)
        {
            log::info!("{} renders only with JavaScript; skipping from now on", target.url);
            self.caches.mark_js_only(&target.url);
            return;
        }

        let (current, rediscovery_host) = match target.kind {
            TargetKind::Listing => {
                let Some(products) = self.discover(target, &page.final_url, &page.html).await
                else {
                    return;
                };
                (products, domain_of(&page.final_url))
            }
            TargetKind::DirectProduct => {
                let Some(entry) = self.classify_direct(target, &page.html) else {
                    return;
                };
                (entry, None)
            }
        };

        self.resolve(target, current, rediscovery_host.as_deref(), stats)
            .await;
    }

    /// Listing-page discovery with the platform-feed fallback.
    async fn discover(
        &mut self,
        target: &MonitoredTarget,
        base_url: &str,
        html: &str,
    ) -> Option<BTreeMap<String, Discovery>> {
        let mut products = match self.extractor.extract(html, base_url, &self.classifier) {
            Ok(products) => products,
            Err(e) => {
                log::warn!("Extraction failed for {}: {}", target.url, e);
                return None;
            }
        };

        let previous = self.listing_counts.get(&target.url).copied();
        if self.extractor.needs_fallback(products.len(), previous)
            && target.policy.platform == Some(Platform::Shopify)
        {
            if let Some(feed_url) = self.extractor.feed_url(base_url) {
                log::info!(
                    "Listing {} yielded {} products (previous cycle {:?}); querying catalog feed",
                    target.url,
                    products.len(),
                    previous
                );
                match self.fetcher.fetch(&feed_url, &target.policy).await {
                    Ok(feed_page) => match self.extractor.parse_feed(&feed_page.html, base_url) {
                        Ok(entries) => {
                            log::info!("Catalog feed returned {} products", entries.len());
                            self.extractor.merge_feed(&mut products, entries);
                        }
                        Err(e) => log::warn!("Catalog feed parse failed for {}: {}", feed_url, e),
                    },
                    Err(e) => log::warn!("Catalog feed fetch failed for {}: {}", feed_url, e),
                }
            }
        }

        self.listing_counts.insert(target.url.clone(), products.len());
        Some(products)
    }

    /// Wrap a direct product page into a one-entry discovery map.
    ///
    /// A direct in-stock verdict still maps to a verification prompt:
    /// the alert only fires after the verifier's independent fetch.
    fn classify_direct(
        &self,
        target: &MonitoredTarget,
        html: &str,
    ) -> Option<BTreeMap<String, Discovery>> {
        let Some(canonical) = canonicalize(&target.url) else {
            log::warn!("Unparseable target URL {}", target.url);
            return None;
        };
        let result = self.classifier.classify(html);
        let signal = match result.kind {
            StockKind::In => ProvisionalSignal::NeedsCheck,
            StockKind::Preorder => ProvisionalSignal::Preorder,
            StockKind::Out => ProvisionalSignal::Out,
            StockKind::Unknown => ProvisionalSignal::None,
        };
        let name = result.name.unwrap_or_else(|| canonical.clone());

        let mut current = BTreeMap::new();
        current.insert(canonical, Discovery { name, signal });
        Some(current)
    }

    /// Merge discoveries into records, then verify and dispatch.
    async fn resolve(
        &mut self,
        target: &MonitoredTarget,
        current: BTreeMap<String, Discovery>,
        rediscovery_host: Option<&str>,
        stats: &mut CycleStats,
    ) {
        let group_records = self.records.entry(target.group.clone()).or_default();
        let outcome =
            ChangeDetector::new().detect(&current, group_records, &mut self.caches, rediscovery_host);
        stats.candidates += outcome.candidates.len();

        for url in outcome.created.iter().chain(&outcome.out_writes) {
            if let Some(record) = group_records.get(url) {
                if let Err(e) = self.store.upsert(&target.group, record).await {
                    log::warn!("State write failed for {}: {}", url, e);
                }
            }
        }

        let verifier = Verifier::new(self.fetcher.as_ref(), &self.classifier);
        for candidate in &outcome.candidates {
            match verifier
                .verify(candidate, &target.group, &target.policy, group_records, &mut self.caches)
                .await
            {
                Ok(VerifyOutcome::Confirmed(alert)) => {
                    stats.confirmed += 1;
                    if let Some(record) = group_records.get(&candidate.url) {
                        if let Err(e) = self.store.upsert(&target.group, record).await {
                            log::warn!("State write failed for {}: {}", candidate.url, e);
                        }
                    }
                    if self.seeding {
                        log::info!("Seeding: {} is available, alert withheld", alert.canonical_url);
                        continue;
                    }
                    log::info!("{} alert: {} ({})", alert.kind, alert.name, alert.canonical_url);
                    if let Err(e) = self.sink.send(&alert).await {
                        log::warn!("Alert delivery failed for {}: {}", alert.canonical_url, e);
                    }
                    let pause = Duration::from_millis(self.config.monitor.alert_pause_ms);
                    if !pause.is_zero() {
                        tokio::time::sleep(pause).await;
                    }
                }
                Ok(VerifyOutcome::Out) => {
                    if let Some(record) = group_records.get(&candidate.url) {
                        if let Err(e) = self.store.upsert(&target.group, record).await {
                            log::warn!("State write failed for {}: {}", candidate.url, e);
                        }
                    }
                }
                Ok(VerifyOutcome::Unknown) | Ok(VerifyOutcome::Skipped) => {}
                Err(e) => {
                    log::warn!("Verification fetch failed for {}: {}", candidate.url, e);
                    self.caches.note_failure(&candidate.url);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::error::AppError;
    use crate::models::{Alert, DomainPolicy, ProductRecord, TargetGroup, TransitionKind};
    use crate::services::fetcher::FetchedPage;

    const LISTING_URL: &str = "https://shop.example/collections/pokemon";
    const PRODUCT_URL: &str = "https://shop.example/products/booster-box";

    #[derive(Default, Clone)]
    struct StubFetcher {
        pages: Arc<Mutex<HashMap<String, String>>>,
        calls: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl StubFetcher {
        fn set_page(&self, url: &str, html: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), html.to_string());
        }

        fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &str, _policy: &DomainPolicy) -> Result<FetchedPage> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
            match self.pages.lock().unwrap().get(url) {
                Some(html) => Ok(FetchedPage {
                    status: 200,
                    final_url: url.to_string(),
                    html: html.clone(),
                }),
                None => Err(AppError::fetch(url, "HTTP status 503")),
            }
        }
    }

    #[derive(Default, Clone)]
    struct MemoryStore {
        state: Arc<Mutex<RecordMap>>,
    }

    #[async_trait]
    impl ProductStore for MemoryStore {
        async fn load_all(&self) -> Result<RecordMap> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn upsert(&self, group: &str, record: &ProductRecord) -> Result<()> {
            self.state
                .lock()
                .unwrap()
                .entry(group.to_string())
                .or_default()
                .insert(record.canonical_url.clone(), record.clone());
            Ok(())
        }

        async fn remove(&self, group: &str, canonical_url: &str) -> Result<()> {
            if let Some(records) = self.state.lock().unwrap().get_mut(group) {
                records.remove(canonical_url);
            }
            Ok(())
        }
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<Alert>>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn send(&self, alert: &Alert) -> Result<()> {
            self.sent.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    fn listing_html(badge: &str) -> String {
        format!(
            r#"<html><body><div class="products-grid">
            <div class="card"><a href="/products/booster-box"><h3>Scarlet Booster Box</h3></a>
              <p>Display of 36 sealed packs for collectors</p><span>{badge}</span></div>
            <div class="card"><a href="/products/elite-trainer"><h3>Elite Trainer Box</h3></a>
              <p>Nine boosters plus sleeves and dice inside</p><span>Sold out</span></div>
            <div class="card"><a href="/products/mini-tin"><h3>Mini Tin Lot</h3></a>
              <p>Three mini tins with exclusive artwork</p><span>Sold out</span></div>
            </div></body></html>"#
        )
    }

    fn product_html(state: &str) -> String {
        format!(
            "<html><head><title>Scarlet Booster Box</title></head><body>\
             <div class=\"product-details\"><h1>Scarlet Booster Box</h1>{state}</div>\
             </body></html>"
        )
    }

    struct Harness {
        monitor: Monitor,
        fetcher: StubFetcher,
        store: MemoryStore,
        sink: RecordingSink,
        dir: TempDir,
    }

    async fn harness(kind: TargetKind, target_url: &str, seed: Option<ProductRecord>) -> Harness {
        harness_with(kind, target_url, seed, false).await
    }

    async fn harness_with(
        kind: TargetKind,
        target_url: &str,
        seed: Option<ProductRecord>,
        shopify: bool,
    ) -> Harness {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("pokemon.txt"), format!("{target_url}\n")).unwrap();

        let mut config = Config::default();
        config.groups.push(TargetGroup {
            name: "pokemon".into(),
            file: "pokemon.txt".into(),
            kind,
        });
        if shopify {
            config.domains.push(DomainPolicy {
                domain: "shop.example".into(),
                header_profile: Default::default(),
                timeout_class: Default::default(),
                js_render: false,
                proxied: false,
                platform: Some(Platform::Shopify),
            });
        }
        config.monitor.min_target_delay_ms = 0;
        config.monitor.max_target_delay_ms = 0;
        config.monitor.alert_pause_ms = 0;
        config.fetch.verify_cooldown_secs = 0;

        let fetcher = StubFetcher::default();
        let store = MemoryStore::default();
        if let Some(record) = seed {
            store.upsert("pokemon", &record).await.unwrap();
        }
        let sink = RecordingSink::default();
        let provider = TargetProvider::new(dir.path(), config.groups.clone());

        let monitor = Monitor::new(
            config,
            provider,
            Box::new(fetcher.clone()),
            Box::new(store.clone()),
            Box::new(sink.clone()),
        )
        .await
        .unwrap();

        Harness {
            monitor,
            fetcher,
            store,
            sink,
            dir,
        }
    }

    fn seeded_record() -> ProductRecord {
        ProductRecord::new(PRODUCT_URL, "Scarlet Booster Box")
    }

    #[tokio::test]
    async fn restock_alert_fires_after_verification() {
        let mut h = harness(TargetKind::Listing, LISTING_URL, Some(seeded_record())).await;
        h.fetcher.set_page(LISTING_URL, &listing_html("In stock"));
        h.fetcher
            .set_page(PRODUCT_URL, &product_html("<button>Add to cart</button>"));

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.confirmed, 1);

        let sent = h.sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TransitionKind::Restock);
        assert_eq!(sent[0].canonical_url, PRODUCT_URL);

        let state = h.store.state.lock().unwrap().clone();
        let record = &state["pokemon"][PRODUCT_URL];
        assert!(record.available);
        assert!(record.last_alert_at.is_some());
    }

    #[tokio::test]
    async fn confirmed_available_does_not_realert() {
        let mut h = harness(TargetKind::Listing, LISTING_URL, Some(seeded_record())).await;
        h.fetcher.set_page(LISTING_URL, &listing_html("In stock"));
        h.fetcher
            .set_page(PRODUCT_URL, &product_html("<button>Add to cart</button>"));

        h.monitor.run_cycle().await.unwrap();
        let stats = h.monitor.run_cycle().await.unwrap();

        assert_eq!(stats.candidates, 0);
        assert_eq!(h.sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn verified_out_suppresses_reverification() {
        let mut h = harness(TargetKind::Listing, LISTING_URL, Some(seeded_record())).await;
        h.fetcher.set_page(LISTING_URL, &listing_html("In stock"));
        h.fetcher.set_page(PRODUCT_URL, &product_html("<p>Sold out</p>"));

        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.fetcher.calls_for(PRODUCT_URL), 1);
        assert!(h.sink.sent.lock().unwrap().is_empty());

        // The listing still hints availability, but the direct
        // confirmation stands until the product vanishes and returns.
        h.monitor.run_cycle().await.unwrap();
        assert_eq!(h.fetcher.calls_for(PRODUCT_URL), 1);
        assert!(h.sink.sent.lock().unwrap().is_empty());

        let state = h.store.state.lock().unwrap().clone();
        assert!(!state["pokemon"][PRODUCT_URL].available);
    }

    #[tokio::test]
    async fn failed_fetch_enters_cooldown_and_preserves_state() {
        let mut h = harness(TargetKind::Listing, LISTING_URL, Some(seeded_record())).await;
        // No pages registered: every fetch fails

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.fetched, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(h.fetcher.calls_for(LISTING_URL), 1);

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.skipped, 1);
        // Still cooling down: no second fetch attempt
        assert_eq!(h.fetcher.calls_for(LISTING_URL), 1);

        let state = h.store.state.lock().unwrap().clone();
        let record = &state["pokemon"][PRODUCT_URL];
        assert!(!record.available);
        assert_eq!(record.name, "Scarlet Booster Box");
    }

    #[tokio::test]
    async fn seeding_cycle_withholds_alerts() {
        let mut h = harness(TargetKind::Listing, LISTING_URL, None).await;
        h.fetcher.set_page(LISTING_URL, &listing_html("Pre-order today"));
        h.fetcher.set_page(
            PRODUCT_URL,
            &product_html("<p>Pre-order now</p><button>Add to cart</button>"),
        );

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.confirmed, 1);
        assert!(h.sink.sent.lock().unwrap().is_empty());

        let state = h.store.state.lock().unwrap().clone();
        assert!(state["pokemon"][PRODUCT_URL].available);

        // Alerts are live from the second cycle, but nothing changed
        h.monitor.run_cycle().await.unwrap();
        assert!(h.sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn direct_preorder_page_alerts_with_preorder_kind() {
        let mut h = harness(TargetKind::DirectProduct, PRODUCT_URL, Some(seeded_record())).await;
        h.fetcher.set_page(
            PRODUCT_URL,
            &product_html("<p>Pre-order today</p><button>Add to cart</button>"),
        );

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.confirmed, 1);
        // Initial classify plus the independent verification fetch
        assert_eq!(h.fetcher.calls_for(PRODUCT_URL), 2);

        let sent = h.sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TransitionKind::Preorder);

        let state = h.store.state.lock().unwrap().clone();
        let record = &state["pokemon"][PRODUCT_URL];
        assert!(record.available);
        assert_eq!(record.stock_kind, StockKind::Preorder);
    }

    #[tokio::test]
    async fn collapsed_listing_falls_back_to_catalog_feed() {
        let mut h = harness_with(TargetKind::Listing, LISTING_URL, Some(seeded_record()), true).await;
        // The listing renders an empty grid; the feed still knows the catalog
        h.fetcher.set_page(
            LISTING_URL,
            "<html><body><div class=\"products-grid\"><p>Nothing matched your \
             filters here, try browsing the full collection instead.</p></div></body></html>",
        );
        h.fetcher.set_page(
            "https://shop.example/collections/pokemon/products.json?limit=250",
            r#"{"products":[{"title":"Scarlet Booster Box","handle":"booster-box",
                "variants":[{"available":true}]}]}"#,
        );
        h.fetcher
            .set_page(PRODUCT_URL, &product_html("<button>Add to cart</button>"));

        let stats = h.monitor.run_cycle().await.unwrap();
        assert_eq!(stats.candidates, 1);
        assert_eq!(stats.confirmed, 1);

        let sent = h.sink.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].canonical_url, PRODUCT_URL);
    }

    #[tokio::test]
    async fn removed_direct_target_drops_record() {
        let mut h = harness(TargetKind::DirectProduct, PRODUCT_URL, Some(seeded_record())).await;
        h.fetcher.set_page(PRODUCT_URL, &product_html("<p>Sold out</p>"));

        h.monitor.run_cycle().await.unwrap();
        assert!(h.store.state.lock().unwrap()["pokemon"].contains_key(PRODUCT_URL));

        std::fs::write(h.dir.path().join("pokemon.txt"), "").unwrap();
        h.monitor.run_cycle().await.unwrap();

        let state = h.store.state.lock().unwrap().clone();
        assert!(state.get("pokemon").is_none_or(|g| g.is_empty()));
    }
}
