// src/services/extractor.rs

//! Product discovery on listing/category pages.
//!
//! Locates a bounded product container, filters candidate links down to
//! same-domain product URLs, and derives a provisional name and a
//! conservative provisional stock signal per product. Listing markup is
//! templated and noisy, so only a preorder phrase is trusted as
//! provisionally available; a bare in-stock hit only prompts direct
//! verification.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::error::Result;
use crate::models::{Discovery, ExtractorConfig, ProvisionalSignal, StockKind};
use crate::services::classifier::Classifier;
use crate::utils::url::{canonicalize, is_product_url, resolve};

/// Ranked container fingerprints. The first selector yielding enough
/// candidate links bounds the harvest, keeping navigation and footer
/// links out.
static CONTAINER_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        ".productListing",
        ".product-listing",
        ".products-grid",
        ".product-grid",
        ".products",
        "#products",
        ".product-list",
        "#product-list",
        ".categoryProducts",
        ".category-products",
        ".listing-products",
        "[class*='product-list']",
        "[class*='productList']",
        ".collection-products",
        ".grid-products",
        ".product-items",
        "main",
        ".main-content",
        "#main-content",
        ".content-main",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("container selector is valid"))
    .collect()
});

static ANCHOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("valid selector"));
static HEADING_LIKE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2, h3, h4, span, p").expect("valid selector"));

/// Discovers products on listing pages.
pub struct ProductExtractor {
    config: ExtractorConfig,
}

impl ProductExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Extract candidate products from a listing page.
    ///
    /// Returns a map keyed by canonical product URL; the first
    /// occurrence of a product wins when several links resolve to the
    /// same key.
    pub fn extract(
        &self,
        raw_html: &str,
        base_url: &str,
        classifier: &Classifier,
    ) -> Result<BTreeMap<String, Discovery>> {
        let base = Url::parse(base_url)?;
        let html = Html::parse_document(raw_html);
        let mut products = BTreeMap::new();

        let container = self.find_container(&html);
        let links: Vec<ElementRef> = match container {
            Some(c) => c.select(&ANCHOR).collect(),
            None => html.select(&ANCHOR).collect(),
        };

        for link in links {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(absolute) = resolve(&base, href) else {
                continue;
            };
            if !is_product_url(&absolute, &base) {
                continue;
            }
            let Some(canonical) = canonicalize(&absolute) else {
                continue;
            };

            let Some(name) = self.derive_name(link) else {
                continue;
            };

            let card = self.card_text(link);
            let signal = match classifier.classify_snippet(&card) {
                StockKind::Out => ProvisionalSignal::Out,
                StockKind::Preorder => ProvisionalSignal::Preorder,
                // Listing-level in-stock wording is a verification
                // prompt, never an available state.
                StockKind::In => ProvisionalSignal::NeedsCheck,
                StockKind::Unknown => ProvisionalSignal::None,
            };

            products
                .entry(canonical)
                .or_insert(Discovery { name, signal });
        }

        Ok(products)
    }

    /// First container fingerprint with enough candidate links.
    fn find_container<'a>(&self, html: &'a Html) -> Option<ElementRef<'a>> {
        CONTAINER_SELECTORS.iter().find_map(|sel| {
            html.select(sel)
                .find(|c| c.select(&ANCHOR).count() >= self.config.min_container_links)
        })
    }

    /// Provisional name chain: image alt/title → link title attribute →
    /// heading-like descendant → link text.
    fn derive_name(&self, link: ElementRef) -> Option<String> {
        let mut name = link
            .select(&IMG)
            .next()
            .and_then(|img| {
                let alt = img.value().attr("alt").map(str::trim).unwrap_or_default();
                if !alt.is_empty() {
                    return Some(alt.to_string());
                }
                img.value()
                    .attr("title")
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
            })
            .unwrap_or_default();

        if name.is_empty() {
            name = link
                .value()
                .attr("title")
                .map(str::trim)
                .unwrap_or_default()
                .to_string();
        }
        if name.is_empty() {
            if let Some(heading) = link.select(&HEADING_LIKE).next() {
                name = squash(&heading.text().collect::<Vec<_>>().join(" "));
            }
        }
        if name.is_empty() {
            name = squash(&link.text().collect::<Vec<_>>().join(" "));
        }

        if name.chars().count() < self.config.min_name_chars {
            return None;
        }
        Some(name.chars().take(self.config.max_name_chars).collect())
    }

    /// Bounded card window around a product link: ancestor text until
    /// the window is large enough, a few siblings on each side, and the
    /// link's own class tokens.
    fn card_text(&self, link: ElementRef) -> String {
        let mut text = String::new();

        let mut node = link;
        for _ in 0..self.config.card_ancestor_levels {
            let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
                break;
            };
            text = lower_squash(&parent.text().collect::<Vec<_>>().join(" "));
            node = parent;
            if text.len() >= self.config.card_min_chars {
                break;
            }
        }
        if text.is_empty() {
            text = lower_squash(&link.text().collect::<Vec<_>>().join(" "));
        }

        for sibling in link
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take(self.config.card_sibling_span)
        {
            text.push(' ');
            text.push_str(&lower_squash(&sibling.text().collect::<Vec<_>>().join(" ")));
        }
        for sibling in link
            .prev_siblings()
            .filter_map(ElementRef::wrap)
            .take(self.config.card_sibling_span)
        {
            text.push(' ');
            text.push_str(&lower_squash(&sibling.text().collect::<Vec<_>>().join(" ")));
        }

        for class in link.value().classes() {
            text.push(' ');
            text.push_str(&class.to_lowercase());
        }

        text
    }

    /// Whether the primary harvest collapsed enough to try the
    /// platform catalog feed.
    pub fn needs_fallback(&self, current_count: usize, previous_count: Option<usize>) -> bool {
        if current_count == 0 {
            return true;
        }
        previous_count.is_some_and(|previous| current_count * 2 < previous)
    }

    /// Catalog feed URL for a listing page on a fingerprinted platform.
    pub fn feed_url(&self, base_url: &str) -> Option<String> {
        let base = Url::parse(base_url).ok()?;
        let path = base.path();
        let feed_path = match path
            .strip_prefix("/collections/")
            .and_then(|rest| rest.split('/').next())
        {
            Some(handle) if !handle.is_empty() => {
                format!("/collections/{}/products.json", handle)
            }
            _ => "/products.json".to_string(),
        };
        let mut feed = base.clone();
        feed.set_path(&feed_path);
        feed.set_query(Some("limit=250"));
        feed.set_fragment(None);
        Some(feed.to_string())
    }

    /// Parse a platform catalog feed into discovery entries.
    pub fn parse_feed(&self, json_text: &str, base_url: &str) -> Result<Vec<(String, Discovery)>> {
        let base = Url::parse(base_url)?;
        let feed: ShopifyFeed = serde_json::from_str(json_text)?;

        let mut entries = Vec::new();
        for product in feed.products {
            if product.handle.is_empty() {
                continue;
            }
            let mut product_url = base.clone();
            product_url.set_path(&format!("/products/{}", product.handle));
            product_url.set_query(None);
            let Some(canonical) = canonicalize(product_url.as_str()) else {
                continue;
            };

            let name: String = if product.title.chars().count() < self.config.min_name_chars {
                continue;
            } else {
                product.title.chars().take(self.config.max_name_chars).collect()
            };

            let availabilities: Vec<bool> = product
                .variants
                .iter()
                .filter_map(|v| v.available)
                .collect();
            let signal = if availabilities.iter().any(|a| *a) {
                // The feed says purchasable; still a verification prompt,
                // never a direct available state.
                ProvisionalSignal::NeedsCheck
            } else if !availabilities.is_empty() {
                ProvisionalSignal::Out
            } else {
                ProvisionalSignal::None
            };

            entries.push((canonical, Discovery { name, signal }));
        }
        Ok(entries)
    }

    /// Merge feed entries into the primary harvest. Missing products are
    /// added; where the two sources disagree the feed's signal wins.
    pub fn merge_feed(
        &self,
        products: &mut BTreeMap<String, Discovery>,
        entries: Vec<(String, Discovery)>,
    ) {
        for (canonical, discovery) in entries {
            match products.get_mut(&canonical) {
                Some(existing) => {
                    if existing.signal != discovery.signal
                        && discovery.signal != ProvisionalSignal::None
                    {
                        existing.signal = discovery.signal;
                    }
                }
                None => {
                    products.insert(canonical, discovery);
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ShopifyFeed {
    #[serde(default)]
    products: Vec<ShopifyProduct>,
}

#[derive(Debug, Deserialize)]
struct ShopifyProduct {
    #[serde(default)]
    title: String,
    #[serde(default)]
    handle: String,
    #[serde(default)]
    variants: Vec<ShopifyVariant>,
}

#[derive(Debug, Deserialize)]
struct ShopifyVariant {
    #[serde(default)]
    available: Option<bool>,
}

fn squash(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn lower_squash(s: &str) -> String {
    squash(s).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RulesConfig;

    const BASE: &str = "https://shop.example/collections/pokemon";

    fn extractor() -> ProductExtractor {
        ProductExtractor::new(ExtractorConfig::default())
    }

    fn classifier() -> Classifier {
        Classifier::new(&RulesConfig::default())
    }

    fn listing_page() -> String {
        r#"<html><body>
        <nav><a href="/cart">Cart</a><a href="/login">Login</a><a href="/search">Search</a></nav>
        <div class="products-grid">
          <div class="card">
            <a href="/collections/pokemon/products/booster-box">
              <img src="/img/1.jpg" alt="Scarlet Booster Box">
            </a>
            <p>Display of 36 sealed trading card packs</p>
            <span class="price">£129.99</span>
            <span class="badge">Sold out</span>
          </div>
          <div class="card">
            <a href="/products/elite-trainer?variant=2" title="Elite Trainer Box"></a>
            <p>Nine boosters plus accessories in one premium box</p>
            <span>Pre-order today</span>
          </div>
          <div class="card">
            <a href="/products/tin-lot"><h3>Mini Tin Lot</h3></a>
            <p>Three mini tins with exclusive artwork inside</p>
            <span>In stock</span>
          </div>
          <div class="card">
            <a href="/products/mystery"><h3>Mystery Pack</h3></a>
            <p>A sealed surprise from the vault, contents vary</p>
          </div>
          <div class="card">
            <a href="/products/tiny"><h3>XY</h3></a>
          </div>
        </div>
        <footer><a href="/collections">All collections</a></footer>
        </body></html>"#
            .to_string()
    }

    #[test]
    fn extracts_products_with_canonical_keys() {
        let products = extractor()
            .extract(&listing_page(), BASE, &classifier())
            .unwrap();

        assert!(products.contains_key("https://shop.example/products/booster-box"));
        assert!(products.contains_key("https://shop.example/products/elite-trainer"));
        assert!(products.contains_key("https://shop.example/products/tin-lot"));
        assert!(products.contains_key("https://shop.example/products/mystery"));
        // Chrome links never harvested
        assert!(!products.keys().any(|k| k.contains("/cart") || k.contains("/login")));
        // Names below the minimum length are discarded
        assert!(!products.contains_key("https://shop.example/products/tiny"));
    }

    #[test]
    fn card_signals_are_conservative() {
        let products = extractor()
            .extract(&listing_page(), BASE, &classifier())
            .unwrap();

        assert_eq!(
            products["https://shop.example/products/booster-box"].signal,
            ProvisionalSignal::Out
        );
        assert_eq!(
            products["https://shop.example/products/elite-trainer"].signal,
            ProvisionalSignal::Preorder
        );
        // Bare in-stock wording only prompts verification
        assert_eq!(
            products["https://shop.example/products/tin-lot"].signal,
            ProvisionalSignal::NeedsCheck
        );
        assert_eq!(
            products["https://shop.example/products/mystery"].signal,
            ProvisionalSignal::None
        );
    }

    #[test]
    fn name_chain_prefers_image_alt() {
        let products = extractor()
            .extract(&listing_page(), BASE, &classifier())
            .unwrap();
        assert_eq!(
            products["https://shop.example/products/booster-box"].name,
            "Scarlet Booster Box"
        );
        assert_eq!(
            products["https://shop.example/products/elite-trainer"].name,
            "Elite Trainer Box"
        );
        assert_eq!(
            products["https://shop.example/products/tin-lot"].name,
            "Mini Tin Lot"
        );
    }

    #[test]
    fn duplicate_paths_collapse_to_one_key() {
        let page = r#"<html><body><div class="products">
          <a href="/collections/pokemon/products/widget"><h3>Widget One</h3></a>
          <a href="/products/widget?ref=grid"><h3>Widget One Again</h3></a>
          <a href="/products/other"><h3>Other Thing</h3></a>
        </div></body></html>"#;
        let products = extractor().extract(page, BASE, &classifier()).unwrap();
        assert_eq!(products.len(), 2);
        // First occurrence wins
        assert_eq!(
            products["https://shop.example/products/widget"].name,
            "Widget One"
        );
    }

    #[test]
    fn sparse_container_falls_back_to_document() {
        let page = r#"<html><body>
          <div class="products-grid"><a href="/products/lone"><h3>Lone Widget</h3></a></div>
          <a href="/products/stray-one"><h3>Stray One</h3></a>
          <a href="/products/stray-two"><h3>Stray Two</h3></a>
        </body></html>"#;
        let products = extractor().extract(page, BASE, &classifier()).unwrap();
        // Container had under 3 links, so the whole document was scanned
        assert_eq!(products.len(), 3);
    }

    #[test]
    fn fallback_thresholds() {
        let e = extractor();
        assert!(e.needs_fallback(0, None));
        assert!(e.needs_fallback(2, Some(40)));
        assert!(!e.needs_fallback(21, Some(40)));
        assert!(!e.needs_fallback(40, Some(40)));
        assert!(!e.needs_fallback(5, None));
    }

    #[test]
    fn feed_url_for_collection_listing() {
        let e = extractor();
        assert_eq!(
            e.feed_url("https://shop.example/collections/pokemon?page=2"),
            Some("https://shop.example/collections/pokemon/products.json?limit=250".to_string())
        );
        assert_eq!(
            e.feed_url("https://shop.example/shop"),
            Some("https://shop.example/products.json?limit=250".to_string())
        );
    }

    #[test]
    fn parse_feed_maps_signals() {
        let json = r#"{"products":[
          {"title":"Booster Box","handle":"booster-box",
           "variants":[{"available":false},{"available":true}]},
          {"title":"Elite Trainer","handle":"elite-trainer",
           "variants":[{"available":false}]},
          {"title":"No Info","handle":"no-info","variants":[{}]}
        ]}"#;
        let entries = extractor().parse_feed(json, BASE).unwrap();
        assert_eq!(entries.len(), 3);

        let find = |handle: &str| {
            entries
                .iter()
                .find(|(url, _)| url.ends_with(handle))
                .map(|(_, d)| d.signal)
                .unwrap()
        };
        assert_eq!(find("booster-box"), ProvisionalSignal::NeedsCheck);
        assert_eq!(find("elite-trainer"), ProvisionalSignal::Out);
        assert_eq!(find("no-info"), ProvisionalSignal::None);
    }

    #[test]
    fn merge_feed_prefers_feed_signal() {
        let e = extractor();
        let mut products = BTreeMap::new();
        products.insert(
            "https://shop.example/products/booster-box".to_string(),
            Discovery {
                name: "Booster Box".into(),
                signal: ProvisionalSignal::None,
            },
        );

        e.merge_feed(
            &mut products,
            vec![
                (
                    "https://shop.example/products/booster-box".to_string(),
                    Discovery {
                        name: "Booster Box".into(),
                        signal: ProvisionalSignal::Out,
                    },
                ),
                (
                    "https://shop.example/products/new-item".to_string(),
                    Discovery {
                        name: "New Item".into(),
                        signal: ProvisionalSignal::NeedsCheck,
                    },
                ),
            ],
        );

        assert_eq!(
            products["https://shop.example/products/booster-box"].signal,
            ProvisionalSignal::Out
        );
        assert_eq!(products.len(), 2);
    }
}
