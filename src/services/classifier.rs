// src/services/classifier.rs

//! Availability classification.
//!
//! Maps page content to a stock state using layered, priority-ordered
//! heuristics: structured availability metadata first, then store-gate
//! signatures, then keyword and purchase-control checks restricted to a
//! located main-product subtree. The keyword layer is driven by the
//! consolidated rule table from configuration, where out-of-stock always
//! outranks preorder and in-stock wording.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::{
    ClassificationResult, MatchedSource, RuleKind, RuleScope, RulesConfig, StockKind, StockRule,
};

/// Structured "unavailable" markers, trusted above any visible text.
static STRUCTURED_OUT: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Microdata: <link itemprop="availability" href=".../OutOfStock">
        r#"(?i)<[^>]*itemprop\s*=\s*["']availability["'][^>]*(?:outofstock|soldout|discontinued)"#,
        r#"(?i)<[^>]*(?:outofstock|soldout|discontinued)[^>]*itemprop\s*=\s*["']availability["']"#,
        // JSON-LD: "availability": "https://schema.org/OutOfStock"
        r#"(?i)"availability"\s*:\s*"[^"]*(?:outofstock|soldout|discontinued)"#,
        // Open Graph style meta tags
        r#"(?i)<meta[^>]*(?:og|product):availability[^>]*content\s*=\s*["'][^"']*(?:out of stock|outofstock|sold out|oos)["']"#,
        r#"(?i)<meta[^>]*content\s*=\s*["'][^"']*(?:out of stock|outofstock|sold out|oos)["'][^>]*(?:og|product):availability"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("structured marker regex is valid"))
    .collect()
});

/// Ranked structural fingerprints for the main-product subtree. The
/// first match bounds all keyword searches, keeping "related products"
/// widgets out of scope.
static SCOPE_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        ".product-details",
        ".product-detail",
        ".product-main",
        ".product-info",
        ".product-single",
        ".product-page",
        "#product",
        "#product-main",
        "[data-product-id]",
        "form[action*='cart']",
        "main",
    ]
    .iter()
    .map(|s| Selector::parse(s).expect("scope selector is valid"))
    .collect()
});

/// Elements that can act as a purchase-action control.
static CONTROL_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("button, input[type='submit'], input[type='button'], a")
        .expect("control selector is valid")
});

static META_OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:title']").expect("valid selector"));
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").expect("valid selector"));
static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static META_PRICE: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("meta[property='og:price:amount'], meta[property='product:price:amount']")
        .expect("valid selector")
});
static ITEMPROP_PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[itemprop='price']").expect("valid selector"));
static PRICE_TEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".price, .product-price").expect("valid selector"));
static META_OG_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property='og:image']").expect("valid selector"));
static ITEMPROP_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("[itemprop='image']").expect("valid selector"));

/// Class tokens that mark a control (or one of its ancestors) as
/// hidden or disabled.
const INACTIVE_TOKENS: &[&str] = &[
    "hidden",
    "hide",
    "d-none",
    "is-hidden",
    "visually-hidden",
    "sr-only",
    "disabled",
    "btn-disabled",
    "sold-out",
    "soldout",
    "out-of-stock",
    "unavailable",
];

/// Availability classifier over the configured rule table.
pub struct Classifier {
    rules: Vec<StockRule>,
    window_chars: usize,
}

impl Classifier {
    pub fn new(rules: &RulesConfig) -> Self {
        Self {
            rules: rules.rule_table(),
            window_chars: rules.window_chars,
        }
    }

    /// Classify a fetched product page.
    ///
    /// Deterministic: identical input always yields the identical result.
    pub fn classify(&self, raw_html: &str) -> ClassificationResult {
        let html = Html::parse_document(raw_html);
        let name = extract_name(&html);
        let price = extract_price(&html);
        let image = extract_image(&html);
        let attach = |kind, source| ClassificationResult {
            kind,
            matched_source: source,
            name: name.clone(),
            price: price.clone(),
            image: image.clone(),
        };

        // 1. Authoritative unavailable markers win over everything.
        let raw_lower = raw_html.to_lowercase();
        if STRUCTURED_OUT.iter().any(|re| re.is_match(&raw_lower)) {
            return attach(StockKind::Out, Some(MatchedSource::StructuredData));
        }

        let document_text = normalized_text(html.root_element());

        // 2. Password walls, maintenance pages, and anti-bot challenges
        //    carry no stock information.
        if self.first_match(&document_text, RuleKind::Gate).is_some() {
            return attach(StockKind::Unknown, None);
        }

        // 3. Bound further searches to the main-product subtree.
        let scope = find_product_scope(&html);
        let scope_text = scope
            .map(normalized_text)
            .unwrap_or_else(|| document_text.clone());

        // 4. Out-of-stock wording in scope.
        if self.first_match(&scope_text, RuleKind::Out).is_some() {
            return attach(StockKind::Out, Some(MatchedSource::Keyword));
        }

        // 5. Active purchase control.
        let control_root = scope.unwrap_or_else(|| html.root_element());
        if self.find_active_control(control_root) {
            if self.first_match(&scope_text, RuleKind::Preorder).is_some() {
                return attach(StockKind::Preorder, Some(MatchedSource::Button));
            }
            return attach(StockKind::In, Some(MatchedSource::Button));
        }

        // 6. Preorder wording without a control.
        if self.first_match(&scope_text, RuleKind::Preorder).is_some() {
            return attach(StockKind::Preorder, Some(MatchedSource::Keyword));
        }

        // 7. Bare in-stock wording, reinterpreted as out when every
        //    occurrence runs straight into an out-of-stock phrase.
        if self.first_match(&scope_text, RuleKind::In).is_some() {
            return match self.bare_in_stock_verdict(&scope_text) {
                StockKind::In => attach(StockKind::In, Some(MatchedSource::Keyword)),
                other => attach(other, Some(MatchedSource::Keyword)),
            };
        }

        // 8. No signal: never default to available.
        attach(StockKind::Out, None)
    }

    /// Whether the page matches a store-gate signature (password wall,
    /// maintenance page, anti-bot challenge).
    pub fn is_gated(&self, raw_html: &str) -> bool {
        let html = Html::parse_document(raw_html);
        let text = normalized_text(html.root_element());
        self.first_match(&text, RuleKind::Gate).is_some()
    }

    /// Classify a bare text window (listing card) with the same rule
    /// order. Returns `Unknown` when the window carries no signal.
    pub fn classify_snippet(&self, text: &str) -> StockKind {
        let text = normalize_str(text);
        for rule in &self.rules {
            if rule.scope == RuleScope::Document {
                continue;
            }
            if !text.contains(&rule.pattern) {
                continue;
            }
            return match rule.kind {
                RuleKind::Out => StockKind::Out,
                RuleKind::Preorder => StockKind::Preorder,
                RuleKind::Action => StockKind::In,
                RuleKind::In => self.bare_in_stock_verdict(&text),
                RuleKind::Gate => StockKind::Unknown,
            };
        }
        StockKind::Unknown
    }

    /// First rule of the given kind whose pattern occurs in the text.
    /// Rules are consulted in descending priority order.
    fn first_match(&self, text: &str, kind: RuleKind) -> Option<&StockRule> {
        self.rules
            .iter()
            .filter(|r| r.kind == kind)
            .find(|r| text.contains(&r.pattern))
    }

    /// Resolve a bare in-stock keyword match.
    ///
    /// An occurrence immediately followed (within the configured window)
    /// by an out-of-stock phrase is contaminated ("in stock items: sold
    /// out"). The page counts as in stock only if at least one
    /// occurrence is clean.
    fn bare_in_stock_verdict(&self, text: &str) -> StockKind {
        let out_patterns: Vec<&str> = self
            .rules
            .iter()
            .filter(|r| r.kind == RuleKind::Out)
            .map(|r| r.pattern.as_str())
            .collect();

        let mut saw_occurrence = false;
        for rule in self.rules.iter().filter(|r| r.kind == RuleKind::In) {
            for (idx, _) in text.match_indices(&rule.pattern) {
                saw_occurrence = true;
                let window_start = idx + rule.pattern.len();
                let mut window_end = (window_start + self.window_chars).min(text.len());
                while !text.is_char_boundary(window_end) {
                    window_end -= 1;
                }
                let window = &text[window_start..window_end];
                if !out_patterns.iter().any(|p| window.contains(p)) {
                    return StockKind::In;
                }
            }
        }

        if saw_occurrence {
            StockKind::Out
        } else {
            StockKind::Unknown
        }
    }

    /// Whether the subtree contains an active, visible purchase control.
    fn find_active_control(&self, root: ElementRef) -> bool {
        root.select(&CONTROL_SELECTOR)
            .any(|el| self.is_action_control(el) && control_is_active(el))
    }

    /// Whether an element reads as an add-to-cart/buy-now control.
    fn is_action_control(&self, el: ElementRef) -> bool {
        let text = normalized_text(el);
        let action_rules = self.rules.iter().filter(|r| r.kind == RuleKind::Action);
        for rule in action_rules {
            if text.contains(&rule.pattern) {
                return true;
            }
            if el
                .value()
                .attr("value")
                .is_some_and(|v| v.to_lowercase().contains(&rule.pattern))
            {
                return true;
            }
            // Attribute slugs like "AddToCart" or "add-to-cart"
            let compact_pattern: String =
                rule.pattern.chars().filter(|c| c.is_alphanumeric()).collect();
            let attr_slug: String = ["id", "name", "class", "aria-label", "data-action"]
                .iter()
                .filter_map(|a| el.value().attr(a))
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            if !compact_pattern.is_empty() && attr_slug.contains(&compact_pattern) {
                return true;
            }
        }
        false
    }
}

/// Markup signatures of pages that only render with JavaScript.
const JS_SIGNATURES: &[&str] = &[
    "enable javascript",
    "javascript is required",
    "requires javascript",
    "javascript seems to be disabled",
    "turn on javascript",
];

/// Whether a fetched page is an empty JavaScript shell.
///
/// True when the rendered text is near-empty and the markup carries a
/// JS-required signature. Such pages carry no stock information over
/// plain HTTP; domains without a render route are skipped after the
/// first sighting.
pub fn requires_javascript(raw_html: &str) -> bool {
    let html = Html::parse_document(raw_html);
    let text = normalized_text(html.root_element());
    if text.chars().count() >= 200 {
        return false;
    }
    let raw_lower = raw_html.to_lowercase();
    JS_SIGNATURES.iter().any(|s| raw_lower.contains(s))
        || (text.chars().count() < 40 && raw_lower.contains("<noscript"))
}

/// A control is active when neither it nor any ancestor is disabled or
/// hidden (inline hide style, or a hidden/disabled class token).
fn control_is_active(el: ElementRef) -> bool {
    if el.value().attr("disabled").is_some() {
        return false;
    }
    if el
        .value()
        .attr("aria-disabled")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return false;
    }

    let mut chain: Vec<ElementRef> = vec![el];
    chain.extend(el.ancestors().filter_map(ElementRef::wrap));

    for node in chain {
        if let Some(style) = node.value().attr("style") {
            let style: String = style.to_lowercase().split_whitespace().collect();
            if style.contains("display:none") || style.contains("visibility:hidden") {
                return false;
            }
        }
        if node
            .value()
            .classes()
            .any(|c| INACTIVE_TOKENS.contains(&c.to_lowercase().as_str()))
        {
            return false;
        }
    }
    true
}

/// First scope selector with a non-empty match bounds keyword search.
fn find_product_scope(html: &Html) -> Option<ElementRef<'_>> {
    SCOPE_SELECTORS.iter().find_map(|sel| {
        html.select(sel)
            .find(|el| !normalized_text(*el).is_empty())
    })
}

/// Whitespace-normalized, lower-cased element text.
fn normalized_text(el: ElementRef) -> String {
    normalize_str(&el.text().collect::<Vec<_>>().join(" "))
}

fn normalize_str(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn extract_name(html: &Html) -> Option<String> {
    if let Some(meta) = html.select(&META_OG_TITLE).next() {
        if let Some(content) = meta.value().attr("content") {
            let content = content.trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }
    for sel in [&*H1, &*TITLE] {
        if let Some(el) = html.select(sel).next() {
            let text: String = el.text().collect::<Vec<_>>().join(" ");
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn extract_price(html: &Html) -> Option<String> {
    if let Some(meta) = html.select(&META_PRICE).next() {
        if let Some(content) = meta.value().attr("content") {
            if !content.trim().is_empty() {
                return Some(content.trim().to_string());
            }
        }
    }
    if let Some(el) = html.select(&ITEMPROP_PRICE).next() {
        if let Some(content) = el.value().attr("content") {
            if !content.trim().is_empty() {
                return Some(content.trim().to_string());
            }
        }
        let text: String = el.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            return Some(text);
        }
    }
    html.select(&PRICE_TEXT).next().and_then(|el| {
        let text: String = el.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}

fn extract_image(html: &Html) -> Option<String> {
    if let Some(meta) = html.select(&META_OG_IMAGE).next() {
        if let Some(content) = meta.value().attr("content") {
            if !content.trim().is_empty() {
                return Some(content.trim().to_string());
            }
        }
    }
    html.select(&ITEMPROP_IMAGE)
        .next()
        .and_then(|el| el.value().attr("src").or(el.value().attr("content")))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
