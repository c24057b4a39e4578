// src/utils/url.rs

//! URL resolution, canonicalization, and product-link filtering.

use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use url::Url;

/// Path patterns that identify a product detail page.
static PRODUCT_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"/products?/",
        r"/item/",
        r"/p/",
        r"/shop/",
        r"/collections/[^/]+/products/",
        r"-p-\d+",
        r"/dp/",
        r"/gp/product/",
        r"\.html$",
        r"/catalog/",
        r"/pokemon-",
    ])
    .expect("product patterns are valid regexes")
});

/// Patterns for links that are never product pages: site chrome,
/// account/checkout flows, static assets, and category listings.
static EXCLUDE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"/cart",
        r"/basket",
        r"/checkout",
        r"/account",
        r"/login",
        r"/register",
        r"/wishlist",
        r"/search",
        r"/page/",
        r"/category/",
        r"/collections/?$",
        r"/cdn/",
        r"/static/",
        r"\.js$",
        r"\.css$",
        r"\.jpg$",
        r"\.png$",
        r"\.gif$",
        r"/cdn-cgi/",
        r"-c-\d+(?:_\d+)*/?(?:\?|$)",
    ])
    .expect("exclude patterns are valid regexes")
});

/// Hierarchical numeric category code, e.g. "-c-12_34" yields "12_34".
static CATEGORY_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-c-(\d+(?:_\d+)*)").expect("category code regex is valid"));

static ANY_CATEGORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-c-\d+").expect("category regex is valid"));

/// Collection-scoped product path, collapsed during canonicalization.
static COLLECTION_PRODUCT_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/collections/[^/]+(/products/.+)$").expect("collection path regex is valid")
});

/// Resolve a potentially relative href against a base URL.
pub fn resolve(base: &Url, href: &str) -> Option<String> {
    base.join(href).ok().map(|u| u.to_string())
}

/// Extract the lower-cased host from a URL string.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
}

/// Normalize a product URL into its stable identity key.
///
/// Strips query string and fragment, lower-cases the host, and collapses
/// a collection-scoped path down to the canonical product path so the
/// same product reached via different listings maps to one key.
/// Idempotent: `canonicalize(canonicalize(u)) == canonicalize(u)`.
pub fn canonicalize(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);

    if let Some(caps) = COLLECTION_PRODUCT_PATH.captures(parsed.path()) {
        let product_path = caps.get(1)?.as_str().to_string();
        parsed.set_path(&product_path);
    }

    Some(parsed.to_string())
}

/// Extract the hierarchical category code from a URL, if present.
pub fn category_code(url: &str) -> Option<String> {
    CATEGORY_CODE
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Decide whether a resolved link points at a product page belonging to
/// the listing at `base`.
///
/// Same-domain links only; the link must match a product-path pattern
/// and no exclude pattern. For catalogs using hierarchical numeric
/// category codes, a link carrying a code inconsistent with the
/// listing's own code is rejected.
pub fn is_product_url(url: &str, base: &Url) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    if parsed.host_str().map(|h| h.to_lowercase()) != base.host_str().map(|h| h.to_lowercase()) {
        return false;
    }

    if let Some(base_code) = category_code(base.as_str()) {
        if ANY_CATEGORY.is_match(url) {
            if let Some(url_code) = category_code(url) {
                if url_code != base_code && !url_code.starts_with(&base_code) {
                    return false;
                }
            }
        }
    }

    let url_lower = url.to_lowercase();
    if EXCLUDE_PATTERNS.is_match(&url_lower) {
        return false;
    }
    PRODUCT_PATTERNS.is_match(&url_lower)
}
