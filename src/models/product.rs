// src/models/product.rs

//! Product state and classification data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stock state of a product page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockKind {
    /// Purchasable right now
    In,
    /// Not purchasable
    Out,
    /// Announced and orderable ahead of release
    Preorder,
    /// Ambiguous page (anti-bot challenge, maintenance, no usable signal)
    Unknown,
}

impl StockKind {
    /// Whether this state qualifies as purchasable for alerting purposes.
    pub fn is_available(self) -> bool {
        matches!(self, StockKind::In | StockKind::Preorder)
    }
}

/// Which layer of the classifier produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchedSource {
    /// Machine-readable availability metadata (trusted above visible text)
    StructuredData,
    /// An active purchase-action control
    Button,
    /// A keyword match in page text
    Keyword,
}

/// Result of classifying one fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationResult {
    pub kind: StockKind,
    /// Absent when the page carried no signal and the conservative
    /// default applied.
    pub matched_source: Option<MatchedSource>,
    pub name: Option<String>,
    pub price: Option<String>,
    pub image: Option<String>,
}

impl ClassificationResult {
    /// A bare verdict with no extracted page metadata.
    pub fn bare(kind: StockKind, matched_source: Option<MatchedSource>) -> Self {
        Self {
            kind,
            matched_source,
            name: None,
            price: None,
            image: None,
        }
    }
}

/// Stock signal derived from a listing/category page card.
///
/// Listing markup is unreliable, so only a preorder phrase is trusted as
/// an available state. A bare in-stock hit prompts direct verification
/// and nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionalSignal {
    /// Preorder phrase in the card, trusted as provisionally available
    Preorder,
    /// In-stock wording or an action control in the card; verify directly
    NeedsCheck,
    /// Explicit out-of-stock wording in the card
    Out,
    /// No signal in the card
    None,
}

impl ProvisionalSignal {
    /// Whether this signal should produce a candidate for verification.
    pub fn prompts_verification(self) -> bool {
        matches!(self, ProvisionalSignal::Preorder | ProvisionalSignal::NeedsCheck)
    }
}

/// A product discovered on a listing page during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Provisional display name (from card markup or feed)
    pub name: String,
    /// Provisional stock signal for the card
    pub signal: ProvisionalSignal,
}

/// Persisted per-product state, keyed by canonical URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductRecord {
    /// Normalized product URL (stable identity key)
    pub canonical_url: String,

    /// Display name
    pub name: String,

    /// Whether the product was last confirmed purchasable.
    /// Only ever set to `true` by the verifier.
    pub available: bool,

    /// Last known stock state
    pub stock_kind: StockKind,

    /// When the product was first discovered
    pub first_seen_at: DateTime<Utc>,

    /// When the product was last seen in a discovery pass
    pub last_seen_at: DateTime<Utc>,

    /// When an alert last fired for this product
    #[serde(default)]
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// Create a fresh record in the pessimistic unavailable state.
    pub fn new(canonical_url: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            canonical_url: canonical_url.into(),
            name: name.into(),
            available: false,
            stock_kind: StockKind::Out,
            first_seen_at: now,
            last_seen_at: now,
            last_alert_at: None,
        }
    }
}

/// Kind of availability transition detected for a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    /// First sighting of the URL, already signalling availability
    New,
    /// Previously tracked as unavailable, now signalling in stock
    Restock,
    /// Previously tracked as unavailable, now signalling preorder
    Preorder,
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionKind::New => write!(f, "new"),
            TransitionKind::Restock => write!(f, "restock"),
            TransitionKind::Preorder => write!(f, "preorder"),
        }
    }
}

/// A detected but unconfirmed availability transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateTransition {
    /// Canonical product URL
    pub url: String,
    pub kind: TransitionKind,
    /// Name taken from listing markup, replaced after verification
    pub provisional_name: String,
}

/// Payload handed to the alert dispatcher after verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub name: String,
    pub canonical_url: String,
    /// Store host the product belongs to
    pub retailer: String,
    /// Alert-routing group of the originating target
    pub group: String,
    pub kind: TransitionKind,
    pub price: Option<String>,
    pub image: Option<String>,
}

impl Alert {
    /// Render the notification message body.
    pub fn message(&self) -> String {
        let headline = match self.kind {
            TransitionKind::New => format!("NEW PRODUCT at {}", self.retailer),
            TransitionKind::Restock => format!("BACK IN STOCK at {}", self.retailer),
            TransitionKind::Preorder => format!("PREORDER LIVE at {}", self.retailer),
        };
        let mut body = format!("{}\n**{}**", headline, self.name);
        if let Some(price) = &self.price {
            body.push_str(&format!("\nPrice: {}", price));
        }
        body.push('\n');
        body.push_str(&self.canonical_url);
        body
    }
}
