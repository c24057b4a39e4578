// src/services/verifier.rs

//! Verification gate between candidate transitions and alerts.
//!
//! Listing-derived signals are noisy, so a candidate only becomes an
//! alert after an independent direct fetch of the product page
//! reclassifies it as purchasable. A directly confirmed out-of-stock is
//! remembered without expiry; an ambiguous page changes nothing and is
//! eligible again next cycle.

use std::collections::HashMap;

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    Alert, CandidateTransition, DomainPolicy, ProductRecord, StockKind, TransitionKind,
};
use crate::pipeline::caches::MonitorCaches;
use crate::services::classifier::Classifier;
use crate::services::fetcher::PageFetcher;
use crate::utils::url::domain_of;

/// What a verification attempt concluded.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// Availability reconfirmed; record updated and alert ready to send
    Confirmed(Alert),
    /// Directly confirmed unavailable; suppressed until rediscovery
    Out,
    /// Ambiguous page; no state change, eligible again next cycle
    Unknown,
    /// Verified-out or inside the verification cooldown window
    Skipped,
}

/// Confirms or rejects candidate transitions with a fresh fetch.
pub struct Verifier<'a> {
    fetcher: &'a dyn PageFetcher,
    classifier: &'a Classifier,
}

impl<'a> Verifier<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, classifier: &'a Classifier) -> Self {
        Self {
            fetcher,
            classifier,
        }
    }

    /// Verify one candidate against a fresh copy of its product page.
    ///
    /// Never reuses listing-page text: the page is refetched directly
    /// and classified from scratch. Only this path ever writes
    /// `available = true`.
    pub async fn verify(
        &self,
        candidate: &CandidateTransition,
        group: &str,
        policy: &DomainPolicy,
        records: &mut HashMap<String, ProductRecord>,
        caches: &mut MonitorCaches,
    ) -> Result<VerifyOutcome> {
        if !caches.may_verify(&candidate.url) {
            log::debug!(
                "Skipping verification for {} (verified-out or cooling down)",
                candidate.url
            );
            return Ok(VerifyOutcome::Skipped);
        }
        caches.note_verification(&candidate.url);

        let page = self.fetcher.fetch(&candidate.url, policy).await?;
        let result = self.classifier.classify(&page.html);

        match result.kind {
            StockKind::In | StockKind::Preorder => {
                let now = Utc::now();
                let name = result
                    .name
                    .clone()
                    .unwrap_or_else(|| candidate.provisional_name.clone());
                let record = records
                    .entry(candidate.url.clone())
                    .or_insert_with(|| ProductRecord::new(candidate.url.clone(), name.clone()));
                record.name = name.clone();
                record.available = true;
                record.stock_kind = result.kind;
                record.last_seen_at = now;
                record.last_alert_at = Some(now);
                caches.clear_verified_out(&candidate.url);

                let kind = match (candidate.kind, result.kind) {
                    (TransitionKind::New, _) => TransitionKind::New,
                    (_, StockKind::Preorder) => TransitionKind::Preorder,
                    _ => TransitionKind::Restock,
                };
                Ok(VerifyOutcome::Confirmed(Alert {
                    name,
                    canonical_url: candidate.url.clone(),
                    retailer: domain_of(&candidate.url).unwrap_or_default(),
                    group: group.to_string(),
                    kind,
                    price: result.price,
                    image: result.image,
                }))
            }
            StockKind::Out => {
                if let Some(record) = records.get_mut(&candidate.url) {
                    record.available = false;
                    record.stock_kind = StockKind::Out;
                    record.last_seen_at = Utc::now();
                }
                caches.mark_verified_out(&candidate.url);
                log::debug!("Verification confirmed {} unavailable", candidate.url);
                Ok(VerifyOutcome::Out)
            }
            StockKind::Unknown => {
                log::debug!("Verification for {} was ambiguous; will retry", candidate.url);
                Ok(VerifyOutcome::Unknown)
            }
        }
    }
}
