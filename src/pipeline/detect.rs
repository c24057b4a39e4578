// src/pipeline/detect.rs

//! Change detection between a discovery pass and persisted records.
//!
//! Bad news is accepted directly: an explicit out signal writes
//! `available = false` without verification. Good news only ever
//! produces a candidate transition; the verifier decides whether it is
//! real.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use crate::models::{
    CandidateTransition, Discovery, ProductRecord, ProvisionalSignal, StockKind, TransitionKind,
};
use crate::pipeline::caches::MonitorCaches;
use crate::utils::url::domain_of;

/// Result of one detection pass.
#[derive(Debug, Default)]
pub struct DetectOutcome {
    /// Unconfirmed availability transitions, pending verification
    pub candidates: Vec<CandidateTransition>,
    /// URLs whose records were pessimistically written unavailable
    pub out_writes: Vec<String>,
    /// URLs first seen this pass
    pub created: Vec<String>,
}

/// Compares current discovery signals against known records.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector;

impl ChangeDetector {
    pub fn new() -> Self {
        Self
    }

    /// Merge a discovery map into the record set.
    ///
    /// When `rediscovery_host` is given (listing passes), tracked
    /// records on that host absent from `current` have their
    /// verified-out marker cleared so a future reappearance is
    /// evaluated fresh.
    pub fn detect(
        &self,
        current: &BTreeMap<String, Discovery>,
        records: &mut HashMap<String, ProductRecord>,
        caches: &mut MonitorCaches,
        rediscovery_host: Option<&str>,
    ) -> DetectOutcome {
        let now = Utc::now();
        let mut outcome = DetectOutcome::default();

        for (url, discovery) in current {
            match records.get_mut(url) {
                None => {
                    records.insert(url.clone(), ProductRecord::new(url.clone(), discovery.name.clone()));
                    outcome.created.push(url.clone());
                    if discovery.signal.prompts_verification() {
                        outcome.candidates.push(CandidateTransition {
                            url: url.clone(),
                            kind: TransitionKind::New,
                            provisional_name: discovery.name.clone(),
                        });
                    }
                }
                Some(record) => {
                    record.last_seen_at = now;
                    match discovery.signal {
                        ProvisionalSignal::Out => {
                            if record.available || record.stock_kind != StockKind::Out {
                                record.available = false;
                                record.stock_kind = StockKind::Out;
                                outcome.out_writes.push(url.clone());
                            }
                        }
                        ProvisionalSignal::Preorder if !record.available => {
                            outcome.candidates.push(CandidateTransition {
                                url: url.clone(),
                                kind: TransitionKind::Preorder,
                                provisional_name: discovery.name.clone(),
                            });
                        }
                        ProvisionalSignal::NeedsCheck if !record.available => {
                            outcome.candidates.push(CandidateTransition {
                                url: url.clone(),
                                kind: TransitionKind::Restock,
                                provisional_name: discovery.name.clone(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        if let Some(host) = rediscovery_host {
            for url in records.keys() {
                if current.contains_key(url) {
                    continue;
                }
                if domain_of(url).as_deref() == Some(host) {
                    caches.clear_verified_out(url);
                }
            }
        }

        outcome
    }
}
