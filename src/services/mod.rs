// src/services/mod.rs

//! Service layer for the monitor application.
//!
//! This module contains the business logic for:
//! - Page retrieval under per-domain policy (`HttpFetcher`)
//! - Availability classification (`Classifier`)
//! - Listing-page product discovery (`ProductExtractor`)
//! - Candidate verification (`Verifier`)
//! - Alert delivery (`WebhookDispatcher`)

pub mod classifier;
pub mod dispatcher;
pub mod extractor;
pub mod fetcher;
pub mod verifier;

pub use classifier::Classifier;
pub use dispatcher::{AlertSink, LogSink, WebhookDispatcher};
pub use extractor::ProductExtractor;
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use verifier::{Verifier, VerifyOutcome};
