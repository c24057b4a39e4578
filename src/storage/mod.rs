// src/storage/mod.rs

//! Product state persistence.
//!
//! The monitor treats persistent state as a keyed upsert store:
//! `(group, canonical_url) → ProductRecord`. It is read once at startup
//! to seed the previous-records map and written after each confirmed
//! transition or pessimistic out-write. Write failures are logged and
//! the cycle continues; the next successful write reconciles state.

pub mod local;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ProductRecord;

pub use local::LocalStore;

/// group → canonical url → record.
pub type RecordMap = HashMap<String, HashMap<String, ProductRecord>>;

/// Trait for product state backends.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Load every persisted record, grouped by alert-routing key.
    async fn load_all(&self) -> Result<RecordMap>;

    /// Insert or update one record. Idempotent by canonical URL.
    async fn upsert(&self, group: &str, record: &ProductRecord) -> Result<()>;

    /// Remove a record after external URL-list removal.
    async fn remove(&self, group: &str, canonical_url: &str) -> Result<()>;
}
