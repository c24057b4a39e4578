// src/models/mod.rs

//! Domain models for the monitor application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod product;
mod target;

// Re-export all public types
pub use config::{
    Config, DispatchConfig, ExtractorConfig, FetchConfig, HeaderBundle, HeaderPools,
    MonitorConfig, ProxyConfig, RenderConfig, RuleKind, RuleScope, RulesConfig, StockRule,
    TargetGroup,
};
pub use product::{
    Alert, CandidateTransition, ClassificationResult, Discovery, MatchedSource, ProductRecord,
    ProvisionalSignal, StockKind, TransitionKind,
};
pub use target::{DomainPolicy, HeaderProfile, MonitoredTarget, Platform, TargetKind, TimeoutClass};
