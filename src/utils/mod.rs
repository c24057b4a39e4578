// src/utils/mod.rs

//! Utility functions and helpers.

pub mod url;

pub use url::{canonicalize, category_code, domain_of, is_product_url, resolve};
