//! URL handling module for Ripple-Harvest
//!
//! This module provides URL normalization (the identity used for
//! de-duplication) and host-key extraction (the unit of politeness).

mod domain;
mod normalize;

pub use domain::host_key;
pub use normalize::normalize_url;
