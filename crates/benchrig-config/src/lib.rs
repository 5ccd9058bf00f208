//! Configuration loading for benchrig.
//!
//! BIB/UUT/port definitions live in XML files (see [`parse::parse_bibs`]
//! for the accepted tree). [`ConfigStore`] caches parsed files keyed by a
//! fingerprint of the canonical path and modification time, so an edited
//! file is reloaded on next access without any explicit invalidation.

mod parse;
mod store;
mod validate;

pub use parse::{parse_bibs, ParsedConfig};
pub use store::{ConfigStore, StoreStats};
pub use validate::{
    validate_bibs, validate_limits, ValidationReport, RECOGNIZED_PROTOCOLS, STANDARD_BAUD_RATES,
};
