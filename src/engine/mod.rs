//! The deterministic decision engine.
//!
//! Hard rules run before the reasoning capability, in a fixed priority
//! order, because several outcomes must never be left to a model's
//! discretion: an expired warranty or an admitted exclusion is a REJECT
//! no matter what the model would say, and a claim missing critical
//! information is never analyzed at all.

mod analyzer;
mod exclusions;
mod requirements;
mod warranty;

pub use analyzer::DecisionEngine;
pub use exclusions::{find_exclusion_hits, normalize_text};
pub use requirements::{address_in_us, address_in_us_or_canada, missing_requirements};
pub use warranty::{WarrantyCheck, check_warranty_window};
