//! Cross-region links and yield bookkeeping.
//!
//! - `scale`: derive `target / source` scale factors and register linked components
//! - `integrals`: split a region's total yield over the leaves of its mixture

pub mod integrals;
pub mod scale;

pub use integrals::*;
pub use scale::*;
