//! Input/output helpers.
//!
//! - fit-result cache and model config JSON (`cache`)
//! - model summary JSON and function samples CSV (`export`)

pub mod cache;
pub mod export;

pub use cache::*;
pub use export::*;
