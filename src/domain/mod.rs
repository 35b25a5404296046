//! Domain types used throughout the model build.
//!
//! This module defines:
//!
//! - grids and systematic variations fed into the morphing layer (`Grid`, `SystematicVariation`)
//! - mixture and link descriptions (`WeightSpec`, `MixtureMode`, `ScaleLink`)
//! - fit-result records exchanged with the external fit engine (`FitKey`, `FitTable`)
//! - the model configuration and build settings (`ModelConfig`, `Settings`)

pub mod types;

pub use types::*;
