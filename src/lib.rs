//! `shape-morph` library crate.
//!
//! Builds morphed shape models from cached fit results:
//!
//! - shape parameters interpolated across a mass grid
//! - templates morphed by systematic nuisance parameters
//! - constrained mixtures with per-component integrals and uncertainties
//! - components linked across regions by derived scale factors
//!
//! The binary (`morph`) is a thin wrapper around this library so the model
//! building stays testable without spawning processes.

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod link;
pub mod math;
pub mod mixture;
pub mod models;
pub mod morph;
pub mod report;
pub mod workspace;
