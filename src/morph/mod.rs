//! Continuous shape parameters and their systematic morphing.

pub mod parameter;
pub mod template;

pub use parameter::*;
pub use template::*;
