//! Density shapes and their registration in the workspace.
//!
//! Shapes are plugins selected by [`ShapeKind`](crate::domain::ShapeKind);
//! their parameters are always workspace references so that the morphing layer
//! can make them depend on the mass hypothesis.

pub mod builder;
pub mod shape;

pub use builder::*;
pub use shape::*;
