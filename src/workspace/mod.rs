//! The shared namespace of parameters and functions built during a model pass.
//!
//! Every higher layer (morphing, mixtures, cross-region links) registers its
//! outputs here and receives a typed handle back. Downstream consumers (the
//! datacard writer, exports) look functions up by name.

pub mod node;
pub mod registry;

pub use node::*;
pub use registry::*;
