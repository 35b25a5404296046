//! Numerical utilities: grid interpolants, polynomial fits and weighted least squares.

pub mod interp;
pub mod ols;
pub mod poly;
pub mod rbf;

pub use interp::*;
pub use ols::*;
pub use poly::*;
pub use rbf::*;
