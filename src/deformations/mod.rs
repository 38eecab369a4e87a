//! Geodesic shooting of control points and momenta, and the flow of template data.

pub mod exponential;
pub mod geodesic;

pub use exponential::{Exponential, State};
pub use geodesic::Geodesic;
