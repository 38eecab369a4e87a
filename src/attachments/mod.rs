//! Shape dissimilarities between deformed template objects and targets.
//!
//! Curves and surfaces are compared as currents (oriented) or varifolds (unoriented) through
//! kernel-weighted products of their cell centres and normals; landmark sets are compared
//! point to point.

pub mod multi_object;
pub mod objects;

pub use multi_object::{MultiObjectAttachment, ObjectNorm};
pub use objects::{DeformableMultiObject, DeformableObject, ObjectKind};
