//! Diffeomorphic shape registration in the LDDMM framework.
//!
//! A template shape is deformed by the flow of a velocity field generated by control points
//! carrying momenta. The crate provides geodesic shooting ([`Exponential`], [`Geodesic`]),
//! current / varifold / landmark attachments ([`MultiObjectAttachment`]) and a gradient ascent
//! estimator with per-parameter line search ([`GradientAscent`]) driving any
//! [`StatisticalModel`], such as the bundled [`GeodesicRegression`].

pub mod algorithms;
pub mod attachments;
pub mod core;
pub mod deformations;
pub mod io;
pub mod kernels;
pub mod models;

// Flat re-exports for convenience
pub use core::{
    DeformationConfig, Error, EstimatorConfig, IntegrationScheme, Kernel, NormKind, ObjectConfig,
    Result, Scalar,
};

pub use attachments::{
    DeformableMultiObject, DeformableObject, MultiObjectAttachment, ObjectKind, ObjectNorm,
};
pub use deformations::{Exponential, Geodesic, State};
pub use kernels::GaussianKernel;
pub use models::{GeodesicRegression, TimeSeriesDataset};

pub use algorithms::optimization::{
    FixedEffects, GradientAscent, LogLikelihood, OptimizationResult, StatisticalModel,
    TerminationReason,
};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::algorithms::optimization::{
        FixedEffects, GradientAscent, LogLikelihood, StatisticalModel, TerminationReason,
    };
    pub use crate::attachments::{DeformableMultiObject, DeformableObject, MultiObjectAttachment};
    pub use crate::core::{DeformationConfig, Error, EstimatorConfig, IntegrationScheme, Kernel, Result};
    pub use crate::deformations::{Exponential, Geodesic};
    pub use crate::kernels::GaussianKernel;
    pub use crate::models::{GeodesicRegression, TimeSeriesDataset};
}
