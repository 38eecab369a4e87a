pub mod autodiff;
pub mod config;
pub mod error;
pub mod linalg;
pub mod scalar;
pub mod traits;

pub use autodiff::{Gradient, Tape, Var};
pub use config::{DeformationConfig, EstimatorConfig, IntegrationScheme, NormKind, ObjectConfig};
pub use error::{Error, Result};
pub use scalar::Scalar;
pub use traits::Kernel;
