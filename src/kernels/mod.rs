pub mod gaussian;

pub use gaussian::GaussianKernel;
