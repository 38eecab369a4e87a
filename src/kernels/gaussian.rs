use crate::core::{Error, Kernel, Result, Scalar};

/// Gaussian ("exact") kernel k(x, y) = exp(-|x - y|² / σ²)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianKernel {
    width: f64,
}

impl GaussianKernel {
    pub fn new(width: f64) -> Result<Self> {
        if !(width > 0.0) || !width.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "kernel width must be positive and finite, got {width}"
            )));
        }
        Ok(GaussianKernel { width })
    }
}

impl Kernel for GaussianKernel {
    fn width(&self) -> f64 {
        self.width
    }

    fn profile<T: Scalar>(&self, squared_distance: T) -> T {
        let inv = T::constant(-1.0 / (self.width * self.width));
        (squared_distance * inv).exp()
    }

    fn profile_derivative<T: Scalar>(&self, squared_distance: T) -> T {
        let inv = T::constant(-1.0 / (self.width * self.width));
        inv * (squared_distance * inv).exp()
    }
}
