//! Configuration values threaded explicitly into constructors.
//!
//! All structs deserialize with serde and fall back to the customary LDDMM defaults for
//! missing fields.

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};

/// Time-stepping scheme for shooting, flowing and parallel transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationScheme {
    /// Explicit Euler (1st order)
    Euler,
    /// Explicit midpoint / RK2 (2nd order)
    Midpoint,
}

impl Default for IntegrationScheme {
    fn default() -> Self {
        IntegrationScheme::Midpoint
    }
}

/// Deformation model settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeformationConfig {
    /// Ambient space dimension (2 or 3)
    pub dimension: usize,
    /// Bandwidth of the deformation kernel
    pub kernel_width: f64,
    /// Reference time of the geodesic
    pub t0: f64,
    pub tmin: f64,
    pub tmax: f64,
    /// Number of integration steps per unit of time
    pub concentration_of_time_points: usize,
    pub integration_scheme: IntegrationScheme,
    /// Spacing of the initial control point grid, defaults to the kernel width
    pub initial_cp_spacing: Option<f64>,
}

impl Default for DeformationConfig {
    fn default() -> Self {
        Self {
            dimension: 3,
            kernel_width: 1.0,
            t0: 0.0,
            tmin: 0.0,
            tmax: 1.0,
            concentration_of_time_points: 10,
            integration_scheme: IntegrationScheme::Midpoint,
            initial_cp_spacing: None,
        }
    }
}

impl DeformationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dimension != 2 && self.dimension != 3 {
            return Err(Error::InvalidConfiguration(format!(
                "dimension must be 2 or 3, got {}",
                self.dimension
            )));
        }
        if !(self.kernel_width > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "kernel width must be positive, got {}",
                self.kernel_width
            )));
        }
        if self.concentration_of_time_points == 0 {
            return Err(Error::InvalidConfiguration(
                "concentration of time points must be at least 1".to_string(),
            ));
        }
        validate_time_bounds(self.tmin, self.t0, self.tmax)?;
        if let Some(spacing) = self.initial_cp_spacing {
            if !(spacing > 0.0) {
                return Err(Error::InvalidConfiguration(format!(
                    "control point spacing must be positive, got {spacing}"
                )));
            }
        }
        Ok(())
    }

    pub fn cp_spacing(&self) -> f64 {
        self.initial_cp_spacing.unwrap_or(self.kernel_width)
    }
}

pub(crate) fn validate_time_bounds(tmin: f64, t0: f64, tmax: f64) -> Result<()> {
    if !(tmin <= t0) {
        return Err(Error::InvalidConfiguration(format!(
            "tmin ({tmin}) should be smaller than t0 ({t0})"
        )));
    }
    if !(t0 <= tmax) {
        return Err(Error::InvalidConfiguration(format!(
            "tmax ({tmax}) should be larger than t0 ({t0})"
        )));
    }
    Ok(())
}

/// Gradient ascent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub initial_step_size: f64,
    pub max_iterations: usize,
    pub max_line_search_iterations: usize,
    pub line_search_shrink: f64,
    pub line_search_expand: f64,
    pub convergence_tolerance: f64,
    pub print_every_n_iters: usize,
    pub save_every_n_iters: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            initial_step_size: 1e-3,
            max_iterations: 100,
            max_line_search_iterations: 10,
            line_search_shrink: 0.5,
            line_search_expand: 1.5,
            convergence_tolerance: 1e-4,
            print_every_n_iters: 1,
            save_every_n_iters: 100,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_step_size > 0.0) {
            return Err(Error::InvalidConfiguration(
                "initial step size must be positive".to_string(),
            ));
        }
        if !(self.line_search_shrink > 0.0 && self.line_search_shrink < 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "line search shrink must lie in (0, 1), got {}",
                self.line_search_shrink
            )));
        }
        if !(self.line_search_expand >= 1.0) {
            return Err(Error::InvalidConfiguration(format!(
                "line search expand must be at least 1, got {}",
                self.line_search_expand
            )));
        }
        if self.max_line_search_iterations == 0 {
            return Err(Error::InvalidConfiguration(
                "at least one line search iteration is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Norm used to compare one template object with its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    /// Oriented kernel distance (currents)
    Current,
    /// Unoriented kernel distance (varifolds)
    Varifold,
    /// Sum of squared distances between co-indexed points
    Landmark,
}

/// Attachment settings of one template object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub name: String,
    pub norm: NormKind,
    /// Bandwidth of the attachment kernel (ignored by the landmark norm)
    #[serde(default = "default_object_kernel_width")]
    pub kernel_width: f64,
    /// Noise standard deviation; the distance is divided by its square
    #[serde(default = "default_noise_std")]
    pub noise_std: f64,
}

fn default_object_kernel_width() -> f64 {
    1.0
}

fn default_noise_std() -> f64 {
    1.0
}

impl ObjectConfig {
    pub fn noise_variance(&self) -> f64 {
        self.noise_std * self.noise_std
    }
}
