use ndarray::Array2;

use crate::core::error::{Error, Result};
use crate::core::linalg::{dot, squared_distance};
use crate::core::scalar::Scalar;

/// Radial reproducing kernel k(x, y) = φ(|x - y|²) with a fixed bandwidth
///
/// This is the only capability the shooting and attachment code needs from a kernel.
/// Implementors provide the radial profile and its derivative; convolutions are derived.
pub trait Kernel {
    /// Kernel bandwidth σ
    fn width(&self) -> f64;

    /// φ(r²)
    fn profile<T: Scalar>(&self, squared_distance: T) -> T;

    /// dφ/d(r²)
    fn profile_derivative<T: Scalar>(&self, squared_distance: T) -> T;

    /// Velocity field at `targets` generated by `weights` carried at `sources`:
    /// out_i = Σ_j k(t_i, s_j) w_j
    fn convolve<T: Scalar>(
        &self,
        sources: &Array2<T>,
        targets: &Array2<T>,
        weights: &Array2<T>,
    ) -> Result<Array2<T>> {
        if sources.nrows() != weights.nrows() {
            return Err(Error::DimensionMismatch {
                expected: sources.nrows(),
                got: weights.nrows(),
            });
        }
        if sources.ncols() != targets.ncols() {
            return Err(Error::DimensionMismatch {
                expected: sources.ncols(),
                got: targets.ncols(),
            });
        }

        let mut out = Array2::<T>::zeros((targets.nrows(), weights.ncols()));
        for (i, target) in targets.outer_iter().enumerate() {
            for (j, source) in sources.outer_iter().enumerate() {
                let k = self.profile(squared_distance(target, source));
                for c in 0..weights.ncols() {
                    out[[i, c]] += k * weights[[j, c]];
                }
            }
        }
        Ok(out)
    }

    /// Gradient of the kinetic energy ½ Σ_ij p_i·p_j k(q_i, q_j) with respect to q:
    /// out_i = Σ_j (p_i·p_j) 2 φ'(|q_i - q_j|²) (q_i - q_j)
    fn convolve_gradient<T: Scalar>(
        &self,
        momenta: &Array2<T>,
        points: &Array2<T>,
    ) -> Result<Array2<T>> {
        if momenta.dim() != points.dim() {
            return Err(Error::DimensionMismatch {
                expected: points.nrows(),
                got: momenta.nrows(),
            });
        }

        let two = T::constant(2.0);
        let mut out = Array2::<T>::zeros(points.dim());
        for i in 0..points.nrows() {
            for j in 0..points.nrows() {
                if i == j {
                    continue;
                }
                let r2 = squared_distance(points.row(i), points.row(j));
                let factor = two * self.profile_derivative(r2) * dot(momenta.row(i), momenta.row(j));
                for c in 0..points.ncols() {
                    out[[i, c]] += factor * (points[[i, c]] - points[[j, c]]);
                }
            }
        }
        Ok(out)
    }

    /// Gram matrix K_ij = k(x_i, x_j)
    fn kernel_matrix(&self, points: &Array2<f64>) -> Array2<f64> {
        let n = points.nrows();
        Array2::from_shape_fn((n, n), |(i, j)| {
            self.profile(squared_distance(points.row(i), points.row(j)))
        })
    }
}
