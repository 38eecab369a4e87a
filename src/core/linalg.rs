//! Small array helpers shared by the generic engine code.
//!
//! `ndarray`'s arithmetic operators require `LinalgScalar`, which tape variables cannot be,
//! so the few operations the engine needs are written out element-wise here.

use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::core::error::{Error, Result};
use crate::core::scalar::Scalar;

/// x + a * y
pub fn axpy<T: Scalar>(x: &Array2<T>, a: T, y: &Array2<T>) -> Result<Array2<T>> {
    check_same_shape(x.view(), y.view())?;
    let mut out = x.clone();
    for (o, &v) in out.iter_mut().zip(y.iter()) {
        *o += a * v;
    }
    Ok(out)
}

/// a * x
pub fn scale<T: Scalar>(x: &Array2<T>, a: T) -> Array2<T> {
    x.mapv(|v| a * v)
}

/// Sum of the element-wise products of two arrays of equal shape
pub fn frobenius_dot<T: Scalar>(x: &Array2<T>, y: &Array2<T>) -> Result<T> {
    check_same_shape(x.view(), y.view())?;
    let mut acc = T::zero();
    for (&a, &b) in x.iter().zip(y.iter()) {
        acc += a * b;
    }
    Ok(acc)
}

/// Euclidean dot product of two rows
pub fn dot<T: Scalar>(a: ArrayView1<T>, b: ArrayView1<T>) -> T {
    let mut acc = T::zero();
    for (&u, &v) in a.iter().zip(b.iter()) {
        acc += u * v;
    }
    acc
}

/// |a - b|^2
pub fn squared_distance<T: Scalar>(a: ArrayView1<T>, b: ArrayView1<T>) -> T {
    let mut acc = T::zero();
    for (&u, &v) in a.iter().zip(b.iter()) {
        let d = u - v;
        acc += d * d;
    }
    acc
}

/// Lift a plain array into the scalar type as constants
pub fn lift<T: Scalar>(x: &Array2<f64>) -> Array2<T> {
    x.mapv(T::constant)
}

pub fn check_same_shape<T>(x: ArrayView2<T>, y: ArrayView2<T>) -> Result<()> {
    if x.nrows() != y.nrows() {
        return Err(Error::DimensionMismatch {
            expected: x.nrows(),
            got: y.nrows(),
        });
    }
    if x.ncols() != y.ncols() {
        return Err(Error::DimensionMismatch {
            expected: x.ncols(),
            got: y.ncols(),
        });
    }
    Ok(())
}

/// Solve `a * x = b` for a symmetric positive definite `a` (Cholesky)
pub fn solve_spd(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            got: a.ncols(),
        });
    }
    if b.nrows() != n {
        return Err(Error::DimensionMismatch {
            expected: n,
            got: b.nrows(),
        });
    }

    let matrix = DMatrix::from_fn(n, n, |i, j| a[[i, j]]);
    let rhs = DMatrix::from_fn(n, b.ncols(), |i, j| b[[i, j]]);
    let cholesky = matrix.cholesky().ok_or_else(|| {
        Error::ComputationFailed("kernel matrix is not positive definite".to_string())
    })?;
    let solution = cholesky.solve(&rhs);

    Ok(Array2::from_shape_fn((n, b.ncols()), |(i, j)| {
        solution[(i, j)]
    }))
}
