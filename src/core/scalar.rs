use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_traits::{One, Zero};

/// Numeric element type of every array handled by the engine.
///
/// Plain evaluations run on `f64`; gradient evaluations run on
/// [`Var`](crate::core::autodiff::Var), which records each operation on a tape.
/// Code written against `Scalar` is therefore differentiable end to end.
pub trait Scalar:
    Copy
    + Debug
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
{
    /// Lift a plain number (no derivative information)
    fn constant(value: f64) -> Self;

    /// Numerical value, dropping derivative information
    fn value(&self) -> f64;

    fn exp(self) -> Self;

    fn sqrt(self) -> Self;
}

impl Scalar for f64 {
    fn constant(value: f64) -> Self {
        value
    }

    fn value(&self) -> f64 {
        *self
    }

    fn exp(self) -> Self {
        f64::exp(self)
    }

    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
}
