//! Reverse-mode differentiation scoped to the shooting / attachment pipeline.
//!
//! A [`Tape`] records every arithmetic operation performed on [`Var`] values as a node with
//! (at most) two parents and the local partial derivatives towards them. Calling
//! [`Var::gradient`] on the final scalar sweeps the tape backwards once and yields the adjoint
//! of every recorded variable.
//!
//! `Var` implements [`Scalar`], so the generic engine code (kernels, exponentials, geodesics,
//! attachments) runs unchanged on it.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use ndarray::Array2;
use num_traits::{One, Zero};

use crate::core::scalar::Scalar;

#[derive(Debug, Clone, Copy)]
struct Node {
    /// (parent index, partial derivative of this node w.r.t. the parent)
    parents: [(usize, f64); 2],
}

/// Wengert list holding the computational graph of one evaluation
#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an independent variable
    pub fn variable(&self, value: f64) -> Var<'_> {
        let index = self.len();
        let index = self.push([(index, 0.0), (index, 0.0)]);
        Var {
            tape: Some(self),
            index,
            value,
        }
    }

    /// Register every entry of `values` as an independent variable
    pub fn variables(&self, values: &Array2<f64>) -> Array2<Var<'_>> {
        values.mapv(|v| self.variable(v))
    }

    fn push(&self, parents: [(usize, f64); 2]) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node { parents });
        nodes.len() - 1
    }
}

/// Scalar recorded on a [`Tape`], or a constant when no tape is attached
#[derive(Clone, Copy)]
pub struct Var<'t> {
    tape: Option<&'t Tape>,
    index: usize,
    value: f64,
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tape {
            Some(_) => write!(f, "Var({} @ {})", self.value, self.index),
            None => write!(f, "Var({})", self.value),
        }
    }
}

/// Adjoints of every node of a tape with respect to one output
#[derive(Debug, Clone)]
pub struct Gradient {
    adjoints: Vec<f64>,
}

impl Gradient {
    /// Partial derivative of the output with respect to `var`
    pub fn wrt(&self, var: &Var<'_>) -> f64 {
        match var.tape {
            Some(_) => self.adjoints.get(var.index).copied().unwrap_or(0.0),
            None => 0.0,
        }
    }

    /// Element-wise partial derivatives with respect to an array of variables
    pub fn wrt_array(&self, vars: &Array2<Var<'_>>) -> Array2<f64> {
        vars.map(|v| self.wrt(v))
    }
}

impl<'t> Var<'t> {
    pub fn constant(value: f64) -> Self {
        Var {
            tape: None,
            index: 0,
            value,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_constant(&self) -> bool {
        self.tape.is_none()
    }

    /// Backward sweep from this variable
    pub fn gradient(&self) -> Gradient {
        let tape = match self.tape {
            Some(tape) => tape,
            None => return Gradient { adjoints: Vec::new() },
        };
        let nodes = tape.nodes.borrow();
        let mut adjoints = vec![0.0; self.index + 1];
        adjoints[self.index] = 1.0;
        for i in (0..=self.index).rev() {
            let adjoint = adjoints[i];
            if adjoint == 0.0 {
                continue;
            }
            for &(parent, partial) in nodes[i].parents.iter() {
                adjoints[parent] += partial * adjoint;
            }
        }
        Gradient { adjoints }
    }

    fn unary(self, value: f64, partial: f64) -> Self {
        match self.tape {
            None => Var::constant(value),
            Some(tape) => Var {
                tape: Some(tape),
                index: tape.push([(self.index, partial), (self.index, 0.0)]),
                value,
            },
        }
    }

    fn binary(self, other: Self, value: f64, da: f64, db: f64) -> Self {
        match (self.tape, other.tape) {
            (None, None) => Var::constant(value),
            (Some(_), None) => self.unary(value, da),
            (None, Some(_)) => other.unary(value, db),
            (Some(tape), Some(_)) => Var {
                tape: Some(tape),
                index: tape.push([(self.index, da), (other.index, db)]),
                value,
            },
        }
    }
}

impl<'t> Add for Var<'t> {
    type Output = Var<'t>;

    fn add(self, rhs: Self) -> Self::Output {
        self.binary(rhs, self.value + rhs.value, 1.0, 1.0)
    }
}

impl<'t> Sub for Var<'t> {
    type Output = Var<'t>;

    fn sub(self, rhs: Self) -> Self::Output {
        self.binary(rhs, self.value - rhs.value, 1.0, -1.0)
    }
}

impl<'t> Mul for Var<'t> {
    type Output = Var<'t>;

    fn mul(self, rhs: Self) -> Self::Output {
        self.binary(rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<'t> Div for Var<'t> {
    type Output = Var<'t>;

    fn div(self, rhs: Self) -> Self::Output {
        let value = self.value / rhs.value;
        self.binary(rhs, value, 1.0 / rhs.value, -value / rhs.value)
    }
}

impl<'t> Neg for Var<'t> {
    type Output = Var<'t>;

    fn neg(self) -> Self::Output {
        self.unary(-self.value, -1.0)
    }
}

impl AddAssign for Var<'_> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Var<'_> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Zero for Var<'_> {
    fn zero() -> Self {
        Var::constant(0.0)
    }

    fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

impl One for Var<'_> {
    fn one() -> Self {
        Var::constant(1.0)
    }
}

impl Scalar for Var<'_> {
    fn constant(value: f64) -> Self {
        Var::constant(value)
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn exp(self) -> Self {
        let value = self.value.exp();
        self.unary(value, value)
    }

    fn sqrt(self) -> Self {
        let value = self.value.sqrt();
        // d/dx sqrt(x) is unbounded at 0; the subgradient 0 keeps the sweep finite
        let partial = if value > 0.0 { 0.5 / value } else { 0.0 };
        self.unary(value, partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_product_rule() {
        let tape = Tape::new();
        let x = tape.variable(3.0);
        let y = tape.variable(-2.0);

        let z = x * y + x;
        let grad = z.gradient();

        assert_relative_eq!(z.value(), -3.0);
        assert_relative_eq!(grad.wrt(&x), -1.0);
        assert_relative_eq!(grad.wrt(&y), 3.0);
    }

    #[test]
    fn test_quotient_exp_sqrt() {
        let tape = Tape::new();
        let x = tape.variable(0.5);
        let y = tape.variable(4.0);

        // f = exp(x) / sqrt(y)
        let f = x.exp() / y.sqrt();
        let grad = f.gradient();

        let ex = 0.5f64.exp();
        assert_relative_eq!(f.value(), ex / 2.0, epsilon = 1e-14);
        assert_relative_eq!(grad.wrt(&x), ex / 2.0, epsilon = 1e-14);
        assert_relative_eq!(grad.wrt(&y), -ex / 16.0, epsilon = 1e-14);
    }

    #[test]
    fn test_constants_do_not_touch_the_tape() {
        let tape = Tape::new();
        let a = Var::constant(2.0);
        let b = Var::constant(5.0);
        let c = a * b - a;

        assert!(c.is_constant());
        assert!(tape.is_empty());
        assert_relative_eq!(c.value(), 8.0);
    }

    #[test]
    fn test_mixed_constant_and_variable() {
        let tape = Tape::new();
        let x = tape.variable(1.5);
        let k = Var::constant(4.0);

        let f = -(k / x) + k * x;
        let grad = f.gradient();

        // f' = k / x^2 + k
        assert_relative_eq!(grad.wrt(&x), 4.0 / 2.25 + 4.0, epsilon = 1e-14);
        assert_relative_eq!(grad.wrt(&k), 0.0);
    }

    #[test]
    fn test_accumulation_over_shared_subexpression() {
        let tape = Tape::new();
        let x = tape.variable(2.0);

        let mut acc = Var::zero();
        for _ in 0..5 {
            acc += x * x;
        }
        let grad = acc.gradient();

        assert_relative_eq!(acc.value(), 20.0);
        assert_relative_eq!(grad.wrt(&x), 20.0);
    }
}
