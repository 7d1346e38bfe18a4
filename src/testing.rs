//! Testing problems and utilities useful for benchmarking, debugging and
//! smoke testing.
//!
//! [`Sphere`] and [`ExtendedRosenbrock`] are recommended for first tests of
//! unconstrained minimization; [`UnitDisc`] and [`OffsetCorner`] exercise
//! the constraint handling, the latter from an infeasible starting point.
//!
//! # References
//!
//! \[1\] [A Literature Survey of Benchmark Functions For Global Optimization
//! Problems](https://arxiv.org/abs/1308.4008)

#![allow(unused)]

use std::cell::Cell;

use nalgebra::{
    storage::{Storage, StorageMut},
    DVector, Dyn, IsContiguous, OVector, Vector,
};
use simba::scalar::SupersetOf;

use crate::core::{Constrained, Domain, Function, Problem};

/// Extension of the [`Problem`] trait that provides additional information
/// that is useful for testing algorithms.
pub trait TestProblem: Problem {
    /// Standard initial values for the problem. Using the same initial
    /// values is essential for fair comparison of methods.
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>>;
}

/// [Sphere
/// function](https://en.wikipedia.org/wiki/Test_functions_for_optimization)
/// \[1\].
///
/// This is a simple paraboloid which can be used in early development and
/// sanity checking as it can be considered a trivial problem.
#[derive(Debug, Clone, Copy)]
pub struct Sphere {
    n: usize,
}

impl Sphere {
    /// Initializes the function with given dimension.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be greater than zero");
        Self { n }
    }
}

impl Default for Sphere {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Problem for Sphere {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.n)
    }
}

impl Function for Sphere {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        x.iter().map(|xi| xi.powi(2)).sum()
    }
}

impl TestProblem for Sphere {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        let init = DVector::from_iterator(
            self.n,
            (0..self.n).map(|i| if i % 2 == 0 { 10.0 } else { -10.0 }),
        );

        vec![init]
    }
}

/// [Extended Rosenbrock
/// function](https://en.wikipedia.org/wiki/Rosenbrock_function) \[1\] (also
/// known as Rosenbrock's valley or banana function).
///
/// The global minimum is inside a long, narrow, parabolic shaped flat
/// valley. The challenge is to find the solution inside the valley.
#[derive(Debug, Clone, Copy)]
pub struct ExtendedRosenbrock {
    n: usize,
}

impl ExtendedRosenbrock {
    /// Initializes the function with given dimension.
    ///
    /// The dimension **must** be a multiplier of 2.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "n must be greater than zero");
        assert!(n % 2 == 0, "n must be a multiple of 2");
        Self { n }
    }
}

impl Default for ExtendedRosenbrock {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Problem for ExtendedRosenbrock {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(self.n)
    }
}

impl Function for ExtendedRosenbrock {
    fn apply<Sx>(&self, x: &Vector<Self::Field, Dyn, Sx>) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
    {
        (0..self.n / 2)
            .map(|i| {
                let x1 = x[2 * i];
                let x2 = x[2 * i + 1];

                100.0 * (x2 - x1 * x1).powi(2) + (1.0 - x1).powi(2)
            })
            .sum()
    }
}

impl TestProblem for ExtendedRosenbrock {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        let init = DVector::from_iterator(
            self.n,
            (0..self.n).map(|i| if i % 2 == 0 { -1.2 } else { 1.0 }),
        );

        vec![init]
    }
}

/// Linear objective over the unit disc.
///
/// Minimizes `-x - y` subject to `1 - x^2 - y^2 >= 0`. The solution is on
/// the boundary at `(1/sqrt(2), 1/sqrt(2))` with value `-sqrt(2)`, so the
/// constraint must be active at the optimum.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitDisc;

impl Problem for UnitDisc {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(2)
    }
}

impl Constrained for UnitDisc {
    fn num_constraints(&self) -> usize {
        1
    }

    fn eval<Sx, Sc>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        constr: &mut Vector<Self::Field, Dyn, Sc>,
    ) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sc: StorageMut<Self::Field, Dyn>,
    {
        constr[0] = 1.0 - x[0] * x[0] - x[1] * x[1];
        -x[0] - x[1]
    }
}

impl TestProblem for UnitDisc {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![DVector::zeros(2)]
    }
}

/// Paraboloid with a feasible region far from the start.
///
/// Minimizes `x^2 + y^2` subject to `x - 2 >= 0` and `y - 2 >= 0`. The
/// usual starting point at the origin violates both constraints, so the
/// solver has to restore feasibility first; the solution is the corner
/// `(2, 2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffsetCorner;

impl Problem for OffsetCorner {
    type Field = f64;

    fn domain(&self) -> Domain<Self::Field> {
        Domain::unconstrained(2)
    }
}

impl Constrained for OffsetCorner {
    fn num_constraints(&self) -> usize {
        2
    }

    fn eval<Sx, Sc>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        constr: &mut Vector<Self::Field, Dyn, Sc>,
    ) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sc: StorageMut<Self::Field, Dyn>,
    {
        constr[0] = x[0] - 2.0;
        constr[1] = x[1] - 2.0;
        x[0] * x[0] + x[1] * x[1]
    }
}

impl TestProblem for OffsetCorner {
    fn initials(&self) -> Vec<OVector<Self::Field, Dyn>> {
        vec![DVector::zeros(2)]
    }
}

/// Wrapper that poisons the objective with NaN from a given evaluation on.
///
/// Useful for testing how a solver copes with a callback that breaks down
/// in the middle of a run.
pub struct NanAfter<F> {
    inner: F,
    healthy: usize,
    count: Cell<usize>,
}

impl<F> NanAfter<F> {
    /// Wraps the problem so that evaluations after the first `healthy` ones
    /// return NaN.
    pub fn new(inner: F, healthy: usize) -> Self {
        Self {
            inner,
            healthy,
            count: Cell::new(0),
        }
    }
}

impl<F: Problem> Problem for NanAfter<F> {
    type Field = F::Field;

    fn domain(&self) -> Domain<Self::Field> {
        self.inner.domain()
    }
}

impl<F: Constrained> Constrained for NanAfter<F> {
    fn num_constraints(&self) -> usize {
        self.inner.num_constraints()
    }

    fn eval<Sx, Sc>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        constr: &mut Vector<Self::Field, Dyn, Sc>,
    ) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sc: StorageMut<Self::Field, Dyn>,
    {
        let count = self.count.get() + 1;
        self.count.set(count);

        let value = self.inner.eval(x, constr);

        if count > self.healthy {
            Self::Field::from_subset(&f64::NAN)
        } else {
            value
        }
    }
}
