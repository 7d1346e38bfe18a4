use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, IsContiguous, Vector,
};

use super::{base::Problem, function::Function};

/// Definition of an objective function with inequality constraints.
///
/// The problem is to minimize `f(x)` subject to `m` constraints
/// `c_i(x) >= 0`. A single callback evaluates the objective and all
/// constraints at once, because in practice they usually come out of the
/// same simulation.
///
/// Every [`Function`] is also a `Constrained` problem with zero
/// constraints, so unconstrained minimization needs no extra code.
///
/// ## Defining a constrained problem
///
/// ```rust
/// use kobyla::nalgebra as na;
/// use kobyla::{Constrained, Domain, Problem};
/// use na::{Dyn, IsContiguous};
///
/// // Maximize x + y over the unit disc.
/// struct UnitDisc;
///
/// impl Problem for UnitDisc {
///     type Field = f64;
///
///     fn domain(&self) -> Domain<Self::Field> {
///         Domain::unconstrained(2)
///     }
/// }
///
/// impl Constrained for UnitDisc {
///     fn num_constraints(&self) -> usize {
///         1
///     }
///
///     fn eval<Sx, Sc>(
///         &self,
///         x: &na::Vector<Self::Field, Dyn, Sx>,
///         constr: &mut na::Vector<Self::Field, Dyn, Sc>,
///     ) -> Self::Field
///     where
///         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
///         Sc: na::storage::StorageMut<Self::Field, Dyn>,
///     {
///         constr[0] = 1.0 - x[0] * x[0] - x[1] * x[1];
///         -x[0] - x[1]
///     }
/// }
/// ```
pub trait Constrained: Problem {
    /// Number of inequality constraints. Zero is admissible, in which case
    /// the problem reduces to unconstrained minimization.
    fn num_constraints(&self) -> usize;

    /// Calculates the objective function value in given point and fills
    /// `constr` with the constraint values `c_i(x)`, where `c_i(x) >= 0`
    /// means that the i-th constraint is satisfied.
    ///
    /// The callback may return non-finite values; the solver guards them.
    fn eval<Sx, Sc>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        constr: &mut Vector<Self::Field, Dyn, Sc>,
    ) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sc: StorageMut<Self::Field, Dyn>;
}

impl<F> Constrained for F
where
    F: Function,
{
    fn num_constraints(&self) -> usize {
        0
    }

    fn eval<Sx, Sc>(
        &self,
        x: &Vector<Self::Field, Dyn, Sx>,
        _constr: &mut Vector<Self::Field, Dyn, Sc>,
    ) -> Self::Field
    where
        Sx: Storage<Self::Field, Dyn> + IsContiguous,
        Sc: StorageMut<Self::Field, Dyn>,
    {
        self.apply(x)
    }
}
