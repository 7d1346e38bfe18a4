//! Problem domain definition (dimensionality, bounds).

use std::iter::FromIterator;

use na::{Dim, DimName};
use nalgebra as na;
use nalgebra::{storage::StorageMut, OVector, Vector};

use crate::core::RealField;

/// Domain for a problem.
#[derive(Debug, Clone)]
pub struct Domain<T: RealField + Copy> {
    lower: OVector<T, na::Dyn>,
    upper: OVector<T, na::Dyn>,
}

impl<T: RealField + Copy> Domain<T> {
    /// Creates unconstrained domain with given dimensionality.
    pub fn unconstrained(dim: usize) -> Self {
        assert!(dim > 0, "empty domain");

        let inf = T::from_subset(&f64::INFINITY);
        let n = na::Dyn(dim);
        let one = na::Const::<1>;

        Self {
            lower: OVector::from_iterator_generic(n, one, (0..dim).map(|_| -inf)),
            upper: OVector::from_iterator_generic(n, one, (0..dim).map(|_| inf)),
        }
    }

    /// Creates rectangular domain with given lower and upper bounds.
    ///
    /// Positive and negative infinity can be used to indicate a value
    /// unbounded in that dimension and direction. If the entire domain is
    /// unconstrained, use [`Domain::unconstrained`] instead.
    pub fn rect(lower: Vec<T>, upper: Vec<T>) -> Self {
        assert!(
            lower.len() == upper.len(),
            "lower and upper have different size"
        );

        let dim = lower.len();
        assert!(dim > 0, "empty domain");

        let dim = na::Dyn(dim);
        let lower = OVector::from_iterator_generic(dim, na::U1::name(), lower);
        let upper = OVector::from_iterator_generic(dim, na::U1::name(), upper);

        Self { lower, upper }
    }

    /// Gets the dimensionality of the domain.
    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// Gets the lower bounds.
    pub fn lower(&self) -> &OVector<T, na::Dyn> {
        &self.lower
    }

    /// Gets the upper bounds.
    pub fn upper(&self) -> &OVector<T, na::Dyn> {
        &self.upper
    }

    /// Projects given point into the domain.
    pub fn project<D, Sx>(&self, x: &mut Vector<T, D, Sx>) -> bool
    where
        D: Dim,
        Sx: StorageMut<T, D>,
    {
        let mut not_feasible = false;

        self.lower
            .iter()
            .zip(self.upper.iter())
            .zip(x.iter_mut())
            .for_each(|((li, ui), xi)| {
                if &*xi < li {
                    *xi = *li;
                    not_feasible = true;
                } else if &*xi > ui {
                    *xi = *ui;
                    not_feasible = true;
                }
            });

        not_feasible
    }
}

impl<T: RealField + Copy> FromIterator<(T, T)> for Domain<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let (lower, upper): (Vec<_>, Vec<_>) = iter.into_iter().unzip();
        Self::rect(lower, upper)
    }
}
