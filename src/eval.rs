//! Callback evaluation, history buffers and the best-point filter.
//!
//! One evaluation of the user callback is the only potentially blocking
//! operation of the solver; it runs synchronously on the calling thread.
//! Everything around it lives here: moderation of wild callback outputs,
//! evaluation counting, the wrapping of finite variable bounds into linear
//! constraint rows, the capped history and the filter that remembers the
//! best point seen so far.

use nalgebra::{
    storage::Storage, DimName, Dyn, OMatrix, OVector, RealField as NalgebraRealField, Vector, U1,
};

use crate::core::{Constrained, Domain, RealField};

/// A finite variable bound expressed as an inequality row `c(x) >= 0`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BoundRow<T> {
    /// `x[var] - bound >= 0`
    Lower { var: usize, bound: T },
    /// `bound - x[var] >= 0`
    Upper { var: usize, bound: T },
}

impl<T: RealField + Copy> BoundRow<T> {
    fn value<S: Storage<T, Dyn>>(&self, x: &Vector<T, Dyn, S>) -> T {
        match *self {
            BoundRow::Lower { var, bound } => x[var] - bound,
            BoundRow::Upper { var, bound } => bound - x[var],
        }
    }
}

/// Collects the finite bounds of the domain as inequality rows, lower
/// bounds first.
pub(crate) fn bound_rows<T: RealField + Copy>(dom: &Domain<T>) -> Vec<BoundRow<T>> {
    let mut rows = Vec::new();

    for (var, bound) in dom.lower().iter().enumerate() {
        if bound.is_finite() {
            rows.push(BoundRow::Lower { var, bound: *bound });
        }
    }
    for (var, bound) in dom.upper().iter().enumerate() {
        if bound.is_finite() {
            rows.push(BoundRow::Upper { var, bound: *bound });
        }
    }

    rows
}

/// Record of the evaluations performed during a run.
///
/// The buffers have a fixed capacity; when the run performs more
/// evaluations than the capacity, only the most recent ones are kept. The
/// buffers are rotated to chronological order and trimmed when the run
/// finishes.
#[derive(Debug, Clone)]
pub struct History<T: RealField + Copy> {
    x: OMatrix<T, Dyn, Dyn>,
    f: OVector<T, Dyn>,
    constr: OMatrix<T, Dyn, Dyn>,
    cstrv: OVector<T, Dyn>,
    capacity: usize,
    total: usize,
}

impl<T: RealField + Copy> History<T> {
    pub(crate) fn new(n: usize, m: usize, capacity: usize) -> Self {
        Self {
            x: OMatrix::zeros_generic(Dyn(n), Dyn(capacity)),
            f: OVector::zeros_generic(Dyn(capacity), U1::name()),
            constr: OMatrix::zeros_generic(Dyn(m), Dyn(capacity)),
            cstrv: OVector::zeros_generic(Dyn(capacity), U1::name()),
            capacity,
            total: 0,
        }
    }

    fn record<Sx, Sc>(
        &mut self,
        x: &Vector<T, Dyn, Sx>,
        f: T,
        constr: &Vector<T, Dyn, Sc>,
        cstrv: T,
    ) where
        Sx: Storage<T, Dyn>,
        Sc: Storage<T, Dyn>,
    {
        if self.capacity == 0 {
            self.total += 1;
            return;
        }

        let slot = self.total % self.capacity;

        for (i, xi) in x.iter().enumerate() {
            self.x[(i, slot)] = *xi;
        }
        self.f[slot] = f;
        for (i, ci) in constr.iter().enumerate() {
            self.constr[(i, slot)] = *ci;
        }
        self.cstrv[slot] = cstrv;
        self.total += 1;
    }

    /// Rotates the ring buffers into chronological order and trims them to
    /// the number of evaluations actually recorded.
    fn finish(&mut self) {
        let len = self.len();
        let order: Vec<usize> = if self.total <= self.capacity {
            (0..len).collect()
        } else {
            let start = self.total % self.capacity;
            (start..self.capacity).chain(0..start).collect()
        };

        self.x = self.x.select_columns(order.iter());
        self.f = OVector::from_iterator_generic(
            Dyn(len),
            U1::name(),
            order.iter().map(|&i| self.f[i]),
        );
        self.constr = self.constr.select_columns(order.iter());
        self.cstrv = OVector::from_iterator_generic(
            Dyn(len),
            U1::name(),
            order.iter().map(|&i| self.cstrv[i]),
        );
        self.capacity = len;
    }

    /// Number of evaluations kept in the buffers.
    pub fn len(&self) -> usize {
        self.total.min(self.capacity)
    }

    /// Whether no evaluation was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluated points, one per column.
    pub fn x(&self) -> &OMatrix<T, Dyn, Dyn> {
        &self.x
    }

    /// Objective values.
    pub fn f(&self) -> &OVector<T, Dyn> {
        &self.f
    }

    /// Constraint values, one evaluation per column.
    pub fn constr(&self) -> &OMatrix<T, Dyn, Dyn> {
        &self.constr
    }

    /// Constraint violations.
    pub fn cstrv(&self) -> &OVector<T, Dyn> {
        &self.cstrv
    }
}

/// The best point seen so far.
#[derive(Debug, Clone)]
struct BestPoint<T: RealField + Copy> {
    x: OVector<T, Dyn>,
    f: T,
    constr: OVector<T, Dyn>,
    cstrv: T,
}

/// Wraps the user callback with counting, moderation, bound rows, history
/// recording and best-point tracking.
pub(crate) struct Evaluator<T: RealField + Copy> {
    nf: usize,
    bounds: Vec<BoundRow<T>>,
    ctol: T,
    cweight: T,
    history: Option<History<T>>,
    best: Option<BestPoint<T>>,
}

impl<T: RealField + Copy> Evaluator<T> {
    pub(crate) fn new(
        bounds: Vec<BoundRow<T>>,
        ctol: T,
        cweight: T,
        history: Option<History<T>>,
    ) -> Self {
        Self {
            nf: 0,
            bounds,
            ctol,
            cweight,
            history,
            best: None,
        }
    }

    pub(crate) fn nf(&self) -> usize {
        self.nf
    }

    /// Invokes the callback at `x`, filling `constr` with the bound rows
    /// followed by the moderated user constraint values. Returns the raw
    /// objective value and the overall constraint violation.
    ///
    /// A NaN constraint value is replaced by a capped maximal violation. A
    /// non-finite objective is returned as is; deciding the fate of the run
    /// is the caller's job.
    pub(crate) fn evaluate<F, Sx>(
        &mut self,
        f: &F,
        x: &Vector<F::Field, Dyn, Sx>,
        constr: &mut OVector<F::Field, Dyn>,
    ) -> (F::Field, F::Field)
    where
        F: Constrained<Field = T>,
        Sx: Storage<F::Field, Dyn> + nalgebra::IsContiguous,
    {
        let nb = self.bounds.len();
        let m_user = constr.nrows() - nb;

        let fx = {
            let mut user = constr.rows_mut(nb, m_user);
            f.eval(x, &mut user)
        };

        for (row, slot) in self.bounds.iter().zip(constr.iter_mut()) {
            *slot = row.value(x);
        }

        self.commit(x, fx, constr)
    }

    /// Accepts precomputed objective and user constraint values for `x`,
    /// skipping the callback. Counts as one evaluation.
    pub(crate) fn adopt<Sx>(
        &mut self,
        x: &Vector<T, Dyn, Sx>,
        f0: T,
        constr0: &[T],
        constr: &mut OVector<T, Dyn>,
    ) -> (T, T)
    where
        Sx: Storage<T, Dyn>,
    {
        let nb = self.bounds.len();

        for (row, slot) in self.bounds.iter().zip(constr.iter_mut()) {
            *slot = row.value(x);
        }
        for (i, ci) in constr0.iter().enumerate() {
            constr[nb + i] = *ci;
        }

        self.commit(x, f0, constr)
    }

    fn commit<Sx>(&mut self, x: &Vector<T, Dyn, Sx>, fx: T, constr: &mut OVector<T, Dyn>) -> (T, T)
    where
        Sx: Storage<T, Dyn>,
    {
        let nb = self.bounds.len();
        let m_user = constr.nrows() - nb;

        for c in constr.iter_mut() {
            if *c != *c {
                *c = -T::HUGE;
            } else {
                *c = NalgebraRealField::max(*c, -T::HUGE).min(T::HUGE);
            }
        }

        let cstrv = constr
            .iter()
            .fold(T::zero(), |acc, c| NalgebraRealField::max(acc, -*c));

        self.nf += 1;

        if let Some(history) = self.history.as_mut() {
            history.record(x, fx, &constr.rows(nb, m_user), cstrv);
        }

        if fx.is_finite() {
            let better = match &self.best {
                None => true,
                Some(best) => self.is_better(fx, cstrv, best.f, best.cstrv),
            };

            if better {
                self.best = Some(BestPoint {
                    x: x.clone_owned(),
                    f: fx,
                    constr: constr.rows(nb, m_user).clone_owned(),
                    cstrv,
                });
            }
        }

        (fx, cstrv)
    }

    /// Ranks two evaluated points: feasible ones by objective value,
    /// infeasible ones by the weighted sum of objective and violation,
    /// feasible before infeasible.
    pub(crate) fn is_better(&self, f1: T, cv1: T, f2: T, cv2: T) -> bool {
        let feas1 = cv1 <= self.ctol;
        let feas2 = cv2 <= self.ctol;

        match (feas1, feas2) {
            (true, false) => true,
            (false, true) => false,
            (true, true) => f1 < f2 || (f1 == f2 && cv1 < cv2),
            (false, false) => {
                let phi1 = f1 + self.cweight * cv1;
                let phi2 = f2 + self.cweight * cv2;
                phi1 < phi2 || (phi1 == phi2 && cv1 < cv2)
            }
        }
    }

    /// Returns the best point, its values and the trimmed history.
    #[allow(clippy::type_complexity)]
    pub(crate) fn into_parts(
        mut self,
    ) -> (
        Option<(OVector<T, Dyn>, T, OVector<T, Dyn>, T)>,
        Option<History<T>>,
        usize,
    ) {
        if let Some(history) = self.history.as_mut() {
            history.finish();
        }

        let best = self
            .best
            .map(|best| (best.x, best.f, best.constr, best.cstrv));

        (best, self.history, self.nf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::dvector;

    use crate::core::Domain;
    use crate::testing::Sphere;

    #[test]
    fn bound_rows_skip_infinite_bounds() {
        let dom = Domain::rect(vec![0.0, f64::NEG_INFINITY], vec![f64::INFINITY, 2.0]);
        let rows = bound_rows(&dom);

        assert_eq!(rows.len(), 2);
        assert!(matches!(rows[0], BoundRow::Lower { var: 0, .. }));
        assert!(matches!(rows[1], BoundRow::Upper { var: 1, .. }));
    }

    #[test]
    fn violation_covers_bound_rows() {
        let dom = Domain::rect(vec![1.0, 1.0], vec![10.0, 10.0]);
        let f = Sphere::new(2);
        let mut evaluator = Evaluator::new(bound_rows(&dom), 1e-8, 1e8, None);
        let mut constr = dvector![0.0, 0.0, 0.0, 0.0];

        let (fx, cstrv) = evaluator.evaluate(&f, &dvector![0.0, 5.0], &mut constr);

        assert_eq!(fx, 25.0);
        // x[0] = 0 violates the lower bound 1 by exactly one.
        assert_eq!(cstrv, 1.0);
        assert_eq!(evaluator.nf(), 1);
    }

    #[test]
    fn nan_constraints_become_maximal_violations() {
        struct NanConstraint;

        impl crate::core::Problem for NanConstraint {
            type Field = f64;

            fn domain(&self) -> Domain<f64> {
                Domain::unconstrained(1)
            }
        }

        impl crate::core::Constrained for NanConstraint {
            fn num_constraints(&self) -> usize {
                1
            }

            fn eval<Sx, Sc>(
                &self,
                x: &nalgebra::Vector<f64, Dyn, Sx>,
                constr: &mut nalgebra::Vector<f64, Dyn, Sc>,
            ) -> f64
            where
                Sx: Storage<f64, Dyn> + nalgebra::IsContiguous,
                Sc: nalgebra::storage::StorageMut<f64, Dyn>,
            {
                constr[0] = f64::NAN;
                x[0]
            }
        }

        let mut evaluator = Evaluator::new(Vec::new(), 1e-8, 1e8, None);
        let mut constr = dvector![0.0];

        let (_, cstrv) = evaluator.evaluate(&NanConstraint, &dvector![1.0], &mut constr);

        assert!(cstrv.is_finite());
        assert!(cstrv >= 1e100);
    }

    #[test]
    fn filter_prefers_feasible_points() {
        let evaluator = Evaluator::<f64>::new(Vec::new(), 1e-6, 1e8, None);

        // Feasible beats infeasible regardless of objective.
        assert!(evaluator.is_better(10.0, 0.0, -10.0, 1.0));
        assert!(!evaluator.is_better(-10.0, 1.0, 10.0, 0.0));
        // Among feasible, the objective decides.
        assert!(evaluator.is_better(1.0, 0.0, 2.0, 1e-8));
        // Among infeasible, the weighted merit decides.
        assert!(evaluator.is_better(0.0, 1e-3, 0.0, 2e-3));
    }

    #[test]
    fn history_ring_keeps_most_recent() {
        let mut history = History::<f64>::new(1, 0, 3);
        let empty = dvector![];

        for i in 0..5 {
            history.record(&dvector![i as f64], i as f64, &empty, 0.0);
        }
        history.finish();

        assert_eq!(history.len(), 3);
        assert_eq!(history.f().as_slice(), &[2.0, 3.0, 4.0]);
        assert_eq!(history.x()[(0, 0)], 2.0);
        assert_eq!(history.x()[(0, 2)], 4.0);
    }

    #[test]
    fn history_shorter_than_capacity_is_trimmed() {
        let mut history = History::<f64>::new(2, 1, 10);

        history.record(&dvector![1.0, 2.0], 3.0, &dvector![4.0], 0.5);
        history.finish();

        assert_eq!(history.len(), 1);
        assert_eq!(history.x().ncols(), 1);
        assert_eq!(history.f().as_slice(), &[3.0]);
        assert_eq!(history.constr()[(0, 0)], 4.0);
        assert_eq!(history.cstrv().as_slice(), &[0.5]);
    }
}
