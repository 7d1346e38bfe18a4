//! Working-set maintenance for linearly constrained trust-region
//! subproblems.
//!
//! Given the gradient of a model and a set of linear inequality
//! constraints with unit-norm gradients, [`WorkingSet::descent_direction`]
//! produces the steepest-descent direction projected onto the orthogonal
//! complement of the constraints currently treated as equalities. The set
//! of those constraints is revised on the fly by Goldfarb-Idnani rank-one
//! updates of an incremental QR factorization, so one revision costs
//! `O(n^2)` instead of a full refactorization.
//!
//! The working set is owned by the outer trust-region iteration and passed
//! by mutable reference, never kept in ambient state. It persists across
//! the inner sub-steps of one iteration as a warm start.
//!
//! # References
//!
//! \[1\] [A direct search optimization method that models the objective
//! and constraint functions by linear
//! interpolation](https://link.springer.com/chapter/10.1007/978-94-015-8330-5_4)
//!
//! \[2\] [On fast trust region methods for quadratic models with linear
//! constraints](https://link.springer.com/article/10.1007/s12532-015-0084-4)

use nalgebra::{convert, storage::Storage, DimName, Dyn, Matrix, OMatrix, OVector, Vector, U1};

use crate::core::RealField;
use crate::linalg::{qr_add, qr_exchange};

#[cfg(debug_assertions)]
use crate::linalg::{is_orthogonal, is_upper_triangular};

/// Fraction of the trust radius within which an inactive constraint counts
/// as nearly active.
const NEAR_ACTIVE: f64 = 0.2;

/// The working set of a linearly constrained subproblem.
///
/// Holds the indices of the constraints currently treated as equalities
/// together with the QR factorization of their gradients, the slack
/// bookkeeping and the Lagrange multipliers. The matrices are sized once
/// and reused across invocations.
pub struct WorkingSet<T: RealField + Copy> {
    q: OMatrix<T, Dyn, Dyn>,
    r: OMatrix<T, Dyn, Dyn>,
    iact: Vec<usize>,
    resact: Vec<T>,
    vlam: Vec<T>,
    resnew: OVector<T, Dyn>,
    mu: Vec<T>,
    w: OVector<T, Dyn>,
    apsd: OVector<T, Dyn>,
}

impl<T: RealField + Copy> WorkingSet<T> {
    /// Creates an empty working set for `n` variables and `m` constraints.
    pub fn new(n: usize, m: usize) -> Self {
        Self {
            q: OMatrix::identity_generic(Dyn(n), Dyn(n)),
            r: OMatrix::zeros_generic(Dyn(n), Dyn(n)),
            iact: Vec::with_capacity(n.min(m)),
            resact: Vec::with_capacity(n.min(m)),
            vlam: Vec::with_capacity(n.min(m)),
            resnew: OVector::zeros_generic(Dyn(m), U1::name()),
            mu: Vec::with_capacity(n.min(m)),
            w: OVector::zeros_generic(Dyn(n), U1::name()),
            apsd: OVector::zeros_generic(Dyn(m), U1::name()),
        }
    }

    /// Empties the working set and installs fresh constraint slacks.
    ///
    /// Nonpositive slacks are floored at a tiny positive value so that a
    /// constraint sitting on (or beyond) its boundary still takes part in
    /// the near-active screening.
    pub fn restart<S>(&mut self, slacks: &Vector<T, Dyn, S>)
    where
        S: Storage<T, Dyn>,
    {
        self.q.fill_with_identity();
        self.r.fill(T::zero());
        self.iact.clear();
        self.resact.clear();
        self.vlam.clear();

        for (stored, slack) in self.resnew.iter_mut().zip(slacks.iter()) {
            *stored = slack.max(T::TINY);
        }
    }

    /// Number of constraints in the working set.
    pub fn nact(&self) -> usize {
        self.iact.len()
    }

    /// Indices of the constraints in the working set.
    pub fn active(&self) -> &[usize] {
        &self.iact
    }

    /// Current slack of constraint `j`; zero for members of the working
    /// set.
    pub fn slack(&self, j: usize) -> T {
        self.resnew[j]
    }

    /// Decreases the slack of every inactive constraint by `alpha` times
    /// its directional derivative `atd`, keeping a tiny positive floor.
    pub fn update_slacks<S>(&mut self, atd: &Vector<T, Dyn, S>, alpha: T)
    where
        S: Storage<T, Dyn>,
    {
        for (stored, rate) in self.resnew.iter_mut().zip(atd.iter()) {
            if *stored > T::zero() {
                *stored = (*stored - alpha * *rate).max(T::TINY);
            }
        }
    }

    /// Computes the projected steepest-descent direction of the gradient
    /// `g` under the working set, revising the set as needed.
    ///
    /// `a` is the constraint matrix with unit-norm columns (normalized once
    /// by the caller) and `snorm` the length of the step the caller is
    /// still allowed to take. On return `d` holds the direction; the zero
    /// vector means that no descent is possible under the current set.
    pub fn descent_direction<Sa, Sg>(
        &mut self,
        a: &Matrix<T, Dyn, Dyn, Sa>,
        g: &Vector<T, Dyn, Sg>,
        snorm: T,
        d: &mut OVector<T, Dyn>,
    ) where
        Sa: Storage<T, Dyn, Dyn>,
        Sg: Storage<T, Dyn>,
    {
        let n = self.q.nrows();
        let m = a.ncols();
        let tdel = convert::<_, T>(NEAR_ACTIVE) * snorm;

        // Monotone descent guard: the squared norm of the projected
        // gradient must shrink every time the working set grows, otherwise
        // rounding has taken over.
        let mut ddsav = convert::<_, T>(2.0) * g.norm_squared();

        // Discard constraints whose activation slack has become large
        // relative to the remaining step.
        for ic in (0..self.nact()).rev() {
            if self.resact[ic] > tdel {
                self.delete(ic);
            }
        }

        // Discard constraints with multipliers of the wrong sign, largest
        // index first.
        while self.nact() > 0 {
            self.solve_multipliers(g);

            let dropped = (0..self.nact())
                .rev()
                .find(|&i| self.vlam[i] >= T::zero());

            match dropped {
                Some(ic) => self.delete(ic),
                None => break,
            }
        }

        for _ in 0..2 * (m + n) {
            let nact = self.nact();

            if nact == n {
                d.fill(T::zero());
                return;
            }

            // d = -P P^T g with P the trailing columns of Q spanning the
            // orthogonal complement of the active constraint gradients.
            let free = self.q.columns(nact, n - nact);
            let w = free.tr_mul(g);
            free.mul_to(&w, d);
            d.neg_mut();

            let dd = d.norm_squared();

            if dd >= ddsav {
                d.fill(T::zero());
                return;
            }
            if dd == T::zero() {
                return;
            }

            ddsav = dd;
            let dnorm = dd.sqrt();

            a.tr_mul_to(d, &mut self.apsd);

            // Find the most violated of the nearly active constraints that
            // the step is about to cross.
            let mut violmx = T::zero();
            let mut sel = None;

            for j in 0..m {
                let slack = self.resnew[j];

                if slack > T::zero() && slack <= tdel && self.apsd[j] > (dnorm / snorm) * slack {
                    if self.apsd[j] > violmx {
                        violmx = self.apsd[j];
                        sel = Some(j);
                    }
                }
            }

            let Some(l) = sel else {
                self.check_invariants(m);
                return;
            };

            // Ignore violations that are indistinguishable from the
            // floating-point noise of the already active constraints.
            let active_inf = self
                .iact
                .iter()
                .map(|&j| self.apsd[j].abs())
                .fold(T::zero(), |acc, value| acc.max(value));

            if violmx <= convert::<_, T>(0.01) * dnorm
                && violmx <= convert::<_, T>(10.0) * active_inf
            {
                self.check_invariants(m);
                return;
            }

            // Add constraint l to the working set.
            qr_add(&mut self.q, &mut self.r, &a.column(l), nact);
            self.iact.push(l);
            self.resact.push(self.resnew[l]);
            self.vlam.push(T::zero());
            self.resnew[l] = T::zero();

            self.repair_multipliers(violmx);
        }

        self.check_invariants(m);
    }

    /// Distributes the latest violation over the multipliers, dropping
    /// every constraint whose multiplier loses its sign on the way.
    fn repair_multipliers(&mut self, violmx: T) {
        let mut violmx = violmx;

        while violmx > T::zero() && self.nact() > 0 {
            let nact = self.nact();

            // Back-substitution for the direction of change of the
            // multipliers induced by the newly added constraint.
            self.mu.clear();
            self.mu.resize(nact, T::zero());
            self.mu[nact - 1] = T::one() / self.r[(nact - 1, nact - 1)].powi(2);

            for i in (0..nact - 1).rev() {
                let mut sum = T::zero();
                for j in i + 1..nact {
                    sum += self.r[(i, j)] * self.mu[j];
                }
                self.mu[i] = -sum / self.r[(i, i)];
            }

            // The step in the multipliers is limited by the violation
            // itself and by the first multiplier that would cross zero;
            // ic = -1 records that the violation was the limiter.
            let mut vmult = violmx;
            let mut ic: isize = -1;

            for i in 0..nact {
                if self.mu[i] < T::zero() {
                    let frac = self.vlam[i] / self.mu[i];
                    if frac <= vmult {
                        vmult = frac;
                        ic = i as isize;
                    }
                }
            }

            violmx = (violmx - vmult).max(T::zero());

            for i in 0..nact {
                self.vlam[i] -= vmult * self.mu[i];
            }
            if ic >= 0 {
                self.vlam[ic as usize] = T::zero();
            }

            for i in (0..self.nact()).rev() {
                if self.vlam[i] >= T::zero() {
                    self.delete(i);
                }
            }
        }
    }

    /// Solves the triangular system for the multipliers of the active
    /// constraints.
    fn solve_multipliers<Sg>(&mut self, g: &Vector<T, Dyn, Sg>)
    where
        Sg: Storage<T, Dyn>,
    {
        let nact = self.nact();
        self.q.tr_mul_to(g, &mut self.w);

        for i in (0..nact).rev() {
            let mut sum = self.w[i];
            for j in i + 1..nact {
                sum -= self.r[(i, j)] * self.vlam[j];
            }
            self.vlam[i] = sum / self.r[(i, i)];
        }
    }

    /// Removes the constraint at active position `ic`, restoring its slack
    /// from the activation snapshot.
    fn delete(&mut self, ic: usize) {
        let nact = self.nact();
        self.resnew[self.iact[ic]] = self.resact[ic].max(T::TINY);

        qr_exchange(&mut self.q, &mut self.r, ic, nact);
        self.iact.remove(ic);
        self.resact.remove(ic);
        self.vlam.remove(ic);
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self, m: usize) {
        let tol = invariant_tol::<T>(m);
        let nact = self.nact();

        debug_assert!(nact <= self.q.nrows().min(m));
        debug_assert!(is_orthogonal(&self.q, tol));
        debug_assert!(is_upper_triangular(&self.r, nact, tol));
        debug_assert!((0..nact).all(|i| self.r[(i, i)] > T::zero()));
        debug_assert!({
            let mut seen = self.iact.clone();
            seen.sort_unstable();
            seen.windows(2).all(|w| w[0] != w[1])
        });
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self, _m: usize) {}
}

/// Tolerance for the orthogonality and triangularity assertions, scaled by
/// the number of constraints.
#[cfg(debug_assertions)]
fn invariant_tol<T: RealField + Copy>(m: usize) -> T {
    let scaled = convert::<_, T>(1e8) * T::EPSILON * convert::<_, T>((m + 1) as f64);
    convert::<_, T>(1e-10).max(scaled.min(convert(0.1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::{dmatrix, dvector, DMatrix, DVector};

    use crate::linalg::{is_orthogonal, is_upper_triangular};

    fn unit_columns(a: DMatrix<f64>) -> DMatrix<f64> {
        let mut a = a;
        for mut col in a.column_iter_mut() {
            let norm = col.norm();
            col /= norm;
        }
        a
    }

    #[test]
    fn unconstrained_direction_is_negative_gradient() {
        let a = DMatrix::<f64>::zeros(3, 0);
        let g = dvector![-1.0, -1.0, -1.0];
        let mut ws = WorkingSet::new(3, 0);
        let mut d = DVector::zeros(3);

        ws.restart(&DVector::<f64>::zeros(0));
        ws.descent_direction(&a, &g, 1.0, &mut d);

        assert_eq!(ws.nact(), 0);
        assert!((d - dvector![1.0, 1.0, 1.0]).norm() < 1e-12);
    }

    #[test]
    fn axis_planes_are_activated() {
        // Two coordinate-plane constraints with tight slacks: the descent
        // of g = (-1, -1, -1) crosses both, so both enter the working set
        // and the returned direction lives in their orthogonal complement.
        let a = dmatrix![
            1.0, 0.0;
            0.0, 1.0;
            0.0, 0.0;
        ];
        let g = dvector![-1.0, -1.0, -1.0];
        let mut ws = WorkingSet::new(3, 2);
        let mut d: DVector<f64> = DVector::zeros(3);

        ws.restart(&dvector![1e-3, 1e-3]);
        ws.descent_direction(&a, &g, 1.0, &mut d);

        assert_eq!(ws.nact(), 2);
        let mut active = ws.active().to_vec();
        active.sort_unstable();
        assert_eq!(active, vec![0, 1]);

        // Projection onto the third axis.
        assert!(d[0].abs() < 1e-12);
        assert!(d[1].abs() < 1e-12);
        assert!((d[2] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn generous_slacks_keep_set_empty() {
        let a = dmatrix![
            1.0, 0.0;
            0.0, 1.0;
            0.0, 0.0;
        ];
        let g = dvector![-1.0, -1.0, -1.0];
        let mut ws = WorkingSet::new(3, 2);
        let mut d = DVector::zeros(3);

        // Slacks far beyond the near-active band.
        ws.restart(&dvector![10.0, 10.0]);
        ws.descent_direction(&a, &g, 1.0, &mut d);

        assert_eq!(ws.nact(), 0);
        assert!((d - dvector![1.0, 1.0, 1.0]).norm() < 1e-12);
    }

    #[test]
    fn stale_actives_are_pruned_by_slack() {
        let a = dmatrix![
            1.0, 0.0;
            0.0, 1.0;
            0.0, 0.0;
        ];
        let g = dvector![-1.0, -1.0, -1.0];
        let mut ws = WorkingSet::new(3, 2);
        let mut d = DVector::zeros(3);

        ws.restart(&dvector![1e-3, 1e-3]);
        ws.descent_direction(&a, &g, 1.0, &mut d);
        assert_eq!(ws.nact(), 2);

        // Shrinking the remaining step makes the activation snapshots look
        // stale, so the set is emptied and full steepest descent returns.
        ws.descent_direction(&a, &g, 1e-4, &mut d);
        assert_eq!(ws.nact(), 0);
        assert!((d.normalize() - dvector![1.0, 1.0, 1.0].normalize()).norm() < 1e-12);
    }

    #[test]
    fn opposing_gradient_keeps_direction_zero() {
        // With the constraint gradient parallel to -g, the only descent
        // direction crosses the constraint; after activation the projected
        // gradient vanishes.
        let a = unit_columns(dmatrix![
            1.0;
            1.0;
        ]);
        let g = dvector![-1.0, -1.0];
        let mut ws = WorkingSet::new(2, 1);
        let mut d = DVector::zeros(2);

        ws.restart(&dvector![1e-6]);
        ws.descent_direction(&a, &g, 1.0, &mut d);

        assert!(d.norm() < 1e-12);
    }

    #[test]
    fn working_set_never_exceeds_dimension() {
        // Three constraints in the plane, all nearly active. The set must
        // stay within min(m, n) = 2 and the factorization healthy.
        let a = unit_columns(dmatrix![
            1.0, 0.0, 1.0;
            0.0, 1.0, 1.0;
        ]);
        let g = dvector![-3.0, -2.0];
        let mut ws = WorkingSet::new(2, 3);
        let mut d = DVector::zeros(2);

        ws.restart(&dvector![1e-4, 2e-4, 3e-4]);
        ws.descent_direction(&a, &g, 0.5, &mut d);

        assert!(ws.nact() <= 2);
        assert!(is_orthogonal(&ws.q, 1e-10));
        assert!(is_upper_triangular(&ws.r, ws.nact(), 1e-12));
        for i in 0..ws.nact() {
            assert!(ws.r[(i, i)] > 0.0);
        }
    }

    #[test]
    fn slack_updates_respect_floor() {
        let mut ws = WorkingSet::<f64>::new(2, 2);
        ws.restart(&dvector![0.5, 1.0]);

        ws.update_slacks(&dvector![1.0, -1.0], 0.75);

        assert!(ws.slack(0) >= f64::MIN_POSITIVE);
        assert!(ws.slack(0) < 1e-10);
        assert!((ws.slack(1) - 1.75).abs() < 1e-12);
    }
}
