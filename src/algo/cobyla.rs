//! COBYLA optimization method.
//!
//! [COBYLA](https://link.springer.com/chapter/10.1007/978-94-015-8330-5_4)
//! (Constrained Optimization BY Linear Approximations) minimizes an
//! objective subject to inequality constraints without using derivatives.
//! It keeps a simplex of _n + 1_ points and interpolates the objective and
//! every constraint by linear models on its vertices. A trust-region step
//! on the models proposes the next point; a merit function with an
//! adaptively increased penalty decides whether the point becomes the new
//! incumbent, and the simplex geometry is repaired whenever interpolation
//! becomes ill-conditioned.
//!
//! # References
//!
//! \[1\] [A direct search optimization method that models the objective and
//! constraint functions by linear
//! interpolation](https://link.springer.com/chapter/10.1007/978-94-015-8330-5_4)
//!
//! \[2\] [A view of algorithms for optimization without
//! derivatives](https://www.damtp.cam.ac.uk/user/na/NA_papers/NA2007_03.pdf)
//!
//! \[3\] [PRIMA: Reference Implementation for Powell's methods with
//! Modernization and Amelioration](https://www.libprima.net)

use getset::{CopyGetters, Setters};
use log::{debug, warn};
use nalgebra::{
    convert, storage::StorageMut, ComplexField, DimName, Dyn, IsContiguous, OMatrix, OVector,
    RealField as NalgebraRealField, Vector, U1,
};
use thiserror::Error;

use crate::activeset::WorkingSet;
use crate::core::{Constrained, Domain, Problem, RealField, Status};
use crate::eval::{bound_rows, BoundRow, Evaluator, History};

/// Simplex acceptability: a vertex closer to the opposite face than this
/// multiple of rho makes the simplex too flat.
const FLATNESS: f64 = 0.25;

/// Simplex acceptability: a vertex farther from the incumbent than this
/// multiple of rho makes the simplex too stretched.
const STRETCH: f64 = 2.1;

/// Options for the [`Cobyla`] solver.
#[derive(Debug, Clone, CopyGetters, Setters)]
#[getset(get_copy = "pub", set = "pub")]
pub struct CobylaOptions<P: Problem> {
    /// Initial trust-region radius, roughly one tenth of the greatest
    /// expected change to a variable. Default: `1`.
    rhobeg: P::Field,
    /// Final trust-region radius, indicating the accuracy required in the
    /// variables. Clamped to `rhobeg` if greater. Default: `1e-6`.
    rhoend: P::Field,
    /// Target objective value; the run stops as soon as a feasible point
    /// with a value not above the target is evaluated. Default: negative
    /// infinity.
    ftarget: P::Field,
    /// Feasibility tolerance on the constraint violation. Default:
    /// `sqrt(EPSILON)`.
    ctol: P::Field,
    /// Weight of the constraint violation when ranking infeasible points
    /// for the returned solution. Default: `1e8`.
    cweight: P::Field,
    /// Reduction-ratio threshold below which the inner radius is shrunk.
    /// Default: `0.1`.
    eta1: P::Field,
    /// Reduction-ratio threshold above which the inner radius is expanded.
    /// Default: `0.7`.
    eta2: P::Field,
    /// Contraction factor for the radii. Default: `0.5`.
    gamma1: P::Field,
    /// Expansion factor for the inner radius. Default: `2`.
    gamma2: P::Field,
    /// Record the history of evaluations. Default: `false`.
    history: bool,
    #[getset(skip)]
    maxfun: Option<usize>,
    #[getset(skip)]
    maxhist: Option<usize>,
    #[getset(skip)]
    initial: Option<(P::Field, Vec<P::Field>)>,
}

impl<P: Problem> CobylaOptions<P> {
    /// Maximum number of callback evaluations, if set. Default:
    /// `500 * n`.
    pub fn maxfun(&self) -> Option<usize> {
        self.maxfun
    }

    /// Sets the maximum number of callback evaluations.
    pub fn set_maxfun(&mut self, maxfun: usize) -> &mut Self {
        self.maxfun = Some(maxfun);
        self
    }

    /// Capacity of the history buffers, if set. Default: same as the
    /// evaluation budget.
    pub fn maxhist(&self) -> Option<usize> {
        self.maxhist
    }

    /// Sets the capacity of the history buffers.
    pub fn set_maxhist(&mut self, maxhist: usize) -> &mut Self {
        self.maxhist = Some(maxhist);
        self
    }

    /// Supplies the objective and constraint values at the initial point,
    /// saving one callback evaluation. The constraint values must have the
    /// length reported by the problem.
    pub fn set_initial_values(&mut self, f0: P::Field, constr0: Vec<P::Field>) -> &mut Self {
        self.initial = Some((f0, constr0));
        self
    }

    fn initial_values(&self) -> Option<&(P::Field, Vec<P::Field>)> {
        self.initial.as_ref()
    }
}

impl<P: Problem> Default for CobylaOptions<P> {
    fn default() -> Self {
        Self {
            rhobeg: convert(1.0),
            rhoend: convert(1e-6),
            ftarget: convert(f64::NEG_INFINITY),
            ctol: P::Field::EPSILON_SQRT,
            cweight: convert(1e8),
            eta1: convert(0.1),
            eta2: convert(0.7),
            gamma1: convert(0.5),
            gamma2: convert(2.0),
            history: false,
            maxfun: None,
            maxhist: None,
            initial: None,
        }
    }
}

/// Error returned from [`Cobyla`] when the arguments are invalid.
///
/// Violations of the argument contract surface here, before the first
/// callback evaluation. Everything that happens later is reported through
/// [`Status`], never as an error.
#[derive(Debug, Error)]
pub enum CobylaError {
    /// The initial point does not match the dimension of the domain.
    #[error("initial point has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Dimension of the domain.
        expected: usize,
        /// Dimension of the supplied point.
        actual: usize,
    },
    /// The supplied initial constraint values do not match the number of
    /// constraints.
    #[error("initial constraint values have length {actual}, expected {expected}")]
    ConstraintCountMismatch {
        /// Number of constraints of the problem.
        expected: usize,
        /// Length of the supplied values.
        actual: usize,
    },
    /// The trust-region radii are not finite and positive.
    #[error("trust-region radii must be finite and positive")]
    InvalidRadius,
}

/// The outcome of a [`Cobyla`] run.
#[derive(Debug, Clone)]
pub struct Optimum<T: RealField + Copy> {
    x: OVector<T, Dyn>,
    f: T,
    constr: OVector<T, Dyn>,
    cstrv: T,
    nf: usize,
    status: Status,
    history: Option<History<T>>,
}

impl<T: RealField + Copy> Optimum<T> {
    /// The best point found.
    pub fn x(&self) -> &[T] {
        self.x.as_slice()
    }

    /// Objective value at the best point.
    pub fn f(&self) -> T {
        self.f
    }

    /// Constraint values at the best point.
    pub fn constr(&self) -> &[T] {
        self.constr.as_slice()
    }

    /// Constraint violation at the best point, bounds included.
    pub fn cstrv(&self) -> T {
        self.cstrv
    }

    /// Number of callback evaluations performed.
    pub fn nf(&self) -> usize {
        self.nf
    }

    /// Reason for which the run stopped.
    pub fn status(&self) -> Status {
        self.status
    }

    /// History of the evaluations, if recording was requested.
    pub fn history(&self) -> Option<&History<T>> {
        self.history.as_ref()
    }
}

/// COBYLA solver.
///
/// See [module](self) documentation for more details.
pub struct Cobyla<P: Problem> {
    options: CobylaOptions<P>,
    bounds: Vec<BoundRow<P::Field>>,
    m_user: usize,
    vertices: OMatrix<P::Field, Dyn, Dyn>,
    fvals: OVector<P::Field, Dyn>,
    convals: OMatrix<P::Field, Dyn, Dyn>,
    cviols: OVector<P::Field, Dyn>,
    sim: OMatrix<P::Field, Dyn, Dyn>,
    simi: OMatrix<P::Field, Dyn, Dyn>,
    models: OMatrix<P::Field, Dyn, Dyn>,
    anorm: OMatrix<P::Field, Dyn, Dyn>,
    bhat: OVector<P::Field, Dyn>,
    atd: OVector<P::Field, Dyn>,
    ws: WorkingSet<P::Field>,
    d: OVector<P::Field, Dyn>,
    step: OVector<P::Field, Dyn>,
    xnew: OVector<P::Field, Dyn>,
    connew: OVector<P::Field, Dyn>,
    conpole: OVector<P::Field, Dyn>,
}

impl<F: Constrained> Cobyla<F> {
    /// Initializes the solver with default options.
    pub fn new(f: &F, dom: &Domain<F::Field>) -> Self {
        Self::with_options(f, dom, CobylaOptions::default())
    }

    /// Initializes the solver with given options.
    ///
    /// All working storage is allocated here and reused across the whole
    /// run; the main loop performs no allocation.
    pub fn with_options(f: &F, dom: &Domain<F::Field>, options: CobylaOptions<F>) -> Self {
        let n = dom.dim();
        let m_user = f.num_constraints();
        let bounds = bound_rows(dom);
        let m = bounds.len() + m_user;

        let dim = Dyn(n);
        let one = U1::name();

        Self {
            options,
            bounds,
            m_user,
            vertices: OMatrix::zeros_generic(dim, Dyn(n + 1)),
            fvals: OVector::zeros_generic(Dyn(n + 1), one),
            convals: OMatrix::zeros_generic(Dyn(m), Dyn(n + 1)),
            cviols: OVector::zeros_generic(Dyn(n + 1), one),
            sim: OMatrix::zeros_generic(dim, dim),
            simi: OMatrix::zeros_generic(dim, dim),
            models: OMatrix::zeros_generic(dim, Dyn(m + 1)),
            anorm: OMatrix::zeros_generic(dim, Dyn(m)),
            bhat: OVector::zeros_generic(Dyn(m), one),
            atd: OVector::zeros_generic(Dyn(m), one),
            ws: WorkingSet::new(n, m),
            d: OVector::zeros_generic(dim, one),
            step: OVector::zeros_generic(dim, one),
            xnew: OVector::zeros_generic(dim, one),
            connew: OVector::zeros_generic(Dyn(m), one),
            conpole: OVector::zeros_generic(Dyn(m), one),
        }
    }

    /// Minimizes the problem starting from `x`.
    ///
    /// On entry `x` is the initial guess; on return it holds the best point
    /// found, which is also carried by the returned [`Optimum`] together
    /// with the exit [`Status`].
    pub fn minimize<Sx>(
        &mut self,
        f: &F,
        dom: &Domain<F::Field>,
        x: &mut Vector<F::Field, Dyn, Sx>,
    ) -> Result<Optimum<F::Field>, CobylaError>
    where
        Sx: StorageMut<F::Field, Dyn> + IsContiguous,
    {
        let n = dom.dim();

        if x.nrows() != n {
            return Err(CobylaError::DimensionMismatch {
                expected: n,
                actual: x.nrows(),
            });
        }

        let m_user = self.m_user;
        let m = self.bounds.len() + m_user;

        let zero: F::Field = convert(0.0);
        let half: F::Field = convert(0.5);
        let one: F::Field = convert(1.0);

        let rhobeg = self.options.rhobeg();
        let mut rhoend = self.options.rhoend();

        if !(rhobeg.is_finite() && rhobeg > zero) || !(rhoend.is_finite() && rhoend > zero) {
            return Err(CobylaError::InvalidRadius);
        }
        if rhoend > rhobeg {
            warn!("rhoend {} is above rhobeg {}, clamping", rhoend, rhobeg);
            rhoend = rhobeg;
        }

        if let Some((_, constr0)) = self.options.initial_values() {
            if constr0.len() != m_user {
                return Err(CobylaError::ConstraintCountMismatch {
                    expected: m_user,
                    actual: constr0.len(),
                });
            }
        }

        let mut maxfun = self.options.maxfun().unwrap_or(500 * n);
        if maxfun < n + 2 {
            warn!("evaluation budget {} cannot cover the initial simplex, revising to {}", maxfun, n + 2);
            maxfun = n + 2;
        }

        let ftarget = self.options.ftarget();
        let ctol = self.options.ctol();
        let eta1 = self.options.eta1();
        let eta2 = self.options.eta2();
        let gamma1 = self.options.gamma1();
        let gamma2 = self.options.gamma2();

        let history = if self.options.history() {
            let capacity = self.options.maxhist().unwrap_or(maxfun).min(maxfun);
            Some(History::new(n, m_user, capacity))
        } else {
            None
        };

        let mut evaluator = Evaluator::new(
            self.bounds.clone(),
            ctol,
            self.options.cweight(),
            history,
        );

        // A bound gap that cannot contain the initial simplex makes the
        // problem ill-posed for this rhobeg.
        let two_rhobeg = rhobeg + rhobeg;
        for (lower, upper) in dom.lower().iter().zip(dom.upper().iter()) {
            if lower.is_finite() && upper.is_finite() && *upper - *lower < two_rhobeg {
                debug!("bound gap {} is below 2 * rhobeg", *upper - *lower);
                return Ok(conclude(evaluator, Status::BoundGapTooSmall, x, m_user));
            }
        }

        if x.iter().any(|xi| !xi.is_finite()) {
            return Ok(conclude(evaluator, Status::NanX, x, m_user));
        }

        dom.project(x);

        let Self {
            options,
            vertices,
            fvals,
            convals,
            cviols,
            sim,
            simi,
            models,
            anorm,
            bhat,
            atd,
            ws,
            d,
            step,
            xnew,
            connew,
            conpole,
            ..
        } = self;

        // Evaluate the starting point, reusing precomputed values when the
        // caller supplied them.
        let (f0, cv0) = match options.initial_values() {
            Some((f0, constr0)) => evaluator.adopt(x, *f0, constr0, connew),
            None => evaluator.evaluate(f, x, connew),
        };

        if !f0.is_finite() {
            return Ok(conclude(evaluator, Status::NanInfF, x, m_user));
        }
        if f0 <= ftarget && cv0 <= ctol {
            return Ok(conclude(evaluator, Status::TargetAchieved, x, m_user));
        }

        vertices.set_column(n, x);
        fvals[n] = f0;
        convals.set_column(n, connew);
        cviols[n] = cv0;

        // The remaining vertices sit at distance rhobeg along the
        // coordinate directions.
        let fill_status = 'fill: {
            for j in 0..n {
                xnew.copy_from(&vertices.column(n));
                xnew[j] += rhobeg;

                if evaluator.nf() >= maxfun {
                    break 'fill Some(Status::MaxFunReached);
                }

                let (fj, cvj) = evaluator.evaluate(f, xnew, connew);

                if !fj.is_finite() {
                    break 'fill Some(Status::NanInfF);
                }

                vertices.set_column(j, xnew);
                fvals[j] = fj;
                convals.set_column(j, connew);
                cviols[j] = cvj;

                if fj <= ftarget && cvj <= ctol {
                    break 'fill Some(Status::TargetAchieved);
                }
            }

            None
        };

        if let Some(status) = fill_status {
            return Ok(conclude(evaluator, status, x, m_user));
        }

        // Make the best vertex the incumbent before building the geometry.
        let mut best = n;
        for k in 0..n {
            if evaluator.is_better(fvals[k], cviols[k], fvals[best], cviols[best]) {
                best = k;
            }
        }
        if best != n {
            vertices.swap_columns(best, n);
            fvals.swap_rows(best, n);
            convals.swap_columns(best, n);
            cviols.swap_rows(best, n);
        }

        for p in 0..n {
            let edge = vertices.column(p) - vertices.column(n);
            sim.set_column(p, &edge);
        }
        match sim.clone_owned().lu().try_inverse() {
            Some(inverse) => simi.copy_from(&inverse),
            None => return Ok(conclude(evaluator, Status::DamagingRounding, x, m_user)),
        }
        interpolate_models(simi, fvals, convals, models, step);

        let mut rho = rhobeg;
        let mut delta = rhobeg;
        let mut sigma = zero;
        let mut iterations = 0usize;

        let status = loop {
            iterations += 1;
            if iterations > 4 * maxfun + 100 {
                break Status::MaxFunReached;
            }

            if !simplex_acceptable(sim, simi, rho) {
                // The interpolation set degenerated; re-interpolate the
                // worst vertex at a point chosen for geometry, not for
                // descent.
                let jdrop = worst_vertex(sim, simi, rho);

                geometry_direction(simi, jdrop, half * rho, d);
                let forward = model_merit(models, convals, d, sigma, one);
                let backward = model_merit(models, convals, d, sigma, -one);
                if backward < forward {
                    d.neg_mut();
                }

                debug!(
                    "geometry step on vertex {} with length {}",
                    jdrop,
                    d.norm()
                );

                vertices.column(n).add_to(d, xnew);

                if xnew.iter().any(|xi| !xi.is_finite()) {
                    break Status::NanX;
                }
                if evaluator.nf() >= maxfun {
                    break Status::MaxFunReached;
                }

                let (fnew, cvnew) = evaluator.evaluate(f, xnew, connew);

                if !fnew.is_finite() {
                    break Status::NanInfF;
                }
                if fnew <= ftarget && cvnew <= ctol {
                    break Status::TargetAchieved;
                }

                let merit_old = fvals[n] + sigma * cviols[n];
                let merit_new = fnew + sigma * cvnew;
                let improved =
                    merit_new < merit_old || (merit_new == merit_old && cvnew < cviols[n]);

                if let Err(failure) = replace_vertex(
                    vertices, fvals, convals, cviols, sim, simi, jdrop, xnew, fnew, connew, cvnew,
                ) {
                    break failure;
                }
                if improved {
                    swap_pole(vertices, fvals, convals, cviols, sim, simi, jdrop);
                }
                interpolate_models(simi, fvals, convals, models, step);

                continue;
            }

            // Trust-region step on the linear models.
            conpole.copy_from(&convals.column(n));
            trust_region_step(models, conpole, delta, anorm, bhat, atd, ws, d, step);

            let dnorm = d.norm();
            let pred_f = -models.column(m).dot(d);
            let cv_lin = model_violation(models, convals, d, one);
            let pred_cv = cviols[n] - cv_lin;
            let dcv = pred_cv.max(zero);

            // Increase the penalty until the predicted merit reduction is
            // safely positive.
            if pred_f < zero && dcv > zero {
                let barmu = -pred_f / dcv;

                if sigma < convert::<_, F::Field>(1.5) * barmu {
                    sigma = (barmu + barmu).max(sigma);
                    debug!("increase penalty to {}", sigma);

                    let mut best = n;
                    for k in 0..n {
                        let merit_k = fvals[k] + sigma * cviols[k];
                        let merit_best = fvals[best] + sigma * cviols[best];
                        if merit_k < merit_best
                            || (merit_k == merit_best && cviols[k] < cviols[best])
                        {
                            best = k;
                        }
                    }
                    if best != n {
                        swap_pole(vertices, fvals, convals, cviols, sim, simi, best);
                        interpolate_models(simi, fvals, convals, models, step);
                        continue;
                    }
                }
            }

            let pred = pred_f + sigma * pred_cv;

            if dnorm < half * rho {
                // The models promise nothing within the trust region;
                // either the inner radius is still slack or the outer one
                // has to go down.
                if delta > rho {
                    delta = (gamma1 * delta).max(rho);
                    debug!("short step, shrink delta to {}", delta);
                    continue;
                }

                if rho <= rhoend {
                    break Status::SmallTrustRadius;
                }

                let rho_old = rho;
                rho = (gamma1 * rho).max(rhoend);
                if rho <= convert::<_, F::Field>(1.5) * rhoend {
                    rho = rhoend;
                }
                delta = (half * delta).max(rho);
                debug!("shrink rho from {} to {}", rho_old, rho);
                continue;
            }

            if pred <= zero {
                break Status::TrustStepFailed;
            }

            vertices.column(n).add_to(d, xnew);

            if xnew.iter().any(|xi| !xi.is_finite()) {
                break Status::NanX;
            }
            if xnew
                .iter()
                .zip(vertices.column(n).iter())
                .all(|(new, old)| new == old)
            {
                break Status::RoundingStalled;
            }
            if evaluator.nf() >= maxfun {
                break Status::MaxFunReached;
            }

            let (fnew, cvnew) = evaluator.evaluate(f, xnew, connew);

            if !fnew.is_finite() {
                break Status::NanInfF;
            }
            if fnew <= ftarget && cvnew <= ctol {
                break Status::TargetAchieved;
            }

            let ared = (fvals[n] + sigma * cviols[n]) - (fnew + sigma * cvnew);
            let ratio = ared / pred;
            let improved = ared > zero || (ared == zero && cvnew < cviols[n]);

            debug!(
                "trust step of length {}: ared = {}, pred = {}, ratio = {}",
                dnorm, ared, pred, ratio
            );

            // Choose the vertex to replace: prefer restoring simplex
            // volume, weighted by the distance of the vertex from the
            // incumbent. A failed step replaces a vertex only when this
            // improves the geometry.
            simi.mul_to(d, step);
            let mut jdrop = None;
            let mut score_max = if improved { zero } else { one };

            for p in 0..n {
                let dist = sim.column(p).norm();
                let weight = (dist / delta).powi(2).max(one);
                let score = step[p].abs() * weight;

                if score > score_max {
                    score_max = score;
                    jdrop = Some(p);
                }
            }

            if let Some(jdrop) = jdrop {
                if let Err(failure) = replace_vertex(
                    vertices, fvals, convals, cviols, sim, simi, jdrop, xnew, fnew, connew, cvnew,
                ) {
                    break failure;
                }
                if improved {
                    swap_pole(vertices, fvals, convals, cviols, sim, simi, jdrop);
                }
                interpolate_models(simi, fvals, convals, models, step);
            } else {
                debug!("discard trial point, no replacement benefits the simplex");
            }

            let delta_old = delta;
            let at_floor = delta <= rho;

            if ratio < eta1 {
                delta = gamma1 * delta;
            } else if ratio > eta2 {
                delta = gamma2 * delta;
            }
            delta = delta.max(rho).min(rhobeg);

            if delta != delta_old {
                debug!("update delta from {} to {}", delta_old, delta);
            }

            // A failed full-length step with the inner radius already at
            // its floor and a healthy simplex means the current resolution
            // is exhausted.
            if !improved && at_floor && simplex_acceptable(sim, simi, rho) {
                if rho <= rhoend {
                    break Status::SmallTrustRadius;
                }

                let rho_old = rho;
                rho = (gamma1 * rho).max(rhoend);
                if rho <= convert::<_, F::Field>(1.5) * rhoend {
                    rho = rhoend;
                }
                delta = (half * delta).max(rho);
                debug!("shrink rho from {} to {}", rho_old, rho);
            }
        };

        Ok(conclude(evaluator, status, x, m_user))
    }
}

/// Builds the outcome from whatever the evaluator has seen, writing the
/// best point back into the caller's vector.
fn conclude<T, Sx>(
    evaluator: Evaluator<T>,
    status: Status,
    x: &mut Vector<T, Dyn, Sx>,
    m_user: usize,
) -> Optimum<T>
where
    T: RealField + Copy,
    Sx: StorageMut<T, Dyn>,
{
    let (best, history, nf) = evaluator.into_parts();
    debug!("finished: {} (nf = {})", status, nf);

    match best {
        Some((bx, bf, bconstr, bcv)) => {
            x.copy_from(&bx);

            Optimum {
                x: bx,
                f: bf,
                constr: bconstr,
                cstrv: bcv,
                nf,
                status,
                history,
            }
        }
        None => {
            let nan: T = convert(f64::NAN);

            Optimum {
                x: x.clone_owned(),
                f: nan,
                constr: OVector::from_element_generic(Dyn(m_user), U1::name(), nan),
                cstrv: nan,
                nf,
                status,
                history,
            }
        }
    }
}

/// Rebuilds the model gradients from the simplex: the gradient of each
/// linear model is the transposed inverse edge matrix applied to the value
/// differences, so every model interpolates all vertices by construction.
///
/// Columns `0..m` of `models` receive the constraint gradients, column `m`
/// the objective gradient. `w` is scratch of length `n`.
fn interpolate_models<T: RealField + Copy>(
    simi: &OMatrix<T, Dyn, Dyn>,
    fvals: &OVector<T, Dyn>,
    convals: &OMatrix<T, Dyn, Dyn>,
    models: &mut OMatrix<T, Dyn, Dyn>,
    w: &mut OVector<T, Dyn>,
) {
    let n = simi.nrows();
    let m = convals.nrows();

    for j in 0..m {
        for p in 0..n {
            w[p] = convals[(j, p)] - convals[(j, n)];
        }
        let gradient = simi.tr_mul(w);
        models.set_column(j, &gradient);
    }

    for p in 0..n {
        w[p] = fvals[p] - fvals[n];
    }
    let gradient = simi.tr_mul(w);
    models.set_column(m, &gradient);
}

/// Whether every vertex keeps the simplex well conditioned at the current
/// resolution: none too close to its opposite face, none too far from the
/// incumbent.
fn simplex_acceptable<T: RealField + Copy>(
    sim: &OMatrix<T, Dyn, Dyn>,
    simi: &OMatrix<T, Dyn, Dyn>,
    rho: T,
) -> bool {
    let n = sim.nrows();
    let parsig = convert::<_, T>(FLATNESS) * rho;
    let pareta = convert::<_, T>(STRETCH) * rho;

    (0..n).all(|p| {
        let veta = sim.column(p).norm();
        let row_norm = simi.row(p).norm();
        let vsig = if row_norm > T::zero() {
            T::one() / row_norm
        } else {
            T::zero()
        };

        vsig >= parsig && veta <= pareta
    })
}

/// Picks the vertex whose replacement most improves the simplex: the
/// farthest one if any is too far, otherwise the one closest to its
/// opposite face.
fn worst_vertex<T: RealField + Copy>(
    sim: &OMatrix<T, Dyn, Dyn>,
    simi: &OMatrix<T, Dyn, Dyn>,
    rho: T,
) -> usize {
    let n = sim.nrows();
    let pareta = convert::<_, T>(STRETCH) * rho;

    let mut jmax = 0;
    let mut veta_max = T::zero();
    for p in 0..n {
        let veta = sim.column(p).norm();
        if veta > veta_max {
            veta_max = veta;
            jmax = p;
        }
    }

    if veta_max > pareta {
        return jmax;
    }

    let mut jmin = 0;
    let mut row_max = T::zero();
    for p in 0..n {
        let row_norm = simi.row(p).norm();
        if row_norm > row_max {
            row_max = row_norm;
            jmin = p;
        }
    }

    jmin
}

/// Direction of length `length` perpendicular to the face opposite to
/// vertex `jdrop`, along which the re-interpolated vertex restores the
/// simplex height.
fn geometry_direction<T: RealField + Copy>(
    simi: &OMatrix<T, Dyn, Dyn>,
    jdrop: usize,
    length: T,
    d: &mut OVector<T, Dyn>,
) {
    let row = simi.row(jdrop);
    let norm = row.norm();

    if norm == T::zero() {
        d.fill(T::zero());
        d[jdrop] = length;
        return;
    }

    for (i, value) in row.iter().enumerate() {
        d[i] = *value / norm * length;
    }
}

/// Merit of the linear models at the step `sign * d` from the incumbent.
fn model_merit<T: RealField + Copy>(
    models: &OMatrix<T, Dyn, Dyn>,
    convals: &OMatrix<T, Dyn, Dyn>,
    d: &OVector<T, Dyn>,
    sigma: T,
    sign: T,
) -> T {
    let m = convals.nrows();
    let objective = sign * models.column(m).dot(d);

    objective + sigma * model_violation(models, convals, d, sign)
}

/// Violation of the linearized constraints at the step `sign * d` from the
/// incumbent.
fn model_violation<T: RealField + Copy>(
    models: &OMatrix<T, Dyn, Dyn>,
    convals: &OMatrix<T, Dyn, Dyn>,
    d: &OVector<T, Dyn>,
    sign: T,
) -> T {
    let pole = convals.ncols() - 1;
    let m = convals.nrows();
    let mut worst = T::zero();

    for j in 0..m {
        let value = convals[(j, pole)] + sign * models.column(j).dot(d);
        worst = worst.max(-value);
    }

    worst
}

/// Replaces vertex `jdrop` with the new point, updating the inverse edge
/// matrix by a rank-one correction whose denominator is the pivot of the
/// replacement. A vanished denominator or an inconsistent inverse stops
/// the run.
#[allow(clippy::too_many_arguments)]
fn replace_vertex<T: RealField + Copy>(
    vertices: &mut OMatrix<T, Dyn, Dyn>,
    fvals: &mut OVector<T, Dyn>,
    convals: &mut OMatrix<T, Dyn, Dyn>,
    cviols: &mut OVector<T, Dyn>,
    sim: &mut OMatrix<T, Dyn, Dyn>,
    simi: &mut OMatrix<T, Dyn, Dyn>,
    jdrop: usize,
    xnew: &OVector<T, Dyn>,
    fnew: T,
    connew: &OVector<T, Dyn>,
    cvnew: T,
) -> Result<(), Status> {
    let n = vertices.nrows();
    let edge = xnew - vertices.column(n);
    debug_assert!(jdrop < n);
    let u = &*simi * &edge;
    let denominator = u[jdrop];

    vertices.set_column(jdrop, xnew);
    fvals[jdrop] = fnew;
    convals.set_column(jdrop, connew);
    cviols[jdrop] = cvnew;
    sim.set_column(jdrop, &edge);

    if denominator.abs() > T::EPSILON_SQRT {
        let row = simi.row(jdrop).clone_owned();
        let mut v = u;
        v[jdrop] -= T::one();
        *simi -= (v * row) / denominator;
    } else if !recompute_inverse(sim, simi) {
        return Err(Status::ZeroDenominator);
    }

    if inverse_error(sim, simi) > convert(0.1) {
        debug!("inverse of the edge matrix drifted, recomputing");

        if !recompute_inverse(sim, simi) || inverse_error(sim, simi) > convert(0.1) {
            return Err(Status::DamagingRounding);
        }
    }

    Ok(())
}

fn recompute_inverse<T: RealField + Copy>(
    sim: &OMatrix<T, Dyn, Dyn>,
    simi: &mut OMatrix<T, Dyn, Dyn>,
) -> bool {
    match sim.clone_owned().lu().try_inverse() {
        Some(inverse) => {
            simi.copy_from(&inverse);
            true
        }
        None => false,
    }
}

/// Largest entry of `simi * sim - I`, the measure of rounding damage in
/// the interpolation bookkeeping.
fn inverse_error<T: RealField + Copy>(
    sim: &OMatrix<T, Dyn, Dyn>,
    simi: &OMatrix<T, Dyn, Dyn>,
) -> T {
    let n = sim.nrows();
    let product = simi * sim;
    let mut worst = T::zero();

    for i in 0..n {
        for j in 0..n {
            let target = if i == j { T::one() } else { T::zero() };
            worst = worst.max((product[(i, j)] - target).abs());
        }
    }

    worst
}

/// Makes vertex `q` the incumbent. The edge matrix transform is its own
/// inverse, so the inverse update costs one row: the new row `q` is the
/// negated column sums of the old inverse.
fn swap_pole<T: RealField + Copy>(
    vertices: &mut OMatrix<T, Dyn, Dyn>,
    fvals: &mut OVector<T, Dyn>,
    convals: &mut OMatrix<T, Dyn, Dyn>,
    cviols: &mut OVector<T, Dyn>,
    sim: &mut OMatrix<T, Dyn, Dyn>,
    simi: &mut OMatrix<T, Dyn, Dyn>,
    q: usize,
) {
    let n = sim.nrows();

    for j in 0..n {
        let mut sum = T::zero();
        for i in 0..n {
            sum += simi[(i, j)];
        }
        simi[(q, j)] = -sum;
    }

    let sq = sim.column(q).clone_owned();
    for p in 0..n {
        if p != q {
            for i in 0..n {
                sim[(i, p)] -= sq[i];
            }
        }
    }
    for i in 0..n {
        sim[(i, q)] = -sq[i];
    }

    vertices.swap_columns(q, n);
    fvals.swap_rows(q, n);
    convals.swap_columns(q, n);
    cviols.swap_rows(q, n);
}

/// Approximately solves `min a^T d` subject to the linearized constraints
/// and `|| d || <= delta`.
///
/// The first phase reduces the infeasibility of the linearized constraints
/// by steepest-descent steps on the squared-violation sum, confined to 80%
/// of the trust region. The second phase descends on the objective model
/// under the working set, with step lengths clipped to the trust-region
/// boundary and to the nearest constraint boundary.
#[allow(clippy::too_many_arguments)]
fn trust_region_step<T: RealField + Copy>(
    models: &OMatrix<T, Dyn, Dyn>,
    con: &OVector<T, Dyn>,
    delta: T,
    anorm: &mut OMatrix<T, Dyn, Dyn>,
    bhat: &mut OVector<T, Dyn>,
    atd: &mut OVector<T, Dyn>,
    ws: &mut WorkingSet<T>,
    d: &mut OVector<T, Dyn>,
    step: &mut OVector<T, Dyn>,
) {
    let n = models.nrows();
    let m = con.nrows();
    let zero = T::zero();
    let one = T::one();

    d.fill(zero);

    // Normalized system: each usable constraint becomes a unit row
    // `a^T d <= b`. Models with a vanished gradient cannot restrict the
    // direction and are parked behind a huge slack.
    for j in 0..m {
        let gradient = models.column(j);
        let norm = gradient.norm();

        if norm > T::TINY {
            for i in 0..n {
                anorm[(i, j)] = -gradient[i] / norm;
            }
            bhat[j] = con[j] / norm;
        } else {
            for i in 0..n {
                anorm[(i, j)] = zero;
            }
            bhat[j] = T::HUGE;
        }
    }

    // Phase one: a Byrd-Omojokun style normal step towards the linearized
    // feasible set.
    let normal_radius = convert::<_, T>(0.8) * delta;

    if (0..m).any(|j| bhat[j] < zero) {
        for _ in 0..n + m {
            step.fill(zero);
            let mut infeasible = false;

            for j in 0..m {
                let violation = anorm.column(j).dot(d) - bhat[j];

                if violation > zero {
                    infeasible = true;
                    step.axpy(violation, &anorm.column(j), one);
                }
            }

            if !infeasible || step.norm_squared() <= T::TINY {
                break;
            }

            step.neg_mut();

            let alpha = violation_line_search(anorm, bhat, d, step, normal_radius);
            if alpha <= zero {
                break;
            }

            d.axpy(alpha, step, one);

            if d.norm_squared() >= normal_radius * normal_radius * (one - T::EPSILON_SQRT) {
                break;
            }
        }
    }

    // Phase two: projected descent on the objective model under the
    // working set, warm-started across the sub-steps.
    for j in 0..m {
        atd[j] = bhat[j] - anorm.column(j).dot(d);
    }
    ws.restart(atd);

    let objective = models.column(m).clone_owned();

    for _ in 0..m + 2 {
        let dd = d.norm_squared();
        let dnorm = dd.sqrt();
        let remaining = delta - dnorm;

        if remaining <= T::EPSILON_SQRT * delta {
            break;
        }

        ws.descent_direction(&*anorm, &objective, remaining, step);

        let ss = step.norm_squared();
        if ss == zero {
            break;
        }

        anorm.tr_mul_to(step, atd);

        // The step runs to the trust-region boundary unless an inactive
        // constraint is hit first.
        let ds = d.dot(step);
        let discriminant = (ds * ds + ss * (delta * delta - dd)).max(zero);
        let alpha_ball = (-ds + discriminant.sqrt()) / ss;

        let mut alpha = alpha_ball;
        for j in 0..m {
            let slack = ws.slack(j);
            if slack > zero && atd[j] > zero {
                alpha = alpha.min(slack / atd[j]);
            }
        }

        if alpha <= zero {
            break;
        }

        d.axpy(alpha, step, one);
        ws.update_slacks(atd, alpha);

        if alpha >= alpha_ball {
            break;
        }
    }
}

/// Exact minimizer of the squared-violation sum along `h` from `d`,
/// truncated at the ball of the given radius.
///
/// The function is piecewise quadratic and convex in the step length; its
/// derivative is walked across the breakpoints where constraints enter or
/// leave the violated set.
fn violation_line_search<T: RealField + Copy>(
    anorm: &OMatrix<T, Dyn, Dyn>,
    bhat: &OVector<T, Dyn>,
    d: &OVector<T, Dyn>,
    h: &OVector<T, Dyn>,
    radius: T,
) -> T {
    let m = bhat.nrows();
    let zero = T::zero();

    let hh = h.norm_squared();
    if hh == zero {
        return zero;
    }

    let dh = d.dot(h);
    let discriminant = (dh * dh + hh * (radius * radius - d.norm_squared())).max(zero);
    let alpha_ball = (-dh + discriminant.sqrt()) / hh;

    if alpha_ball <= zero {
        return zero;
    }

    // Derivative of the squared-violation sum along h is c0 + alpha * c1
    // within each segment between breakpoints.
    let mut c0 = zero;
    let mut c1 = zero;
    let mut events: Vec<(T, T, T)> = Vec::new();

    for j in 0..m {
        let violation = anorm.column(j).dot(d) - bhat[j];
        let rate = anorm.column(j).dot(h);

        if violation > zero || (violation == zero && rate > zero) {
            c0 += violation * rate;
            c1 += rate * rate;
        }

        if rate != zero {
            let crossing = -violation / rate;

            if crossing > zero && crossing < alpha_ball {
                events.push((crossing, violation, rate));
            }
        }
    }

    if c0 >= zero {
        return zero;
    }

    events.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    for (crossing, violation, rate) in events {
        if c1 > zero {
            let root = -c0 / c1;

            if root <= crossing {
                return root.min(alpha_ball);
            }
        }

        // The constraint enters the violated set when its residual grows
        // along h, leaves it otherwise.
        if rate > zero {
            c0 += violation * rate;
            c1 += rate * rate;
        } else {
            c0 -= violation * rate;
            c1 -= rate * rate;
        }
    }

    if c1 > zero {
        let root = -c0 / c1;

        if root < alpha_ball {
            return root;
        }
    }

    alpha_ball
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::{dvector, DMatrix, DVector};

    use crate::core::Function;
    use crate::testing::*;

    fn run<F: Constrained<Field = f64>>(
        f: &F,
        x0: Vec<f64>,
        options: CobylaOptions<F>,
    ) -> Optimum<f64> {
        let dom = f.domain();
        let mut solver = Cobyla::with_options(f, &dom, options);
        let mut x = DVector::from_vec(x0);

        solver.minimize(f, &dom, &mut x).unwrap()
    }

    #[test]
    fn rosenbrock_unconstrained() {
        let f = ExtendedRosenbrock::new(2);

        let mut options = CobylaOptions::default();
        options.set_rhobeg(0.5).set_rhoend(1e-6);

        let optimum = run(&f, vec![-1.2, 1.0], options);

        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        assert!((optimum.x()[0] - 1.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!((optimum.x()[1] - 1.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!(optimum.f() <= 1e-6, "f = {}", optimum.f());
        assert_eq!(optimum.cstrv(), 0.0);
    }

    #[test]
    fn rosenbrock_with_tight_radius() {
        // Tightening the final radius buys the extra digits: the terminal
        // accuracy of the interpolated gradient scales with the radius.
        let f = ExtendedRosenbrock::new(2);

        let mut options = CobylaOptions::default();
        options.set_rhobeg(0.5).set_rhoend(1e-8).set_maxfun(5000);

        let optimum = run(&f, vec![-1.2, 1.0], options);

        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        assert!((optimum.x()[0] - 1.0).abs() <= 1e-4, "x = {:?}", optimum.x());
        assert!((optimum.x()[1] - 1.0).abs() <= 1e-4, "x = {:?}", optimum.x());
        assert!(optimum.f() <= 1e-8, "f = {}", optimum.f());
    }

    #[test]
    fn linear_objective_on_unit_disc() {
        let f = UnitDisc;

        let mut options = CobylaOptions::default();
        options.set_rhobeg(0.5).set_rhoend(1e-6).set_ctol(1e-6);

        let optimum = run(&f, vec![0.0, 0.0], options);

        let root_half = 0.5f64.sqrt();
        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        approx::assert_abs_diff_eq!(optimum.x()[0], root_half, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(optimum.x()[1], root_half, epsilon = 1e-3);
        approx::assert_abs_diff_eq!(optimum.f(), -(2f64.sqrt()), epsilon = 1e-3);
        assert!(optimum.cstrv() <= 1e-6, "cstrv = {}", optimum.cstrv());
    }

    #[test]
    fn infeasible_start_recovers() {
        let f = OffsetCorner;

        let mut options = CobylaOptions::default();
        options.set_ctol(1e-6);

        let optimum = run(&f, vec![0.0, 0.0], options);

        assert!((optimum.x()[0] - 2.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!((optimum.x()[1] - 2.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!(optimum.cstrv() <= 1e-6, "cstrv = {}", optimum.cstrv());
    }

    #[test]
    fn nan_on_third_evaluation_returns_earlier_incumbent() {
        let f = NanAfter::new(Sphere::new(2), 2);

        let optimum = run(&f, vec![10.0, -10.0], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::NanInfF);
        assert_eq!(optimum.nf(), 3);
        // The incumbent after two evaluations is the starting point; the
        // second vertex sits farther from the origin.
        assert_eq!(optimum.x(), &[10.0, -10.0]);
        assert_eq!(optimum.f(), 200.0);
    }

    #[test]
    fn nan_on_first_evaluation() {
        let f = NanAfter::new(Sphere::new(2), 0);

        let optimum = run(&f, vec![1.0, 1.0], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::NanInfF);
        assert_eq!(optimum.nf(), 1);
    }

    #[test]
    fn nan_in_initial_point() {
        let f = Sphere::new(2);

        let optimum = run(&f, vec![f64::NAN, 0.0], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::NanX);
        assert_eq!(optimum.nf(), 0);
    }

    #[test]
    fn unconstrained_reduction() {
        // With m = 0 the solver must behave as plain linear-model
        // minimization with zero violation everywhere.
        let f = Sphere::new(3);

        let optimum = run(&f, vec![5.0, -3.0, 2.0], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        assert_eq!(optimum.cstrv(), 0.0);
        assert!(optimum.f() <= 1e-6, "f = {}", optimum.f());
        assert!(optimum.constr().is_empty());
    }

    #[test]
    fn one_dimensional_simplex_is_an_interval() {
        let f = Sphere::new(1);

        let optimum = run(&f, vec![3.0], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        assert!(optimum.x()[0].abs() <= 1e-3, "x = {:?}", optimum.x());
    }

    #[test]
    fn rhoend_above_rhobeg_is_clamped() {
        let f = Sphere::new(2);

        let mut options = CobylaOptions::default();
        options.set_rhobeg(0.5).set_rhoend(1.0);

        let optimum = run(&f, vec![1.0, 1.0], options);

        // The radii collapse to a single value, so the run stops at the
        // first exhausted resolution.
        assert_eq!(optimum.status(), Status::SmallTrustRadius);
    }

    #[test]
    fn budget_is_never_exceeded() {
        let f = ExtendedRosenbrock::new(2);

        let mut options = CobylaOptions::default();
        options.set_maxfun(10);

        let optimum = run(&f, vec![-1.2, 1.0], options);

        assert_eq!(optimum.status(), Status::MaxFunReached);
        assert_eq!(optimum.nf(), 10);
    }

    #[test]
    fn target_value_stops_the_run() {
        let f = Sphere::new(2);

        let mut options = CobylaOptions::default();
        options.set_ftarget(1.0);

        let optimum = run(&f, vec![10.0, -10.0], options);

        assert_eq!(optimum.status(), Status::TargetAchieved);
        assert!(optimum.f() <= 1.0);
    }

    #[test]
    fn finite_bounds_act_as_constraints() {
        struct BoundedSphere;

        impl Problem for BoundedSphere {
            type Field = f64;

            fn domain(&self) -> Domain<f64> {
                Domain::rect(vec![1.0, 1.0], vec![10.0, 10.0])
            }
        }

        impl Function for BoundedSphere {
            fn apply<Sx>(&self, x: &Vector<f64, Dyn, Sx>) -> f64
            where
                Sx: nalgebra::storage::Storage<f64, Dyn> + IsContiguous,
            {
                x[0] * x[0] + x[1] * x[1]
            }
        }

        let f = BoundedSphere;
        let optimum = run(&f, vec![5.0, 5.0], CobylaOptions::default());

        assert!((optimum.x()[0] - 1.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!((optimum.x()[1] - 1.0).abs() <= 1e-3, "x = {:?}", optimum.x());
        assert!(optimum.cstrv() <= 1e-6, "cstrv = {}", optimum.cstrv());
    }

    #[test]
    fn narrow_bound_gap_aborts_before_evaluating() {
        struct NarrowBox;

        impl Problem for NarrowBox {
            type Field = f64;

            fn domain(&self) -> Domain<f64> {
                Domain::rect(vec![0.0, 0.0], vec![10.0, 0.5])
            }
        }

        impl Function for NarrowBox {
            fn apply<Sx>(&self, x: &Vector<f64, Dyn, Sx>) -> f64
            where
                Sx: nalgebra::storage::Storage<f64, Dyn> + IsContiguous,
            {
                x[0] + x[1]
            }
        }

        let f = NarrowBox;
        let optimum = run(&f, vec![5.0, 0.2], CobylaOptions::default());

        assert_eq!(optimum.status(), Status::BoundGapTooSmall);
        assert_eq!(optimum.nf(), 0);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let f = ExtendedRosenbrock::new(2);

        let first = run(&f, vec![-1.2, 1.0], CobylaOptions::default());
        let second = run(&f, vec![-1.2, 1.0], CobylaOptions::default());

        assert_eq!(first.x(), second.x());
        assert_eq!(first.f(), second.f());
        assert_eq!(first.nf(), second.nf());
        assert_eq!(first.status(), second.status());
    }

    #[test]
    fn history_is_trimmed_to_capacity() {
        let f = Sphere::new(2);

        let mut options = CobylaOptions::default();
        options.set_history(true).set_maxhist(5);

        let optimum = run(&f, vec![10.0, -10.0], options);

        let history = optimum.history().unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.x().ncols(), 5);
        assert_eq!(history.f().nrows(), 5);
    }

    #[test]
    fn history_is_absent_by_default() {
        let f = Sphere::new(2);

        let optimum = run(&f, vec![1.0, 1.0], CobylaOptions::default());

        assert!(optimum.history().is_none());
    }

    #[test]
    fn invalid_radius_is_an_error() {
        let f = Sphere::new(2);
        let dom = f.domain();

        let mut options = CobylaOptions::<Sphere>::default();
        options.set_rhobeg(-1.0);

        let mut solver = Cobyla::with_options(&f, &dom, options);
        let mut x = dvector![1.0, 1.0];

        assert!(matches!(
            solver.minimize(&f, &dom, &mut x),
            Err(CobylaError::InvalidRadius)
        ));
    }

    #[test]
    fn dimension_mismatch_is_an_error() {
        let f = Sphere::new(3);
        let dom = f.domain();

        let mut solver = Cobyla::new(&f, &dom);
        let mut x = dvector![1.0, 1.0];

        assert!(matches!(
            solver.minimize(&f, &dom, &mut x),
            Err(CobylaError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn models_interpolate_all_vertices() {
        // Invariant of the interpolation: the linear models built from the
        // inverse edge matrix reproduce the observed values at every
        // vertex.
        let n = 3;
        let m = 2;

        let vertices = DMatrix::from_column_slice(
            n,
            n + 1,
            &[
                1.0, 0.2, -0.3, //
                0.1, 1.4, 0.5, //
                -0.2, 0.3, 1.1, //
                0.0, 0.1, 0.2, //
            ],
        );
        let fvals = dvector![3.0, -1.0, 2.5, 0.7];
        let convals =
            DMatrix::from_column_slice(m, n + 1, &[1.0, 2.0, -0.5, 0.3, 0.8, -1.2, 0.1, 0.4]);

        let mut sim = DMatrix::zeros(n, n);
        for p in 0..n {
            let edge = vertices.column(p) - vertices.column(n);
            sim.set_column(p, &edge);
        }
        let simi = sim.clone().try_inverse().unwrap();

        let mut models = DMatrix::zeros(n, m + 1);
        let mut scratch = DVector::zeros(n);
        interpolate_models(&simi, &fvals, &convals, &mut models, &mut scratch);

        for p in 0..n {
            let edge = sim.column(p);

            let predicted_f = fvals[n] + models.column(m).dot(&edge);
            assert!((predicted_f - fvals[p]).abs() <= 1e-12);

            for j in 0..m {
                let predicted_c = convals[(j, n)] + models.column(j).dot(&edge);
                assert!((predicted_c - convals[(j, p)]).abs() <= 1e-12);
            }
        }
    }

    #[test]
    fn pole_swap_preserves_the_inverse() {
        let n = 3;

        let vertices = DMatrix::from_column_slice(
            n,
            n + 1,
            &[
                1.0, 0.2, -0.3, //
                0.1, 1.4, 0.5, //
                -0.2, 0.3, 1.1, //
                0.0, 0.1, 0.2, //
            ],
        );
        let mut verts = vertices;
        let mut fvals = dvector![3.0, -1.0, 2.5, 0.7];
        let mut convals = DMatrix::<f64>::zeros(0, n + 1);
        let mut cviols = dvector![0.0, 0.0, 0.0, 0.0];

        let mut sim = DMatrix::zeros(n, n);
        for p in 0..n {
            let edge = verts.column(p) - verts.column(n);
            sim.set_column(p, &edge);
        }
        let mut simi = sim.clone().try_inverse().unwrap();

        swap_pole(
            &mut verts,
            &mut fvals,
            &mut convals,
            &mut cviols,
            &mut sim,
            &mut simi,
            1,
        );

        // The rank-one bookkeeping must agree with the geometry rebuilt
        // from scratch.
        for p in 0..n {
            let edge = verts.column(p) - verts.column(n);
            assert!((sim.column(p) - edge).norm() <= 1e-12);
        }
        assert!(inverse_error(&sim, &simi) <= 1e-10);
        assert_eq!(fvals[n], -1.0);
    }

    #[test]
    fn vertex_replacement_keeps_the_inverse_consistent() {
        let n = 3;

        let mut verts = DMatrix::from_column_slice(
            n,
            n + 1,
            &[
                1.0, 0.2, -0.3, //
                0.1, 1.4, 0.5, //
                -0.2, 0.3, 1.1, //
                0.0, 0.1, 0.2, //
            ],
        );
        let mut fvals = dvector![3.0, -1.0, 2.5, 0.7];
        let mut convals = DMatrix::<f64>::zeros(0, n + 1);
        let mut cviols = dvector![0.0, 0.0, 0.0, 0.0];

        let mut sim = DMatrix::zeros(n, n);
        for p in 0..n {
            let edge = verts.column(p) - verts.column(n);
            sim.set_column(p, &edge);
        }
        let mut simi = sim.clone().try_inverse().unwrap();

        let xnew = dvector![0.4, -0.6, 0.9];
        let connew = DVector::zeros(0);

        replace_vertex(
            &mut verts,
            &mut fvals,
            &mut convals,
            &mut cviols,
            &mut sim,
            &mut simi,
            2,
            &xnew,
            1.5,
            &connew,
            0.0,
        )
        .unwrap();

        assert_eq!(verts.column(2).clone_owned(), xnew);
        assert_eq!(fvals[2], 1.5);
        assert!(inverse_error(&sim, &simi) <= 1e-10);
    }
}
