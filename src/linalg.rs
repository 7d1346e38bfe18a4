//! Dense linear-algebra kernels shared by the solvers.
//!
//! The centerpiece is the incremental QR factorization behind the
//! active-set engine: [`qr_add`] appends a column to the factored matrix
//! and [`qr_exchange`] cyclically shifts an inner column to the last
//! position, both by plane rotations in place. The predicates at the end
//! back debug assertions and tests.

use nalgebra::{storage::Storage, Dyn, OMatrix, RealField, Vector};

/// Computes a plane (Givens) rotation for the pair `(a, b)`.
///
/// Returns `(c, s, r)` such that `c * a + s * b = r`, `-s * a + c * b = 0`
/// and `r = hypot(a, b) >= 0`. The degenerate pair `(0, 0)` yields the
/// identity rotation.
pub fn plane_rotation<T: RealField + Copy>(a: T, b: T) -> (T, T, T) {
    let r = a.hypot(b);

    if r == T::zero() {
        (T::one(), T::zero(), r)
    } else {
        (a / r, b / r, r)
    }
}

/// Appends column `c` as the new `k`-th (zero-based) column of the factored
/// matrix.
///
/// Given orthogonal `q` and upper triangular `r` whose leading `k` columns
/// factor the current matrix as `q * r[:, 0..k]`, updates both in place so
/// that the new active column reproduces `c` and the diagonal entry
/// `r[(k, k)]` is nonnegative. The caller increments its active counter.
///
/// There are no failure modes here; appending a column that is (numerically)
/// inside the active span leaves a diagonal entry below machine precision,
/// which downstream consumers tolerate.
pub fn qr_add<T, S>(
    q: &mut OMatrix<T, Dyn, Dyn>,
    r: &mut OMatrix<T, Dyn, Dyn>,
    c: &Vector<T, Dyn, S>,
    k: usize,
) where
    T: RealField + Copy,
    S: Storage<T, Dyn>,
{
    let n = q.nrows();
    let mut y = q.tr_mul(c);

    // Zero the tail of y by rotations on adjacent pairs. Rotating the
    // entries of y = Q^T c corresponds to rotating the columns of Q. The
    // existing columns of R are untouched because they vanish below row k.
    for i in (k + 1..n).rev() {
        if y[i] != T::zero() {
            let (cos, sin, rad) = plane_rotation(y[i - 1], y[i]);
            y[i - 1] = rad;
            y[i] = T::zero();
            rotate_columns(q, i - 1, i, cos, sin);
        }
    }

    for i in 0..=k {
        r[(i, k)] = y[i];
    }

    if r[(k, k)] < T::zero() {
        r[(k, k)] = -r[(k, k)];
        negate_column(q, k);
    }
}

/// Cyclically shifts the `ic`-th of the `nact` active columns to the last
/// active position.
///
/// Performed as a sequence of adjacent swaps, each restored to upper
/// triangular form by a single plane rotation. Orthogonality of `q` and the
/// positive active diagonal of `r` are preserved. A no-op when
/// `ic == nact - 1`.
pub fn qr_exchange<T: RealField + Copy>(
    q: &mut OMatrix<T, Dyn, Dyn>,
    r: &mut OMatrix<T, Dyn, Dyn>,
    ic: usize,
    nact: usize,
) {
    for j in ic..nact - 1 {
        // After the swap the only offending entry is the subdiagonal one at
        // (j + 1, j).
        r.swap_columns(j, j + 1);

        let (cos, sin, rad) = plane_rotation(r[(j, j)], r[(j + 1, j)]);
        r[(j, j)] = rad;
        r[(j + 1, j)] = T::zero();

        for col in j + 1..nact {
            let a = r[(j, col)];
            let b = r[(j + 1, col)];
            r[(j, col)] = cos * a + sin * b;
            r[(j + 1, col)] = cos * b - sin * a;
        }

        rotate_columns(q, j, j + 1, cos, sin);

        if r[(j + 1, j + 1)] < T::zero() {
            for col in j + 1..nact {
                r[(j + 1, col)] = -r[(j + 1, col)];
            }
            negate_column(q, j + 1);
        }
    }
}

/// Applies the rotation `(cos, sin)` to columns `i` and `j` of `m` from the
/// right.
fn rotate_columns<T: RealField + Copy>(
    m: &mut OMatrix<T, Dyn, Dyn>,
    i: usize,
    j: usize,
    cos: T,
    sin: T,
) {
    for row in 0..m.nrows() {
        let a = m[(row, i)];
        let b = m[(row, j)];
        m[(row, i)] = cos * a + sin * b;
        m[(row, j)] = cos * b - sin * a;
    }
}

fn negate_column<T: RealField + Copy>(m: &mut OMatrix<T, Dyn, Dyn>, col: usize) {
    for row in 0..m.nrows() {
        m[(row, col)] = -m[(row, col)];
    }
}

/// Checks that the columns of `q` are orthonormal within `tol`.
pub fn is_orthogonal<T: RealField + Copy>(q: &OMatrix<T, Dyn, Dyn>, tol: T) -> bool {
    let n = q.ncols();

    for i in 0..n {
        for j in 0..=i {
            let dot = q.column(i).dot(&q.column(j));
            let target = if i == j { T::one() } else { T::zero() };

            if (dot - target).abs() > tol {
                return false;
            }
        }
    }

    true
}

/// Checks that the leading `ncols` columns of `r` are upper triangular
/// within `tol`.
pub fn is_upper_triangular<T: RealField + Copy>(
    r: &OMatrix<T, Dyn, Dyn>,
    ncols: usize,
    tol: T,
) -> bool {
    for j in 0..ncols {
        for i in j + 1..r.nrows() {
            if r[(i, j)].abs() > tol {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::{DMatrix, DVector};

    fn random_unit_column(rng: &mut fastrand::Rng, n: usize) -> DVector<f64> {
        let v = DVector::from_fn(n, |_, _| rng.f64() * 2.0 - 1.0);
        let norm = v.norm();
        v / norm
    }

    fn factored_product(q: &DMatrix<f64>, r: &DMatrix<f64>, k: usize) -> DMatrix<f64> {
        let n = q.nrows();
        q * r.view((0, 0), (n, k))
    }

    #[test]
    fn rotation_annihilates_second_entry() {
        let (c, s, r) = plane_rotation(3.0, 4.0);
        approx::assert_abs_diff_eq!(r, 5.0, epsilon = 1e-15);
        approx::assert_abs_diff_eq!(c * 3.0 + s * 4.0, r, epsilon = 1e-15);
        approx::assert_abs_diff_eq!(-s * 3.0 + c * 4.0, 0.0, epsilon = 1e-15);
    }

    #[test]
    fn rotation_of_zero_pair_is_identity() {
        let (c, s, r) = plane_rotation(0.0f64, 0.0);
        assert_eq!((c, s, r), (1.0, 0.0, 0.0));
    }

    #[test]
    fn add_reproduces_columns() {
        let mut rng = fastrand::Rng::with_seed(7);
        let n = 6;
        let k = 4;

        let mut q = DMatrix::<f64>::identity(n, n);
        let mut r = DMatrix::<f64>::zeros(n, n);
        let mut a = DMatrix::<f64>::zeros(n, k);

        for j in 0..k {
            let c = random_unit_column(&mut rng, n);
            a.set_column(j, &c);
            qr_add(&mut q, &mut r, &c, j);
        }

        let eps = 10.0 * f64::EPSILON * n as f64;
        assert!(is_orthogonal(&q, eps));
        assert!(is_upper_triangular(&r, k, 0.0));
        for j in 0..k {
            assert!(r[(j, j)] > 0.0);
        }

        let product = factored_product(&q, &r, k);
        assert!((product - a).norm() <= eps);
    }

    #[test]
    fn exchange_moves_column_to_last_position() {
        let mut rng = fastrand::Rng::with_seed(11);
        let n = 5;
        let k = 3;

        let mut q = DMatrix::<f64>::identity(n, n);
        let mut r = DMatrix::<f64>::zeros(n, n);
        let mut cols = Vec::new();

        for j in 0..k {
            let c = random_unit_column(&mut rng, n);
            cols.push(c.clone());
            qr_add(&mut q, &mut r, &c, j);
        }

        qr_exchange(&mut q, &mut r, 0, k);
        cols.rotate_left(1);

        let eps = 10.0 * f64::EPSILON * n as f64;
        assert!(is_orthogonal(&q, eps));
        assert!(is_upper_triangular(&r, k, 0.0));

        let product = factored_product(&q, &r, k);
        for j in 0..k {
            assert!((product.column(j) - &cols[j]).norm() <= eps);
        }
    }

    #[test]
    fn exchange_round_trip_restores_original() {
        // Cycling the first column to the back nact times is the identity
        // permutation; the factorization must come back to the original
        // matrix within rounding.
        let mut rng = fastrand::Rng::with_seed(23);

        for trial in 0..10 {
            let n = 3 + (trial % 4);
            let k = 2 + (trial % (n - 1));

            let mut q = DMatrix::<f64>::identity(n, n);
            let mut r = DMatrix::<f64>::zeros(n, n);
            let mut a = DMatrix::<f64>::zeros(n, k);

            for j in 0..k {
                let c = random_unit_column(&mut rng, n);
                a.set_column(j, &c);
                qr_add(&mut q, &mut r, &c, j);
            }

            for _ in 0..k {
                qr_exchange(&mut q, &mut r, 0, k);
            }

            let eps = 10.0 * f64::EPSILON * n as f64;
            assert!(is_orthogonal(&q, eps));
            assert!(is_upper_triangular(&r, k, 0.0));

            let product = factored_product(&q, &r, k);
            assert!(
                (product - &a).norm() <= eps,
                "round trip diverged for n = {}, k = {}",
                n,
                k
            );
        }
    }

    #[test]
    fn exchange_of_last_column_is_noop() {
        let mut rng = fastrand::Rng::with_seed(3);
        let n = 4;
        let k = 2;

        let mut q = DMatrix::<f64>::identity(n, n);
        let mut r = DMatrix::<f64>::zeros(n, n);

        for j in 0..k {
            let c = random_unit_column(&mut rng, n);
            qr_add(&mut q, &mut r, &c, j);
        }

        let q_before = q.clone();
        let r_before = r.clone();
        qr_exchange(&mut q, &mut r, k - 1, k);

        assert_eq!(q, q_before);
        assert_eq!(r, r_before);
    }
}
