//! Linear algebra helpers for covariance square roots and SPD solves.
//!
//! Public API:
//!     pub fn symmetrize()
//!     pub fn cholesky_lower()
//!     pub fn spd_solve()
//!     pub fn is_symmetric()
//!     pub fn is_finite()
//!     pub fn min_eigenvalue()
//!
//! All helpers work on statically sized nalgebra matrices. None of them repair a
//! covariance that has lost definiteness: a failed factorization is reported as
//! `None` and the caller decides whether that is fatal. Diagonal jitter and
//! eigenvalue flooring would hide filter divergence.

use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{Matrix5, Matrix6, SMatrix};

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes round-off asymmetry accumulated by floating point products.
///
/// # Arguments
/// * `m` - the square matrix to symmetrize
///
/// # Returns
/// A symmetrized copy of the input matrix.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    0.5 * (m + m.transpose())
}
/// Lower Cholesky factor L such that P = L Lᵀ, or None if P is not positive-definite.
///
/// # Arguments
/// * `p` - the symmetric matrix to factor
///
/// # Returns
/// The lower triangular factor, or `None` when the factorization fails.
pub fn cholesky_lower<const N: usize>(p: &SMatrix<f64, N, N>) -> Option<SMatrix<f64, N, N>> {
    if !is_finite(p) {
        return None;
    }
    Cholesky::new(*p).map(|ch| ch.l())
}
/// Solve A X = B for a symmetric 5×5 system (the innovation covariance).
///
/// Cholesky is attempted on the symmetrized matrix first. If A is symmetric but
/// indefinite the explicit inverse is used instead. Returns `None` when A is
/// singular or the solution is not finite.
pub fn spd_solve<const M: usize>(
    a: &Matrix5<f64>,
    b: &SMatrix<f64, 5, M>,
) -> Option<SMatrix<f64, 5, M>> {
    if !is_finite(a) || !is_finite(b) {
        return None;
    }
    let a_sym = symmetrize(a);
    let x = match Cholesky::new(a_sym) {
        Some(ch) => ch.solve(b),
        None => a_sym.try_inverse()? * b,
    };
    if is_finite(&x) { Some(x) } else { None }
}
/// Check that every entry of a matrix is finite (no NaN or infinity).
#[inline]
pub fn is_finite<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> bool {
    m.iter().all(|v| v.is_finite())
}
/// Check symmetry of a square matrix within an absolute tolerance.
pub fn is_symmetric<const N: usize>(m: &SMatrix<f64, N, N>, tol: f64) -> bool {
    for i in 0..N {
        for j in (i + 1)..N {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}
/// Smallest eigenvalue of the symmetric part of a 6×6 covariance.
pub fn min_eigenvalue(m: &Matrix6<f64>) -> f64 {
    SymmetricEigen::new(symmetrize(m))
        .eigenvalues
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min)
}

/* =============================== Tests ==================================== */
