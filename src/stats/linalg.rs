use log::debug;
use nalgebra::DMatrix;

/// Keep the diagonal and scale every off-diagonal cell by `tol`.
fn shrink_off_diagonal(x: &DMatrix<f64>, tol: f64) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| {
        if i == j {
            x[(i, j)]
        } else {
            tol * x[(i, j)]
        }
    })
}

/// All eigenvalues of a symmetric matrix are positive. Eigenvalues within
/// rounding error of zero, relative to the largest one, count as zero.
pub fn is_positive_definite(x: &DMatrix<f64>) -> bool {
    if x.is_empty() {
        return true;
    }
    if x.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let eigenvalues = x.clone().symmetric_eigenvalues();
    let largest = eigenvalues.iter().fold(0.0f64, |acc, e| acc.max(e.abs()));
    let cutoff = x.nrows() as f64 * f64::EPSILON * largest;
    eigenvalues.iter().all(|&e| e > cutoff)
}

/// Make a symmetric matrix positive definite by repeatedly shrinking its
/// off-diagonal cells towards zero.
///
/// The check is repeated after each of the first four shrinks. A fifth
/// shrink is applied without a check and reported as not converged.
pub fn is_pos_def_and_full_rank(x: &DMatrix<f64>, tol: f64) -> (DMatrix<f64>, bool) {
    if is_positive_definite(x) {
        return (x.clone(), true);
    }
    let mut x = x.clone();
    for _ in 0..4 {
        x = shrink_off_diagonal(&x, tol);
        if is_positive_definite(&x) {
            return (x, true);
        }
    }
    (shrink_off_diagonal(&x, tol), false)
}

/// Invert a matrix. A singular matrix gets one positive-definiteness
/// adjustment and a second attempt before giving up.
pub fn safe_inv(x: &DMatrix<f64>, matrix_name: &str, block: &str) -> Option<DMatrix<f64>> {
    if let Some(inverse) = x.clone().try_inverse() {
        if inverse.iter().all(|v| v.is_finite()) {
            return Some(inverse);
        }
    }
    let (adjusted, _) = is_pos_def_and_full_rank(x, 0.99);
    match adjusted.try_inverse() {
        Some(inverse) if inverse.iter().all(|v| v.is_finite()) => Some(inverse),
        _ => {
            debug!("Could not invert {} for {}", matrix_name, block);
            None
        }
    }
}

/// Natural log of the absolute value of the determinant.
pub fn log_abs_det(x: &DMatrix<f64>) -> f64 {
    let u = x.clone().lu().u();
    u.diagonal().iter().map(|d| d.abs().ln()).sum()
}

/// Sub-matrix keeping the given rows and columns, in order.
pub fn select_square(x: &DMatrix<f64>, keep: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(keep.len(), keep.len(), |i, j| x[(keep[i], keep[j])])
}

pub fn symmetrize(x: &DMatrix<f64>) -> DMatrix<f64> {
    (x + x.transpose()) * 0.5
}
