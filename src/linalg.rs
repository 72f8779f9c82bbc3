//! Small shared wrappers over the `ndarray-linalg` kernel: numerical rank,
//! Moore-Penrose pseudo-inverse and a descending-order symmetric
//! eigendecomposition.

use ndarray::{s, Array1, Array2, Axis};
use ndarray_linalg::{Eigh, JobSvd, SVDDC, UPLO};

use crate::error::MvError;

/// Rank tolerance relative to the largest singular value, matching the numpy
/// default `s_max * max(n, m) * eps`.
fn rank_tolerance(a: &Array2<f64>, singular_values: &Array1<f64>) -> f64 {
    let s_max = singular_values.iter().cloned().fold(0.0f64, f64::max);
    s_max * a.nrows().max(a.ncols()) as f64 * f64::EPSILON
}

/// Numerical rank of `a`, estimated from its singular values.
pub fn matrix_rank(a: &Array2<f64>) -> Result<usize, MvError> {
    let (_, sv, _) = a.svddc(JobSvd::None)?;
    let tol = rank_tolerance(a, &sv);
    Ok(sv.iter().filter(|&&v| v > tol).count())
}

/// Moore-Penrose pseudo-inverse of `a` via its thin SVD. Singular values at
/// or below the rank tolerance are dropped.
pub fn pinv(a: &Array2<f64>) -> Result<Array2<f64>, MvError> {
    let (u, sv, vt) = a.svddc(JobSvd::Some)?;
    let u = u.ok_or(MvError::Internal("SVD left singular vectors missing"))?;
    let vt = vt.ok_or(MvError::Internal("SVD right singular vectors missing"))?;

    let tol = rank_tolerance(a, &sv);
    let rank = sv.iter().filter(|&&v| v > tol).count();

    // pinv = V * diag(1/s) * U'
    let mut v = vt.slice(s![..rank, ..]).t().to_owned();
    for (mut col, &s_val) in v.axis_iter_mut(Axis(1)).zip(sv.iter()) {
        col.mapv_inplace(|x| x / s_val);
    }
    Ok(v.dot(&u.slice(s![.., ..rank]).t()))
}

/// Symmetric eigendecomposition with eigenvalues sorted descending and
/// eigenvectors reordered to match.
pub fn eigh_descending(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>), MvError> {
    let (vals, vecs) = a.eigh(UPLO::Upper)?;
    let mut order: Vec<usize> = (0..vals.len()).collect();
    order.sort_by(|&i, &j| vals[j].partial_cmp(&vals[i]).unwrap_or(std::cmp::Ordering::Equal));

    let sorted_vals = Array1::from_iter(order.iter().map(|&i| vals[i]));
    let mut sorted_vecs = Array2::zeros(vecs.raw_dim());
    for (dst, &src) in order.iter().enumerate() {
        sorted_vecs.column_mut(dst).assign(&vecs.column(src));
    }
    Ok((sorted_vals, sorted_vecs))
}
