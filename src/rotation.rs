//! Factor rotation: gradient-projection rotation of a loadings matrix.
//!
//! Orthogonal rotations use the orthomax and Crawford-Ferguson criteria,
//! oblique rotations the oblimin family, and promax is a varimax solution
//! followed by an oblique Procrustes fit against a powered target.

use ndarray::{Array2, Axis};
use ndarray_linalg::{Inverse, JobSvd, SVDDC};
use std::fmt;
use std::str::FromStr;

use crate::error::MvError;

/// Closed set of supported rotation methods. `Oblimin` is dispatched as
/// quartimin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationMethod {
    Varimax,
    Quartimax,
    Biquartimax,
    Equamax,
    Oblimin,
    Parsimax,
    Parsimony,
    Biquartimin,
    Promax,
}

impl RotationMethod {
    pub fn name(self) -> &'static str {
        match self {
            RotationMethod::Varimax => "varimax",
            RotationMethod::Quartimax => "quartimax",
            RotationMethod::Biquartimax => "biquartimax",
            RotationMethod::Equamax => "equamax",
            RotationMethod::Oblimin => "oblimin",
            RotationMethod::Parsimax => "parsimax",
            RotationMethod::Parsimony => "parsimony",
            RotationMethod::Biquartimin => "biquartimin",
            RotationMethod::Promax => "promax",
        }
    }
}

impl fmt::Display for RotationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RotationMethod {
    type Err = MvError;

    fn from_str(s: &str) -> Result<Self, MvError> {
        match s {
            "varimax" => Ok(RotationMethod::Varimax),
            "quartimax" => Ok(RotationMethod::Quartimax),
            "biquartimax" => Ok(RotationMethod::Biquartimax),
            "equamax" => Ok(RotationMethod::Equamax),
            "oblimin" => Ok(RotationMethod::Oblimin),
            "parsimax" => Ok(RotationMethod::Parsimax),
            "parsimony" => Ok(RotationMethod::Parsimony),
            "biquartimin" => Ok(RotationMethod::Biquartimin),
            "promax" => Ok(RotationMethod::Promax),
            other => Err(MvError::validation(format!(
                "Unknown rotation method '{other}'"
            ))),
        }
    }
}

/// Rotate `a` (variables by factors) with the given method, returning the
/// rotated loadings.
pub fn rotate_loadings(a: &Array2<f64>, method: RotationMethod) -> Result<Array2<f64>, MvError> {
    let p = a.nrows() as f64;
    let m = a.ncols() as f64;
    let (loadings, _t) = match method {
        RotationMethod::Varimax => gpa_orthogonal(a, &Orthomax { gamma: 1.0 })?,
        RotationMethod::Quartimax => gpa_orthogonal(a, &Orthomax { gamma: 0.0 })?,
        RotationMethod::Biquartimax => gpa_orthogonal(a, &Orthomax { gamma: 0.5 })?,
        RotationMethod::Equamax => gpa_orthogonal(a, &Orthomax { gamma: m / 2.0 })?,
        RotationMethod::Parsimax => gpa_orthogonal(
            a,
            &CrawfordFerguson {
                kappa: (m - 1.0) / (p + m - 2.0),
            },
        )?,
        RotationMethod::Parsimony => gpa_orthogonal(a, &CrawfordFerguson { kappa: 1.0 })?,
        RotationMethod::Oblimin => gpa_oblique(a, 0.0)?,
        RotationMethod::Biquartimin => gpa_oblique(a, 0.5)?,
        RotationMethod::Promax => promax(a, 2.0)?,
    };
    Ok(loadings)
}

const GPA_MAX_ITER: usize = 500;
const GPA_TOL: f64 = 1e-6;
const LINE_SEARCH_STEPS: usize = 20;

/// Rotation criterion value and gradient with respect to the rotated
/// loadings. Criteria are minimized.
trait Criterion {
    fn value_gradient(&self, l: &Array2<f64>) -> (f64, Array2<f64>);
}

/// Orthomax family: quartimax (0), biquartimax (1/2), varimax (1),
/// equamax (m/2).
struct Orthomax {
    gamma: f64,
}

impl Criterion for Orthomax {
    fn value_gradient(&self, l: &Array2<f64>) -> (f64, Array2<f64>) {
        let p = l.nrows() as f64;
        let l2 = l.mapv(|v| v * v);
        let col_means = l2.sum_axis(Axis(0)) / p;
        let term = &l2 - &col_means.mapv(|v| v * self.gamma);
        let value = -0.25 * (&l2 * &term).sum();
        let gradient = -(l * &term);
        (value, gradient)
    }
}

/// Crawford-Ferguson family: parsimax (kappa = (m-1)/(p+m-2)),
/// factor parsimony (kappa = 1).
struct CrawfordFerguson {
    kappa: f64,
}

impl Criterion for CrawfordFerguson {
    fn value_gradient(&self, l: &Array2<f64>) -> (f64, Array2<f64>) {
        let (p, m) = l.dim();
        let l2 = l.mapv(|v| v * v);
        // L2 * N with N = ones(m, m) - I: row totals minus the entry itself
        let row_tot = l2.sum_axis(Axis(1));
        let l2n = Array2::from_shape_fn((p, m), |(i, j)| row_tot[i] - l2[[i, j]]);
        // M * L2 with M = ones(p, p) - I
        let col_tot = l2.sum_axis(Axis(0));
        let ml2 = Array2::from_shape_fn((p, m), |(i, j)| col_tot[j] - l2[[i, j]]);

        let value = (1.0 - self.kappa) * 0.25 * (&l2 * &l2n).sum()
            + self.kappa * 0.25 * (&l2 * &ml2).sum();
        let gradient = (l * &l2n) * (1.0 - self.kappa) + (l * &ml2) * self.kappa;
        (value, gradient)
    }
}

/// Oblimin family criterion: quartimin (gamma = 0), biquartimin (1/2).
fn oblimin_value_gradient(l: &Array2<f64>, gamma: f64) -> (f64, Array2<f64>) {
    let (p, m) = l.dim();
    let l2 = l.mapv(|v| v * v);
    let row_tot = l2.sum_axis(Axis(1));
    let l2n = Array2::from_shape_fn((p, m), |(i, j)| row_tot[i] - l2[[i, j]]);
    let x = if gamma != 0.0 {
        let col_means = l2n.sum_axis(Axis(0)) / p as f64;
        &l2n - &col_means.mapv(|v| v * gamma)
    } else {
        l2n
    };
    let value = 0.25 * (&l2 * &x).sum();
    let gradient = l * &x;
    (value, gradient)
}

fn frobenius_norm(a: &Array2<f64>) -> f64 {
    a.mapv(|v| v * v).sum().sqrt()
}

/// Gradient-projection rotation over the orthogonal group.
fn gpa_orthogonal(
    a: &Array2<f64>,
    criterion: &dyn Criterion,
) -> Result<(Array2<f64>, Array2<f64>), MvError> {
    let m = a.ncols();
    let mut t: Array2<f64> = Array2::eye(m);
    let mut al = 1.0f64;
    let mut l = a.dot(&t);
    let (mut f, gq) = criterion.value_gradient(&l);
    let mut g = a.t().dot(&gq);

    for _ in 0..GPA_MAX_ITER {
        let tg = t.t().dot(&g);
        let sym = (&tg + &tg.t()) * 0.5;
        let gp = &g - &t.dot(&sym);
        let s_norm = frobenius_norm(&gp);
        if s_norm < GPA_TOL {
            break;
        }
        al *= 2.0;
        for _ in 0..LINE_SEARCH_STEPS {
            let x = &t - &gp.mapv(|v| v * al);
            // project back onto the orthogonal group
            let (u, _sv, vt) = x.svddc(JobSvd::Some)?;
            let u = u.ok_or(MvError::Internal("SVD left singular vectors missing"))?;
            let vt = vt.ok_or(MvError::Internal("SVD right singular vectors missing"))?;
            let t_new = u.dot(&vt);
            let l_new = a.dot(&t_new);
            let (f_new, gq_new) = criterion.value_gradient(&l_new);
            if f_new < f - 0.5 * s_norm * s_norm * al {
                t = t_new;
                l = l_new;
                f = f_new;
                g = a.t().dot(&gq_new);
                break;
            }
            al /= 2.0;
        }
    }
    Ok((l, t))
}

/// Gradient-projection rotation over the oblique manifold (unit-length
/// columns of `T`), with the oblimin criterion.
fn gpa_oblique(a: &Array2<f64>, gamma: f64) -> Result<(Array2<f64>, Array2<f64>), MvError> {
    let m = a.ncols();
    let mut t: Array2<f64> = Array2::eye(m);
    let mut al = 1.0f64;
    let mut ti = t.inv()?;
    let mut l = a.dot(&ti.t());
    let (mut f, gq) = oblimin_value_gradient(&l, gamma);
    let mut g = -(l.t().dot(&gq).dot(&ti)).t().to_owned();

    for _ in 0..GPA_MAX_ITER {
        // project the gradient: Gp = G - T diag(diag(T'G))
        let tg_diag = t.t().dot(&g).diag().to_owned();
        let gp = &g - &(&t * &tg_diag);
        let s_norm = frobenius_norm(&gp);
        if s_norm < GPA_TOL {
            break;
        }
        al *= 2.0;
        for _ in 0..LINE_SEARCH_STEPS {
            let mut x = &t - &gp.mapv(|v| v * al);
            for mut col in x.columns_mut() {
                let norm = col.dot(&col).sqrt();
                if norm > 0.0 {
                    col.mapv_inplace(|v| v / norm);
                }
            }
            let xi = x.inv()?;
            let l_new = a.dot(&xi.t());
            let (f_new, gq_new) = oblimin_value_gradient(&l_new, gamma);
            if f_new < f - 0.5 * s_norm * s_norm * al {
                t = x;
                ti = xi;
                l = l_new;
                f = f_new;
                g = -(l.t().dot(&gq_new).dot(&ti)).t().to_owned();
                break;
            }
            al /= 2.0;
        }
    }
    Ok((l, t))
}

/// Promax: varimax, then an oblique Procrustes fit against the
/// sign-preserving `power`-th power of the varimax loadings.
fn promax(a: &Array2<f64>, power: f64) -> Result<(Array2<f64>, Array2<f64>), MvError> {
    let (x, _) = gpa_orthogonal(a, &Orthomax { gamma: 1.0 })?;
    let target = x.mapv(|v| v * v.abs().powf(power - 1.0));

    // least-squares fit of x onto the target
    let xtx = x.t().dot(&x);
    let mut q = xtx.inv()?.dot(&x.t().dot(&target));

    // rescale so the rotated factors have unit variance
    let d = q.t().dot(&q).inv()?.diag().mapv(f64::sqrt);
    for (mut col, &d_val) in q.axis_iter_mut(Axis(1)).zip(d.iter()) {
        col.mapv_inplace(|v| v * d_val);
    }
    let l = x.dot(&q);
    Ok((l, q))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};

    fn sample_loadings() -> Array2<f64> {
        // two-factor structure with deliberately mixed loadings
        array![
            [0.69, 0.42],
            [0.71, 0.38],
            [0.64, 0.44],
            [0.38, 0.70],
            [0.41, 0.66],
            [0.35, 0.72]
        ]
    }

    #[test]
    fn unknown_method_name_is_rejected() {
        let err = "foobar".parse::<RotationMethod>().unwrap_err();
        assert!(err.to_string().contains("Unknown rotation method 'foobar'"));
        assert_eq!("varimax".parse::<RotationMethod>().unwrap(), RotationMethod::Varimax);
    }

    #[test]
    fn varimax_preserves_row_sums_of_squares() {
        let a = sample_loadings();
        let rotated = rotate_loadings(&a, RotationMethod::Varimax).unwrap();
        let before = a.mapv(|v| v * v).sum_axis(Axis(1));
        let after = rotated.mapv(|v| v * v).sum_axis(Axis(1));
        for (x, y) in before.iter().zip(after.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-8);
        }
    }

    #[test]
    fn varimax_transform_is_orthogonal() {
        let a = sample_loadings();
        let (_, t) = gpa_orthogonal(&a, &Orthomax { gamma: 1.0 }).unwrap();
        let ttt = t.t().dot(&t);
        for i in 0..t.ncols() {
            for j in 0..t.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(ttt[[i, j]], expected, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn varimax_improves_the_criterion() {
        let a = sample_loadings();
        let criterion = Orthomax { gamma: 1.0 };
        let rotated = rotate_loadings(&a, RotationMethod::Varimax).unwrap();
        let (before, _) = criterion.value_gradient(&a);
        let (after, _) = criterion.value_gradient(&rotated);
        assert!(after <= before + 1e-12);
    }

    #[test]
    fn single_factor_rotation_is_identity() {
        let a = array![[0.8], [0.7], [0.6]];
        let rotated = rotate_loadings(&a, RotationMethod::Varimax).unwrap();
        for (x, y) in rotated.iter().zip(a.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-10);
        }
    }

    #[test]
    fn quartimin_runs_on_oblique_manifold() {
        let a = sample_loadings();
        let (l, t) = gpa_oblique(&a, 0.0).unwrap();
        assert_eq!(l.dim(), a.dim());
        // T columns stay unit length
        for col in t.columns() {
            assert_abs_diff_eq!(col.dot(&col), 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn promax_produces_finite_loadings() {
        let a = sample_loadings();
        let rotated = rotate_loadings(&a, RotationMethod::Promax).unwrap();
        assert_eq!(rotated.dim(), a.dim());
        assert!(rotated.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn promax_dispatch_uses_power_two() {
        let a = sample_loadings();
        let rotated = rotate_loadings(&a, RotationMethod::Promax).unwrap();
        let (direct, _) = promax(&a, 2.0).unwrap();
        for (x, y) in rotated.iter().zip(direct.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 0.0);
        }
    }
}
