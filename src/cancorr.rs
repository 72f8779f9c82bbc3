//! Canonical correlation analysis using singular value decomposition.
//!
//! For blocks `x` and `y`, find coefficient matrices `x_cancoef` and
//! `y_cancoef` such that the transformed variables `x1 = x * x_cancoef` and
//! `y1 = y * y_cancoef` have identity cross-products and maximal pairwise
//! correlation. See Numerical Recipes, "Canonical Correlation by SVD".

use log::debug;
use ndarray::{s, Array1, Array2, Axis};
use ndarray_linalg::{JobSvd, SVDDC};
use std::fmt;

use crate::error::MvError;
use crate::stats::{f_survival, multivariate_stats, MultivariateStats};

/// Singular values at or below this are treated as exactly singular. The
/// corresponding columns of V are passed through unscaled; the sharp cutoff
/// (rather than zeroing or smoothing the tail) is intentional.
const SVD_TOL: f64 = 1e-8;

/// Sequential Wilks test for one canonical pair: this pair and all weaker
/// pairs are jointly zero.
#[derive(Clone, Copy, Debug)]
pub struct SequentialTest {
    pub cancorr: f64,
    pub wilks_lambda: f64,
    pub num_df: f64,
    pub den_df: f64,
    pub f_value: f64,
    pub pvalue: f64,
}

/// Fitted canonical correlation analysis.
#[derive(Clone, Debug)]
pub struct CanCorr {
    cancorr: Array1<f64>,
    x_cancoef: Array2<f64>,
    y_cancoef: Array2<f64>,
    series_stats: Vec<SequentialTest>,
    multi_stats: MultivariateStats,
}

impl CanCorr {
    /// Compute the canonical correlations between `x` (n-by-q) and `y`
    /// (n-by-p). Both blocks are mean-centered on private copies; the
    /// caller's matrices are untouched.
    pub fn fit(x: &Array2<f64>, y: &Array2<f64>) -> Result<Self, MvError> {
        let (nobs, q) = x.dim();
        let (nobs1, p) = y.dim();
        if nobs != nobs1 {
            return Err(MvError::validation(format!(
                "x(n={nobs}) and y(n={nobs1}) should have the same number of rows!"
            )));
        }
        if nobs == 0 {
            return Err(MvError::validation(
                "x and y must have at least one row!".to_string(),
            ));
        }
        let k = p.min(q);
        debug!("fitting CanCorr: n={nobs}, q={q}, p={p}, k={k}");

        let x_centered = x - &(x.sum_axis(Axis(0)) / nobs as f64);
        let y_centered = y - &(y.sum_axis(Axis(0)) / nobs as f64);

        let (ux, sx, vxt) = thin_svd(&x_centered)?;
        let vx_ds = scaled_right_vectors(vxt, &sx);
        let (uy, sy, vyt) = thin_svd(&y_centered)?;
        let vy_ds = scaled_right_vectors(vyt, &sy);

        let (u, sv, vt) = thin_svd(&ux.t().dot(&uy))?;
        // the cross SVD has min(n, p, q) columns; with more variables than
        // observations the projection width is capped at what it provides
        let k = k.min(u.ncols()).min(vt.nrows());

        // correct any round-off outside [0, 1]
        let cancorr = sv.mapv(|v| v.clamp(0.0, 1.0));
        let x_cancoef = vx_ds.dot(&u.slice(s![.., ..k]));
        let y_cancoef = vy_ds.dot(&vt.t().slice(s![.., ..k]));

        // Sequential tests, accumulating the Wilks product from the weakest
        // pair upward; each pair's F-approximation is re-derived at the
        // partial ranks (p - i, q - i).
        let eigenvals = cancorr.mapv(|c| c * c);
        let mut series_stats = Vec::with_capacity(eigenvals.len());
        let mut prod = 1.0;
        for i in (0..eigenvals.len()).rev() {
            prod *= 1.0 - eigenvals[i];
            let p1 = p as f64 - i as f64;
            let q1 = q as f64 - i as f64;
            let r = (nobs as f64 - q as f64 - 1.0) - (p1 - q1 + 1.0) / 2.0;
            let u_term = (p1 * q1 - 2.0) / 4.0;
            let df1 = p1 * q1;
            let t = if p1 * p1 + q1 * q1 - 5.0 > 0.0 {
                ((p1 * p1 * q1 * q1 - 4.0) / (p1 * p1 + q1 * q1 - 5.0)).sqrt()
            } else {
                1.0
            };
            let df2 = r * t - 2.0 * u_term;
            let lmd = prod.powf(1.0 / t);
            let f_value = (1.0 - lmd) / lmd * df2 / df1;
            series_stats.push(SequentialTest {
                cancorr: cancorr[i],
                wilks_lambda: prod,
                num_df: df1,
                den_df: df2,
                f_value,
                pvalue: f_survival(f_value, df1, df2),
            });
        }
        // strongest pair first
        series_stats.reverse();

        let multi_stats =
            multivariate_stats(eigenvals.view(), p, q, nobs as f64 - q as f64 - 1.0);

        Ok(Self {
            cancorr,
            x_cancoef,
            y_cancoef,
            series_stats,
            multi_stats,
        })
    }

    /// Canonical correlations, descending, clipped into `[0, 1]`.
    pub fn cancorr(&self) -> &Array1<f64> {
        &self.cancorr
    }

    /// Coefficients mapping centered `x` into canonical variable space.
    pub fn x_cancoef(&self) -> &Array2<f64> {
        &self.x_cancoef
    }

    /// Coefficients mapping centered `y` into canonical variable space.
    pub fn y_cancoef(&self) -> &Array2<f64> {
        &self.y_cancoef
    }

    /// Per-pair sequential Wilks tests, strongest pair first.
    pub fn series_stats(&self) -> &[SequentialTest] {
        &self.series_stats
    }

    /// Full multivariate test table over all canonical pairs.
    pub fn multi_stats(&self) -> &MultivariateStats {
        &self.multi_stats
    }
}

impl fmt::Display for CanCorr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cancorr results")?;
        writeln!(
            f,
            "{:>6} {:>12} {:>14} {:>8} {:>10} {:>10} {:>10}",
            "Pair", "Cancorr", "Wilks' lambda", "Num DF", "Den DF", "F Value", "Pr > F"
        )?;
        for (i, row) in self.series_stats.iter().enumerate() {
            writeln!(
                f,
                "{:>6} {:>12.6} {:>14.8} {:>8.2} {:>10.4} {:>10.4} {:>10.4}",
                i, row.cancorr, row.wilks_lambda, row.num_df, row.den_df, row.f_value, row.pvalue
            )?;
        }
        writeln!(f, "\nMultivariate Statistics and F Approximations")?;
        write!(f, "{}", self.multi_stats)
    }
}

/// Economy-size SVD.
fn thin_svd(a: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), MvError> {
    let (u, sv, vt) = a.svddc(JobSvd::Some)?;
    let u = u.ok_or(MvError::Internal("SVD left singular vectors missing"))?;
    let vt = vt.ok_or(MvError::Internal("SVD right singular vectors missing"))?;
    Ok((u, sv, vt))
}

/// `V` with each column divided by its singular value, stopping at the first
/// singular value at or below [`SVD_TOL`]; the degenerate tail is left
/// unscaled.
fn scaled_right_vectors(vt: Array2<f64>, sv: &Array1<f64>) -> Array2<f64> {
    let mut v = vt.t().to_owned();
    for (i, &s_val) in sv.iter().enumerate() {
        if s_val <= SVD_TOL {
            break;
        }
        v.column_mut(i).mapv_inplace(|x| x / s_val);
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn blocks() -> (Array2<f64>, Array2<f64>) {
        // y columns are noisy linear combinations of the x columns
        let x = array![
            [1.0, 0.4],
            [2.1, 1.8],
            [3.2, 0.9],
            [4.3, 2.7],
            [5.1, 1.5],
            [6.4, 3.8],
            [7.2, 2.1],
            [8.3, 4.4],
            [9.1, 3.0],
            [10.2, 5.1]
        ];
        let y = array![
            [1.5, 0.2],
            [4.1, 1.9],
            [4.9, 0.5],
            [7.4, 2.9],
            [7.8, 1.1],
            [10.9, 4.0],
            [10.5, 1.8],
            [13.4, 4.6],
            [13.0, 2.5],
            [16.1, 5.5]
        ];
        (x, y)
    }

    #[test]
    fn correlations_are_in_unit_interval_and_descending() {
        let (x, y) = blocks();
        let cc = CanCorr::fit(&x, &y).unwrap();
        let corr = cc.cancorr();
        assert_eq!(corr.len(), 2);
        for &c in corr {
            assert!((0.0..=1.0).contains(&c));
        }
        assert!(corr[0] >= corr[1]);
    }

    #[test]
    fn coefficients_whiten_the_blocks() {
        let (x, y) = blocks();
        let cc = CanCorr::fit(&x, &y).unwrap();
        let xc = &x - &(x.sum_axis(Axis(0)) / x.nrows() as f64);
        let yc = &y - &(y.sum_axis(Axis(0)) / y.nrows() as f64);

        let x1 = xc.dot(cc.x_cancoef());
        let gram = x1.t().dot(&x1);
        for i in 0..gram.nrows() {
            for j in 0..gram.ncols() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-8);
            }
        }
        let y1 = yc.dot(cc.y_cancoef());
        let gram = y1.t().dot(&y1);
        for i in 0..gram.nrows() {
            assert_abs_diff_eq!(gram[[i, i]], 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn duplicated_blocks_clip_to_perfect_correlation() {
        let (x, _) = blocks();
        let y = x.mapv(|v| 2.0 * v + 1.0);
        let cc = CanCorr::fit(&x, &y).unwrap();
        for &c in cc.cancorr() {
            assert!((0.0..=1.0).contains(&c));
        }
        assert_abs_diff_eq!(cc.cancorr()[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn more_variables_than_rows_caps_the_projection_width() {
        // wide blocks: 4 observations, 6 and 5 variables
        let x = array![
            [1.2, 0.4, 2.1, 0.9, 1.7, 0.3],
            [2.5, 1.8, 0.6, 2.2, 0.8, 1.4],
            [0.7, 2.9, 1.3, 0.5, 2.4, 2.0],
            [1.9, 0.2, 2.8, 1.6, 0.1, 1.1]
        ];
        let y = array![
            [0.8, 1.5, 2.3, 0.4, 1.9],
            [2.1, 0.6, 1.2, 2.7, 0.3],
            [1.4, 2.2, 0.9, 1.1, 2.5],
            [0.2, 1.8, 2.6, 0.7, 1.3]
        ];
        let cc = CanCorr::fit(&x, &y).unwrap();
        assert_eq!(cc.cancorr().len(), 4);
        assert_eq!(cc.x_cancoef().dim(), (6, 4));
        assert_eq!(cc.y_cancoef().dim(), (5, 4));
        for &c in cc.cancorr() {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn row_count_mismatch_is_a_validation_error() {
        let x = Array2::<f64>::zeros((4, 2));
        let y = Array2::<f64>::zeros((5, 2));
        let err = CanCorr::fit(&x, &y).unwrap_err();
        assert!(err
            .to_string()
            .contains("x(n=4) and y(n=5) should have the same number of rows!"));
    }

    #[test]
    fn full_table_is_consistent_with_sequential_product() {
        let (x, y) = blocks();
        let cc = CanCorr::fit(&x, &y).unwrap();
        // the weakest-pair-up product over all pairs equals Wilks' lambda of
        // the full eigenvalue set
        let full_product: f64 = cc
            .cancorr()
            .iter()
            .map(|&c| 1.0 - c * c)
            .product();
        assert_abs_diff_eq!(
            cc.multi_stats().wilks_lambda.value,
            full_product,
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            cc.series_stats()[0].wilks_lambda,
            full_product,
            epsilon = 1e-12
        );
    }
}
