//! Shared numerical core for multivariate hypothesis testing: the four
//! classical statistics (Wilks' lambda, Pillai's trace, Hotelling-Lawley
//! trace, Roy's greatest root) and their F-approximations, computed from the
//! eigenvalues of `(E + H)^-1 H`.
//!
//! The formulas follow the SAS documentation for multivariate tests; see
//! <https://support.sas.com/documentation/cdl/en/statug/63033/HTML/default/viewer.htm#statug_introreg_sect012.htm>

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::fmt;

/// One test statistic with its F-approximation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TestStatistic {
    pub value: f64,
    pub f_value: f64,
    pub num_df: f64,
    pub den_df: f64,
    pub pvalue: f64,
}

/// The fixed four-row table produced for every multivariate hypothesis test.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultivariateStats {
    pub wilks_lambda: TestStatistic,
    pub pillai_trace: TestStatistic,
    pub hotelling_lawley_trace: TestStatistic,
    pub roys_greatest_root: TestStatistic,
}

impl MultivariateStats {
    /// Rows keyed by statistic name, in the fixed table order.
    pub fn rows(&self) -> [(&'static str, &TestStatistic); 4] {
        [
            ("Wilks' lambda", &self.wilks_lambda),
            ("Pillai's trace", &self.pillai_trace),
            ("Hotelling-Lawley trace", &self.hotelling_lawley_trace),
            ("Roy's greatest root", &self.roys_greatest_root),
        ]
    }
}

impl fmt::Display for MultivariateStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<24} {:>10} {:>8} {:>12} {:>10} {:>10}",
            "", "Pr > F", "Num DF", "Value", "F Value", "Den DF"
        )?;
        for (name, stat) in self.rows() {
            writeln!(
                f,
                "{:<24} {:>10.4} {:>8.4} {:>12.8} {:>10.4} {:>10.4}",
                name, stat.pvalue, stat.num_df, stat.value, stat.f_value, stat.den_df
            )?;
        }
        Ok(())
    }
}

/// Right-tail F probability `P(F > f)`, NaN when the distribution is
/// undefined for the given degrees of freedom.
pub(crate) fn f_survival(f_value: f64, df1: f64, df2: f64) -> f64 {
    FisherSnedecor::new(df1, df2)
        .ok()
        .map_or(f64::NAN, |dist| 1.0 - dist.cdf(f_value))
}

/// Compute the four multivariate test statistics from the eigenvalues of
/// `(E + H)^-1 H`.
///
/// * `eigenvals` - real parts of the eigenvalues, sorted ascending; callers
///   discard negligible imaginary round-off before this point.
/// * `p` - rank of `E + H`.
/// * `q` - rank of the hypothesis, `rank(L (X'X)^-1 L')`.
/// * `df_resid` - residual degrees of freedom of the fitted model.
pub fn multivariate_stats(
    eigenvals: ArrayView1<f64>,
    p: usize,
    q: usize,
    df_resid: f64,
) -> MultivariateStats {
    let v = df_resid;
    let p = p as f64;
    let q = q as f64;
    // eigenvalues of E^-1 H, the "theta to lambda" transform
    let transformed: Vec<f64> = eigenvals.iter().map(|&l| l / (1.0 - l)).collect();

    let s = p.min(q);
    let m = ((p - q).abs() - 1.0) / 2.0;
    let n = (v - p - 1.0) / 2.0;

    // Wilks' lambda with Rao's F-approximation
    let lambda: f64 = eigenvals.iter().map(|&l| 1.0 - l).product();
    let r = v - (p - q + 1.0) / 2.0;
    let u = (p * q - 2.0) / 4.0;
    let df1 = p * q;
    let t = if p * p + q * q - 5.0 > 0.0 {
        ((p * p * q * q - 4.0) / (p * p + q * q - 5.0)).sqrt()
    } else {
        1.0
    };
    let df2 = r * t - 2.0 * u;
    let lmd = lambda.powf(1.0 / t);
    let f_value = (1.0 - lmd) / lmd * df2 / df1;
    let wilks_lambda = TestStatistic {
        value: lambda,
        f_value,
        num_df: df1,
        den_df: df2,
        pvalue: f_survival(f_value, df1, df2),
    };

    // Pillai's trace, on the eigenvalues as given
    let v_stat: f64 = eigenvals.iter().sum();
    let df1 = s * (2.0 * m + s + 1.0);
    let df2 = s * (2.0 * n + s + 1.0);
    let f_value = df2 / df1 * v_stat / (s - v_stat);
    let pillai_trace = TestStatistic {
        value: v_stat,
        f_value,
        num_df: df1,
        den_df: df2,
        pvalue: f_survival(f_value, df1, df2),
    };

    // Hotelling-Lawley trace: exact b/c correction when n > 0, otherwise the
    // s/m/n approximation
    let u_stat: f64 = transformed.iter().sum();
    let (df1, df2, f_value) = if n > 0.0 {
        let b = (p + 2.0 * n) * (q + 2.0 * n) / (2.0 * (2.0 * n + 1.0) * (n - 1.0));
        let df1 = p * q;
        let df2 = 4.0 + (p * q + 2.0) / (b - 1.0);
        let c = (df2 - 2.0) / (2.0 * n);
        (df1, df2, df2 / df1 * u_stat / c)
    } else {
        let df1 = s * (2.0 * m + s + 1.0);
        let df2 = s * (s * n + 1.0);
        (df1, df2, df2 / (df1 * s) * u_stat)
    };
    let hotelling_lawley_trace = TestStatistic {
        value: u_stat,
        f_value,
        num_df: df1,
        den_df: df2,
        pvalue: f_survival(f_value, df1, df2),
    };

    // Roy's greatest root
    let sigma = transformed
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    let r_max = p.max(q);
    let df1 = r_max;
    let df2 = v - r_max + q;
    let f_value = df2 / df1 * sigma;
    let roys_greatest_root = TestStatistic {
        value: sigma,
        f_value,
        num_df: df1,
        den_df: df2,
        pvalue: f_survival(f_value, df1, df2),
    };

    MultivariateStats {
        wilks_lambda,
        pillai_trace,
        hotelling_lawley_trace,
        roys_greatest_root,
    }
}
