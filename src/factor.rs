//! Exploratory factor analysis via iterative principal-axis extraction.
//!
//! The algorithm follows Hofacker (2004), Exploratory Factor Analysis,
//! Mathematical Marketing: starting from an initial communality estimate, the
//! diagonal of the correlation matrix is repeatedly replaced by the current
//! communalities and re-decomposed until the communality vector stabilizes.

use log::{debug, trace};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Inverse;

use crate::error::MvError;
use crate::linalg::{eigh_descending, matrix_rank};
use crate::rotation;

pub use crate::rotation::RotationMethod;

/// Iteration controls for [`Factor::fit_pa`].
#[derive(Clone, Copy, Debug)]
pub struct PrincipalAxisOptions {
    /// Maximum number of communality-estimation iterations.
    pub n_max_iter: usize,
    /// Stop when the Euclidean norm of the communality change falls below
    /// this. Must lie in `(0, 0.01]`.
    pub tolerance: f64,
    /// Start from squared multiple correlations instead of ones.
    pub use_smc: bool,
}

impl Default for PrincipalAxisOptions {
    fn default() -> Self {
        Self {
            n_max_iter: 50,
            tolerance: 1e-6,
            use_smc: true,
        }
    }
}

/// Factor analysis model: observed variables in columns, observations in
/// rows, and a target number of factors to extract.
#[derive(Clone, Debug)]
pub struct Factor {
    data: Array2<f64>,
    n_factor: usize,
}

impl Factor {
    pub fn new(data: Array2<f64>, n_factor: usize) -> Result<Self, MvError> {
        if n_factor == 0 {
            return Err(MvError::validation(format!(
                "n_factor must be larger than 0! got {n_factor}"
            )));
        }
        if n_factor > data.ncols() {
            return Err(MvError::validation(format!(
                "n_factor must be smaller or equal to the number of variables! {} > {}",
                n_factor,
                data.ncols()
            )));
        }
        if data.nrows() < 2 {
            return Err(MvError::validation(format!(
                "data must have at least 2 rows! got {}",
                data.nrows()
            )));
        }
        Ok(Self { data, n_factor })
    }

    /// Extract factors with the iterative principal-axis method.
    ///
    /// Returns the loadings, the full eigenvalue sequence of the final
    /// reduced correlation matrix (descending) and the communality vector.
    /// If fewer than `n_factor` eigenvalues are positive, fewer factors are
    /// returned; that truncation is deliberate and silent.
    pub fn fit_pa(&self, options: &PrincipalAxisOptions) -> Result<FactorResults, MvError> {
        if options.n_max_iter == 0 {
            return Err(MvError::validation(format!(
                "n_max_iter must be larger than 0! got {}",
                options.n_max_iter
            )));
        }
        if options.tolerance <= 0.0 || options.tolerance > 0.01 {
            return Err(MvError::validation(format!(
                "tolerance must be larger than 0 and smaller than 0.01! Got {} instead",
                options.tolerance
            )));
        }

        // Private working copy; its diagonal is overwritten every iteration
        // and it is never shared outside this call.
        let mut r = corrcoef(&self.data.view());
        let k = r.nrows();
        let n_comp = matrix_rank(&r)?;
        if self.n_factor > n_comp {
            return Err(MvError::validation(format!(
                "n_factor must be smaller or equal to the rank of the correlation matrix! {} > {}",
                self.n_factor, n_comp
            )));
        }

        // Initial communality estimate: squared multiple correlations or ones.
        let smc = if options.use_smc {
            let diag_inv = r.inv()?.diag().to_owned();
            Some(diag_inv.mapv(|d| 1.0 - 1.0 / d))
        } else {
            None
        };
        let mut communality: Array1<f64> = match &smc {
            Some(v) => v.clone(),
            None => Array1::ones(k),
        };

        let mut eigenvals = Array1::zeros(k);
        let mut loadings = Array2::zeros((k, 0));
        for iteration in 0..options.n_max_iter {
            for j in 0..k {
                r[[j, j]] = communality[j];
            }
            let (vals, vecs) = eigh_descending(&r)?;
            let previous = communality.clone();

            let n_pos = vals.iter().filter(|&&v| v > 0.0).count();
            let n = n_pos.min(self.n_factor);

            // A = V[:, :n] * diag(sqrt(lambda[:n]))
            let mut a = vecs.slice(s![.., ..n]).to_owned();
            for (mut col, &lambda) in a.axis_iter_mut(Axis(1)).zip(vals.iter()) {
                col.mapv_inplace(|v| v * lambda.sqrt());
            }
            communality = a.mapv(|v| v * v).sum_axis(Axis(1));
            eigenvals = vals;
            loadings = a;

            let delta = (&previous - &communality).mapv(|v| v * v).sum().sqrt();
            trace!("principal-axis iteration {iteration}: delta = {delta:e}");
            if delta < options.tolerance {
                debug!(
                    "communality estimation converged after {} iterations",
                    iteration + 1
                );
                break;
            }
        }

        Ok(FactorResults {
            loadings,
            eigenvals,
            communality,
            smc,
            n_comp,
            rotated: None,
            plotter: None,
        })
    }
}

/// Capability-injected plotting port. Numerical results never depend on it;
/// requesting a plot without a backend attached fails with
/// [`MvError::Unavailable`].
pub trait FactorPlotter {
    /// Scree plot of the ordered eigenvalues.
    fn plot_scree(&self, eigenvals: ArrayView1<f64>, n_comp: usize) -> Result<(), MvError>;

    /// 2-d plots of loading pairs `(i, j)`.
    fn plot_loadings(
        &self,
        loadings: ArrayView2<f64>,
        pairs: &[(usize, usize)],
        title: &str,
    ) -> Result<(), MvError>;
}

/// Results of a factor extraction.
///
/// The pre-rotation loadings are immutable once computed; applying a
/// rotation stores its output separately and replaces any previous rotation
/// wholesale.
pub struct FactorResults {
    loadings: Array2<f64>,
    eigenvals: Array1<f64>,
    communality: Array1<f64>,
    smc: Option<Array1<f64>>,
    n_comp: usize,
    rotated: Option<(RotationMethod, Array2<f64>)>,
    plotter: Option<Box<dyn FactorPlotter>>,
}

impl std::fmt::Debug for FactorResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactorResults")
            .field("loadings", &self.loadings)
            .field("eigenvals", &self.eigenvals)
            .field("communality", &self.communality)
            .field("smc", &self.smc)
            .field("n_comp", &self.n_comp)
            .field("rotated", &self.rotated)
            .field("plotter", &self.plotter.as_ref().map(|_| "dyn FactorPlotter"))
            .finish()
    }
}

impl FactorResults {
    /// Pre-rotation loadings (variables by retained factors).
    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    /// Full eigenvalue sequence from the last iteration, descending.
    pub fn eigenvals(&self) -> &Array1<f64> {
        &self.eigenvals
    }

    /// Final communality estimate, one entry per variable.
    pub fn communality(&self) -> &Array1<f64> {
        &self.communality
    }

    /// Squared multiple correlations used as the starting estimate, when SMC
    /// initialization was requested.
    pub fn smc(&self) -> Option<&Array1<f64>> {
        self.smc.as_ref()
    }

    /// Rank of the correlation matrix.
    pub fn n_comp(&self) -> usize {
        self.n_comp
    }

    /// Method of the currently applied rotation, if any.
    pub fn rotation(&self) -> Option<RotationMethod> {
        self.rotated.as_ref().map(|(method, _)| *method)
    }

    /// Rotated loadings, if a rotation has been applied.
    pub fn rotated_loadings(&self) -> Option<&Array2<f64>> {
        self.rotated.as_ref().map(|(_, loadings)| loadings)
    }

    /// Rotated loadings when a rotation is active, pre-rotation loadings
    /// otherwise.
    pub fn current_loadings(&self) -> &Array2<f64> {
        self.rotated_loadings().unwrap_or(&self.loadings)
    }

    /// Apply a rotation to the pre-rotation loadings. Calling this again
    /// replaces the previous rotation; rotations never compose.
    pub fn rotate(&mut self, method: RotationMethod) -> Result<(), MvError> {
        let rotated = rotation::rotate_loadings(&self.loadings, method)?;
        self.rotated = Some((method, rotated));
        Ok(())
    }

    /// Attach a plotting backend.
    pub fn attach_plotter(&mut self, plotter: Box<dyn FactorPlotter>) {
        self.plotter = Some(plotter);
    }

    /// Scree plot of the eigenvalues through the attached backend.
    pub fn plot_scree(&self) -> Result<(), MvError> {
        let plotter = self
            .plotter
            .as_deref()
            .ok_or(MvError::Unavailable("plotting"))?;
        plotter.plot_scree(self.eigenvals.view(), self.n_comp)
    }

    /// 2-d loading-pair plots through the attached backend. With
    /// `pairs = None` all factor pairs are plotted; `prerotated` forces the
    /// pre-rotation loadings even when a rotation is active.
    pub fn plot_loadings(
        &self,
        pairs: Option<&[(usize, usize)]>,
        prerotated: bool,
    ) -> Result<(), MvError> {
        let plotter = self
            .plotter
            .as_deref()
            .ok_or(MvError::Unavailable("plotting"))?;
        let (loadings, title) = match (&self.rotated, prerotated) {
            (Some((method, loadings)), false) => {
                (loadings, format!("{method} Rotated Factor Pattern"))
            }
            _ => (&self.loadings, "Prerotated Factor Pattern".to_string()),
        };
        let all_pairs: Vec<(usize, usize)>;
        let pairs = match pairs {
            Some(p) => p,
            None => {
                let n = loadings.ncols();
                all_pairs = (0..n)
                    .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
                    .collect();
                &all_pairs
            }
        };
        plotter.plot_loadings(loadings.view(), pairs, &title)
    }
}

/// Pearson correlation matrix of the columns of `data`.
fn corrcoef(data: &ArrayView2<f64>) -> Array2<f64> {
    let n = data.nrows() as f64;
    let mean = data.sum_axis(Axis(0)) / n;
    let centered = data - &mean;
    let cov = centered.t().dot(&centered) / (n - 1.0);
    let std_dev = cov.diag().mapv(f64::sqrt);
    let mut r = cov;
    for i in 0..r.nrows() {
        for j in 0..r.ncols() {
            r[[i, j]] /= std_dev[i] * std_dev[j];
        }
    }
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample_data() -> Array2<f64> {
        // three moderately correlated variables, ten observations
        array![
            [1.2, 3.1, 2.0],
            [2.1, 2.0, 1.1],
            [3.4, 5.5, 2.9],
            [4.2, 4.1, 4.8],
            [5.1, 6.8, 3.2],
            [1.9, 2.9, 2.7],
            [2.8, 4.4, 1.8],
            [3.9, 6.2, 4.1],
            [4.7, 5.0, 5.2],
            [0.8, 1.7, 0.6]
        ]
    }

    #[test]
    fn correlation_matrix_has_unit_diagonal() {
        let data = sample_data();
        let r = corrcoef(&data.view());
        for i in 0..r.nrows() {
            assert_abs_diff_eq!(r[[i, i]], 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(r[[0, 1]], r[[1, 0]], epsilon = 1e-12);
        assert!(r[[0, 1]] > 0.0 && r[[0, 1]] < 1.0);
    }

    #[test]
    fn factor_count_bounds_are_validated() {
        let data = sample_data();
        let err = Factor::new(data.clone(), 0).unwrap_err();
        assert!(err.to_string().contains("n_factor must be larger than 0!"));
        let err = Factor::new(data, 4).unwrap_err();
        assert!(err.to_string().contains("4 > 3"));
    }

    #[test]
    fn factor_count_above_correlation_rank_is_rejected() {
        // third column is an exact linear combination of the first two, so
        // the correlation matrix has rank 2
        let mut data = sample_data();
        let combined = &data.column(0) + &data.column(1);
        data.column_mut(2).assign(&combined);
        let factor = Factor::new(data, 3).unwrap();
        let err = factor.fit_pa(&PrincipalAxisOptions::default()).unwrap_err();
        assert!(err
            .to_string()
            .contains("rank of the correlation matrix! 3 > 2"));
    }

    #[test]
    fn negative_eigenvalues_truncate_the_factor_count() {
        // Two positively correlated variables: the SMC start puts r^2 on the
        // diagonal, so the reduced matrix has eigenvalues r^2 +/- r and only
        // one of them is positive. The second factor is dropped silently.
        let data = sample_data().slice(s![.., ..2]).to_owned();
        let factor = Factor::new(data, 2).unwrap();
        let results = factor.fit_pa(&PrincipalAxisOptions::default()).unwrap();
        assert_eq!(results.n_comp(), 2);
        assert_eq!(results.loadings().ncols(), 1);
        assert_eq!(results.eigenvals().len(), 2);
        assert!(results.eigenvals()[1] < 0.0);
        for &c in results.communality() {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn iteration_controls_are_validated() {
        let factor = Factor::new(sample_data(), 1).unwrap();
        let err = factor
            .fit_pa(&PrincipalAxisOptions {
                n_max_iter: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("n_max_iter"));
        let err = factor
            .fit_pa(&PrincipalAxisOptions {
                tolerance: 0.5,
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.to_string().contains("tolerance"));
    }

    #[test]
    fn extraction_is_deterministic() {
        let factor = Factor::new(sample_data(), 1).unwrap();
        let opts = PrincipalAxisOptions::default();
        let a = factor.fit_pa(&opts).unwrap();
        let b = factor.fit_pa(&opts).unwrap();
        for (x, y) in a.loadings().iter().zip(b.loadings().iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 0.0);
        }
        for (x, y) in a.communality().iter().zip(b.communality().iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 0.0);
        }
    }

    #[test]
    fn communalities_and_eigenvalues_are_well_formed() {
        let factor = Factor::new(sample_data(), 2).unwrap();
        let results = factor.fit_pa(&PrincipalAxisOptions::default()).unwrap();
        for &c in results.communality() {
            assert!((0.0..=1.0 + 1e-8).contains(&c), "communality {c} out of range");
        }
        let eigs = results.eigenvals();
        for w in eigs.windows(2) {
            assert!(w[0] >= w[1], "eigenvalues not sorted descending");
        }
    }

    #[test]
    fn full_rank_extraction_reconstructs_the_correlation_matrix() {
        // With unit initial communalities and a full-rank R, the first
        // iteration reproduces R exactly and converges immediately.
        let data = sample_data();
        let r = corrcoef(&data.view());
        let factor = Factor::new(data, 3).unwrap();
        let results = factor
            .fit_pa(&PrincipalAxisOptions {
                use_smc: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.loadings().ncols(), 3);
        let reconstructed = results.loadings().dot(&results.loadings().t());
        for (x, y) in reconstructed.iter().zip(r.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-8);
        }
    }

    #[test]
    fn plotting_without_backend_is_unavailable() {
        let factor = Factor::new(sample_data(), 1).unwrap();
        let results = factor.fit_pa(&PrincipalAxisOptions::default()).unwrap();
        let err = results.plot_scree().unwrap_err();
        assert!(matches!(err, MvError::Unavailable(_)));
    }

    #[test]
    fn second_rotation_replaces_the_first() {
        let factor = Factor::new(sample_data(), 2).unwrap();
        let mut results = factor.fit_pa(&PrincipalAxisOptions::default()).unwrap();
        results.rotate(RotationMethod::Varimax).unwrap();
        results.rotate(RotationMethod::Quartimax).unwrap();
        assert_eq!(results.rotation(), Some(RotationMethod::Quartimax));

        let direct = rotation::rotate_loadings(results.loadings(), RotationMethod::Quartimax)
            .unwrap();
        for (x, y) in results.rotated_loadings().unwrap().iter().zip(direct.iter()) {
            assert_abs_diff_eq!(x, y, epsilon = 1e-12);
        }
    }
}
