//! Multivariate analysis of variance.
//!
//! A [`Manova`] is fitted once from an independent-variable matrix `x` and a
//! dependent-variable matrix `y`; the fitted bundle is immutable and can be
//! reused across any number of hypothesis tests of the form
//! `L * params * M = 0`, where `L` is a contrast matrix over the coefficients
//! and `M` transforms the dependent variables.

use log::debug;
use ndarray::{Array1, Array2};
use ndarray_linalg::{EigVals, Inverse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::Path;

use crate::error::MvError;
use crate::linalg::{matrix_rank, pinv};
use crate::stats::{multivariate_stats, MultivariateStats};

/// A named linear hypothesis `L * params * M = 0`.
#[derive(Clone, Debug)]
pub struct Hypothesis {
    /// Label reported alongside the statistics table.
    pub name: String,
    /// Contrast matrix `L`, one column per independent-variable coefficient.
    pub contrast: Array2<f64>,
    /// Transform matrix `M`, one row per dependent variable. Identity (no
    /// transform) when `None`.
    pub transform: Option<Array2<f64>>,
}

impl Hypothesis {
    pub fn new(name: impl Into<String>, contrast: Array2<f64>) -> Self {
        Self {
            name: name.into(),
            contrast,
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Array2<f64>) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Fitted multivariate linear model `y = x * params`.
///
/// Holds the regression coefficients, the inverse of `x'x`, the residual
/// sums-of-squares-and-cross-products matrix and the residual degrees of
/// freedom. All fields are computed once in [`Manova::new`] and never
/// mutated; concurrent read-only reuse across tests is safe.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manova {
    params: Array2<f64>,
    df_resid: f64,
    inv_cov: Array2<f64>,
    sscpr: Array2<f64>,
    k_exog: usize,
    k_endog: usize,
    terms: Option<Vec<(String, Range<usize>)>>,
}

impl Manova {
    /// Fit the model. `x` is n-by-q (independent variables; include an
    /// intercept column explicitly if one is wanted), `y` is n-by-p
    /// (dependent variables).
    pub fn new(x: Array2<f64>, y: Array2<f64>) -> Result<Self, MvError> {
        let (nobs, k_endog) = y.dim();
        let (nobs1, k_exog) = x.dim();
        if nobs != nobs1 {
            return Err(MvError::validation(format!(
                "x(n={nobs1}) and y(n={nobs}) should have the same number of rows!"
            )));
        }
        debug!("fitting MANOVA: n={nobs}, k_exog={k_exog}, k_endog={k_endog}");

        let df_resid = nobs as f64 - k_exog as f64;
        let params = pinv(&x)?.dot(&y);
        let inv_cov = x.t().dot(&x).inv()?;
        let fitted = x.dot(&params);
        let sscpr = y.t().dot(&y) - fitted.t().dot(&fitted);

        Ok(Self {
            params,
            df_resid,
            inv_cov,
            sscpr,
            k_exog,
            k_endog,
            terms: None,
        })
    }

    /// Attach named model terms, each claiming a contiguous slice of the
    /// columns of `x`. Supplied by an external formula/design-info
    /// collaborator; when present, [`Manova::test`] without explicit
    /// hypotheses derives one hypothesis per term.
    pub fn with_terms(mut self, terms: Vec<(String, Range<usize>)>) -> Result<Self, MvError> {
        for (name, range) in &terms {
            if range.start >= range.end || range.end > self.k_exog {
                return Err(MvError::validation(format!(
                    "term '{}' slices columns {}..{} but x has {} columns",
                    name, range.start, range.end, self.k_exog
                )));
            }
        }
        self.terms = Some(terms);
        Ok(self)
    }

    /// Regression coefficient matrix (q-by-p).
    pub fn params(&self) -> &Array2<f64> {
        &self.params
    }

    /// Residual degrees of freedom, `n - q`.
    pub fn df_resid(&self) -> f64 {
        self.df_resid
    }

    /// Inverse of `x'x`.
    pub fn inv_cov(&self) -> &Array2<f64> {
        &self.inv_cov
    }

    /// Residual sums-of-squares-and-cross-products matrix,
    /// `y'y - (x params)'(x params)`.
    pub fn sscpr(&self) -> &Array2<f64> {
        &self.sscpr
    }

    /// Test the given hypotheses against the fitted model.
    ///
    /// With `None`, one hypothesis is derived per attached term (see
    /// [`Manova::with_terms`]) or, without terms, per raw coefficient column
    /// (`x0`, `x1`, ...), each testing that the coefficients it selects are
    /// jointly zero. Result order matches hypothesis/term order.
    pub fn test(&self, hypotheses: Option<&[Hypothesis]>) -> Result<ManovaResults, MvError> {
        let derived;
        let hypotheses = match hypotheses {
            Some(h) => h,
            None => {
                derived = self.default_hypotheses();
                &derived
            }
        };

        let mut results = Vec::with_capacity(hypotheses.len());
        for hypothesis in hypotheses {
            let table = self.test_one(hypothesis)?;
            results.push((hypothesis.name.clone(), table));
        }
        Ok(ManovaResults { results })
    }

    fn default_hypotheses(&self) -> Vec<Hypothesis> {
        match &self.terms {
            Some(terms) => terms
                .iter()
                .map(|(name, range)| {
                    let mut contrast = Array2::zeros((range.len(), self.k_exog));
                    for (row, col) in range.clone().enumerate() {
                        contrast[[row, col]] = 1.0;
                    }
                    Hypothesis::new(name.clone(), contrast)
                })
                .collect(),
            None => (0..self.k_exog)
                .map(|i| {
                    let mut contrast = Array2::zeros((1, self.k_exog));
                    contrast[[0, i]] = 1.0;
                    Hypothesis::new(format!("x{i}"), contrast)
                })
                .collect(),
        }
    }

    fn test_one(&self, hypothesis: &Hypothesis) -> Result<MultivariateStats, MvError> {
        let l = &hypothesis.contrast;
        if l.ncols() != self.k_exog {
            return Err(MvError::validation(format!(
                "Contrast matrix L should have the same number of columns as x! {} != {}",
                l.ncols(),
                self.k_exog
            )));
        }
        let identity;
        let m = match &hypothesis.transform {
            Some(m) => {
                if m.nrows() != self.k_endog {
                    return Err(MvError::validation(format!(
                        "Transform matrix M should have the same number of rows as the \
                         number of columns of y! {} != {}",
                        m.nrows(),
                        self.k_endog
                    )));
                }
                m
            }
            None => {
                identity = Array2::eye(self.k_endog);
                &identity
            }
        };

        // t1 = L * params * M
        let t1 = l.dot(&self.params).dot(m);
        // t2 = L * inv(x'x) * L'
        let t2 = l.dot(&self.inv_cov).dot(&l.t());
        let q_rank = matrix_rank(&t2)?;

        // H = t1' * inv(t2) * t1, E = M' * sscpr * M
        let h = t1.t().dot(&t2.inv()?).dot(&t1);
        let e = m.t().dot(&self.sscpr).dot(m);

        let eh = &e + &h;
        let p_rank = matrix_rank(&eh)?;

        // Eigenvalues of (E + H)^-1 H, real parts only: the matrix is a
        // product of symmetric factors, so any imaginary parts are round-off.
        let mut eigenvals: Vec<f64> = eh
            .inv()?
            .dot(&h)
            .eigvals()?
            .iter()
            .map(|c| c.re)
            .collect();
        eigenvals.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Ok(multivariate_stats(
            Array1::from(eigenvals).view(),
            p_rank,
            q_rank,
            self.df_resid,
        ))
    }

    /// Save the fitted bundle with bincode.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<(), MvError> {
        let file = File::create(path.as_ref()).map_err(|e| {
            MvError::Serialization(format!("failed to create file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| MvError::Serialization(e.to_string()))?;
        Ok(())
    }

    /// Load a fitted bundle previously saved with [`Manova::save_model`].
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self, MvError> {
        let file = File::open(path.as_ref()).map_err(|e| {
            MvError::Serialization(format!("failed to open file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut reader = BufReader::new(file);
        let model: Manova =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| MvError::Serialization(e.to_string()))?;

        if model.params.dim() != (model.k_exog, model.k_endog)
            || model.inv_cov.dim() != (model.k_exog, model.k_exog)
            || model.sscpr.dim() != (model.k_endog, model.k_endog)
        {
            return Err(MvError::Serialization(
                "loaded model has inconsistent matrix dimensions".to_string(),
            ));
        }
        Ok(model)
    }
}

/// Ordered collection of `(label, statistics table)` pairs, one per tested
/// hypothesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManovaResults {
    results: Vec<(String, MultivariateStats)>,
}

impl ManovaResults {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (String, MultivariateStats)> {
        self.results.iter()
    }
}

impl std::ops::Index<usize> for ManovaResults {
    type Output = (String, MultivariateStats);

    fn index(&self, index: usize) -> &Self::Output {
        &self.results[index]
    }
}

impl fmt::Display for ManovaResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MANOVA results")?;
        for (name, table) in &self.results {
            writeln!(f, "\nEffect: {name}")?;
            write!(f, "{table}")?;
        }
        Ok(())
    }
}
