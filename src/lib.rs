// Multivariate statistics: factor analysis, MANOVA, canonical correlation

#![doc = include_str!("../README.md")]

pub mod cancorr;
pub mod error;
pub mod factor;
pub mod linalg;
pub mod manova;
pub mod rotation;
pub mod stats;

pub use cancorr::{CanCorr, SequentialTest};
pub use error::MvError;
pub use factor::{Factor, FactorPlotter, FactorResults, PrincipalAxisOptions, RotationMethod};
pub use manova::{Hypothesis, Manova, ManovaResults};
pub use stats::{multivariate_stats, MultivariateStats, TestStatistic};
