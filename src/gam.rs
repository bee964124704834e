//! # Additive Models via Backfitting
//!
//! Fits an additive model of smooth, linear, and categorical terms by the
//! backfitting algorithm: every term starts at zero, and the loop cycles
//! through the terms, refitting each against the partial residuals left by
//! all the others, centering each refit to zero mean, until the largest
//! relative change in any term's fitted values falls below tolerance. The
//! shared intercept is the response mean. Each model owns cloned term
//! configurations; composing a new model from updated configs is an
//! explicit re-fit, never an aliased update.

use crate::data::{DataError, Dataset};
use crate::smooth::{PenalizedSmoother, SmoothError, SmoothingSplineConfig};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

/// A comprehensive error type for additive model fitting and prediction.
#[derive(Error, Debug)]
pub enum GamError {
    #[error("Dataset access failed: {0}")]
    Data(#[from] DataError),

    #[error("Smooth term construction failed: {0}")]
    Smooth(#[from] SmoothError),

    #[error(
        "Backfitting did not converge within {max_iterations} iterations. Last relative change was {last_change:.6e}."
    )]
    BackfittingDidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("An additive model needs at least one term.")]
    NoTerms,

    #[error("No term is attached to column '{0}'.")]
    TermNotFound(String),

    #[error(
        "Term '{column}' is {actual}; this operation applies only to {expected} terms."
    )]
    TermKindMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error(
        "Prediction data contains level '{level}' in column '{column}', which was not seen during training."
    )]
    UnknownLevel { column: String, level: String },

    #[error("Failed to read or write model configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML model configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to serialize model configuration to TOML: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Configuration for a single additive-model term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TermSpec {
    /// A penalized smoothing-spline term. Exactly one of `lambda` or
    /// `target_df` selects the penalty; if both are absent the term
    /// defaults to 4 effective degrees of freedom.
    Smooth {
        column: String,
        target_df: Option<f64>,
        lambda: Option<f64>,
    },
    /// An unpenalized straight-line term.
    Linear { column: String },
    /// A categorical term fitted by group means. Per-level effects are
    /// centered to a zero count-weighted mean, so the shared intercept
    /// carries the overall level; the same convention drives prediction.
    Categorical { column: String },
}

impl TermSpec {
    pub fn smooth_df(column: &str, target_df: f64) -> Self {
        Self::Smooth {
            column: column.to_string(),
            target_df: Some(target_df),
            lambda: None,
        }
    }

    pub fn smooth_lambda(column: &str, lambda: f64) -> Self {
        Self::Smooth {
            column: column.to_string(),
            target_df: None,
            lambda: Some(lambda),
        }
    }

    pub fn linear(column: &str) -> Self {
        Self::Linear {
            column: column.to_string(),
        }
    }

    pub fn categorical(column: &str) -> Self {
        Self::Categorical {
            column: column.to_string(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Smooth { column, .. }
            | Self::Linear { column }
            | Self::Categorical { column } => column,
        }
    }
}

/// The complete blueprint of an additive model fit. Serializable so an
/// analysis can be reproduced from its saved configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdditiveModelConfig {
    pub terms: Vec<TermSpec>,
    pub convergence_tolerance: f64,
    pub max_iterations: usize,
    pub spline: SmoothingSplineConfig,
}

impl Default for AdditiveModelConfig {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            convergence_tolerance: 1e-6,
            max_iterations: 100,
            spline: SmoothingSplineConfig::default(),
        }
    }
}

impl AdditiveModelConfig {
    pub fn with_terms(terms: Vec<TermSpec>) -> Self {
        Self {
            terms,
            ..Self::default()
        }
    }

    /// Saves the configuration to a human-readable TOML file.
    pub fn save(&self, path: &str) -> Result<(), GamError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, GamError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

/// Partial-dependence values for one term over its own grid, other terms
/// held at their fitted training contributions.
#[derive(Debug, Clone)]
pub struct PartialDependence {
    pub grid: Array1<f64>,
    pub fit: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// One level of a fitted categorical term.
#[derive(Debug, Clone)]
pub struct LevelEffect {
    pub level: String,
    pub effect: f64,
    pub std_error: f64,
    pub count: usize,
}

#[derive(Debug, Clone)]
enum FittedTerm {
    Smooth {
        column: String,
        smoother: PenalizedSmoother,
        coefficients: Array1<f64>,
        /// Training mean of the raw smooth, subtracted to center the term.
        center: f64,
        fitted: Array1<f64>,
    },
    Linear {
        column: String,
        slope: f64,
        x_mean: f64,
        sxx: f64,
        /// Training covariate minus its mean, kept for refits.
        x_centered: Array1<f64>,
        fitted: Array1<f64>,
    },
    Categorical {
        column: String,
        levels: Vec<String>,
        effects: Vec<f64>,
        counts: Vec<usize>,
        /// Per-row level codes of the training data, kept for refits.
        codes: Vec<usize>,
        fitted: Array1<f64>,
    },
}

impl FittedTerm {
    fn column(&self) -> &str {
        match self {
            Self::Smooth { column, .. }
            | Self::Linear { column, .. }
            | Self::Categorical { column, .. } => column,
        }
    }

    fn fitted(&self) -> &Array1<f64> {
        match self {
            Self::Smooth { fitted, .. }
            | Self::Linear { fitted, .. }
            | Self::Categorical { fitted, .. } => fitted,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Smooth { .. } => "smooth",
            Self::Linear { .. } => "linear",
            Self::Categorical { .. } => "categorical",
        }
    }

    /// Effective degrees of freedom attributed to this term, excluding the
    /// shared intercept.
    fn edf(&self) -> f64 {
        match self {
            Self::Smooth { smoother, .. } => (smoother.edf() - 1.0).max(0.0),
            Self::Linear { .. } => 1.0,
            Self::Categorical { levels, .. } => (levels.len() as f64 - 1.0).max(0.0),
        }
    }
}

/// An additive model fitted by backfitting. Frozen once converged.
#[derive(Debug, Clone)]
pub struct FittedAdditiveModel {
    config: AdditiveModelConfig,
    intercept: f64,
    terms: Vec<FittedTerm>,
    rss: f64,
    /// Residual variance with the effective-df-adjusted denominator.
    sigma2: f64,
    df_residual: f64,
    iterations: usize,
}

/// Fits an additive model by backfitting. `response` names a numeric column
/// of `dataset`; each term in the config names one predictor column.
pub fn fit_additive_model(
    dataset: &Dataset,
    response: &str,
    config: &AdditiveModelConfig,
) -> Result<FittedAdditiveModel, GamError> {
    if config.terms.is_empty() {
        return Err(GamError::NoTerms);
    }
    let y = dataset.numeric(response)?.to_owned();
    let n = y.len();
    let intercept = y.mean().unwrap_or(0.0);

    log::info!(
        "Backfitting additive model: {} observations, {} terms, response '{response}'",
        n,
        config.terms.len()
    );

    let mut terms = internal::initialize_terms(dataset, config, n)?;

    // total = sum of all current term fits; maintained incrementally.
    let mut total = Array1::<f64>::zeros(n);
    let mut last_change = f64::INFINITY;
    let mut converged_at = None;

    for iteration in 1..=config.max_iterations {
        let mut max_rel_change = 0.0f64;

        for k in 0..terms.len() {
            // Partial residuals: response minus intercept and every other
            // term's current fit.
            let partial = &y - intercept - (&total - terms[k].fitted());
            let new_fit = internal::refit_term(&mut terms[k], partial.view())?;

            let old = terms[k].fitted().clone();
            let delta_inf = (&new_fit - &old)
                .iter()
                .fold(0.0f64, |acc, &v| acc.max(v.abs()));
            let old_inf = old.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
            let rel = delta_inf / (1.0 + old_inf);
            max_rel_change = max_rel_change.max(rel);

            total = &total - &old + &new_fit;
            internal::store_fit(&mut terms[k], new_fit);
        }

        log::debug!("backfitting iteration {iteration}: max relative change {max_rel_change:.3e}");
        last_change = max_rel_change;
        if max_rel_change < config.convergence_tolerance {
            converged_at = Some(iteration);
            break;
        }
    }

    let iterations = converged_at.ok_or(GamError::BackfittingDidNotConverge {
        max_iterations: config.max_iterations,
        last_change,
    })?;

    let residuals = &y - intercept - &total;
    let rss = residuals.dot(&residuals);
    let model_df = 1.0 + terms.iter().map(|t| t.edf()).sum::<f64>();
    let df_residual = (n as f64 - model_df).max(1.0);
    let sigma2 = rss / df_residual;

    log::info!(
        "Backfitting converged after {iterations} iterations: rss {rss:.4}, model df {model_df:.2}"
    );

    Ok(FittedAdditiveModel {
        config: config.clone(),
        intercept,
        terms,
        rss,
        sigma2,
        df_residual,
        iterations,
    })
}

impl FittedAdditiveModel {
    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn rss(&self) -> f64 {
        self.rss
    }

    pub fn df_residual(&self) -> f64 {
        self.df_residual
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn config(&self) -> &AdditiveModelConfig {
        &self.config
    }

    /// Effective degrees of freedom of the term attached to `column`.
    pub fn term_edf(&self, column: &str) -> Result<f64, GamError> {
        Ok(self.term(column)?.edf())
    }

    /// Whole-model prediction over a dataset carrying the term columns.
    pub fn predict(&self, dataset: &Dataset) -> Result<Array1<f64>, GamError> {
        let n = dataset.n_rows();
        let mut prediction = Array1::from_elem(n, self.intercept);
        for term in &self.terms {
            match term {
                FittedTerm::Smooth {
                    column,
                    smoother,
                    coefficients,
                    center,
                    ..
                } => {
                    let x = dataset.numeric(column)?;
                    let raw = smoother.predict(x, coefficients.view())?;
                    prediction = prediction + raw - *center;
                }
                FittedTerm::Linear {
                    column,
                    slope,
                    x_mean,
                    ..
                } => {
                    let x = dataset.numeric(column)?;
                    prediction = prediction + x.mapv(|v| slope * (v - x_mean));
                }
                FittedTerm::Categorical {
                    column,
                    levels,
                    effects,
                    ..
                } => {
                    let cat = dataset.categorical(column)?;
                    for (i, &code) in cat.codes().iter().enumerate() {
                        let level = &cat.levels()[code];
                        let trained = levels
                            .iter()
                            .position(|l| l == level)
                            .ok_or_else(|| GamError::UnknownLevel {
                                column: column.clone(),
                                level: level.clone(),
                            })?;
                        prediction[i] += effects[trained];
                    }
                }
            }
        }
        Ok(prediction)
    }

    /// The isolated contribution of one smooth or linear term over a grid of
    /// its own inputs, with a pointwise confidence band at `level`.
    pub fn partial_dependence(
        &self,
        column: &str,
        grid: ArrayView1<f64>,
        level: f64,
    ) -> Result<PartialDependence, GamError> {
        let term = self.term(column)?;
        let crit = StudentsT::new(0.0, 1.0, self.df_residual)
            .map(|d| d.inverse_cdf(1.0 - (1.0 - level) / 2.0))
            .unwrap_or(f64::NAN);

        let (fit, se): (Array1<f64>, Array1<f64>) = match term {
            FittedTerm::Smooth {
                smoother,
                coefficients,
                center,
                ..
            } => {
                let raw = smoother.predict(grid, coefficients.view())?;
                let fit = raw - *center;
                let factor = smoother.pointwise_variance_factor(grid)?;
                let se = factor.mapv(|f| (self.sigma2 * f).sqrt());
                (fit, se)
            }
            FittedTerm::Linear {
                slope, x_mean, sxx, ..
            } => {
                let fit = grid.mapv(|v| slope * (v - x_mean));
                let se = grid.mapv(|v| {
                    (self.sigma2 * (v - x_mean).powi(2) / sxx).max(0.0).sqrt()
                });
                (fit, se)
            }
            FittedTerm::Categorical { .. } => {
                return Err(GamError::TermKindMismatch {
                    column: column.to_string(),
                    expected: "smooth or linear",
                    actual: "categorical",
                });
            }
        };

        let lower = &fit - &(crit * &se);
        let upper = &fit + &(crit * &se);
        Ok(PartialDependence {
            grid: grid.to_owned(),
            fit,
            lower,
            upper,
        })
    }

    /// Per-level effects of a categorical term, with standard errors.
    pub fn categorical_effects(&self, column: &str) -> Result<Vec<LevelEffect>, GamError> {
        match self.term(column)? {
            FittedTerm::Categorical {
                levels,
                effects,
                counts,
                ..
            } => Ok(levels
                .iter()
                .zip(effects.iter())
                .zip(counts.iter())
                .map(|((level, &effect), &count)| LevelEffect {
                    level: level.clone(),
                    effect,
                    std_error: if count > 0 {
                        (self.sigma2 / count as f64).sqrt()
                    } else {
                        f64::NAN
                    },
                    count,
                })
                .collect()),
            other => Err(GamError::TermKindMismatch {
                column: column.to_string(),
                expected: "categorical",
                actual: other.kind(),
            }),
        }
    }

    fn term(&self, column: &str) -> Result<&FittedTerm, GamError> {
        self.terms
            .iter()
            .find(|t| t.column() == column)
            .ok_or_else(|| GamError::TermNotFound(column.to_string()))
    }
}

/// Internal module for the backfitting machinery.
mod internal {
    use super::*;

    pub(super) fn initialize_terms(
        dataset: &Dataset,
        config: &AdditiveModelConfig,
        n: usize,
    ) -> Result<Vec<FittedTerm>, GamError> {
        let zeros = Array1::<f64>::zeros(n);
        config
            .terms
            .iter()
            .map(|spec| match spec {
                TermSpec::Smooth {
                    column,
                    target_df,
                    lambda,
                } => {
                    let x = dataset.numeric(column)?;
                    let smoother = match (lambda, target_df) {
                        (Some(lambda), _) => {
                            PenalizedSmoother::new(x, *lambda, &config.spline)?
                        }
                        (None, Some(df)) => {
                            PenalizedSmoother::with_target_df(x, *df, &config.spline)?
                        }
                        (None, None) => {
                            PenalizedSmoother::with_target_df(x, 4.0, &config.spline)?
                        }
                    };
                    let ncoef = smoother.training_basis().ncols();
                    Ok(FittedTerm::Smooth {
                        column: column.clone(),
                        smoother,
                        coefficients: Array1::zeros(ncoef),
                        center: 0.0,
                        fitted: zeros.clone(),
                    })
                }
                TermSpec::Linear { column } => {
                    let x = dataset.numeric(column)?;
                    let x_mean = x.mean().unwrap_or(0.0);
                    let x_centered = x.mapv(|v| v - x_mean);
                    let sxx = x_centered.dot(&x_centered);
                    Ok(FittedTerm::Linear {
                        column: column.clone(),
                        slope: 0.0,
                        x_mean,
                        sxx,
                        x_centered,
                        fitted: zeros.clone(),
                    })
                }
                TermSpec::Categorical { column } => {
                    let cat = dataset.categorical(column)?;
                    let levels = cat.levels().to_vec();
                    let codes = cat.codes().to_vec();
                    let mut counts = vec![0usize; levels.len()];
                    for &code in &codes {
                        counts[code] += 1;
                    }
                    Ok(FittedTerm::Categorical {
                        column: column.clone(),
                        levels,
                        effects: vec![0.0; counts.len()],
                        counts,
                        codes,
                        fitted: zeros.clone(),
                    })
                }
            })
            .collect()
    }

    /// Refits one term against the partial residuals, returning the new
    /// centered fitted values. The term's parameters are updated in place;
    /// the fitted vector itself is stored by the caller once the change has
    /// been measured.
    pub(super) fn refit_term(
        term: &mut FittedTerm,
        partial: ArrayView1<f64>,
    ) -> Result<Array1<f64>, GamError> {
        match term {
            FittedTerm::Smooth {
                smoother,
                coefficients,
                center,
                ..
            } => {
                let coeffs = smoother.solve(partial)?;
                let raw = smoother.fitted(coeffs.view());
                let mean = raw.mean().unwrap_or(0.0);
                *coefficients = coeffs;
                *center = mean;
                Ok(raw - mean)
            }
            FittedTerm::Linear {
                slope,
                sxx,
                x_centered,
                ..
            } => {
                // Least-squares slope on the centered covariate; the refit
                // is mean-zero by construction.
                let new_slope = if *sxx > 0.0 {
                    x_centered.dot(&partial) / *sxx
                } else {
                    0.0
                };
                *slope = new_slope;
                Ok(x_centered.mapv(|v| new_slope * v))
            }
            FittedTerm::Categorical {
                effects,
                counts,
                codes,
                ..
            } => {
                // Group means of the partial residuals, centered to a zero
                // count-weighted mean.
                let n = partial.len();
                let mut sums = vec![0.0f64; effects.len()];
                for (i, &code) in codes.iter().enumerate() {
                    sums[code] += partial[i];
                }
                let mut new_effects: Vec<f64> = sums
                    .iter()
                    .zip(counts.iter())
                    .map(|(&s, &c)| if c > 0 { s / c as f64 } else { 0.0 })
                    .collect();
                let weighted_mean: f64 = new_effects
                    .iter()
                    .zip(counts.iter())
                    .map(|(&e, &c)| e * c as f64)
                    .sum::<f64>()
                    / n as f64;
                for e in &mut new_effects {
                    *e -= weighted_mean;
                }
                let fit = Array1::from_iter(codes.iter().map(|&code| new_effects[code]));
                *effects = new_effects;
                Ok(fit)
            }
        }
    }

    pub(super) fn store_fit(term: &mut FittedTerm, new_fit: Array1<f64>) {
        match term {
            FittedTerm::Smooth { fitted, .. }
            | FittedTerm::Linear { fitted, .. }
            | FittedTerm::Categorical { fitted, .. } => *fitted = new_fit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::Normal;

    fn simulated_dataset(n: usize, seed: u64) -> (Dataset, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let x1 = Array1::from_iter((0..n).map(|i| i as f64 / (n - 1) as f64 * 6.0));
        let x2 = Array1::from_iter((0..n).map(|_| rng.gen_range(-2.0..2.0)));
        let y = Array1::from_iter((0..n).map(|i| {
            3.0 + (x1[i]).sin() + 0.5 * x2[i] + noise.sample(&mut rng)
        }));
        let dataset = Dataset::new()
            .with_numeric("x1", x1)
            .unwrap()
            .with_numeric("x2", x2)
            .unwrap()
            .with_numeric("y", y.clone())
            .unwrap();
        (dataset, y)
    }

    #[test]
    fn backfitting_recovers_additive_structure() {
        let (dataset, y) = simulated_dataset(300, 42);
        let config = AdditiveModelConfig::with_terms(vec![
            TermSpec::smooth_df("x1", 6.0),
            TermSpec::linear("x2"),
        ]);

        let model = fit_additive_model(&dataset, "y", &config).unwrap();

        assert_abs_diff_eq!(model.intercept(), y.mean().unwrap(), epsilon = 1e-12);
        let predicted = model.predict(&dataset).unwrap();
        let truth: Array1<f64> = Array1::from_iter((0..300).map(|i| {
            let x1 = dataset.numeric("x1").unwrap()[i];
            let x2 = dataset.numeric("x2").unwrap()[i];
            3.0 + x1.sin() + 0.5 * x2
        }));
        let max_err = (&predicted - &truth)
            .iter()
            .fold(0.0f64, |acc, &v| acc.max(v.abs()));
        assert!(
            max_err < 0.25,
            "additive fit should track the generating surface, worst error {max_err}"
        );
    }

    #[test]
    fn term_order_does_not_change_the_fit() {
        let (dataset, _) = simulated_dataset(250, 7);
        let forward = AdditiveModelConfig::with_terms(vec![
            TermSpec::smooth_df("x1", 5.0),
            TermSpec::linear("x2"),
        ]);
        let reversed = AdditiveModelConfig::with_terms(vec![
            TermSpec::linear("x2"),
            TermSpec::smooth_df("x1", 5.0),
        ]);

        let a = fit_additive_model(&dataset, "y", &forward).unwrap();
        let b = fit_additive_model(&dataset, "y", &reversed).unwrap();

        let pa = a.predict(&dataset).unwrap();
        let pb = b.predict(&dataset).unwrap();
        for (va, vb) in pa.iter().zip(pb.iter()) {
            assert_abs_diff_eq!(va, vb, epsilon = 1e-3);
        }
    }

    #[test]
    fn categorical_term_recovers_centered_group_offsets() {
        let n = 90;
        let levels: Vec<&str> = (0..n)
            .map(|i| match i % 3 {
                0 => "a",
                1 => "b",
                _ => "c",
            })
            .collect();
        let offsets = [-2.0, 0.5, 1.5];
        let y = Array1::from_iter((0..n).map(|i| 10.0 + offsets[i % 3]));
        let dataset = Dataset::new()
            .with_categorical("group", &levels)
            .unwrap()
            .with_numeric("y", y)
            .unwrap();

        let config = AdditiveModelConfig::with_terms(vec![TermSpec::categorical("group")]);
        let model = fit_additive_model(&dataset, "y", &config).unwrap();

        let effects = model.categorical_effects("group").unwrap();
        assert_eq!(effects.len(), 3);
        // Equal group sizes, so centering subtracts the plain mean offset.
        let mean_offset = offsets.iter().sum::<f64>() / 3.0;
        for (le, &offset) in effects.iter().zip(offsets.iter()) {
            assert_abs_diff_eq!(le.effect, offset - mean_offset, epsilon = 1e-8);
            assert_eq!(le.count, 30);
        }
        assert_abs_diff_eq!(model.intercept(), 10.0 + mean_offset, epsilon = 1e-8);
    }

    #[test]
    fn prediction_rejects_unseen_levels() {
        let n = 40;
        let levels: Vec<&str> = (0..n).map(|i| if i % 2 == 0 { "x" } else { "y" }).collect();
        let response = Array1::from_iter((0..n).map(|i| (i % 2) as f64));
        let dataset = Dataset::new()
            .with_categorical("group", &levels)
            .unwrap()
            .with_numeric("resp", response)
            .unwrap();

        let config = AdditiveModelConfig::with_terms(vec![TermSpec::categorical("group")]);
        let model = fit_additive_model(&dataset, "resp", &config).unwrap();

        let new_levels: Vec<&str> = vec!["x", "z"];
        let new_data = Dataset::new().with_categorical("group", &new_levels).unwrap();
        let result = model.predict(&new_data);
        assert!(matches!(
            result,
            Err(GamError::UnknownLevel { ref level, .. }) if level == "z"
        ));
    }

    #[test]
    fn empty_term_list_is_rejected() {
        let (dataset, _) = simulated_dataset(50, 1);
        let config = AdditiveModelConfig::default();
        let result = fit_additive_model(&dataset, "y", &config);
        assert!(matches!(result, Err(GamError::NoTerms)));
    }

    #[test]
    fn partial_dependence_band_contains_the_fit() {
        let (dataset, _) = simulated_dataset(200, 3);
        let config = AdditiveModelConfig::with_terms(vec![
            TermSpec::smooth_df("x1", 5.0),
            TermSpec::linear("x2"),
        ]);
        let model = fit_additive_model(&dataset, "y", &config).unwrap();

        let grid = Array1::linspace(0.5, 5.5, 25);
        let pd = model.partial_dependence("x1", grid.view(), 0.95).unwrap();
        for i in 0..grid.len() {
            assert!(pd.lower[i] <= pd.fit[i] && pd.fit[i] <= pd.upper[i]);
        }

        let cat_attempt = model.partial_dependence("missing", grid.view(), 0.95);
        assert!(matches!(cat_attempt, Err(GamError::TermNotFound(_))));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = AdditiveModelConfig::with_terms(vec![
            TermSpec::smooth_lambda("age", 10.0),
            TermSpec::categorical("education"),
        ]);
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        config.save(path).unwrap();
        let loaded = AdditiveModelConfig::load(path).unwrap();

        assert_eq!(loaded.terms.len(), 2);
        assert_eq!(loaded.terms[0].column(), "age");
        assert!(matches!(
            loaded.terms[0],
            TermSpec::Smooth { lambda: Some(l), .. } if l == 10.0
        ));
        assert_abs_diff_eq!(
            loaded.convergence_tolerance,
            config.convergence_tolerance,
            epsilon = 0.0
        );
    }
}
