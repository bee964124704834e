//! # Linear Model Fitting
//!
//! Ordinary least squares for continuous responses and iteratively
//! reweighted least squares (logit link) for binary responses, over an
//! assembled [`DesignMatrix`](crate::design::DesignMatrix). A fitted model
//! carries its coefficient vector, the unscaled coefficient covariance, the
//! residual variance estimate, and the column basis it was trained on, and
//! refuses to predict from a design built on a different basis.

use crate::design::DesignMatrix;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::{Inverse, QR, Solve};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};
use thiserror::Error;

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFunction {
    /// The identity link, for continuous outcomes.
    Identity,
    /// The logit link, for binary outcomes (logistic regression).
    Logit,
}

/// A comprehensive error type for the model fitting process.
#[derive(Error, Debug)]
pub enum FitError {
    #[error(
        "The design matrix is rank-deficient near column '{column}': |R[{index},{index}]| = {diagonal:.3e} is below tolerance {tolerance:.3e}."
    )]
    SingularDesign {
        column: String,
        index: usize,
        diagonal: f64,
        tolerance: f64,
    },

    #[error(
        "IRLS did not converge within {max_iterations} iterations. Last coefficient update norm was {last_change:.6e}."
    )]
    IrlsDidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("Design matrix has {rows} rows but the response has {responses}.")]
    LengthMismatch { rows: usize, responses: usize },

    #[error(
        "Prediction design does not match the column basis this model was fitted on (expected {expected} columns starting with '{first_expected}', found {found})."
    )]
    DesignMismatch {
        expected: usize,
        first_expected: String,
        found: usize,
    },

    #[error("Binary response must contain only 0.0 and 1.0, found {0} at row {1}.")]
    NonBinaryResponse(f64, usize),

    #[error("Model has no residual degrees of freedom ({n_obs} observations, {n_coeffs} coefficients).")]
    NoResidualDf { n_obs: usize, n_coeffs: usize },

    #[error("A linear system solve failed; the normal equations may be singular: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// Options controlling the fitting loops and rank detection.
#[derive(Debug, Clone, Copy)]
pub struct FitOptions {
    /// Relative tolerance on the R diagonal below which the design is
    /// declared rank-deficient.
    pub rank_tolerance: f64,
    /// IRLS convergence tolerance on the coefficient update norm.
    pub irls_tolerance: f64,
    /// IRLS iteration cap.
    pub max_iterations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            rank_tolerance: 1e-10,
            irls_tolerance: 1e-8,
            max_iterations: 50,
        }
    }
}

/// One row of a coefficient summary table.
#[derive(Debug, Clone)]
pub struct CoefficientRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// t-statistic under the identity link, z-statistic under the logit link.
    pub statistic: f64,
    pub p_value: f64,
}

/// Point predictions with a pointwise confidence band.
#[derive(Debug, Clone)]
pub struct PredictionIntervals {
    pub fit: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

/// A linear or logistic model fitted to a design matrix. Immutable after fitting.
#[derive(Debug, Clone)]
pub struct FittedLinearModel {
    link: LinkFunction,
    coefficients: Array1<f64>,
    column_names: Vec<String>,
    /// `(X'X)^-1` for OLS, `(X'WX)^-1` at convergence for IRLS.
    covariance_unscaled: Array2<f64>,
    /// Residual variance estimate for OLS; fixed at 1.0 for the logit link.
    scale: f64,
    /// RSS under the identity link, -2 log-likelihood under the logit link.
    deviance: f64,
    df_residual: f64,
    n_obs: usize,
}

/// Fits an ordinary least squares model by QR decomposition.
pub fn fit_ols(design: &DesignMatrix, y: ArrayView1<f64>) -> Result<FittedLinearModel, FitError> {
    fit_ols_with(design, y, &FitOptions::default())
}

pub fn fit_ols_with(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    options: &FitOptions,
) -> Result<FittedLinearModel, FitError> {
    check_shapes(design, y)?;
    let x = design.matrix();
    let n = x.nrows();
    let p = x.ncols();
    if n <= p {
        return Err(FitError::NoResidualDf {
            n_obs: n,
            n_coeffs: p,
        });
    }

    log::debug!("OLS fit: {n} observations, {p} coefficients");

    let (q, r) = x.to_owned().qr()?;
    check_rank(&r, design.column_names(), options.rank_tolerance)?;

    let qty = q.t().dot(&y);
    let coefficients = r.solve(&qty)?;

    let fitted = x.dot(&coefficients);
    let residuals = &y.to_owned() - &fitted;
    let rss = residuals.dot(&residuals);
    let df_residual = (n - p) as f64;
    let scale = rss / df_residual;

    // (X'X)^-1 = R^-1 R^-T from the triangular factor.
    let r_inv = r.inv()?;
    let covariance_unscaled = r_inv.dot(&r_inv.t());

    Ok(FittedLinearModel {
        link: LinkFunction::Identity,
        coefficients,
        column_names: design.column_names().to_vec(),
        covariance_unscaled,
        scale,
        deviance: rss,
        df_residual,
        n_obs: n,
    })
}

/// Fits a logistic regression by iteratively reweighted least squares.
pub fn fit_logistic(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
) -> Result<FittedLinearModel, FitError> {
    fit_logistic_with(design, y, &FitOptions::default())
}

pub fn fit_logistic_with(
    design: &DesignMatrix,
    y: ArrayView1<f64>,
    options: &FitOptions,
) -> Result<FittedLinearModel, FitError> {
    check_shapes(design, y)?;
    if let Some((row, &v)) = y
        .iter()
        .enumerate()
        .find(|&(_, &v)| v != 0.0 && v != 1.0)
        .map(|(i, v)| (i, v))
    {
        return Err(FitError::NonBinaryResponse(v, row));
    }

    let x = design.matrix();
    let n = x.nrows();
    let p = x.ncols();
    if n <= p {
        return Err(FitError::NoResidualDf {
            n_obs: n,
            n_coeffs: p,
        });
    }

    log::debug!("IRLS fit: {n} observations, {p} coefficients");

    let mut beta = Array1::<f64>::zeros(p);
    let mut last_change = f64::INFINITY;

    for iteration in 0..options.max_iterations {
        let (mu, w, z) = internal::update_glm_vectors(x, beta.view(), y);

        // Weighted least squares on the working response via a sqrt(W)
        // rescaling, solved with the same QR path as OLS.
        let sqrt_w = w.mapv(f64::sqrt);
        let mut xw = x.to_owned();
        for (mut row, &s) in xw.rows_mut().into_iter().zip(sqrt_w.iter()) {
            row *= s;
        }
        let zw = &z * &sqrt_w;

        let (q, r) = xw.qr()?;
        check_rank(&r, design.column_names(), options.rank_tolerance)?;
        let beta_new = r.solve(&q.t().dot(&zw))?;

        let delta = &beta_new - &beta;
        last_change = delta.dot(&delta).sqrt();
        beta = beta_new;

        log::debug!(
            "IRLS iteration {}: update norm {last_change:.3e}, mean mu {:.4}",
            iteration + 1,
            mu.mean().unwrap_or(f64::NAN)
        );

        if last_change < options.irls_tolerance {
            let (mu_final, w_final, _) = internal::update_glm_vectors(x, beta.view(), y);
            let deviance = internal::binomial_deviance(y, mu_final.view());

            let mut xtwx = Array2::<f64>::zeros((p, p));
            for i in 0..n {
                let xi = x.row(i);
                for a in 0..p {
                    for b in 0..p {
                        xtwx[[a, b]] += w_final[i] * xi[a] * xi[b];
                    }
                }
            }
            let covariance_unscaled = xtwx.inv()?;

            log::debug!("IRLS converged after {} iterations", iteration + 1);
            return Ok(FittedLinearModel {
                link: LinkFunction::Logit,
                coefficients: beta,
                column_names: design.column_names().to_vec(),
                covariance_unscaled,
                scale: 1.0,
                deviance,
                df_residual: (n - p) as f64,
                n_obs: n,
            });
        }
    }

    Err(FitError::IrlsDidNotConverge {
        max_iterations: options.max_iterations,
        last_change,
    })
}

impl FittedLinearModel {
    pub fn link(&self) -> LinkFunction {
        self.link
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// RSS under the identity link, -2 log-likelihood under the logit link.
    pub fn deviance(&self) -> f64 {
        self.deviance
    }

    pub fn df_residual(&self) -> f64 {
        self.df_residual
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Residual variance estimate (identity link only; 1.0 under logit).
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// The coefficient summary table: estimate, standard error, t- or
    /// z-statistic, and two-sided p-value per column.
    pub fn summary(&self) -> Vec<CoefficientRow> {
        let normal = Normal::new(0.0, 1.0).expect("standard normal parameters are valid");
        let t_dist = StudentsT::new(0.0, 1.0, self.df_residual).ok();

        self.column_names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let estimate = self.coefficients[j];
                let std_error = (self.scale * self.covariance_unscaled[[j, j]]).sqrt();
                let statistic = if std_error > 0.0 {
                    estimate / std_error
                } else {
                    f64::NAN
                };
                let p_value = if !statistic.is_finite() {
                    f64::NAN
                } else {
                    match self.link {
                        LinkFunction::Identity => t_dist
                            .as_ref()
                            .map_or(f64::NAN, |d| 2.0 * (1.0 - d.cdf(statistic.abs()))),
                        LinkFunction::Logit => 2.0 * (1.0 - normal.cdf(statistic.abs())),
                    }
                };
                CoefficientRow {
                    name: name.clone(),
                    estimate,
                    std_error,
                    statistic,
                    p_value,
                }
            })
            .collect()
    }

    /// Point predictions on the response scale.
    pub fn predict(&self, design: &DesignMatrix) -> Result<Array1<f64>, FitError> {
        self.check_basis(design)?;
        let eta = design.matrix().dot(&self.coefficients);
        Ok(match self.link {
            LinkFunction::Identity => eta,
            LinkFunction::Logit => internal::inverse_logit(eta),
        })
    }

    /// Point predictions with a pointwise confidence band at `level`
    /// (e.g. 0.95). Under the identity link the band uses the Student-t
    /// critical value; under the logit link it is computed on the link
    /// scale with a normal critical value and mapped through the inverse
    /// link.
    pub fn predict_interval(
        &self,
        design: &DesignMatrix,
        level: f64,
    ) -> Result<PredictionIntervals, FitError> {
        self.check_basis(design)?;
        let x = design.matrix();
        let eta = x.dot(&self.coefficients);

        // se(eta_i)^2 = scale * x_i' (X'WX)^-1 x_i
        let cx = x.dot(&self.covariance_unscaled);
        let mut se = Array1::zeros(x.nrows());
        for i in 0..x.nrows() {
            se[i] = (self.scale * cx.row(i).dot(&x.row(i))).max(0.0).sqrt();
        }

        let alpha = 1.0 - level;
        let crit = match self.link {
            LinkFunction::Identity => StudentsT::new(0.0, 1.0, self.df_residual)
                .map(|d| d.inverse_cdf(1.0 - alpha / 2.0))
                .unwrap_or(f64::NAN),
            LinkFunction::Logit => Normal::new(0.0, 1.0)
                .map(|d| d.inverse_cdf(1.0 - alpha / 2.0))
                .expect("standard normal parameters are valid"),
        };

        let lower_eta = &eta - &(crit * &se);
        let upper_eta = &eta + &(crit * &se);
        Ok(match self.link {
            LinkFunction::Identity => PredictionIntervals {
                fit: eta,
                lower: lower_eta,
                upper: upper_eta,
            },
            LinkFunction::Logit => PredictionIntervals {
                fit: internal::inverse_logit(eta),
                lower: internal::inverse_logit(lower_eta),
                upper: internal::inverse_logit(upper_eta),
            },
        })
    }

    fn check_basis(&self, design: &DesignMatrix) -> Result<(), FitError> {
        if design.column_names() != self.column_names.as_slice() {
            return Err(FitError::DesignMismatch {
                expected: self.column_names.len(),
                first_expected: self
                    .column_names
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "<empty>".to_string()),
                found: design.ncols(),
            });
        }
        Ok(())
    }
}

fn check_shapes(design: &DesignMatrix, y: ArrayView1<f64>) -> Result<(), FitError> {
    if design.nrows() != y.len() {
        return Err(FitError::LengthMismatch {
            rows: design.nrows(),
            responses: y.len(),
        });
    }
    Ok(())
}

fn check_rank(r: &Array2<f64>, names: &[String], tolerance: f64) -> Result<(), FitError> {
    let diag = r.diag();
    let max_diag = diag.iter().fold(0.0f64, |acc, &d| acc.max(d.abs()));
    let threshold = tolerance * max_diag.max(1.0);
    if let Some((index, &d)) = diag
        .iter()
        .enumerate()
        .find(|(_, d)| d.abs() < threshold)
    {
        return Err(FitError::SingularDesign {
            column: names
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("#{index}")),
            index,
            diagonal: d.abs(),
            tolerance: threshold,
        });
    }
    Ok(())
}

/// Internal module for the GLM update machinery.
mod internal {
    use super::*;

    /// Computes the mean, IRLS weights, and working response for the logit
    /// link. Eta is clamped to prevent overflow in `exp`, and mu is clamped
    /// away from 0 and 1 to keep the weights finite.
    pub(super) fn update_glm_vectors(
        x: ArrayView2<f64>,
        beta: ArrayView1<f64>,
        y: ArrayView1<f64>,
    ) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let eta = x.dot(&beta).mapv(|e| e.clamp(-700.0, 700.0));
        let mu = eta.mapv(|e| (1.0 / (1.0 + f64::exp(-e))).clamp(1e-8, 1.0 - 1e-8));
        let w = mu.mapv(|m| m * (1.0 - m));
        let z = &eta + &((&y.to_owned() - &mu) / &w);
        (mu, w, z)
    }

    pub(super) fn inverse_logit(eta: Array1<f64>) -> Array1<f64> {
        eta.mapv(|e| {
            let p = 1.0 / (1.0 + f64::exp(-e.clamp(-700.0, 700.0)));
            p.clamp(1e-8, 1.0 - 1e-8)
        })
    }

    /// -2 log-likelihood of a Bernoulli response.
    pub(super) fn binomial_deviance(y: ArrayView1<f64>, mu: ArrayView1<f64>) -> f64 {
        let mut deviance = 0.0;
        for (&yi, &mui) in y.iter().zip(mu.iter()) {
            let mui = mui.clamp(1e-8, 1.0 - 1e-8);
            deviance -= 2.0 * (yi * mui.ln() + (1.0 - yi) * (1.0 - mui).ln());
        }
        deviance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignMatrix;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    fn line_design(x: &Array1<f64>) -> DesignMatrix {
        let intercept = DesignMatrix::intercept(x.len());
        let slope = DesignMatrix::from_column("x", x.view()).unwrap();
        DesignMatrix::hstack(&[&intercept, &slope]).unwrap()
    }

    #[test]
    fn test_ols_recovers_exact_line() {
        let x = Array::linspace(0.0, 10.0, 25);
        let y = x.mapv(|v| 2.0 + 3.0 * v);
        let model = fit_ols(&line_design(&x), y.view()).unwrap();
        assert_abs_diff_eq!(model.coefficients()[0], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients()[1], 3.0, epsilon = 1e-8);
        assert!(model.deviance() < 1e-12);
    }

    #[test]
    fn test_ols_rejects_collinear_design() {
        let x = Array::linspace(0.0, 10.0, 25);
        let dup = DesignMatrix::from_column("x_again", x.view()).unwrap();
        let design =
            DesignMatrix::hstack(&[&line_design(&x), &dup]).unwrap();
        let y = x.mapv(|v| 1.0 + v);
        match fit_ols(&design, y.view()).unwrap_err() {
            FitError::SingularDesign { column, .. } => assert_eq!(column, "x_again"),
            other => panic!("Expected SingularDesign, got {other:?}"),
        }
    }

    #[test]
    fn test_ols_interval_contains_fit_and_widens_at_edges() {
        let x = Array::linspace(-1.0, 1.0, 60);
        let y = x.mapv(|v: f64| 1.0 + 0.5 * v + 0.05 * (v * 37.0).sin());
        let design = line_design(&x);
        let model = fit_ols(&design, y.view()).unwrap();
        let intervals = model.predict_interval(&design, 0.95).unwrap();
        for i in 0..x.len() {
            assert!(intervals.lower[i] <= intervals.fit[i]);
            assert!(intervals.fit[i] <= intervals.upper[i]);
        }
        // The band is narrowest near the mean of x.
        let mid = x.len() / 2;
        let width_mid = intervals.upper[mid] - intervals.lower[mid];
        let width_edge = intervals.upper[0] - intervals.lower[0];
        assert!(width_edge > width_mid);
    }

    #[test]
    fn test_prediction_rejects_foreign_basis() {
        let x = Array::linspace(0.0, 1.0, 30);
        let y = x.clone();
        let model = fit_ols(&line_design(&x), y.view()).unwrap();
        let foreign = DesignMatrix::from_column("other", x.view()).unwrap();
        assert!(matches!(
            model.predict(&foreign),
            Err(FitError::DesignMismatch { .. })
        ));
    }

    #[test]
    fn test_logistic_recovers_separating_slope_sign() {
        // Strongly separated but noisy classes around x = 0.
        let x = Array::linspace(-3.0, 3.0, 200);
        let y = x.mapv(|v| {
            let p = 1.0 / (1.0 + f64::exp(-3.0 * v));
            if p > 0.5 { 1.0 } else { 0.0 }
        });
        // Flip a few labels so the data is not perfectly separated.
        let mut y = y;
        for i in (0..y.len()).step_by(23) {
            y[i] = 1.0 - y[i];
        }
        let design = line_design(&x);
        let model = fit_logistic(&design, y.view()).unwrap();
        assert!(model.coefficients()[1] > 0.5);

        let probs = model.predict(&design).unwrap();
        assert!(probs.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(probs[0] < 0.2 && probs[probs.len() - 1] > 0.8);
    }

    #[test]
    fn test_logistic_rejects_non_binary_response() {
        let x = Array::linspace(0.0, 1.0, 10);
        let y = array![0.0, 1.0, 0.5, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        match fit_logistic(&line_design(&x), y.view()).unwrap_err() {
            FitError::NonBinaryResponse(v, row) => {
                assert_eq!(v, 0.5);
                assert_eq!(row, 2);
            }
            other => panic!("Expected NonBinaryResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_summary_flags_significant_slope() {
        let x = Array::linspace(0.0, 10.0, 100);
        let y = x.mapv(|v: f64| 5.0 + 2.0 * v + 0.01 * (v * 13.0).cos());
        let model = fit_ols(&line_design(&x), y.view()).unwrap();
        let rows = model.summary();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].name, "x");
        assert!(rows[1].p_value < 1e-6);
        assert_abs_diff_eq!(rows[1].estimate, 2.0, epsilon = 1e-2);
    }
}
