//! # Penalized Smoothing Splines
//!
//! A smoothing spline is fit here as a penalized regression spline: a
//! generous cubic B-spline basis plus a second-order difference penalty on
//! the coefficients, solved through the penalized normal equations
//! `(B'B + lambda * S) theta = B'y`. Model flexibility is summarized by the
//! effective degrees of freedom, the trace of the hat matrix; a bisection
//! routine converts a target degrees-of-freedom into the penalty strength
//! that achieves it.

use crate::basis::{
    BSplineBasis, BasisError, BasisTransform, FittedBSpline, KnotSpec,
    create_difference_penalty_matrix,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::Inverse;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A comprehensive error type for smoothing-spline fitting.
#[derive(Error, Debug)]
pub enum SmoothError {
    #[error("Underlying basis construction failed: {0}")]
    Basis(#[from] BasisError),

    #[error("Penalty strength must be non-negative and finite, but was {0}.")]
    InvalidPenalty(f64),

    #[error(
        "A target of {requested:.3} effective degrees of freedom is unreachable: this basis spans [{min:.3}, {max:.3}]."
    )]
    UnsatisfiableDf { requested: f64, min: f64, max: f64 },

    #[error("Predictor has {xs} values but the response has {ys}.")]
    LengthMismatch { xs: usize, ys: usize },

    #[error("A linear system solve failed while fitting the penalized spline: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// Structural configuration of the spline underlying a smoother.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothingSplineConfig {
    pub num_internal_knots: usize,
    pub degree: usize,
    pub penalty_order: usize,
}

impl Default for SmoothingSplineConfig {
    fn default() -> Self {
        Self {
            num_internal_knots: 10,
            degree: 3,
            penalty_order: 2,
        }
    }
}

/// The reusable solver for one smooth term: training basis, penalty, and
/// the factorization pieces for a fixed penalty strength. Backfitting
/// re-solves against fresh partial residuals without rebuilding any of this.
#[derive(Debug, Clone)]
pub struct PenalizedSmoother {
    basis: FittedBSpline,
    b_train: Array2<f64>,
    btb: Array2<f64>,
    lambda: f64,
    /// `(B'B + lambda * S)^-1`.
    a_inv: Array2<f64>,
    edf: f64,
}

impl PenalizedSmoother {
    /// Builds the smoother for a fixed penalty strength.
    pub fn new(
        x: ArrayView1<f64>,
        lambda: f64,
        config: &SmoothingSplineConfig,
    ) -> Result<Self, SmoothError> {
        let parts = internal::BasisParts::build(x, config)?;
        parts.at_lambda(lambda)
    }

    /// Builds the smoother whose hat-matrix trace equals `target_df + 1`,
    /// the extra degree accounting for the unpenalized constant direction.
    /// The penalty strength is found by bisection on the log scale.
    pub fn with_target_df(
        x: ArrayView1<f64>,
        target_df: f64,
        config: &SmoothingSplineConfig,
    ) -> Result<Self, SmoothError> {
        let parts = internal::BasisParts::build(x, config)?;
        let target_trace = target_df + 1.0;

        const RHO_LO: f64 = -25.0;
        const RHO_HI: f64 = 25.0;
        let edf_hi = parts.at_lambda(RHO_LO.exp())?.edf;
        let edf_lo = parts.at_lambda(RHO_HI.exp())?.edf;
        if target_trace > edf_hi + 1e-6 || target_trace < edf_lo - 1e-6 {
            return Err(SmoothError::UnsatisfiableDf {
                requested: target_df,
                min: edf_lo - 1.0,
                max: edf_hi - 1.0,
            });
        }

        // edf is monotone decreasing in lambda, so plain bisection on rho.
        let mut lo = RHO_LO;
        let mut hi = RHO_HI;
        let mut best = parts.at_lambda(((lo + hi) / 2.0).exp())?;
        for _ in 0..100 {
            let mid = (lo + hi) / 2.0;
            best = parts.at_lambda(mid.exp())?;
            let diff = best.edf - target_trace;
            if diff.abs() < 1e-4 {
                break;
            }
            if diff > 0.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        log::debug!(
            "df search: target trace {target_trace:.3} reached at lambda {:.3e} (edf {:.3})",
            best.lambda,
            best.edf
        );
        Ok(best)
    }

    /// Solves the penalized normal equations for a response, returning the
    /// spline coefficients.
    pub fn solve(&self, y: ArrayView1<f64>) -> Result<Array1<f64>, SmoothError> {
        if y.len() != self.b_train.nrows() {
            return Err(SmoothError::LengthMismatch {
                xs: self.b_train.nrows(),
                ys: y.len(),
            });
        }
        let bty = self.b_train.t().dot(&y);
        Ok(self.a_inv.dot(&bty))
    }

    /// Fitted values at the training points for given coefficients.
    pub fn fitted(&self, coefficients: ArrayView1<f64>) -> Array1<f64> {
        self.b_train.dot(&coefficients)
    }

    /// Evaluates the smooth at arbitrary points for given coefficients.
    pub fn predict(
        &self,
        x: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SmoothError> {
        let block = self.basis.transform(x)?;
        Ok(block.matrix().dot(&coefficients))
    }

    /// `b(x)' A^-1 B'B A^-1 b(x)` per query point; multiplied by the
    /// residual variance this is the pointwise variance of the fitted smooth.
    pub fn pointwise_variance_factor(
        &self,
        x: ArrayView1<f64>,
    ) -> Result<Array1<f64>, SmoothError> {
        let block = self.basis.transform(x)?;
        let m = block.matrix().dot(&self.a_inv);
        let inner = m.dot(&self.btb);
        let mut factor = Array1::zeros(x.len());
        for i in 0..x.len() {
            factor[i] = inner.row(i).dot(&m.row(i)).max(0.0);
        }
        Ok(factor)
    }

    /// Effective degrees of freedom: `trace((B'B + lambda S)^-1 B'B)`.
    pub fn edf(&self) -> f64 {
        self.edf
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    pub fn basis(&self) -> &FittedBSpline {
        &self.basis
    }

    pub fn training_basis(&self) -> ArrayView2<'_, f64> {
        self.b_train.view()
    }
}

/// A smoothing spline fitted to one predictor/response pair.
#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    smoother: PenalizedSmoother,
    coefficients: Array1<f64>,
    fitted_values: Array1<f64>,
    rss: f64,
}

impl SmoothingSpline {
    /// Fits with an explicit penalty strength.
    pub fn fit(
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        lambda: f64,
    ) -> Result<Self, SmoothError> {
        Self::fit_with(x, y, lambda, &SmoothingSplineConfig::default())
    }

    pub fn fit_with(
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        lambda: f64,
        config: &SmoothingSplineConfig,
    ) -> Result<Self, SmoothError> {
        let smoother = PenalizedSmoother::new(x, lambda, config)?;
        Self::finish(smoother, y)
    }

    /// Fits with the penalty strength implied by a target effective
    /// degrees of freedom.
    pub fn fit_df(
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        target_df: f64,
    ) -> Result<Self, SmoothError> {
        Self::fit_df_with(x, y, target_df, &SmoothingSplineConfig::default())
    }

    pub fn fit_df_with(
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        target_df: f64,
        config: &SmoothingSplineConfig,
    ) -> Result<Self, SmoothError> {
        let smoother = PenalizedSmoother::with_target_df(x, target_df, config)?;
        Self::finish(smoother, y)
    }

    fn finish(smoother: PenalizedSmoother, y: ArrayView1<f64>) -> Result<Self, SmoothError> {
        let coefficients = smoother.solve(y)?;
        let fitted_values = smoother.fitted(coefficients.view());
        let residuals = &y.to_owned() - &fitted_values;
        let rss = residuals.dot(&residuals);
        Ok(Self {
            smoother,
            coefficients,
            fitted_values,
            rss,
        })
    }

    pub fn predict(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, SmoothError> {
        self.smoother.predict(x, self.coefficients.view())
    }

    pub fn fitted_values(&self) -> ArrayView1<'_, f64> {
        self.fitted_values.view()
    }

    pub fn edf(&self) -> f64 {
        self.smoother.edf()
    }

    pub fn lambda(&self) -> f64 {
        self.smoother.lambda()
    }

    pub fn rss(&self) -> f64 {
        self.rss
    }
}

/// One point of a penalty-strength profile.
#[derive(Debug, Clone, Copy)]
pub struct LambdaProfile {
    pub lambda: f64,
    pub edf: f64,
    pub rss: f64,
}

/// Fits the same data across a grid of penalty strengths. Candidates are
/// independent, so the grid is evaluated in parallel.
pub fn profile_lambda(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    grid: &[f64],
    config: &SmoothingSplineConfig,
) -> Result<Vec<LambdaProfile>, SmoothError> {
    if x.len() != y.len() {
        return Err(SmoothError::LengthMismatch {
            xs: x.len(),
            ys: y.len(),
        });
    }
    let parts = internal::BasisParts::build(x, config)?;
    let y_owned = y.to_owned();
    grid.par_iter()
        .map(|&lambda| {
            let smoother = parts.at_lambda(lambda)?;
            let coeffs = smoother.solve(y_owned.view())?;
            let fitted = smoother.fitted(coeffs.view());
            let residuals = &y_owned - &fitted;
            Ok(LambdaProfile {
                lambda,
                edf: smoother.edf(),
                rss: residuals.dot(&residuals),
            })
        })
        .collect()
}

/// Internal module holding the shared basis/penalty pieces.
mod internal {
    use super::*;

    /// The lambda-independent pieces of a smoother, built once per term.
    pub(super) struct BasisParts {
        basis: FittedBSpline,
        b_train: Array2<f64>,
        btb: Array2<f64>,
        penalty: Array2<f64>,
    }

    impl BasisParts {
        pub(super) fn build(
            x: ArrayView1<f64>,
            config: &SmoothingSplineConfig,
        ) -> Result<Self, SmoothError> {
            // Keep the basis comfortably smaller than the data so the
            // penalty, not the basis size, controls the fit.
            let num_knots = config
                .num_internal_knots
                .min(x.len().saturating_sub(config.degree + 2));
            let basis = BSplineBasis {
                degree: config.degree,
                knots: KnotSpec::Quantile(num_knots),
                include_intercept: true,
            }
            .fit(x, "s")?;
            let b_train = basis.transform(x)?.into_matrix();
            let btb = b_train.t().dot(&b_train);
            let penalty =
                create_difference_penalty_matrix(b_train.ncols(), config.penalty_order)?;
            Ok(Self {
                basis,
                b_train,
                btb,
                penalty,
            })
        }

        pub(super) fn at_lambda(&self, lambda: f64) -> Result<PenalizedSmoother, SmoothError> {
            if !lambda.is_finite() || lambda < 0.0 {
                return Err(SmoothError::InvalidPenalty(lambda));
            }
            let a = &self.btb + &(lambda * &self.penalty);
            let a_inv = a.inv()?;
            // edf = trace(A^-1 B'B)
            let hat_core = a_inv.dot(&self.btb);
            let edf = hat_core.diag().sum();
            Ok(PenalizedSmoother {
                basis: self.basis.clone(),
                b_train: self.b_train.clone(),
                btb: self.btb.clone(),
                lambda,
                a_inv,
                edf,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;

    fn wiggly(n: usize) -> (Array1<f64>, Array1<f64>) {
        let x = Array::linspace(0.0, 6.28, n);
        let y = x.mapv(|v: f64| v.sin() + 0.1 * (v * 9.0).sin());
        (x, y)
    }

    #[test]
    fn test_edf_decreases_with_lambda() {
        let (x, y) = wiggly(150);
        let loose = SmoothingSpline::fit(x.view(), y.view(), 1e-4).unwrap();
        let stiff = SmoothingSpline::fit(x.view(), y.view(), 1e4).unwrap();
        assert!(loose.edf() > stiff.edf());
        assert!(loose.rss() < stiff.rss());
    }

    #[test]
    fn test_df_search_hits_requested_trace() {
        let (x, y) = wiggly(200);
        for target in [3.0, 5.0, 8.0] {
            let fit = SmoothingSpline::fit_df(x.view(), y.view(), target).unwrap();
            assert_abs_diff_eq!(fit.edf(), target + 1.0, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_df_search_rejects_unreachable_target() {
        let (x, y) = wiggly(100);
        let err = SmoothingSpline::fit_df(x.view(), y.view(), 200.0).unwrap_err();
        assert!(matches!(err, SmoothError::UnsatisfiableDf { .. }));
    }

    #[test]
    fn test_infinite_penalty_collapses_to_line() {
        // With a second-order difference penalty, a huge lambda shrinks the
        // fit to the two-dimensional penalty null space: edf reaches 2 and
        // the curve is straight. The repeated boundary knots bend the null
        // space slightly within one knot spacing of each end, so linearity
        // is asserted on the interior of the range.
        let x = Array::linspace(0.0, 10.0, 121);
        let y = x.mapv(|v: f64| 1.5 + 0.8 * v + 0.4 * (v * 3.0).sin());
        let fit = SmoothingSpline::fit(x.view(), y.view(), 1e10).unwrap();
        assert_abs_diff_eq!(fit.edf(), 2.0, epsilon = 1e-3);

        let fitted = fit.fitted_values();
        for i in 25..96 {
            let second = fitted[i - 1] - 2.0 * fitted[i] + fitted[i + 1];
            assert!(
                second.abs() < 1e-4,
                "interior second difference at index {i} was {second}"
            );
        }
    }

    #[test]
    fn test_negative_lambda_rejected() {
        let (x, y) = wiggly(60);
        assert!(matches!(
            SmoothingSpline::fit(x.view(), y.view(), -1.0),
            Err(SmoothError::InvalidPenalty(_))
        ));
    }

    #[test]
    fn test_profile_matches_direct_fits() {
        let (x, y) = wiggly(120);
        let grid = [1e-3, 1.0, 1e3];
        let profile = profile_lambda(x.view(), y.view(), &grid, &Default::default()).unwrap();
        assert_eq!(profile.len(), 3);
        for (point, &lambda) in profile.iter().zip(grid.iter()) {
            let direct = SmoothingSpline::fit(x.view(), y.view(), lambda).unwrap();
            assert_abs_diff_eq!(point.edf, direct.edf(), epsilon = 1e-9);
            assert_abs_diff_eq!(point.rss, direct.rss(), epsilon = 1e-9);
        }
        assert!(profile[0].edf > profile[2].edf);
    }
}
