//! # Sequential Analysis of Variance for Nested Models
//!
//! Compares an ordered sequence of least-squares fits of increasing
//! complexity with F-tests. Each consecutive pair must be nested: every
//! column of the smaller design must lie in the column span of the larger
//! one, verified numerically through an SVD of the larger matrix rather
//! than by trusting column names. The F denominator is the residual mean
//! square of the final, largest model.

use crate::design::DesignMatrix;
use crate::linear::{FittedLinearModel, LinkFunction};
use ndarray::s;
use ndarray_linalg::SVD;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};
use std::fmt;
use thiserror::Error;

/// Relative singular-value cutoff for the rank of the larger design.
const RANK_TOLERANCE: f64 = 1e-10;
/// Relative residual-norm cutoff for a column to count as inside the span.
const SPAN_TOLERANCE: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum AnovaError {
    #[error("An ANOVA comparison needs at least two models; got {0}.")]
    NeedTwoModels(usize),

    #[error(
        "Model {index} was fitted with a non-identity link. F-test comparison applies only to least-squares fits."
    )]
    NotGaussian { index: usize },

    #[error(
        "Model {index} was fitted to {found} observations, but model 0 used {expected}. All models must share the response."
    )]
    SampleSizeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error(
        "Model {smaller} is not nested in model {larger}: column '{column}' lies outside the larger design's span."
    )]
    NotNested {
        smaller: usize,
        larger: usize,
        column: String,
    },

    #[error(
        "Model {index} and its design matrix disagree: the fit has {fit_columns} coefficients but the design has {design_columns} columns."
    )]
    DesignMismatch {
        index: usize,
        fit_columns: usize,
        design_columns: usize,
    },

    #[error("The SVD backend did not return the singular vectors needed for the nesting check.")]
    SpanBasisUnavailable,

    #[error("A linear algebra backend operation failed: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// One row of the comparison table. The first model carries no test.
#[derive(Debug, Clone)]
pub struct AnovaRow {
    pub model: String,
    pub df_residual: f64,
    pub rss: f64,
    pub df_diff: Option<f64>,
    pub ss_diff: Option<f64>,
    pub f_statistic: Option<f64>,
    pub p_value: Option<f64>,
}

/// The full sequential comparison, printable in the familiar layout.
#[derive(Debug, Clone)]
pub struct AnovaTable {
    rows: Vec<AnovaRow>,
}

impl AnovaTable {
    pub fn rows(&self) -> &[AnovaRow] {
        &self.rows
    }
}

impl fmt::Display for AnovaTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis of Variance Table")?;
        writeln!(f)?;
        for (i, row) in self.rows.iter().enumerate() {
            writeln!(f, "Model {}: {}", i + 1, row.model)?;
        }
        writeln!(
            f,
            "{:>8} {:>14} {:>6} {:>14} {:>10} {:>12}",
            "Res.Df", "RSS", "Df", "Sum of Sq", "F", "Pr(>F)"
        )?;
        for row in &self.rows {
            write!(f, "{:>8.1} {:>14.4}", row.df_residual, row.rss)?;
            match (row.df_diff, row.ss_diff, row.f_statistic, row.p_value) {
                (Some(df), Some(ss), Some(stat), Some(p)) => {
                    writeln!(f, " {:>6.1} {:>14.4} {:>10.4} {:>12.6}", df, ss, stat, p)?
                }
                _ => writeln!(f, " {:>6} {:>14} {:>10} {:>12}", "", "", "", "")?,
            }
        }
        Ok(())
    }
}

/// Runs the sequential F-test over models ordered from smallest to largest.
/// Each entry pairs a fitted model with the design matrix it was fit to.
pub fn anova(models: &[(&FittedLinearModel, &DesignMatrix)]) -> Result<AnovaTable, AnovaError> {
    if models.len() < 2 {
        return Err(AnovaError::NeedTwoModels(models.len()));
    }

    let n_obs = models[0].0.n_obs();
    for (index, (fit, design)) in models.iter().enumerate() {
        if fit.link() != LinkFunction::Identity {
            return Err(AnovaError::NotGaussian { index });
        }
        if fit.n_obs() != n_obs {
            return Err(AnovaError::SampleSizeMismatch {
                index,
                expected: n_obs,
                found: fit.n_obs(),
            });
        }
        if fit.coefficients().len() != design.ncols() {
            return Err(AnovaError::DesignMismatch {
                index,
                fit_columns: fit.coefficients().len(),
                design_columns: design.ncols(),
            });
        }
    }

    for i in 0..models.len() - 1 {
        internal::check_nested(models[i].1, models[i + 1].1, i, i + 1)?;
    }

    let (last_fit, _) = models[models.len() - 1];
    let denominator = last_fit.deviance() / last_fit.df_residual();

    log::debug!(
        "sequential ANOVA over {} models, denominator mean square {denominator:.6}",
        models.len()
    );

    let mut rows = Vec::with_capacity(models.len());
    for (i, (fit, design)) in models.iter().enumerate() {
        let label = design.column_names().join(" + ");
        if i == 0 {
            rows.push(AnovaRow {
                model: label,
                df_residual: fit.df_residual(),
                rss: fit.deviance(),
                df_diff: None,
                ss_diff: None,
                f_statistic: None,
                p_value: None,
            });
            continue;
        }

        let (prev, _) = models[i - 1];
        let df_diff = prev.df_residual() - fit.df_residual();
        let ss_diff = prev.deviance() - fit.deviance();

        // Identical spans leave nothing to test.
        let (f_statistic, p_value) = if df_diff.abs() < f64::EPSILON {
            (0.0, 1.0)
        } else {
            let stat = (ss_diff / df_diff) / denominator;
            let p = FisherSnedecor::new(df_diff, last_fit.df_residual())
                .map(|dist| 1.0 - dist.cdf(stat.max(0.0)))
                .unwrap_or(f64::NAN);
            (stat, p)
        };

        rows.push(AnovaRow {
            model: label,
            df_residual: fit.df_residual(),
            rss: fit.deviance(),
            df_diff: Some(df_diff),
            ss_diff: Some(ss_diff),
            f_statistic: Some(f_statistic),
            p_value: Some(p_value),
        });
    }

    Ok(AnovaTable { rows })
}

/// Internal module for the numeric nesting check.
mod internal {
    use super::*;
    use ndarray::{Array2, ArrayView1};

    /// Verifies that every column of `smaller` lies in the column span of
    /// `larger`, up to [`SPAN_TOLERANCE`].
    pub(super) fn check_nested(
        smaller: &DesignMatrix,
        larger: &DesignMatrix,
        smaller_index: usize,
        larger_index: usize,
    ) -> Result<(), AnovaError> {
        let basis = orthonormal_span(larger)?;
        for (j, name) in smaller.column_names().iter().enumerate() {
            let matrix = smaller.matrix();
            let column = matrix.column(j);
            if !in_span(column, &basis) {
                return Err(AnovaError::NotNested {
                    smaller: smaller_index,
                    larger: larger_index,
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Orthonormal basis of the design's column space, truncated to its
    /// numerical rank.
    fn orthonormal_span(design: &DesignMatrix) -> Result<Array2<f64>, AnovaError> {
        let (u_opt, singular_values, _) = design.matrix().svd(true, false)?;
        let u = u_opt.ok_or(AnovaError::SpanBasisUnavailable)?;
        let max_sv = singular_values.iter().cloned().fold(0.0f64, f64::max);
        let rank = singular_values
            .iter()
            .filter(|&&s| s > max_sv * RANK_TOLERANCE)
            .count();
        Ok(u.slice(s![.., ..rank]).to_owned())
    }

    fn in_span(column: ArrayView1<f64>, basis: &Array2<f64>) -> bool {
        let projection = basis.dot(&basis.t().dot(&column));
        let residual = &column.to_owned() - &projection;
        let column_norm = column.dot(&column).sqrt();
        let residual_norm = residual.dot(&residual).sqrt();
        residual_norm <= SPAN_TOLERANCE * column_norm.max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{BasisTransform, KnotSpec, NaturalSplineBasis, PolynomialBasis};
    use crate::design::DesignMatrix;
    use crate::linear::fit_ols;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;

    fn cubic_response(n: usize) -> (Array1<f64>, Array1<f64>) {
        let x = Array1::linspace(-2.0, 2.0, n);
        // Deterministic wiggle standing in for noise, uncorrelated enough
        // with the low-order polynomial space.
        let y = x.mapv(|v: f64| 1.0 + 0.8 * v - 0.4 * v.powi(2) + (17.0 * v).sin() * 0.1);
        (x, y)
    }

    fn polynomial_design(
        n: usize,
        degree: usize,
    ) -> (DesignMatrix, crate::linear::FittedLinearModel) {
        let (x, y) = cubic_response(n);
        let basis = PolynomialBasis {
            degree,
            orthogonal: true,
        };
        let fitted = basis.fit(x.view(), "x").unwrap();
        let block = fitted.transform(x.view()).unwrap();
        let design = DesignMatrix::hstack(&[&DesignMatrix::intercept(n), &block]).unwrap();
        let model = fit_ols(&design, y.view()).unwrap();
        (design, model)
    }

    #[test]
    fn nested_polynomials_produce_a_sequential_table() {
        let (d1, m1) = polynomial_design(200, 1);
        let (d2, m2) = polynomial_design(200, 2);
        let (d3, m3) = polynomial_design(200, 3);

        let table = anova(&[(&m1, &d1), (&m2, &d2), (&m3, &d3)]).unwrap();
        let rows = table.rows();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].f_statistic.is_none());

        // The quadratic term carries real signal, the cubic term does not.
        assert!(rows[1].p_value.unwrap() < 0.001);
        assert!(rows[2].p_value.unwrap() > 0.05);
        // RSS is non-increasing along the sequence.
        assert!(rows[1].rss <= rows[0].rss);
        assert!(rows[2].rss <= rows[1].rss);
    }

    #[test]
    fn identical_models_give_zero_f_and_unit_p() {
        let (d2a, m2a) = polynomial_design(120, 2);
        let (d2b, m2b) = polynomial_design(120, 2);

        let table = anova(&[(&m2a, &d2a), (&m2b, &d2b)]).unwrap();
        let row = &table.rows()[1];
        assert_abs_diff_eq!(row.f_statistic.unwrap(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(row.p_value.unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn non_nested_designs_are_rejected() {
        let n = 150;
        let x = Array1::linspace(0.0, 10.0, n);
        let y = x.mapv(|v: f64| v.sin());

        // A natural spline basis is not spanned by a low-degree polynomial.
        let spline = NaturalSplineBasis {
            knots: KnotSpec::DegreesOfFreedom(4),
        }
        .fit(x.view(), "x")
        .unwrap();
        let spline_design = DesignMatrix::hstack(&[
            &DesignMatrix::intercept(n),
            &spline.transform(x.view()).unwrap(),
        ])
        .unwrap();
        let spline_model = fit_ols(&spline_design, y.view()).unwrap();

        let poly = PolynomialBasis {
            degree: 2,
            orthogonal: false,
        }
        .fit(x.view(), "x")
        .unwrap();
        let poly_design = DesignMatrix::hstack(&[
            &DesignMatrix::intercept(n),
            &poly.transform(x.view()).unwrap(),
        ])
        .unwrap();
        let poly_model = fit_ols(&poly_design, y.view()).unwrap();

        let result = anova(&[(&spline_model, &spline_design), (&poly_model, &poly_design)]);
        assert!(matches!(result, Err(AnovaError::NotNested { .. })));
    }

    #[test]
    fn logistic_fits_are_rejected() {
        let n = 80;
        let x = Array1::linspace(-3.0, 3.0, n);
        // Overlapping classes, so the logistic fit converges cleanly.
        let labels = Array1::from_iter((0..n).map(|i| {
            let base = if x[i] > 0.0 { 1.0 } else { 0.0 };
            if i % 7 == 0 { 1.0 - base } else { base }
        }));

        let mut columns = ndarray::Array2::ones((n, 2));
        columns.column_mut(1).assign(&x);
        let design = DesignMatrix::new(
            columns,
            vec!["(Intercept)".to_string(), "x".to_string()],
        )
        .unwrap();
        let logistic = crate::linear::fit_logistic(&design, labels.view()).unwrap();

        let (d, m) = polynomial_design(n, 1);
        let result = anova(&[(&logistic, &design), (&m, &d)]);
        assert!(matches!(result, Err(AnovaError::NotGaussian { index: 0 })));
    }

    #[test]
    fn a_single_model_is_rejected() {
        let (d, m) = polynomial_design(60, 1);
        let result = anova(&[(&m, &d)]);
        assert!(matches!(result, Err(AnovaError::NeedTwoModels(1))));
    }

    #[test]
    fn table_display_lists_every_model() {
        let (d1, m1) = polynomial_design(100, 1);
        let (d2, m2) = polynomial_design(100, 2);

        let table = anova(&[(&m1, &d1), (&m2, &d2)]).unwrap();
        let rendered = format!("{table}");
        assert!(rendered.contains("Analysis of Variance Table"));
        assert!(rendered.contains("Model 1:"));
        assert!(rendered.contains("Model 2:"));
        assert!(rendered.contains("Pr(>F)"));
    }
}
