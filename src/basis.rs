//! # Basis Expansions
//!
//! Builders that map a raw numeric predictor to a block of design-matrix
//! columns: polynomial (raw or orthogonal), piecewise-constant, B-spline,
//! and natural cubic spline. Each builder is a small configuration struct
//! with a `fit` method that captures the training-time parameters (knot
//! locations, cut points, the orthogonalizing transform) and returns an
//! immutable fitted transform. The fitted transform maps any later grid of
//! values to a block with exactly the column count fixed at fit time.

use crate::design::{DesignError, DesignMatrix};
use ndarray::{Array, Array1, Array2, ArrayView1, Axis, s};
use ndarray_linalg::{Inverse, QR};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How interior knots or cut points are chosen when only a count is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KnotSpec {
    /// Explicit interior knots, strictly increasing.
    Explicit(Vec<f64>),
    /// A target degrees-of-freedom count; interior knots are placed at
    /// quantiles of the training data.
    DegreesOfFreedom(usize),
    /// This many interior knots, uniformly spaced over the training range.
    Uniform(usize),
    /// This many interior knots, placed at quantiles of the training data.
    Quantile(usize),
}

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("Polynomial degree must be at least 1, but was {0}.")]
    InvalidDegree(usize),

    #[error("Data range is invalid: start ({0}) must be strictly less than end ({1}).")]
    InvalidRange(f64, f64),

    #[error("Basis fitting requires a non-empty data vector.")]
    EmptyData,

    #[error("Cannot compute {num_quantiles} quantiles from only {num_points} data points.")]
    InsufficientDataForQuantiles {
        num_quantiles: usize,
        num_points: usize,
    },

    #[error(
        "The data has only {found} distinct values, but the requested basis needs at least {needed}."
    )]
    InsufficientDistinctValues { needed: usize, found: usize },

    #[error("Piecewise-constant binning needs at least 2 bins, but {0} were requested.")]
    InvalidBinCount(usize),

    #[error("Cut points must be finite and strictly increasing: {0}.")]
    InvalidCutPoints(String),

    #[error(
        "A degrees-of-freedom request of {requested} cannot be satisfied: it implies {implied} interior knots."
    )]
    UnsatisfiableDf { requested: usize, implied: i64 },

    #[error("Penalty order ({order}) must be positive and less than the number of basis functions ({num_basis}).")]
    InvalidPenaltyOrder { order: usize, num_basis: usize },

    #[error(
        "Transform was fitted to produce {expected} columns but the evaluation produced {found}; the basis and the query are incompatible."
    )]
    DimensionMismatch { expected: usize, found: usize },

    #[error("QR decomposition failed while orthogonalizing the basis: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    DesignError(#[from] DesignError),
}

/// A fitted, immutable mapping from raw values to a design-matrix block.
///
/// The output column count is determined at fit time and is identical for
/// the training data and for any later evaluation grid.
pub trait BasisTransform {
    fn transform(&self, x: ArrayView1<f64>) -> Result<DesignMatrix, BasisError>;
    fn ncols(&self) -> usize;
}

// ---------------------------------------------------------------------------
// Polynomial basis
// ---------------------------------------------------------------------------

/// Configuration for a polynomial basis of a single predictor.
///
/// In orthogonal mode the training columns are mutually uncorrelated (built
/// by QR on the standardized Vandermonde matrix), so each coefficient's
/// t-statistic directly tests that order's marginal contribution. In raw
/// mode the columns are plain powers `x, x^2, ..., x^degree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolynomialBasis {
    pub degree: usize,
    pub orthogonal: bool,
}

impl PolynomialBasis {
    pub fn fit(&self, x: ArrayView1<f64>, name: &str) -> Result<FittedPolynomial, BasisError> {
        if self.degree < 1 {
            return Err(BasisError::InvalidDegree(self.degree));
        }
        if x.is_empty() {
            return Err(BasisError::EmptyData);
        }
        let distinct = internal::count_distinct(x);
        if distinct <= self.degree {
            return Err(BasisError::InsufficientDistinctValues {
                needed: self.degree + 1,
                found: distinct,
            });
        }

        let (center, scale) = if self.orthogonal {
            let mean = x.mean().expect("non-empty checked above");
            let spread = x.fold(0.0f64, |acc, &v| acc.max((v - mean).abs()));
            (mean, if spread > 0.0 { spread } else { 1.0 })
        } else {
            (0.0, 1.0)
        };

        let ortho = if self.orthogonal {
            // QR of the standardized Vandermonde (including the constant
            // column) yields columns orthonormal on the training data; the
            // constant column absorbs centering and is dropped on output.
            let v = internal::vandermonde(x, self.degree, center, scale);
            let (_q, r) = v.qr()?;
            let r_max = r.diag().iter().fold(0.0f64, |acc, &d| acc.max(d.abs()));
            if r.diag().iter().any(|&d| d.abs() < 1e-10 * r_max) {
                return Err(BasisError::InsufficientDistinctValues {
                    needed: self.degree + 1,
                    found: distinct,
                });
            }
            Some(r.inv()?)
        } else {
            None
        };

        Ok(FittedPolynomial {
            name: name.to_string(),
            degree: self.degree,
            center,
            scale,
            r_inv: ortho,
        })
    }
}

/// A polynomial transform fitted to training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPolynomial {
    name: String,
    degree: usize,
    center: f64,
    scale: f64,
    /// `R^{-1}` from the training QR; present only in orthogonal mode.
    r_inv: Option<Array2<f64>>,
}

impl BasisTransform for FittedPolynomial {
    fn transform(&self, x: ArrayView1<f64>) -> Result<DesignMatrix, BasisError> {
        let v = internal::vandermonde(x, self.degree, self.center, self.scale);
        let block = match &self.r_inv {
            Some(r_inv) => {
                // V_new * R^{-1} reproduces the training Q on the training
                // data; the first (constant) column is intercept-redundant.
                let z = v.dot(r_inv);
                z.slice(s![.., 1..]).to_owned()
            }
            None => v.slice(s![.., 1..]).to_owned(),
        };
        let names = (1..=self.degree)
            .map(|d| format!("poly({}){}", self.name, d))
            .collect();
        Ok(DesignMatrix::new(block, names)?)
    }

    fn ncols(&self) -> usize {
        self.degree
    }
}

// ---------------------------------------------------------------------------
// Piecewise-constant basis
// ---------------------------------------------------------------------------

/// How the cut points of a piecewise-constant basis are chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BreakSpec {
    /// Explicit interior cut points, strictly increasing.
    CutPoints(Vec<f64>),
    /// This many bins with near-equal training occupancy (interior cut
    /// points at quantiles of the training data).
    Quantiles(usize),
}

/// Configuration for a piecewise-constant (step function) basis.
///
/// Interval membership is left-closed, right-open: a value `x` falls in bin
/// `i` when `cut[i-1] <= x < cut[i]`. Values below the first cut point fall
/// in the first bin and values at or above the last cut point fall in the
/// last bin, so the transform is total over any prediction grid. With
/// `drop_first` set, the first indicator column (redundant with a shared
/// intercept) is omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiecewiseConstantBasis {
    pub breaks: BreakSpec,
    pub drop_first: bool,
}

impl PiecewiseConstantBasis {
    pub fn fit(&self, x: ArrayView1<f64>, name: &str) -> Result<FittedPiecewise, BasisError> {
        if x.is_empty() {
            return Err(BasisError::EmptyData);
        }
        let cuts = match &self.breaks {
            BreakSpec::CutPoints(points) => {
                internal::validate_cut_points(points)?;
                points.clone()
            }
            BreakSpec::Quantiles(num_bins) => {
                if *num_bins < 2 {
                    return Err(BasisError::InvalidBinCount(*num_bins));
                }
                let cuts = internal::quantiles(x, num_bins - 1)?.to_vec();
                internal::validate_cut_points(&cuts)?;
                cuts
            }
        };
        Ok(FittedPiecewise {
            name: name.to_string(),
            cuts,
            drop_first: self.drop_first,
        })
    }
}

/// A piecewise-constant transform fitted to training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedPiecewise {
    name: String,
    cuts: Vec<f64>,
    drop_first: bool,
}

impl FittedPiecewise {
    pub fn cut_points(&self) -> &[f64] {
        &self.cuts
    }

    /// The bin index for one value under the `[lo, hi)` convention.
    pub fn bin_index(&self, x: f64) -> usize {
        self.cuts.partition_point(|&c| c <= x)
    }
}

impl BasisTransform for FittedPiecewise {
    fn transform(&self, x: ArrayView1<f64>) -> Result<DesignMatrix, BasisError> {
        let num_bins = self.cuts.len() + 1;
        let first = if self.drop_first { 1 } else { 0 };
        let mut block = Array2::zeros((x.len(), num_bins - first));
        for (i, &v) in x.iter().enumerate() {
            let bin = self.bin_index(v);
            if bin >= first {
                block[[i, bin - first]] = 1.0;
            }
        }
        let names = (first..num_bins)
            .map(|b| format!("cut({}){}", self.name, b + 1))
            .collect();
        Ok(DesignMatrix::new(block, names)?)
    }

    fn ncols(&self) -> usize {
        self.cuts.len() + 1 - if self.drop_first { 1 } else { 0 }
    }
}

// ---------------------------------------------------------------------------
// B-spline basis
// ---------------------------------------------------------------------------

/// Configuration for a B-spline basis.
///
/// `degree` 0 gives piecewise-constant segments; 3 (cubic) is the usual
/// choice. When `include_intercept` is false the first basis function is
/// dropped so the block can sit next to a shared intercept column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BSplineBasis {
    pub degree: usize,
    pub knots: KnotSpec,
    pub include_intercept: bool,
}

impl BSplineBasis {
    /// Cubic B-spline configuration with quantile knots for a target
    /// degrees-of-freedom count, matching the common `bs(x, df = k)` usage.
    pub fn with_df(df: usize) -> Self {
        Self {
            degree: 3,
            knots: KnotSpec::DegreesOfFreedom(df),
            include_intercept: false,
        }
    }

    pub fn fit(&self, x: ArrayView1<f64>, name: &str) -> Result<FittedBSpline, BasisError> {
        if x.is_empty() {
            return Err(BasisError::EmptyData);
        }
        let (lo, hi) = internal::data_range(x)?;

        let interior = match &self.knots {
            KnotSpec::Explicit(knots) => {
                internal::validate_cut_points(knots)?;
                Array1::from_vec(knots.clone())
            }
            KnotSpec::DegreesOfFreedom(df) => {
                let dropped = if self.include_intercept { 0 } else { 1 };
                let implied = *df as i64 - self.degree as i64 - 1 + dropped as i64;
                if implied < 0 {
                    return Err(BasisError::UnsatisfiableDf {
                        requested: *df,
                        implied,
                    });
                }
                let num_interior = implied as usize;
                if x.len() < num_interior {
                    return Err(BasisError::InsufficientDataForQuantiles {
                        num_quantiles: num_interior,
                        num_points: x.len(),
                    });
                }
                internal::quantiles(x, num_interior)?
            }
            KnotSpec::Uniform(num_interior) => {
                internal::uniform_interior_knots((lo, hi), *num_interior)
            }
            KnotSpec::Quantile(num_interior) => {
                if x.len() < *num_interior {
                    return Err(BasisError::InsufficientDataForQuantiles {
                        num_quantiles: *num_interior,
                        num_points: x.len(),
                    });
                }
                internal::quantiles(x, *num_interior)?
            }
        };

        let knot_vector = internal::full_knot_vector((lo, hi), interior.view(), self.degree);

        Ok(FittedBSpline {
            name: name.to_string(),
            degree: self.degree,
            knot_vector,
            range: (lo, hi),
            include_intercept: self.include_intercept,
        })
    }
}

/// A B-spline transform fitted to training data.
///
/// Query points outside the training range are clamped to the boundary
/// knots, so the output width never changes between training data and a
/// prediction grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedBSpline {
    name: String,
    degree: usize,
    knot_vector: Array1<f64>,
    range: (f64, f64),
    include_intercept: bool,
}

impl FittedBSpline {
    pub fn knot_vector(&self) -> ArrayView1<'_, f64> {
        self.knot_vector.view()
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Number of basis functions before the optional intercept-column drop.
    pub fn num_basis_functions(&self) -> usize {
        self.knot_vector.len() - self.degree - 1
    }
}

impl BasisTransform for FittedBSpline {
    fn transform(&self, x: ArrayView1<f64>) -> Result<DesignMatrix, BasisError> {
        let num_basis = self.num_basis_functions();
        let mut full = Array2::zeros((x.len(), num_basis));
        for (i, &v) in x.iter().enumerate() {
            let clamped = v.clamp(self.range.0, self.range.1);
            let row =
                internal::evaluate_splines_at_point(clamped, self.degree, self.knot_vector.view());
            full.row_mut(i).assign(&row);
        }
        let block = if self.include_intercept {
            full
        } else {
            full.slice(s![.., 1..]).to_owned()
        };
        let first = if self.include_intercept { 0 } else { 1 };
        let names = (first..num_basis)
            .map(|b| format!("bs({}){}", self.name, b + 1 - first))
            .collect();
        Ok(DesignMatrix::new(block, names)?)
    }

    fn ncols(&self) -> usize {
        self.num_basis_functions() - if self.include_intercept { 0 } else { 1 }
    }
}

// ---------------------------------------------------------------------------
// Natural cubic spline basis
// ---------------------------------------------------------------------------

/// Configuration for a natural cubic spline basis: a cubic spline
/// constrained to be linear beyond the boundary knots, which reduces the
/// fit's variance at the edges of the data.
///
/// An explicit interior-knot list of length `m` (or a degrees-of-freedom
/// request of `m`, which places `m` interior knots at training quantiles)
/// yields `m + 1` columns: the linear term plus one constrained cubic term
/// per interior knot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaturalSplineBasis {
    pub knots: KnotSpec,
}

impl NaturalSplineBasis {
    pub fn fit(&self, x: ArrayView1<f64>, name: &str) -> Result<FittedNaturalSpline, BasisError> {
        if x.is_empty() {
            return Err(BasisError::EmptyData);
        }
        let (lo, hi) = internal::data_range(x)?;
        let interior = match &self.knots {
            KnotSpec::Explicit(knots) => {
                internal::validate_cut_points(knots)?;
                Array1::from_vec(knots.clone())
            }
            KnotSpec::DegreesOfFreedom(df) => {
                if x.len() < *df {
                    return Err(BasisError::InsufficientDataForQuantiles {
                        num_quantiles: *df,
                        num_points: x.len(),
                    });
                }
                internal::quantiles(x, *df)?
            }
            KnotSpec::Uniform(num_interior) => {
                internal::uniform_interior_knots((lo, hi), *num_interior)
            }
            KnotSpec::Quantile(num_interior) => {
                if x.len() < *num_interior {
                    return Err(BasisError::InsufficientDataForQuantiles {
                        num_quantiles: *num_interior,
                        num_points: x.len(),
                    });
                }
                internal::quantiles(x, *num_interior)?
            }
        };

        // Full knot sequence: boundaries plus interior, strictly increasing.
        let mut knots = Vec::with_capacity(interior.len() + 2);
        knots.push(lo);
        knots.extend(interior.iter().copied());
        knots.push(hi);
        internal::validate_cut_points(&knots)?;

        Ok(FittedNaturalSpline {
            name: name.to_string(),
            knots: Array1::from_vec(knots),
        })
    }
}

/// A natural cubic spline transform fitted to training data.
///
/// Built from the truncated-power representation: with knots
/// `k_0 < ... < k_{K-1}`, the columns are `x` and
/// `d_j(x) - d_{K-2}(x)` for `j = 0..K-3`, where
/// `d_j(x) = ((x - k_j)_+^3 - (x - k_{K-1})_+^3) / (k_{K-1} - k_j)`.
/// Every column is exactly linear outside `[k_0, k_{K-1}]`, so no clamping
/// is applied to query points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedNaturalSpline {
    name: String,
    knots: Array1<f64>,
}

impl FittedNaturalSpline {
    pub fn boundary_knots(&self) -> (f64, f64) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }

    fn d(&self, j: usize, x: f64) -> f64 {
        let last = self.knots.len() - 1;
        let cube = |t: f64| {
            let u = (x - t).max(0.0);
            u * u * u
        };
        (cube(self.knots[j]) - cube(self.knots[last])) / (self.knots[last] - self.knots[j])
    }
}

impl BasisTransform for FittedNaturalSpline {
    fn transform(&self, x: ArrayView1<f64>) -> Result<DesignMatrix, BasisError> {
        let k = self.knots.len();
        let ncols = self.ncols();
        let mut block = Array2::zeros((x.len(), ncols));
        for (i, &v) in x.iter().enumerate() {
            block[[i, 0]] = v;
            for j in 0..k - 2 {
                block[[i, j + 1]] = self.d(j, v) - self.d(k - 2, v);
            }
        }
        let names = (1..=ncols)
            .map(|c| format!("ns({}){}", self.name, c))
            .collect();
        Ok(DesignMatrix::new(block, names)?)
    }

    fn ncols(&self) -> usize {
        // Linear term plus one constrained column per interior knot.
        self.knots.len() - 2 + 1
    }
}

// ---------------------------------------------------------------------------
// Difference penalty (P-splines)
// ---------------------------------------------------------------------------

/// Creates a penalty matrix `S = D' * D` penalizing the squared `order`-th
/// differences of spline coefficients. Second-order differences are the
/// standard P-spline roughness penalty.
pub fn create_difference_penalty_matrix(
    num_basis_functions: usize,
    order: usize,
) -> Result<Array2<f64>, BasisError> {
    if order == 0 || order >= num_basis_functions {
        return Err(BasisError::InvalidPenaltyOrder {
            order,
            num_basis: num_basis_functions,
        });
    }

    let mut d = Array2::<f64>::eye(num_basis_functions);
    for _ in 0..order {
        // Difference between adjacent rows; each pass drops one row.
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d.t().dot(&d))
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    pub(super) fn count_distinct(x: ArrayView1<f64>) -> usize {
        let mut sorted = x.to_vec();
        sorted.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        sorted.dedup();
        sorted.len()
    }

    pub(super) fn data_range(x: ArrayView1<f64>) -> Result<(f64, f64), BasisError> {
        let lo = x.fold(f64::INFINITY, |acc, &v| acc.min(v));
        let hi = x.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        if !(lo < hi) {
            return Err(BasisError::InvalidRange(lo, hi));
        }
        Ok((lo, hi))
    }

    pub(super) fn validate_cut_points(points: &[f64]) -> Result<(), BasisError> {
        if points.iter().any(|v| !v.is_finite()) {
            return Err(BasisError::InvalidCutPoints(format!("{points:?}")));
        }
        if points.windows(2).any(|w| w[0] >= w[1]) {
            return Err(BasisError::InvalidCutPoints(format!("{points:?}")));
        }
        Ok(())
    }

    /// The standardized Vandermonde matrix `[(x-c)/s]^0 ..= [(x-c)/s]^degree`.
    pub(super) fn vandermonde(
        x: ArrayView1<f64>,
        degree: usize,
        center: f64,
        scale: f64,
    ) -> Array2<f64> {
        let mut v = Array2::ones((x.len(), degree + 1));
        for (i, &raw) in x.iter().enumerate() {
            let z = (raw - center) / scale;
            let mut pow = 1.0;
            for d in 1..=degree {
                pow *= z;
                v[[i, d]] = pow;
            }
        }
        v
    }

    /// Uniformly spaced interior knots over `(lo, hi)`, boundaries excluded.
    pub(super) fn uniform_interior_knots(range: (f64, f64), count: usize) -> Array1<f64> {
        let (lo, hi) = range;
        if count == 0 {
            return Array1::from_vec(vec![]);
        }
        let h = (hi - lo) / (count as f64 + 1.0);
        Array::from_iter((1..=count).map(|i| lo + i as f64 * h))
    }

    /// Full B-spline knot vector: `degree + 1` repeated boundary knots on
    /// each side of the interior knots.
    pub(super) fn full_knot_vector(
        range: (f64, f64),
        interior: ArrayView1<f64>,
        degree: usize,
    ) -> Array1<f64> {
        let min_knots = Array1::from_elem(degree + 1, range.0);
        let max_knots = Array1::from_elem(degree + 1, range.1);
        ndarray::concatenate(Axis(0), &[min_knots.view(), interior.view(), max_knots.view()])
            .expect("knot vector concatenation cannot fail for 1-D inputs")
    }

    /// Calculates quantiles from a data vector using linear interpolation
    /// (Type 7 in R). `num_quantiles` interior probabilities are used, so
    /// the result splits the data into `num_quantiles + 1` equal shares.
    pub(super) fn quantiles(
        data: ArrayView1<f64>,
        num_quantiles: usize,
    ) -> Result<Array1<f64>, BasisError> {
        if num_quantiles == 0 {
            return Ok(Array1::from_vec(vec![]));
        }
        if data.is_empty() {
            return Err(BasisError::EmptyData);
        }

        let mut sorted_data = data.to_vec();
        sorted_data.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted_data.len();
        let quantiles_vec = (1..=num_quantiles)
            .map(|k| {
                let p = k as f64 / (num_quantiles as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;

                if lower_idx == upper_idx {
                    sorted_data[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted_data[lower_idx] * (1.0 - fraction) + sorted_data[upper_idx] * fraction
                }
            })
            .collect();

        Ok(Array1::from_vec(quantiles_vec))
    }

    /// Evaluates all B-spline basis functions at a single point `x` using a
    /// stable formulation of the Cox-de Boor recurrence.
    pub(super) fn evaluate_splines_at_point(
        x: f64,
        degree: usize,
        knots: ArrayView1<f64>,
    ) -> Array1<f64> {
        let num_knots = knots.len();
        let num_basis = num_knots - degree - 1;

        // Find the knot interval `mu` with `knots[mu] <= x < knots[mu+1]`.
        let mu = match knots.iter().rposition(|&k| k <= x) {
            Some(pos) => pos.min(num_basis + degree - 1).max(degree),
            None => degree,
        };

        let mut b = Array1::zeros(degree + 1);
        b[0] = 1.0;

        for d in 1..=degree {
            let b_old = b.clone();
            b.fill(0.0);

            for i in 0..=d {
                let idx = mu - d + i;

                if i < d && b_old[i] > 0.0 {
                    let denom = knots[idx + d] - knots[idx];
                    if denom > 1e-12 {
                        let w = (x - knots[idx]) / denom;
                        b[i] += w * b_old[i];
                    }
                }

                if i > 0 && b_old[i - 1] > 0.0 {
                    let denom = knots[idx + d] - knots[idx];
                    if denom > 1e-12 {
                        let w = (knots[idx + d] - x) / denom;
                        b[i] += w * b_old[i - 1];
                    }
                }
            }
        }

        let mut basis_values = Array1::zeros(num_basis);
        let start_index = mu.saturating_sub(degree);
        for i in 0..=degree {
            let global_idx = start_index + i;
            if global_idx < num_basis {
                basis_values[global_idx] = b[i];
            }
        }
        basis_values
    }
}
