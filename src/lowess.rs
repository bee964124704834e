//! # Locally Weighted Scatterplot Smoothing
//!
//! Cleveland-style LOWESS: at every evaluation point a weighted straight
//! line is fitted over the `ceil(fraction * n)` nearest training points,
//! with tricube distance weights. Optional robustness iterations downweight
//! outliers by bisquare weights computed from the median absolute residual,
//! then refit. [`Lowess::fit`] smooths at the training points themselves
//! and returns fitted values in the caller's input order; [`Lowess::fit_at`]
//! evaluates the smoother over an arbitrary query grid. Sorting by x is an
//! internal concern.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// Scale factor applied to the median absolute residual when forming
/// bisquare robustness weights, following Cleveland (1979).
const BISQUARE_SCALE: f64 = 6.0;

#[derive(Error, Debug)]
pub enum LowessError {
    #[error("The neighborhood fraction must lie in (0, 1]; got {0}.")]
    InvalidFraction(f64),

    #[error("LOWESS requires at least two observations.")]
    InsufficientData(usize),

    #[error("Input lengths disagree: {xs} x-values but {ys} responses.")]
    LengthMismatch { xs: usize, ys: usize },

    #[error("Input '{input}' contains a non-finite value at position {position}.")]
    NonFiniteValue { input: &'static str, position: usize },
}

/// Smoother configuration. `fraction` is the share of the data entering each
/// local fit; `robustness_iterations` is the number of bisquare reweighting
/// passes after the initial fit.
#[derive(Debug, Clone, Copy)]
pub struct Lowess {
    pub fraction: f64,
    pub robustness_iterations: usize,
}

impl Default for Lowess {
    fn default() -> Self {
        Self {
            fraction: 2.0 / 3.0,
            robustness_iterations: 3,
        }
    }
}

/// The outcome of one LOWESS pass over a dataset.
#[derive(Debug, Clone)]
pub struct LowessResult {
    /// Smoothed values, aligned with the input order of `x`.
    pub fitted: Array1<f64>,
    /// Final robustness weights, aligned with the input order. All ones
    /// when no robustness iterations were requested.
    pub robustness_weights: Array1<f64>,
}

impl Lowess {
    pub fn new(fraction: f64) -> Self {
        Self {
            fraction,
            ..Self::default()
        }
    }

    pub fn with_robustness(fraction: f64, robustness_iterations: usize) -> Self {
        Self {
            fraction,
            robustness_iterations,
        }
    }

    /// Smooths `y` against `x` and returns fitted values in input order.
    pub fn fit(
        &self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
    ) -> Result<LowessResult, LowessError> {
        let state = self.smooth_sorted(x, y)?;
        let n = state.xs.len();
        let mut fitted = Array1::zeros(n);
        let mut robustness_weights = Array1::zeros(n);
        for (sorted_pos, &original) in state.order.iter().enumerate() {
            fitted[original] = state.fitted[sorted_pos];
            robustness_weights[original] = state.delta[sorted_pos];
        }
        Ok(LowessResult {
            fitted,
            robustness_weights,
        })
    }

    /// Smooths `y` against `x`, then evaluates the smoother at arbitrary
    /// query points: each query gets its own nearest-neighbor window and
    /// weighted local line, using the robustness weights settled on the
    /// training data.
    pub fn fit_at(
        &self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        queries: ArrayView1<f64>,
    ) -> Result<Array1<f64>, LowessError> {
        for (position, v) in queries.iter().enumerate() {
            if !v.is_finite() {
                return Err(LowessError::NonFiniteValue {
                    input: "queries",
                    position,
                });
            }
        }
        let state = self.smooth_sorted(x, y)?;
        let query_points: Vec<f64> = queries.to_vec();
        let fitted = internal::evaluate_at(
            &state.xs,
            &state.ys,
            &state.delta,
            state.window,
            &query_points,
        );
        Ok(Array1::from_vec(fitted))
    }

    /// Validates inputs, sorts into x-order, and runs the initial pass plus
    /// any robustness iterations.
    fn smooth_sorted(
        &self,
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
    ) -> Result<internal::SmoothedState, LowessError> {
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(LowessError::InvalidFraction(self.fraction));
        }
        if x.len() != y.len() {
            return Err(LowessError::LengthMismatch {
                xs: x.len(),
                ys: y.len(),
            });
        }
        let n = x.len();
        if n < 2 {
            return Err(LowessError::InsufficientData(n));
        }
        for (input, values) in [("x", x.view()), ("y", y.view())] {
            for (position, v) in values.iter().enumerate() {
                if !v.is_finite() {
                    return Err(LowessError::NonFiniteValue { input, position });
                }
            }
        }

        // Work in sorted-x domain; callers map results back as needed.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
        let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
        let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

        let window = ((self.fraction * n as f64).ceil() as usize).clamp(2, n);
        log::debug!(
            "lowess: {n} points, window {window}, {} robustness iterations",
            self.robustness_iterations
        );

        let mut delta = vec![1.0f64; n];
        let mut fitted = internal::smooth_pass(&xs, &ys, &delta, window);

        for iteration in 0..self.robustness_iterations {
            let residuals: Vec<f64> = ys
                .iter()
                .zip(fitted.iter())
                .map(|(&yi, &fi)| yi - fi)
                .collect();
            let scale = BISQUARE_SCALE * internal::median_absolute(&residuals);
            if scale <= f64::EPSILON {
                log::debug!("lowess: residual scale vanished at iteration {iteration}, stopping");
                break;
            }
            for (d, &r) in delta.iter_mut().zip(residuals.iter()) {
                *d = internal::bisquare(r / scale);
            }
            fitted = internal::smooth_pass(&xs, &ys, &delta, window);
        }

        Ok(internal::SmoothedState {
            order,
            xs,
            ys,
            delta,
            fitted,
            window,
        })
    }
}

/// Internal module for the local regression machinery.
mod internal {
    use rayon::prelude::*;

    /// Training data in sorted-x order after all smoothing passes, together
    /// with the permutation that produced it.
    pub(super) struct SmoothedState {
        pub(super) order: Vec<usize>,
        pub(super) xs: Vec<f64>,
        pub(super) ys: Vec<f64>,
        pub(super) delta: Vec<f64>,
        pub(super) fitted: Vec<f64>,
        pub(super) window: usize,
    }

    /// One full pass over the sorted data: a weighted local line per point.
    /// `delta` carries the current robustness weights.
    pub(super) fn smooth_pass(xs: &[f64], ys: &[f64], delta: &[f64], window: usize) -> Vec<f64> {
        (0..xs.len())
            .into_par_iter()
            .map(|i| fit_at_query(xs, ys, delta, window, xs[i]))
            .collect()
    }

    /// Evaluates the smoother at arbitrary, not necessarily sorted, queries.
    pub(super) fn evaluate_at(
        xs: &[f64],
        ys: &[f64],
        delta: &[f64],
        window: usize,
        queries: &[f64],
    ) -> Vec<f64> {
        queries
            .par_iter()
            .map(|&x0| fit_at_query(xs, ys, delta, window, x0))
            .collect()
    }

    /// Weighted least-squares line over the `window` training points nearest
    /// to `x0`, evaluated at `x0`. `xs` must be sorted.
    fn fit_at_query(xs: &[f64], ys: &[f64], delta: &[f64], window: usize, x0: f64) -> f64 {
        let n = xs.len();

        // Seed at the nearest training point, then grow the neighborhood
        // outward, always taking the nearer of the two candidate ends.
        let p = xs.partition_point(|&v| v < x0);
        let seed = if p == 0 {
            0
        } else if p == n {
            n - 1
        } else if x0 - xs[p - 1] <= xs[p] - x0 {
            p - 1
        } else {
            p
        };
        let mut lo = seed;
        let mut hi = seed;
        while hi - lo + 1 < window {
            if lo == 0 {
                hi += 1;
            } else if hi == n - 1 {
                lo -= 1;
            } else if x0 - xs[lo - 1] <= xs[hi + 1] - x0 {
                lo -= 1;
            } else {
                hi += 1;
            }
        }
        let dmax = (x0 - xs[lo]).abs().max((xs[hi] - x0).abs());

        let (mut sw, mut swx, mut swy, mut swxx, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for j in lo..=hi {
            let distance_weight = if dmax > 0.0 {
                tricube((xs[j] - x0).abs() / dmax)
            } else {
                1.0
            };
            let w = distance_weight * delta[j];
            if w <= 0.0 {
                continue;
            }
            sw += w;
            swx += w * xs[j];
            swy += w * ys[j];
            swxx += w * xs[j] * xs[j];
            swxy += w * xs[j] * ys[j];
        }
        if sw <= 0.0 {
            // Every neighbor was rejected by robustness weighting.
            return ys[seed];
        }

        let mean_x = swx / sw;
        let mean_y = swy / sw;
        let sxx = swxx - sw * mean_x * mean_x;
        let sxy = swxy - sw * mean_x * mean_y;
        if sxx <= f64::EPSILON * swxx.abs().max(1.0) {
            // Degenerate neighborhood (tied x), fall back to the weighted mean.
            mean_y
        } else {
            mean_y + (sxy / sxx) * (x0 - mean_x)
        }
    }

    pub(super) fn tricube(u: f64) -> f64 {
        if u >= 1.0 {
            0.0
        } else {
            let t = 1.0 - u * u * u;
            t * t * t
        }
    }

    pub(super) fn bisquare(u: f64) -> f64 {
        if u.abs() >= 1.0 {
            0.0
        } else {
            let t = 1.0 - u * u;
            t * t
        }
    }

    pub(super) fn median_absolute(values: &[f64]) -> f64 {
        let mut magnitudes: Vec<f64> = values.iter().map(|v| v.abs()).collect();
        magnitudes.sort_by(f64::total_cmp);
        let n = magnitudes.len();
        if n == 0 {
            0.0
        } else if n % 2 == 1 {
            magnitudes[n / 2]
        } else {
            (magnitudes[n / 2 - 1] + magnitudes[n / 2]) / 2.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array1;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::Normal;

    #[test]
    fn straight_line_data_is_reproduced_exactly() {
        let x = Array1::linspace(0.0, 10.0, 50);
        let y = x.mapv(|v| 2.0 * v + 1.0);
        let result = Lowess::new(0.5).fit(x.view(), y.view()).unwrap();
        for (fit, truth) in result.fitted.iter().zip(y.iter()) {
            assert_abs_diff_eq!(fit, truth, epsilon = 1e-8);
        }
    }

    #[test]
    fn query_grid_evaluation_reproduces_a_line_off_the_training_points() {
        let x = Array1::linspace(0.0, 10.0, 50);
        let y = x.mapv(|v| 2.0 * v + 1.0);

        // Queries strictly between and beyond the training points; a local
        // weighted line is exact on linear data everywhere.
        let queries = Array1::from_vec(vec![0.05, 2.71, 5.001, 9.93, 11.0, -0.5]);
        let fitted = Lowess::new(0.5)
            .fit_at(x.view(), y.view(), queries.view())
            .unwrap();
        for (f, q) in fitted.iter().zip(queries.iter()) {
            assert_abs_diff_eq!(*f, 2.0 * q + 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn query_evaluation_at_training_points_matches_the_training_fit() {
        let mut rng = StdRng::seed_from_u64(19);
        let noise = Normal::new(0.0, 0.2).unwrap();
        let x = Array1::linspace(0.0, 6.28, 120);
        let y = Array1::from_iter(
            x.iter().map(|&v: &f64| v.sin() + noise.sample(&mut rng)),
        );

        let smoother = Lowess::with_robustness(0.4, 2);
        let training = smoother.fit(x.view(), y.view()).unwrap();
        let at_queries = smoother.fit_at(x.view(), y.view(), x.view()).unwrap();
        for (a, b) in at_queries.iter().zip(training.fitted.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-10);
        }
    }

    #[test]
    fn larger_fractions_give_smoother_curves() {
        let n = 200;
        let mut rng = StdRng::seed_from_u64(11);
        let noise = Normal::new(0.0, 0.3).unwrap();
        let x = Array1::linspace(0.0, 6.28, n);
        let y = Array1::from_iter(
            x.iter().map(|&v: &f64| v.sin() + noise.sample(&mut rng)),
        );

        let wiggly = Lowess::new(0.1).fit(x.view(), y.view()).unwrap();
        let smooth = Lowess::new(0.8).fit(x.view(), y.view()).unwrap();

        let roughness = |fitted: &Array1<f64>| {
            fitted
                .iter()
                .zip(fitted.iter().skip(1))
                .map(|(a, b)| (b - a).abs())
                .sum::<f64>()
        };
        assert!(
            roughness(&smooth.fitted) < roughness(&wiggly.fitted),
            "a wider neighborhood must reduce total variation"
        );
    }

    #[test]
    fn robustness_iterations_resist_an_outlier() {
        let n = 60;
        let x = Array1::linspace(0.0, 10.0, n);
        let mut y = x.mapv(|v| 0.5 * v);
        y[30] += 50.0;

        let plain = Lowess::with_robustness(0.4, 0)
            .fit(x.view(), y.view())
            .unwrap();
        let robust = Lowess::with_robustness(0.4, 3)
            .fit(x.view(), y.view())
            .unwrap();

        let truth = 0.5 * x[30];
        let plain_error = (plain.fitted[30] - truth).abs();
        let robust_error = (robust.fitted[30] - truth).abs();
        assert!(
            robust_error < plain_error / 5.0,
            "robust fit {robust_error} should sit far closer to the line than {plain_error}"
        );
        // The outlier itself ends up with a near-zero robustness weight.
        assert!(robust.robustness_weights[30] < 0.05);
    }

    #[test]
    fn input_order_is_preserved() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut indices: Vec<usize> = (0..80).collect();
        indices.shuffle(&mut rng);

        let sorted_x = Array1::linspace(0.0, 8.0, 80);
        let sorted_y = sorted_x.mapv(|v: f64| v.cos());
        let shuffled_x = Array1::from_iter(indices.iter().map(|&i| sorted_x[i]));
        let shuffled_y = Array1::from_iter(indices.iter().map(|&i| sorted_y[i]));

        let baseline = Lowess::new(0.3).fit(sorted_x.view(), sorted_y.view()).unwrap();
        let shuffled = Lowess::new(0.3)
            .fit(shuffled_x.view(), shuffled_y.view())
            .unwrap();

        for (pos, &original) in indices.iter().enumerate() {
            assert_abs_diff_eq!(
                shuffled.fitted[pos],
                baseline.fitted[original],
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let x = Array1::linspace(0.0, 1.0, 10);
        let y = x.clone();

        assert!(matches!(
            Lowess::new(0.0).fit(x.view(), y.view()),
            Err(LowessError::InvalidFraction(_))
        ));
        assert!(matches!(
            Lowess::new(1.5).fit(x.view(), y.view()),
            Err(LowessError::InvalidFraction(_))
        ));

        let short = Array1::from_vec(vec![1.0]);
        assert!(matches!(
            Lowess::new(0.5).fit(short.view(), short.view()),
            Err(LowessError::InsufficientData(1))
        ));

        let mismatched = Array1::linspace(0.0, 1.0, 5);
        assert!(matches!(
            Lowess::new(0.5).fit(x.view(), mismatched.view()),
            Err(LowessError::LengthMismatch { xs: 10, ys: 5 })
        ));
    }

    #[test]
    fn non_finite_values_are_reported_with_their_input() {
        let x = Array1::linspace(0.0, 1.0, 10);
        let mut y = x.clone();
        y[7] = f64::NAN;

        assert!(matches!(
            Lowess::new(0.5).fit(x.view(), y.view()),
            Err(LowessError::NonFiniteValue {
                input: "y",
                position: 7
            })
        ));

        let mut bad_x = x.clone();
        bad_x[2] = f64::INFINITY;
        assert!(matches!(
            Lowess::new(0.5).fit(bad_x.view(), x.view()),
            Err(LowessError::NonFiniteValue {
                input: "x",
                position: 2
            })
        ));

        let queries = Array1::from_vec(vec![0.5, f64::NAN]);
        assert!(matches!(
            Lowess::new(0.5).fit_at(x.view(), x.view(), queries.view()),
            Err(LowessError::NonFiniteValue {
                input: "queries",
                position: 1
            })
        ));
    }
}
