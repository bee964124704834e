//! Regression beyond straight lines: polynomial and spline basis
//! expansions, penalized smoothing splines, backfitted additive models,
//! sequential ANOVA for nested fits, and LOWESS scatterplot smoothing,
//! over numeric and categorical columns loaded from CSV.

pub mod anova;
pub mod basis;
pub mod data;
pub mod design;
pub mod gam;
pub mod linear;
pub mod lowess;
pub mod smooth;
