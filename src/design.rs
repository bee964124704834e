//! # Design Matrix Assembly
//!
//! A `DesignMatrix` pairs a dense 2D array (rows = observations, columns =
//! basis outputs) with an ordered list of column names. Basis builders
//! produce blocks; this module stitches blocks together into the matrix a
//! fitter consumes. The column-name list is the contract that lets a fitted
//! model refuse a prediction design built from a different basis.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use thiserror::Error;

/// Errors arising while constructing or combining design matrices.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("Design matrix has {ncols} columns but {names} column names were supplied.")]
    NameCountMismatch { ncols: usize, names: usize },

    #[error(
        "Cannot stack design blocks: block '{block}' has {found} rows, but the first block has {expected}."
    )]
    RaggedBlocks {
        block: String,
        expected: usize,
        found: usize,
    },

    #[error("Non-finite value (NaN or infinity) in design column '{column}' at row {row}.")]
    NonFiniteValue { column: String, row: usize },

    #[error("Cannot stack an empty list of design blocks.")]
    EmptyStack,
}

/// A two-dimensional numeric design with named columns.
///
/// Invariants enforced at construction: the name list length equals the
/// column count, and every entry is finite.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    column_names: Vec<String>,
}

impl DesignMatrix {
    /// Wraps a raw matrix and its column names, validating the invariants.
    pub fn new(matrix: Array2<f64>, column_names: Vec<String>) -> Result<Self, DesignError> {
        if matrix.ncols() != column_names.len() {
            return Err(DesignError::NameCountMismatch {
                ncols: matrix.ncols(),
                names: column_names.len(),
            });
        }
        for (j, col) in matrix.columns().into_iter().enumerate() {
            if let Some(row) = col.iter().position(|v| !v.is_finite()) {
                return Err(DesignError::NonFiniteValue {
                    column: column_names[j].clone(),
                    row,
                });
            }
        }
        Ok(Self {
            matrix,
            column_names,
        })
    }

    /// A single all-ones column named `(Intercept)`.
    pub fn intercept(n_rows: usize) -> Self {
        Self {
            matrix: Array2::ones((n_rows, 1)),
            column_names: vec!["(Intercept)".to_string()],
        }
    }

    /// A one-column design from a raw predictor.
    pub fn from_column(name: &str, values: ArrayView1<f64>) -> Result<Self, DesignError> {
        let n = values.len();
        let matrix = values
            .to_owned()
            .into_shape_with_order((n, 1))
            .expect("column reshape is infallible");
        Self::new(matrix, vec![name.to_string()])
    }

    /// Horizontally concatenates blocks into one design. All blocks must
    /// share a row count; column names are concatenated in block order.
    pub fn hstack(blocks: &[&DesignMatrix]) -> Result<Self, DesignError> {
        let first = blocks.first().ok_or(DesignError::EmptyStack)?;
        let n_rows = first.nrows();
        let mut names = Vec::new();
        let mut views: Vec<ArrayView2<f64>> = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.nrows() != n_rows {
                return Err(DesignError::RaggedBlocks {
                    block: block
                        .column_names
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "<unnamed>".to_string()),
                    expected: n_rows,
                    found: block.nrows(),
                });
            }
            names.extend(block.column_names.iter().cloned());
            views.push(block.matrix.view());
        }
        let matrix = ndarray::concatenate(Axis(1), &views)
            .expect("blocks share a row count after validation");
        Ok(Self {
            matrix,
            column_names: names,
        })
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    /// Looks a column up by name.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .map(|j| self.matrix.column(j))
    }

    /// Consumes the design, returning the raw matrix.
    pub fn into_matrix(self) -> Array2<f64> {
        self.matrix
    }

    /// True when both designs expose the same columns in the same order.
    pub fn same_basis(&self, other: &DesignMatrix) -> bool {
        self.column_names == other.column_names
    }

    /// Row sums of the matrix; useful for partition-of-unity checks.
    pub fn row_sums(&self) -> Array1<f64> {
        self.matrix.sum_axis(Axis(1))
    }
}
