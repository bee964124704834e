//! # Dataset Loading and Validation
//!
//! The exclusive entry point for user-provided tabular data. The statistical
//! core never sees a file format: it consumes only the typed column
//! accessors on [`Dataset`]. This module reads a CSV, validates the
//! requested columns against their expected types, and converts them into
//! clean `ndarray` structures.
//!
//! - User-Centric Errors: failures are assumed to be user-input errors.
//!   The `DataError` enum is designed to give clear, actionable feedback.
//! - Complete data only: missing or non-finite values in a requested column
//!   are rejected outright rather than imputed.

use ndarray::{Array1, ArrayView1};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(
        "The required column '{0}' was not found. Please check spelling and case."
    )]
    ColumnNotFound(String),

    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },

    #[error(
        "Missing or null values were found in the required column '{0}'. This toolkit requires complete data with no missing values."
    )]
    MissingValuesFound(String),

    #[error(
        "Non-finite values (NaN or Infinity) were found in the required column '{0}'. This toolkit requires all data to be finite."
    )]
    NonFiniteValuesFound(String),

    #[error(
        "Input file contains only {found} data rows, but at least {required} are required for a stable fit."
    )]
    InsufficientRows { found: usize, required: usize },

    #[error("A column named '{0}' already exists in this dataset.")]
    DuplicateColumn(String),

    #[error(
        "Column '{column}' has {found} values, but the dataset has {expected} rows."
    )]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
}

/// A categorical column: the sorted level table plus one code per record.
///
/// Levels are sorted lexicographically and the first level is, by
/// convention, the baseline absorbed by a shared intercept wherever this
/// column is expanded into indicator contrasts.
#[derive(Debug, Clone)]
pub struct CategoricalColumn {
    levels: Vec<String>,
    codes: Vec<usize>,
}

impl CategoricalColumn {
    pub fn from_values<S: AsRef<str>>(values: &[S]) -> Self {
        let mut levels: Vec<String> = values.iter().map(|v| v.as_ref().to_string()).collect();
        levels.sort_unstable();
        levels.dedup();
        let codes = values
            .iter()
            .map(|v| {
                levels
                    .binary_search_by(|l| l.as_str().cmp(v.as_ref()))
                    .expect("every value appears in its own level table")
            })
            .collect();
        Self { levels, codes }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn codes(&self) -> &[usize] {
        &self.codes
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn level_code(&self, level: &str) -> Option<usize> {
        self.levels.binary_search_by(|l| l.as_str().cmp(level)).ok()
    }
}

/// An ordered collection of named numeric and categorical columns with a
/// shared row count. Immutable once assembled.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    n_rows: Option<usize>,
    numeric: Vec<(String, Array1<f64>)>,
    categorical: Vec<(String, CategoricalColumn)>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_numeric(mut self, name: &str, values: Array1<f64>) -> Result<Self, DataError> {
        self.check_new_column(name, values.len())?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(name.to_string()));
        }
        self.n_rows.get_or_insert(values.len());
        self.numeric.push((name.to_string(), values));
        Ok(self)
    }

    pub fn with_categorical<S: AsRef<str>>(
        mut self,
        name: &str,
        values: &[S],
    ) -> Result<Self, DataError> {
        self.check_new_column(name, values.len())?;
        self.n_rows.get_or_insert(values.len());
        self.categorical
            .push((name.to_string(), CategoricalColumn::from_values(values)));
        Ok(self)
    }

    fn check_new_column(&self, name: &str, len: usize) -> Result<(), DataError> {
        if self.numeric.iter().any(|(n, _)| n == name)
            || self.categorical.iter().any(|(n, _)| n == name)
        {
            return Err(DataError::DuplicateColumn(name.to_string()));
        }
        if let Some(expected) = self.n_rows {
            if len != expected {
                return Err(DataError::LengthMismatch {
                    column: name.to_string(),
                    expected,
                    found: len,
                });
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows.unwrap_or(0)
    }

    pub fn numeric(&self, name: &str) -> Result<ArrayView1<'_, f64>, DataError> {
        self.numeric
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.view())
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    pub fn categorical(&self, name: &str) -> Result<&CategoricalColumn, DataError> {
        self.categorical
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    /// A 0/1 indicator for `column > threshold`; used to derive binary
    /// responses such as a high-earner flag from a wage column.
    pub fn indicator_above(&self, name: &str, threshold: f64) -> Result<Array1<f64>, DataError> {
        let values = self.numeric(name)?;
        Ok(values.mapv(|v| if v > threshold { 1.0 } else { 0.0 }))
    }

    pub fn numeric_names(&self) -> Vec<&str> {
        self.numeric.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn categorical_names(&self) -> Vec<&str> {
        self.categorical.iter().map(|(n, _)| n.as_str()).collect()
    }
}

/// Loads the requested columns of a CSV file into a validated [`Dataset`].
pub fn load_dataset(
    path: &str,
    numeric_columns: &[&str],
    categorical_columns: &[&str],
) -> Result<Dataset, DataError> {
    internal::load(path, numeric_columns, categorical_columns)
}

/// Internal module for shared data loading logic.
mod internal {
    use super::*;

    const MINIMUM_ROWS: usize = 20;

    pub(super) fn load(
        path: &str,
        numeric_columns: &[&str],
        categorical_columns: &[&str],
    ) -> Result<Dataset, DataError> {
        log::info!("Loading data from '{path}'");

        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b',')),
            )
            .finish()?;

        if df.height() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: df.height(),
                required: MINIMUM_ROWS,
            });
        }

        let present: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for required in numeric_columns.iter().chain(categorical_columns.iter()) {
            if !present.iter().any(|c| c == required) {
                return Err(DataError::ColumnNotFound(required.to_string()));
            }
        }

        let mut dataset = Dataset::new();
        for &name in numeric_columns {
            let values = extract_numeric_column(&df, name)?;
            dataset = dataset.with_numeric(name, Array1::from_vec(values))?;
        }
        for &name in categorical_columns {
            let values = extract_string_column(&df, name)?;
            dataset = dataset.with_categorical(name, &values)?;
        }

        log::info!(
            "Data validation successful: {} rows, {} numeric and {} categorical columns.",
            dataset.n_rows(),
            numeric_columns.len(),
            categorical_columns.len()
        );
        Ok(dataset)
    }

    fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::Float64) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "f64 (numeric)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }

        let chunked = casted.f64()?.rechunk();
        let values: Vec<f64> = chunked.into_no_null_iter().collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(values)
    }

    fn extract_string_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
        let series = df.column(column_name)?;
        if series.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = match series.cast(&DataType::String) {
            Ok(casted) => casted,
            Err(_) => {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "string (categorical)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }
        };

        let chunked = casted.str()?.rechunk();
        Ok(chunked
            .into_no_null_iter()
            .map(|s| s.to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{content}")?;
        file.flush()?;
        Ok(file)
    }

    fn wage_like_csv(rows: usize) -> String {
        let mut content = String::from("age,year,wage,education");
        for i in 0..rows {
            content.push_str(&format!(
                "\n{},{},{:.1},{}",
                20 + (i % 40),
                2003 + (i % 7),
                60.0 + (i % 25) as f64 * 3.0,
                if i % 3 == 0 { "HS Grad" } else { "College" }
            ));
        }
        content
    }

    #[test]
    fn test_load_valid_dataset() {
        let file = create_test_csv(&wage_like_csv(30)).unwrap();
        let dataset = load_dataset(
            file.path().to_str().unwrap(),
            &["age", "year", "wage"],
            &["education"],
        )
        .unwrap();
        assert_eq!(dataset.n_rows(), 30);
        assert_eq!(dataset.numeric("age").unwrap().len(), 30);
        let education = dataset.categorical("education").unwrap();
        assert_eq!(education.levels(), &["College", "HS Grad"]);
        assert_eq!(education.level_code("HS Grad"), Some(1));
    }

    #[test]
    fn test_missing_column_rejected() {
        let file = create_test_csv(&wage_like_csv(30)).unwrap();
        let err = load_dataset(file.path().to_str().unwrap(), &["salary"], &[]).unwrap_err();
        match err {
            DataError::ColumnNotFound(col) => assert_eq!(col, "salary"),
            other => panic!("Expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_too_few_rows_rejected() {
        let file = create_test_csv(&wage_like_csv(5)).unwrap();
        let err = load_dataset(file.path().to_str().unwrap(), &["age"], &[]).unwrap_err();
        assert!(matches!(err, DataError::InsufficientRows { found: 5, .. }));
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let mut content = String::from("age,wage");
        for i in 0..25 {
            content.push_str(&format!("\n{},{}", 20 + i, 50.0 + i as f64));
        }
        content.push_str("\n45,NaN");
        let file = create_test_csv(&content).unwrap();
        let err = load_dataset(file.path().to_str().unwrap(), &["age", "wage"], &[]).unwrap_err();
        match err {
            DataError::NonFiniteValuesFound(col) => assert_eq!(col, "wage"),
            other => panic!("Expected NonFiniteValuesFound, got {other:?}"),
        }
    }

    #[test]
    fn test_in_memory_dataset_accessors() {
        let dataset = Dataset::new()
            .with_numeric("wage", array![100.0, 300.0, 80.0])
            .unwrap()
            .with_categorical("education", &["HS Grad", "PhD", "HS Grad"])
            .unwrap();
        assert_eq!(dataset.n_rows(), 3);
        let high_earn = dataset.indicator_above("wage", 250.0).unwrap();
        assert_eq!(high_earn, array![0.0, 1.0, 0.0]);
        assert!(matches!(
            dataset.numeric("height"),
            Err(DataError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_and_ragged_columns_rejected() {
        let base = Dataset::new()
            .with_numeric("age", array![1.0, 2.0])
            .unwrap();
        assert!(matches!(
            base.clone().with_numeric("age", array![3.0, 4.0]),
            Err(DataError::DuplicateColumn(_))
        ));
        assert!(matches!(
            base.with_numeric("wage", array![1.0]),
            Err(DataError::LengthMismatch { .. })
        ));
    }
}
