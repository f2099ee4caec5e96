//! Occupancy Grids
//!
//! Caller input arrives as a [`CountRequest`] whose grid and threshold are
//! untyped JSON values, so every malformed shape can be expressed. The
//! [`validator`] turns a request into a [`ValidGrid`], the only input the
//! labeler accepts.
//!
//! ```text
//! CountRequest ──validate()──► ValidGrid { OccupancyGrid, Threshold }
//!      │
//!      └─► ValidationError (never retried)
//! ```

pub mod validator;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::ValidationError;

pub use validator::validate;

// =============================================================================
// Occupancy Grid
// =============================================================================

/// Rectangular matrix of finite, non-negative intensity readings
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    cells: Vec<f64>,
    width: usize,
    height: usize,
}

impl OccupancyGrid {
    /// Build a grid from rows, checking shape and cell values
    pub fn new(rows: Vec<Vec<f64>>) -> Result<Self, ValidationError> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if width == 0 {
            return Err(ValidationError::EmptyGrid);
        }

        let mut cells = Vec::with_capacity(width * height);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != width {
                return Err(ValidationError::WidthMismatch {
                    row,
                    expected: width,
                    actual: values.len(),
                });
            }
            for (col, value) in values.into_iter().enumerate() {
                check_cell(row, col, value)?;
                cells.push(value);
            }
        }

        Ok(Self {
            cells,
            width,
            height,
        })
    }

    /// Number of columns
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows
    pub fn height(&self) -> usize {
        self.height
    }

    /// Reading at `(row, col)`, if in bounds
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.height && col < self.width {
            self.cells.get(row * self.width + col).copied()
        } else {
            None
        }
    }

    /// Rows in order
    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.cells.chunks(self.width)
    }
}

fn check_cell(row: usize, col: usize, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::InvalidCell {
            row,
            col,
            reason: format!("{} is not finite", value),
        });
    }
    if value < 0.0 {
        return Err(ValidationError::InvalidCell {
            row,
            col,
            reason: format!("{} is negative", value),
        });
    }
    Ok(())
}

/// Intensity threshold; cells strictly above it are occupied
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f64);

impl Threshold {
    /// Check and wrap a threshold
    pub fn new(value: f64) -> Result<Self, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::InvalidThreshold(format!("{} is not finite", value)));
        }
        if value < 0.0 {
            return Err(ValidationError::InvalidThreshold(format!("{} is negative", value)));
        }
        Ok(Self(value))
    }

    /// Raw value
    pub fn value(self) -> f64 {
        self.0
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidGrid {
    pub grid: OccupancyGrid,
    pub threshold: Threshold,
}

// =============================================================================
// Count Request
// =============================================================================

/// Untyped counting request as supplied by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountRequest {
    /// Sequence of rows of numbers
    pub grid: Value,
    /// Declared column count
    pub width: i64,
    /// Declared row count
    pub height: i64,
    /// Intensity threshold
    pub threshold: Value,
}

impl CountRequest {
    /// Build a request from typed rows.
    ///
    /// Non-finite readings cannot be held by a JSON number and become `null`,
    /// which the validator rejects as a non-numeric cell.
    pub fn from_rows(rows: Vec<Vec<f64>>, width: i64, height: i64, threshold: f64) -> Self {
        let grid = rows
            .into_iter()
            .map(|row| Value::Array(row.into_iter().map(number).collect()))
            .collect();

        Self {
            grid: Value::Array(grid),
            width,
            height,
            threshold: number(threshold),
        }
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
