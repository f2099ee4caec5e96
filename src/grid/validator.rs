//! Grid Validator
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. the grid is a sequence of sequences;
//! 2. the grid holds at least one cell;
//! 3. every cell is a finite number `>= 0`;
//! 4. declared dimensions are non-negative and match the grid's shape;
//! 5. the threshold is a finite number `>= 0`.

use serde_json::Value;
use tracing::debug;

use crate::error::ValidationError;
use crate::grid::{CountRequest, OccupancyGrid, Threshold, ValidGrid};

/// Validate a request, producing the typed grid and threshold
pub fn validate(request: &CountRequest) -> Result<ValidGrid, ValidationError> {
    let result = check(request);
    if let Err(ref err) = result {
        debug!(error = %err, "Rejected count request");
    }
    result
}

fn check(request: &CountRequest) -> Result<ValidGrid, ValidationError> {
    let rows = as_matrix(&request.grid)?;

    if rows.iter().all(|row| row.is_empty()) {
        return Err(ValidationError::EmptyGrid);
    }

    let cells = rows
        .iter()
        .enumerate()
        .map(|(row, values)| {
            values
                .iter()
                .enumerate()
                .map(|(col, value)| as_cell(row, col, value))
                .collect::<Result<Vec<f64>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let height = dimension("height", request.height)?;
    let width = dimension("width", request.width)?;
    if cells.len() != height {
        return Err(ValidationError::HeightMismatch {
            expected: height,
            actual: cells.len(),
        });
    }
    if let Some((row, values)) = cells.iter().enumerate().find(|(_, r)| r.len() != width) {
        return Err(ValidationError::WidthMismatch {
            row,
            expected: width,
            actual: values.len(),
        });
    }

    let threshold = request
        .threshold
        .as_f64()
        .ok_or_else(|| {
            ValidationError::InvalidThreshold(format!(
                "expected a number, found {}",
                kind(&request.threshold)
            ))
        })
        .and_then(Threshold::new)?;

    Ok(ValidGrid {
        grid: OccupancyGrid::new(cells)?,
        threshold,
    })
}

fn as_matrix(grid: &Value) -> Result<Vec<&Vec<Value>>, ValidationError> {
    let rows = grid.as_array().ok_or_else(|| ValidationError::NotAMatrix {
        row: None,
        found: format!("grid is {}", kind(grid)),
    })?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            row.as_array().ok_or_else(|| ValidationError::NotAMatrix {
                row: Some(i),
                found: format!("row {} is {}", i, kind(row)),
            })
        })
        .collect()
}

fn as_cell(row: usize, col: usize, value: &Value) -> Result<f64, ValidationError> {
    let number = value.as_f64().ok_or_else(|| ValidationError::InvalidCell {
        row,
        col,
        reason: format!("expected a number, found {}", kind(value)),
    })?;

    if !number.is_finite() || number < 0.0 {
        return Err(ValidationError::InvalidCell {
            row,
            col,
            reason: format!("{} is not a finite non-negative number", number),
        });
    }
    Ok(number)
}

fn dimension(name: &'static str, value: i64) -> Result<usize, ValidationError> {
    usize::try_from(value).map_err(|_| ValidationError::NegativeDimension {
        dimension: name,
        value,
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn request(grid: Value, width: i64, height: i64, threshold: Value) -> CountRequest {
        CountRequest {
            grid,
            width,
            height,
            threshold,
        }
    }

    #[test]
    fn test_valid_request() {
        let valid = validate(&request(json!([[0, 1], [1, 0.5]]), 2, 2, json!(0.5))).unwrap();
        assert_eq!(valid.grid.width(), 2);
        assert_eq!(valid.grid.height(), 2);
        assert_eq!(valid.grid.get(1, 1), Some(0.5));
        assert_eq!(valid.threshold.value(), 0.5);
    }

    #[test]
    fn test_not_a_matrix() {
        assert_matches!(
            validate(&request(json!("grid"), 1, 1, json!(0.5))),
            Err(ValidationError::NotAMatrix { row: None, .. })
        );
        assert_matches!(
            validate(&request(json!([[1], 2]), 1, 2, json!(0.5))),
            Err(ValidationError::NotAMatrix { row: Some(1), .. })
        );
    }

    #[test]
    fn test_empty_grid() {
        assert_matches!(
            validate(&request(json!([]), 0, 0, json!(0.5))),
            Err(ValidationError::EmptyGrid)
        );
        assert_matches!(
            validate(&request(json!([[], []]), 0, 2, json!(0.5))),
            Err(ValidationError::EmptyGrid)
        );
    }

    #[test]
    fn test_non_numeric_cell() {
        assert_matches!(
            validate(&request(json!([[1, "x"]]), 2, 1, json!(0.5))),
            Err(ValidationError::InvalidCell { row: 0, col: 1, .. })
        );
        assert_matches!(
            validate(&request(json!([[1], [null]]), 1, 2, json!(0.5))),
            Err(ValidationError::InvalidCell { row: 1, col: 0, .. })
        );
    }

    #[test]
    fn test_negative_cell() {
        assert_matches!(
            validate(&request(json!([[1, -2]]), 2, 1, json!(0.5))),
            Err(ValidationError::InvalidCell { row: 0, col: 1, .. })
        );
    }

    #[test]
    fn test_dimension_checks() {
        assert_matches!(
            validate(&request(json!([[1]]), 1, -1, json!(0.5))),
            Err(ValidationError::NegativeDimension {
                dimension: "height",
                value: -1
            })
        );
        assert_matches!(
            validate(&request(json!([[1]]), -3, 1, json!(0.5))),
            Err(ValidationError::NegativeDimension {
                dimension: "width",
                ..
            })
        );
        assert_matches!(
            validate(&request(json!([[1], [1]]), 1, 3, json!(0.5))),
            Err(ValidationError::HeightMismatch {
                expected: 3,
                actual: 2
            })
        );
        assert_matches!(
            validate(&request(json!([[1, 1], [1]]), 2, 2, json!(0.5))),
            Err(ValidationError::WidthMismatch {
                row: 1,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_threshold_checks() {
        assert_matches!(
            validate(&request(json!([[1]]), 1, 1, json!("high"))),
            Err(ValidationError::InvalidThreshold(_))
        );
        assert_matches!(
            validate(&request(json!([[1]]), 1, 1, json!(-0.5))),
            Err(ValidationError::InvalidThreshold(_))
        );
        assert_matches!(
            validate(&request(json!([[1]]), 1, 1, Value::Null)),
            Err(ValidationError::InvalidThreshold(_))
        );
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        // Bad cell and bad threshold: the cell is reported first.
        assert_matches!(
            validate(&request(json!([[1, "x"]]), -1, 1, json!(-1))),
            Err(ValidationError::InvalidCell { .. })
        );
        // Ragged rows and a bad threshold: the shape is reported first.
        assert_matches!(
            validate(&request(json!([[1, 1], [1]]), 2, 2, json!(-1))),
            Err(ValidationError::WidthMismatch { .. })
        );
    }
}
