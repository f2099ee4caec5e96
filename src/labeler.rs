//! Flood-Fill Labeler
//!
//! Counts 4-connected regions of cells strictly above the threshold. Every
//! quantity the traversal touches (bounds, threshold, running count and each
//! cell) is a [`ProtectedValue`] re-read through the [`ParameterStore`] at the
//! point of use, so a soft error hitting any of them mid-run is corrected
//! before it can steer the traversal.
//!
//! # Failure isolation
//!
//! A fault raised while expanding one component abandons that component only:
//! the count is not incremented and the scan moves on. Once the scan finishes,
//! any abandoned expansion turns the whole run into [`Error::Traversal`]. A
//! fault in the scan loop itself ends the run immediately.

use std::collections::VecDeque;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::ec::protected::ProtectedValue;
use crate::ec::store::{ParamKey, ParameterStore};
use crate::error::{Error, Result};
use crate::grid::ValidGrid;

// =============================================================================
// Visited Set
// =============================================================================

/// Coordinates already examined by one labeling run
#[derive(Debug, Clone)]
pub struct VisitedSet {
    seen: Vec<bool>,
    width: usize,
    height: usize,
}

impl VisitedSet {
    /// Empty set covering a `height` x `width` grid
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            seen: vec![false; width * height],
            width,
            height,
        }
    }

    /// Whether `(row, col)` was already examined.
    ///
    /// Coordinates outside the set are reported as unvisited.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.index(row, col).map_or(false, |i| self.seen[i])
    }

    /// Mark `(row, col)`; returns `false` if it was already marked or lies
    /// outside the set
    pub fn insert(&mut self, row: usize, col: usize) -> bool {
        match self.index(row, col) {
            Some(i) if !self.seen[i] => {
                self.seen[i] = true;
                true
            }
            _ => false,
        }
    }

    /// Number of marked coordinates
    pub fn len(&self) -> usize {
        self.seen.iter().filter(|s| **s).count()
    }

    /// Whether nothing has been marked
    pub fn is_empty(&self) -> bool {
        !self.seen.iter().any(|s| *s)
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.height && col < self.width).then(|| row * self.width + col)
    }
}

// =============================================================================
// Protected Grid
// =============================================================================

/// A validated grid with every parameter under error correction
#[derive(Debug, Clone)]
pub struct ProtectedGrid {
    width: ProtectedValue<usize>,
    height: ProtectedValue<usize>,
    threshold: ProtectedValue<f64>,
    cells: Vec<ProtectedValue<f64>>,
    stride: usize,
    rows: usize,
}

impl ProtectedGrid {
    /// Encode the grid, its dimensions and threshold
    pub fn encode(valid: &ValidGrid, store: &ParameterStore) -> Result<Self> {
        let stride = valid.grid.width();
        let rows = valid.grid.height();

        let mut cells = Vec::with_capacity(stride * rows);
        for (row, values) in valid.grid.rows().enumerate() {
            for (col, value) in values.iter().enumerate() {
                cells.push(ProtectedValue::new(ParamKey::Cell { row, col }, *value, store)?);
            }
        }

        Ok(Self {
            width: ProtectedValue::new(ParamKey::Width, stride, store)?,
            height: ProtectedValue::new(ParamKey::Height, rows, store)?,
            threshold: ProtectedValue::new(ParamKey::Threshold, valid.threshold.value(), store)?,
            cells,
            stride,
            rows,
        })
    }

    /// Reconciled column count
    pub fn width(&mut self, store: &mut ParameterStore) -> Result<usize> {
        self.width.read(store)
    }

    /// Reconciled row count
    pub fn height(&mut self, store: &mut ParameterStore) -> Result<usize> {
        self.height.read(store)
    }

    /// Reconciled threshold
    pub fn threshold(&mut self, store: &mut ParameterStore) -> Result<f64> {
        self.threshold.read(store)
    }

    /// Reconciled reading at `(row, col)`
    pub fn cell(&mut self, row: usize, col: usize, store: &mut ParameterStore) -> Result<f64> {
        self.cell_mut(row, col)
            .ok_or(Error::OutOfBounds { row, col })?
            .read(store)
    }

    /// Whether the reconciled reading at `(row, col)` exceeds the reconciled threshold
    pub fn is_occupied(&mut self, row: usize, col: usize, store: &mut ParameterStore) -> Result<bool> {
        let value = self.cell(row, col, store)?;
        Ok(value > self.threshold(store)?)
    }

    /// Shape the cells were encoded with, as `(width, height)`
    pub fn layout(&self) -> (usize, usize) {
        (self.stride, self.rows)
    }

    /// Direct access to one protected cell
    pub fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut ProtectedValue<f64>> {
        if row < self.rows && col < self.stride {
            self.cells.get_mut(row * self.stride + col)
        } else {
            None
        }
    }
}

// =============================================================================
// Counting
// =============================================================================

/// Encode `valid` and count its objects
pub fn count_valid(
    valid: &ValidGrid,
    store: &mut ParameterStore,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut grid = ProtectedGrid::encode(valid, store)?;
    count_objects(&mut grid, store, cancel)
}

/// Count 4-connected components of occupied cells.
///
/// Checks `cancel` at every scan position and every expansion step.
#[instrument(skip_all, fields(replica = store.replica()))]
pub fn count_objects(
    grid: &mut ProtectedGrid,
    store: &mut ParameterStore,
    cancel: &CancellationToken,
) -> Result<u64> {
    let (stride, rows) = grid.layout();
    let mut visited = VisitedSet::new(stride, rows);
    let mut count = ProtectedValue::new(ParamKey::ObjectCount, 0u64, store)?;
    let mut failed_expansions = 0;

    let mut row = 0;
    while row < grid.height(store)? {
        let mut col = 0;
        while col < grid.width(store)? {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if !visited.contains(row, col) && grid.is_occupied(row, col, store)? {
                match expand(grid, store, &mut visited, (row, col), cancel) {
                    Ok(size) => {
                        let objects = count.read(store)?;
                        count.write(objects + 1, store)?;
                        debug!(row, col, size, "Labeled object");
                    }
                    Err(err) if err.is_isolatable() => {
                        failed_expansions += 1;
                        warn!(row, col, error = %err, "Abandoned component expansion");
                    }
                    Err(err) => return Err(err),
                }
            }
            col += 1;
        }
        row += 1;
    }

    if failed_expansions > 0 {
        return Err(Error::Traversal { failed_expansions });
    }

    let objects = count.read(store)?;
    debug!(objects, "Labeling complete");
    Ok(objects)
}

/// Breadth-first expansion from an occupied seed; returns the component size.
///
/// Neighbours are marked before their value is read, so a cell whose read
/// fails here is not read again by the scan.
fn expand(
    grid: &mut ProtectedGrid,
    store: &mut ParameterStore,
    visited: &mut VisitedSet,
    seed: (usize, usize),
    cancel: &CancellationToken,
) -> Result<usize> {
    visited.insert(seed.0, seed.1);
    let mut queue = VecDeque::from([seed]);
    let mut size = 0;

    while let Some((row, col)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        size += 1;

        let height = grid.height(store)?;
        let width = grid.width(store)?;
        for (r, c) in neighbours(row, col, width, height).into_iter().flatten() {
            if visited.insert(r, c) && grid.is_occupied(r, c, store)? {
                queue.push_back((r, c));
            }
        }
    }

    Ok(size)
}

/// Orthogonal neighbours of `(row, col)` that fall inside the bounds
fn neighbours(row: usize, col: usize, width: usize, height: usize) -> [Option<(usize, usize)>; 4] {
    [
        row.checked_sub(1).map(|r| (r, col)),
        (row + 1 < height).then(|| (row + 1, col)),
        col.checked_sub(1).map(|c| (row, c)),
        (col + 1 < width).then(|| (row, col + 1)),
    ]
}
