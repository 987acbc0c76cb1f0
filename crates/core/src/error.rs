//! Error types for grid and vector field operations

use thiserror::Error;

/// Failure of a whole-grid operation.
///
/// Every operation that returns this leaves its receiver unmodified. Per-cell
/// problems (missing values, out-of-range displacements) never surface here;
/// they are absorbed locally by the algorithm that meets them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    /// Two grids that must share a shape do not
    #[error("grid dimensions differ: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        /// (nx, ny) of the receiver
        expected: (usize, usize),
        /// (nx, ny) of the argument
        found: (usize, usize),
    },

    /// A flat value buffer whose length is not nx * ny
    #[error("value buffer holds {found} cells, grid needs {expected}")]
    BadLength {
        /// nx * ny
        expected: usize,
        /// Length of the supplied buffer
        found: usize,
    },

    /// A resolution factor that cannot be applied to this grid
    #[error("cannot resample by factor {factor}: {reason}")]
    InvalidFactor {
        /// The requested factor
        factor: usize,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl GridError {
    /// Build a dimension error, logging it the way every shape check does
    pub(crate) fn mismatch(expected: (usize, usize), found: (usize, usize)) -> Self {
        tracing::error!(?expected, ?found, "grid dimensions unequal");
        Self::DimensionMismatch { expected, found }
    }

    pub(crate) fn factor(factor: usize, reason: &'static str) -> Self {
        tracing::warn!(factor, reason, "cannot resample grid");
        Self::InvalidFactor { factor, reason }
    }
}

/// Result alias for grid operations
pub type GridResult<T> = Result<T, GridError>;
