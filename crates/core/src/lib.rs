//! Phase Correction Core Library
//!
//! Nowcasting systems shift forecast grids so that predicted features line up
//! with what was observed. The shift is a 2D displacement field; this crate
//! holds that field, the passes that reduce and filter it, and the warp that
//! applies it to a data grid.
//!
//! ## Layout
//!
//! - [`grid`]: the 2D container with missing-value support, box filters and
//!   resampling
//! - [`units`]: grid-point ↔ meters/second conversion and unit tags
//! - [`field`]: the U/V vector field and its elementwise operations
//! - [`window`]: sliding-window traversal with an incrementally kept maximum
//! - [`vector_max`]: neighbourhood maximum-magnitude consolidation
//! - [`convergence`]: convergence and the run-based convergence filter
//! - [`box_stats`]: statistics over rectangular regions
//! - [`warp`]: applying a field to a data grid
//!
//! The library logs through `tracing` and installs no subscriber.

pub mod box_stats;
pub mod convergence;
pub mod error;
pub mod field;
pub mod grid;
pub mod lookup;
pub mod units;
pub mod vector_max;
pub mod warp;
pub mod window;

pub use box_stats::BoxRegion;
pub use convergence::{Axis, ConvFilterConfig, Run};
pub use error::{GridError, GridResult};
pub use field::{FieldMetadata, PcType, VectorField};
pub use grid::Grid;
pub use lookup::{ExpansionLookup, PiecewiseLinear};
pub use units::{GridSpacing, UvUnits};
pub use warp::{WarpConfig, WarpDecision};
pub use window::{SweepCounts, WindowTraversal, WindowedExtremum};
