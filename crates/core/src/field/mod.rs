//! Phase correction vector field
//!
//! A `VectorField` owns two equally shaped grids, U (x displacement) and V
//! (y displacement), the units those values are in, and descriptive metadata.
//! The field keeps a cached `is_zero` flag that every bulk mutation refreshes,
//! so callers can skip work for fields that would move nothing.
//!
//! The analysis passes over a field live in their own modules:
//! - [`crate::vector_max`]: neighbourhood maximum-magnitude consolidation
//! - [`crate::convergence`]: convergence and the run-based convergence filter
//! - [`crate::box_stats`]: statistics over rectangular regions
//! - [`crate::warp`]: applying the field to a data grid

pub mod metadata;

pub use metadata::{FieldMetadata, PcType};

use crate::error::GridResult;
use crate::grid::Grid;
use crate::units::{external_to_local, grid_external_to_local, GridSpacing, UvUnits};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// U/V displacement field with unit semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    pub(crate) u: Grid,
    pub(crate) v: Grid,
    units: UvUnits,
    metadata: FieldMetadata,
    all_zero: bool,
}

impl VectorField {
    /// All-zero field of the given size; component grids are named
    /// `<name>_u` and `<name>_v`
    #[must_use]
    pub fn zeroed(name: &str, nx: usize, ny: usize, units: UvUnits) -> Self {
        Self {
            u: Grid::filled(format!("{name}_u"), nx, ny, 0.0),
            v: Grid::filled(format!("{name}_v"), nx, ny, 0.0),
            units,
            metadata: FieldMetadata::default(),
            all_zero: true,
        }
    }

    /// Wrap an existing pair of component grids
    pub fn from_grids(
        u: Grid,
        v: Grid,
        units: UvUnits,
        metadata: FieldMetadata,
    ) -> GridResult<Self> {
        u.check_shape(&v)?;
        let mut field = Self {
            u,
            v,
            units,
            metadata,
            all_zero: false,
        };
        field.refresh_all_zero();
        Ok(field)
    }

    #[must_use]
    pub fn u(&self) -> &Grid {
        &self.u
    }

    #[must_use]
    pub fn v(&self) -> &Grid {
        &self.v
    }

    #[must_use]
    pub fn units(&self) -> UvUnits {
        self.units
    }

    #[must_use]
    pub fn metadata(&self) -> &FieldMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut FieldMetadata {
        &mut self.metadata
    }

    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        self.u.dims()
    }

    /// True when every cell is zero or missing in both components
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.all_zero
    }

    pub(crate) fn refresh_all_zero(&mut self) {
        self.all_zero = self.u.all_missing_or_equal(0.0) && self.v.all_missing_or_equal(0.0);
    }

    fn cell_nonzero(&self, x: usize, y: usize) -> bool {
        self.u.get(x, y).is_some_and(|u| u != 0.0) || self.v.get(x, y).is_some_and(|v| v != 0.0)
    }

    /// Keep the zero flag exact after a single-cell write; only a write that
    /// zeroes a nonzero cell needs a full rescan
    fn track_cell_write(&mut self, x: usize, y: usize, was_nonzero: bool) {
        if self.cell_nonzero(x, y) {
            self.all_zero = false;
        } else if was_nonzero {
            self.refresh_all_zero();
        }
    }

    /// Replace both components at once
    pub fn set_components(&mut self, u: Grid, v: Grid, units: UvUnits) -> GridResult<()> {
        u.check_shape(&v)?;
        self.u = u;
        self.v = v;
        self.units = units;
        self.refresh_all_zero();
        Ok(())
    }

    pub fn set_names(&mut self, u_name: &str, v_name: &str) {
        self.u.set_name(u_name);
        self.v.set_name(v_name);
    }

    /// Zero every cell of both components
    pub fn set_all_zero(&mut self) {
        self.u.fill(0.0);
        self.v.fill(0.0);
        self.all_zero = true;
    }

    /// (u, v) at a cell, with (0, 0) when either component is missing
    #[must_use]
    pub fn values_or_zero(&self, x: usize, y: usize) -> (f64, f64) {
        match (self.u.get(x, y), self.v.get(x, y)) {
            (Some(u), Some(v)) => (u, v),
            _ => (0.0, 0.0),
        }
    }

    /// Set one cell
    pub fn set_values_at(&mut self, x: usize, y: usize, u: f64, v: f64) {
        let was_nonzero = self.cell_nonzero(x, y);
        self.u.set(x, y, u);
        self.v.set(x, y, v);
        self.track_cell_write(x, y, was_nonzero);
    }

    /// Add to one cell, treating missing components as zero
    pub fn increment_at(&mut self, x: usize, y: usize, du: f64, dv: f64) {
        let was_nonzero = self.cell_nonzero(x, y);
        self.u.increment_at(x, y, du);
        self.v.increment_at(x, y, dv);
        self.track_cell_write(x, y, was_nonzero);
    }

    /// Combined (min, max) over both components
    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        match (self.u.range(), self.v.range()) {
            (Some((ul, uh)), Some((vl, vh))) => Some((ul.min(vl), uh.max(vh))),
            (a, b) => a.or(b),
        }
    }

    /// Squared magnitude `u² + v²` per cell, missing unless both are present
    #[must_use]
    pub fn magnitude(&self) -> Grid {
        let mut mag = Grid::missing_like(&self.u, "magnitude");
        mag.values_mut()
            .par_iter_mut()
            .zip(self.u.values().par_iter().zip(self.v.values().par_iter()))
            .for_each(|(m, (u, v))| {
                if let (Some(u), Some(v)) = (u, v) {
                    *m = Some(u * u + v * v);
                }
            });
        mag
    }

    pub fn multiply(&mut self, scale: f64) {
        self.multiply_uv(scale, scale);
    }

    pub fn multiply_uv(&mut self, u_scale: f64, v_scale: f64) {
        self.u.multiply(u_scale);
        self.v.multiply(v_scale);
        self.refresh_all_zero();
    }

    pub fn multiply_at(&mut self, x: usize, y: usize, scale: f64) {
        let was_nonzero = self.cell_nonzero(x, y);
        self.u.multiply_at(x, y, scale);
        self.v.multiply_at(x, y, scale);
        self.track_cell_write(x, y, was_nonzero);
    }

    /// Scale pointwise by a weight grid of the same shape
    pub fn multiply_grid(&mut self, weight: &Grid) -> GridResult<()> {
        self.u.check_shape(weight)?;
        self.u.multiply_grid(weight)?;
        self.v.multiply_grid(weight)?;
        self.refresh_all_zero();
        Ok(())
    }

    /// Fade the field by a lead-time weight; a weight of 1 is a no-op
    pub fn time_taper(&mut self, weight: f64) {
        if weight != 1.0 {
            self.multiply(weight);
        }
    }

    /// Divide by a normalising grid
    ///
    /// Where the normaliser is missing or not positive both components are
    /// forced to zero.
    pub fn normalize(&mut self, norm: &Grid) -> GridResult<()> {
        self.u.check_shape(norm)?;
        let apply = |component: &mut Grid| {
            component
                .values_mut()
                .par_iter_mut()
                .zip(norm.values().par_iter())
                .for_each(|(c, n)| match n {
                    Some(n) if *n > 0.0 => {
                        if let Some(c) = c {
                            *c /= n;
                        }
                    }
                    _ => *c = Some(0.0),
                });
        };
        apply(&mut self.u);
        apply(&mut self.v);
        self.refresh_all_zero();
        Ok(())
    }

    /// Box-average each component independently
    ///
    /// With `exclude_zero`, zero cells do not count toward the mean, so sparse
    /// nonzero vectors spread into their zero neighbourhood.
    pub fn smooth(&mut self, sx: usize, sy: usize, exclude_zero: bool) {
        for component in [&mut self.u, &mut self.v] {
            if exclude_zero {
                component.smooth_through_excluded(sx, sy, 0.0);
            } else {
                component.smooth(sx, sy, None);
            }
        }
        self.refresh_all_zero();
    }

    /// Subsample both components by `factor`
    pub fn reduce(&mut self, factor: usize) -> GridResult<()> {
        let mut u = self.u.clone();
        let mut v = self.v.clone();
        u.reduce(factor)?;
        v.reduce(factor)?;
        self.u = u;
        self.v = v;
        self.refresh_all_zero();
        Ok(())
    }

    /// Bilinearly upsample a low-resolution field into this one
    ///
    /// This field's dimensions must be exactly `factor` times the input's.
    pub fn interpolate(&mut self, low_res: &VectorField, factor: usize) -> GridResult<()> {
        let mut u = self.u.clone();
        let mut v = self.v.clone();
        u.interpolate(&low_res.u, factor)?;
        v.interpolate(&low_res.v, factor)?;
        self.u = u;
        self.v = v;
        self.refresh_all_zero();
        Ok(())
    }

    /// Where the local vector is no longer than `threshold`, or incomplete,
    /// take the vector from `replacement` if it has one
    pub fn replace_le_thresh_or_missing(
        &mut self,
        replacement: &VectorField,
        threshold: f64,
    ) -> GridResult<()> {
        self.u.check_shape(&replacement.u)?;
        let tt = threshold * threshold;
        for i in 0..self.u.n_points() {
            let replace = match (self.u.get_at(i), self.v.get_at(i)) {
                (Some(u), Some(v)) => u * u + v * v <= tt,
                _ => true,
            };
            if !replace {
                continue;
            }
            if let (Some(ru), Some(rv)) = (replacement.u.get_at(i), replacement.v.get_at(i)) {
                self.u.set_at(i, ru);
                self.v.set_at(i, rv);
            }
        }
        self.refresh_all_zero();
        Ok(())
    }

    /// Bring an externally stored field into grid points and collapse
    /// components within `zero_resolution` (m/s) of zero to exactly zero
    pub fn set_local_collapse_zero(&mut self, zero_resolution: f64, spacing: GridSpacing) {
        match self.units {
            UvUnits::MetersPerSecond => {
                grid_external_to_local(&mut self.u, spacing.km_per_gridpt_x);
                grid_external_to_local(&mut self.v, spacing.km_per_gridpt_y);
                self.units = UvUnits::PureGridpoints;
            }
            UvUnits::PureGridpoints | UvUnits::GridpointsPerInterval { .. } => {}
            UvUnits::Unknown => {
                tracing::error!(units = %self.units, "bad local units");
                return;
            }
        }
        let zero_res = external_to_local(zero_resolution, spacing.km_per_gridpt());
        self.u.set_in_range_to_value(-zero_res, zero_res, 0.0);
        self.v.set_in_range_to_value(-zero_res, zero_res, 0.0);
        self.refresh_all_zero();
    }

    /// Copies of U and V converted to meters/second for output
    ///
    /// Unknown units are logged and returned unconverted.
    #[must_use]
    pub fn to_external(&self, spacing: GridSpacing) -> (Grid, Grid) {
        let mut u = self.u.clone();
        let mut v = self.v.clone();
        match (
            self.units.external_scale(spacing.km_per_gridpt_x),
            self.units.external_scale(spacing.km_per_gridpt_y),
        ) {
            (Some(su), Some(sv)) => {
                if su != 1.0 {
                    u.multiply(su);
                }
                if sv != 1.0 {
                    v.multiply(sv);
                }
            }
            _ => tracing::error!(units = %self.units, "bad local units"),
        }
        (u, v)
    }
}
