//! Statistics and edits over rectangular regions of a field
//!
//! A region is given by its lower-left corner and extent and may hang off the
//! grid on any side; cells outside the grid are skipped rather than counted as
//! missing. Only cells where both components are present contribute.

use crate::field::VectorField;
use serde::{Deserialize, Serialize};

/// Rectangle `[x0, x0+nx) × [y0, y0+ny)` in grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxRegion {
    pub x0: isize,
    pub y0: isize,
    pub nx: usize,
    pub ny: usize,
}

impl BoxRegion {
    #[must_use]
    pub fn new(x0: isize, y0: isize, nx: usize, ny: usize) -> Self {
        Self { x0, y0, nx, ny }
    }

    /// Cells of the region that fall on a `grid_nx × grid_ny` grid
    pub fn clipped_cells(
        &self,
        grid_nx: usize,
        grid_ny: usize,
    ) -> impl Iterator<Item = (usize, usize)> {
        let clip = |start: isize, len: usize, n: usize| {
            let lo = start.max(0) as usize;
            let hi = (start + len as isize).clamp(0, n as isize) as usize;
            lo..hi.max(lo)
        };
        let xs = clip(self.x0, self.nx, grid_nx);
        let ys = clip(self.y0, self.ny, grid_ny);
        ys.flat_map(move |y| xs.clone().map(move |x| (x, y)))
    }
}

impl VectorField {
    fn present_in_box(&self, region: BoxRegion) -> impl Iterator<Item = (f64, f64)> + '_ {
        let (nx, ny) = self.dims();
        region
            .clipped_cells(nx, ny)
            .filter_map(move |(x, y)| self.u.get(x, y).zip(self.v.get(x, y)))
    }

    /// Largest vector length in the region, 0.0 when nothing is present
    #[must_use]
    pub fn max_magnitude_in_box(&self, region: BoxRegion) -> f64 {
        self.present_in_box(region)
            .map(|(u, v)| u * u + v * v)
            .fold(0.0, f64::max)
            .sqrt()
    }

    /// Mean `(u, v)` of the region, or `None` if it holds no present vector
    #[must_use]
    pub fn mean_in_box(&self, region: BoxRegion) -> Option<(f64, f64)> {
        let (su, sv, n) = self
            .present_in_box(region)
            .fold((0.0, 0.0, 0usize), |(su, sv, n), (u, v)| (su + u, sv + v, n + 1));
        (n > 0).then(|| (su / n as f64, sv / n as f64))
    }

    /// Mean squared distance of the region's vectors from their own mean
    #[must_use]
    pub fn variance_in_box(&self, region: BoxRegion) -> f64 {
        self.mean_in_box(region)
            .map_or(0.0, |(ubar, vbar)| self.variance_in_box_about(region, ubar, vbar))
    }

    /// Mean squared distance of the region's vectors from `(ubar, vbar)`
    #[must_use]
    pub fn variance_in_box_about(&self, region: BoxRegion, ubar: f64, vbar: f64) -> f64 {
        let (sum, n) = self.present_in_box(region).fold((0.0, 0usize), |(s, n), (u, v)| {
            (s + (u - ubar).powi(2) + (v - vbar).powi(2), n + 1)
        });
        if n > 0 {
            sum / n as f64
        } else {
            0.0
        }
    }

    /// Copy the region from `source`; cells where `source` is incomplete
    /// become missing in both components
    pub fn copy_box(&mut self, source: &VectorField, region: BoxRegion) {
        let (nx, ny) = self.dims();
        let (snx, sny) = source.dims();
        for (x, y) in region.clipped_cells(nx.min(snx), ny.min(sny)) {
            match source.u.get(x, y).zip(source.v.get(x, y)) {
                Some((u, v)) => {
                    self.u.set(x, y, u);
                    self.v.set(x, y, v);
                }
                None => {
                    self.u.set_missing(x, y);
                    self.v.set_missing(x, y);
                }
            }
        }
        self.refresh_all_zero();
    }

    /// Scale both components of every present cell in the region
    pub fn normalize_in_box(&mut self, region: BoxRegion, scale: f64) {
        let (nx, ny) = self.dims();
        for (x, y) in region.clipped_cells(nx, ny) {
            self.u.multiply_at(x, y, scale);
            self.v.multiply_at(x, y, scale);
        }
        self.refresh_all_zero();
    }
}
