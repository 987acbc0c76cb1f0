//! Box filters over a `Grid`
//!
//! All filters read from the grid as it was before the pass and write a fresh
//! buffer, so a cell's result never depends on neighbours already updated in
//! the same pass. Window sizes are half-widths: `(hx, hy)` covers
//! `[x-hx, x+hx] × [y-hy, y+hy]`, clipped to the grid.

use super::Grid;
use crate::error::{GridError, GridResult};
use rayon::prelude::*;
use std::ops::RangeInclusive;

/// Inclusive index window of half-width `half` around `center`, clipped to `0..n`
#[inline]
pub(crate) fn clipped_window(center: usize, half: usize, n: usize) -> RangeInclusive<usize> {
    center.saturating_sub(half)..=center.saturating_add(half).min(n.saturating_sub(1))
}

impl Grid {
    /// Mean of present cells in the window around (x, y)
    ///
    /// With an `exclude` value, cells equal to it are left out of the mean.
    /// When `keep_excluded_center` is set, a centre equal to the exclude value
    /// is returned unchanged; otherwise a window holding nothing but excluded
    /// cells yields the exclude value.
    #[must_use]
    pub fn box_mean_at(
        &self,
        x: usize,
        y: usize,
        hx: usize,
        hy: usize,
        exclude: Option<f64>,
        keep_excluded_center: bool,
    ) -> Option<f64> {
        if keep_excluded_center {
            if let (Some(ex), Some(center)) = (exclude, self.get(x, y)) {
                if center == ex {
                    return Some(ex);
                }
            }
        }

        let mut sum = 0.0;
        let mut n = 0usize;
        let mut saw_excluded = false;
        for iy in clipped_window(y, hy, self.ny()) {
            for ix in clipped_window(x, hx, self.nx()) {
                let Some(v) = self.get(ix, iy) else {
                    continue;
                };
                if exclude == Some(v) {
                    saw_excluded = true;
                } else {
                    sum += v;
                    n += 1;
                }
            }
        }

        if n > 0 {
            Some(sum / n as f64)
        } else if saw_excluded && !keep_excluded_center {
            exclude
        } else {
            None
        }
    }

    /// Mean of window cells at least as large as the centre value
    ///
    /// Missing centres stay missing; a centre equal to the exclude value is
    /// returned unchanged and excluded cells never join the mean.
    #[must_use]
    pub fn high_mean_at(
        &self,
        x: usize,
        y: usize,
        hx: usize,
        hy: usize,
        exclude: Option<f64>,
    ) -> Option<f64> {
        let center = self.get(x, y)?;
        if exclude == Some(center) {
            return Some(center);
        }
        let mut sum = 0.0;
        let mut n = 0usize;
        for iy in clipped_window(y, hy, self.ny()) {
            for ix in clipped_window(x, hx, self.nx()) {
                if let Some(v) = self.get(ix, iy) {
                    if v >= center && exclude != Some(v) {
                        sum += v;
                        n += 1;
                    }
                }
            }
        }
        (n > 0).then(|| sum / n as f64)
    }

    /// Evaluate `f` at every cell against the current state, then store
    fn replace_cells<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, Option<f64>) -> Option<f64> + Sync,
    {
        let nx = self.nx().max(1);
        let mut next = self.values().to_vec();
        next.par_chunks_mut(nx).enumerate().for_each(|(y, row)| {
            for (x, cell) in row.iter_mut().enumerate() {
                *cell = f(x, y, *cell);
            }
        });
        self.values_mut().copy_from_slice(&next);
    }

    fn check_mask(&self, mask: &[bool]) -> GridResult<()> {
        if mask.len() == self.n_points() {
            Ok(())
        } else {
            tracing::error!(mask = mask.len(), grid = self.n_points(), "mask size");
            Err(GridError::BadLength {
                expected: self.n_points(),
                found: mask.len(),
            })
        }
    }

    /// Box-average every cell; a centre equal to `exclude` is kept as is
    pub fn smooth(&mut self, hx: usize, hy: usize, exclude: Option<f64>) {
        let src = self.clone();
        self.replace_cells(|x, y, _| src.box_mean_at(x, y, hx, hy, exclude, true));
    }

    /// Box-average every cell, letting non-excluded neighbours overwrite an
    /// excluded centre
    ///
    /// Used for sparse vector components where zero means "no vector": a zero
    /// surrounded by nonzero values takes their mean, and an all-zero window
    /// stays zero.
    pub fn smooth_through_excluded(&mut self, hx: usize, hy: usize, exclude: f64) {
        let src = self.clone();
        self.replace_cells(|x, y, _| src.box_mean_at(x, y, hx, hy, Some(exclude), false));
    }

    /// Box-average only where `mask` is set
    pub fn smooth_in_mask(
        &mut self,
        mask: &[bool],
        hx: usize,
        hy: usize,
        exclude: Option<f64>,
    ) -> GridResult<()> {
        self.check_mask(mask)?;
        let src = self.clone();
        let nx = self.nx();
        self.replace_cells(|x, y, cur| {
            if mask[y * nx + x] {
                src.box_mean_at(x, y, hx, hy, exclude, true)
            } else {
                cur
            }
        });
        Ok(())
    }

    /// High-average every cell
    pub fn high_smooth(&mut self, hx: usize, hy: usize, exclude: Option<f64>) {
        let src = self.clone();
        self.replace_cells(|x, y, _| src.high_mean_at(x, y, hx, hy, exclude));
    }

    /// High-average only where `mask` is set
    pub fn high_smooth_in_mask(
        &mut self,
        mask: &[bool],
        hx: usize,
        hy: usize,
        exclude: Option<f64>,
    ) -> GridResult<()> {
        self.check_mask(mask)?;
        let src = self.clone();
        let nx = self.nx();
        self.replace_cells(|x, y, cur| {
            if mask[y * nx + x] {
                src.high_mean_at(x, y, hx, hy, exclude)
            } else {
                cur
            }
        });
        Ok(())
    }

    /// Fill missing cells with the mean of present cells in the window
    pub fn fill_gaps(&mut self, hx: usize, hy: usize) {
        let src = self.clone();
        self.replace_cells(|x, y, cur| cur.or_else(|| src.box_mean_at(x, y, hx, hy, None, true)));
    }
}
