//! Scalar grid container
//!
//! A `Grid` stores 2D values in row-major order (`y * nx + x`). A cell is
//! either present (`Some(value)`) or missing (`None`); there is no reserved
//! missing number, so every `f64` is legitimate data.

use crate::error::{GridError, GridResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Named 2D grid of optional values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    name: String,
    nx: usize,
    ny: usize,
    data: Vec<Option<f64>>,
}

impl Grid {
    /// Create a grid with every cell missing
    #[must_use]
    pub fn new(name: impl Into<String>, nx: usize, ny: usize) -> Self {
        Self {
            name: name.into(),
            nx,
            ny,
            data: vec![None; nx * ny],
        }
    }

    /// Create a grid with every cell set to `value`
    #[must_use]
    pub fn filled(name: impl Into<String>, nx: usize, ny: usize, value: f64) -> Self {
        Self {
            name: name.into(),
            nx,
            ny,
            data: vec![Some(value); nx * ny],
        }
    }

    /// Create a grid from a row-major value buffer
    pub fn from_values(
        name: impl Into<String>,
        nx: usize,
        ny: usize,
        data: Vec<Option<f64>>,
    ) -> GridResult<Self> {
        if data.len() != nx * ny {
            return Err(GridError::BadLength {
                expected: nx * ny,
                found: data.len(),
            });
        }
        Ok(Self {
            name: name.into(),
            nx,
            ny,
            data,
        })
    }

    /// Create a grid by evaluating `f(x, y)` at every cell
    pub fn from_fn<F>(name: impl Into<String>, nx: usize, ny: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<f64>,
    {
        let mut data = Vec::with_capacity(nx * ny);
        for y in 0..ny {
            for x in 0..nx {
                data.push(f(x, y));
            }
        }
        Self {
            name: name.into(),
            nx,
            ny,
            data,
        }
    }

    /// Same shape as `template`, every cell missing
    #[must_use]
    pub fn missing_like(template: &Grid, name: impl Into<String>) -> Self {
        Self::new(name, template.nx, template.ny)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Grid dimensions as (nx, ny)
    #[inline]
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    #[inline]
    #[must_use]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    #[must_use]
    pub fn ny(&self) -> usize {
        self.ny
    }

    /// Total number of cells
    #[inline]
    #[must_use]
    pub fn n_points(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x < self.nx && y < self.ny, "({x},{y}) outside grid");
        y * self.nx + x
    }

    /// True when signed coordinates fall inside the grid
    #[inline]
    #[must_use]
    pub fn in_range(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.nx && (y as usize) < self.ny
    }

    /// Value at (x, y), `None` when missing
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of bounds
    #[inline]
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        self.data[self.index(x, y)]
    }

    /// Value at a flat row-major index
    #[inline]
    #[must_use]
    pub fn get_at(&self, i: usize) -> Option<f64> {
        self.data[i]
    }

    #[inline]
    #[must_use]
    pub fn is_missing(&self, x: usize, y: usize) -> bool {
        self.get(x, y).is_none()
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f64) {
        let i = self.index(x, y);
        self.data[i] = Some(value);
    }

    /// Store an optional value, `None` marks the cell missing
    #[inline]
    pub fn put(&mut self, x: usize, y: usize, value: Option<f64>) {
        let i = self.index(x, y);
        self.data[i] = value;
    }

    #[inline]
    pub fn set_at(&mut self, i: usize, value: f64) {
        self.data[i] = Some(value);
    }

    #[inline]
    pub fn set_missing(&mut self, x: usize, y: usize) {
        let i = self.index(x, y);
        self.data[i] = None;
    }

    /// Row-major view of all cells
    #[must_use]
    pub fn values(&self) -> &[Option<f64>] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [Option<f64>] {
        &mut self.data
    }

    /// Set every cell to `value`
    pub fn fill(&mut self, value: f64) {
        self.data.fill(Some(value));
    }

    pub fn set_all_missing(&mut self) {
        self.data.fill(None);
    }

    /// Shape check against another grid
    pub fn check_shape(&self, other: &Grid) -> GridResult<()> {
        if self.dims() == other.dims() {
            Ok(())
        } else {
            Err(GridError::mismatch(self.dims(), other.dims()))
        }
    }

    /// Scale every present cell
    pub fn multiply(&mut self, scale: f64) {
        self.data.par_iter_mut().for_each(|cell| {
            if let Some(v) = cell {
                *v *= scale;
            }
        });
    }

    /// Scale one cell if present
    pub fn multiply_at(&mut self, x: usize, y: usize, scale: f64) {
        let i = self.index(x, y);
        if let Some(v) = &mut self.data[i] {
            *v *= scale;
        }
    }

    /// Multiply pointwise by `weight`; cells where the weight is missing keep
    /// their value
    pub fn multiply_grid(&mut self, weight: &Grid) -> GridResult<()> {
        self.check_shape(weight)?;
        self.data
            .par_iter_mut()
            .zip(weight.data.par_iter())
            .for_each(|(cell, w)| {
                if let (Some(v), Some(w)) = (cell.as_mut(), w) {
                    *v *= w;
                }
            });
        Ok(())
    }

    /// Add `delta` at a cell; a missing cell becomes `delta`
    pub fn increment_at(&mut self, x: usize, y: usize, delta: f64) {
        let i = self.index(x, y);
        self.data[i] = Some(self.data[i].unwrap_or(0.0) + delta);
    }

    /// True when every cell is missing or exactly `value`
    #[must_use]
    pub fn all_missing_or_equal(&self, value: f64) -> bool {
        self.data.iter().all(|c| c.is_none_or(|v| v == value))
    }

    /// Replace present values inside `[lo, hi]` with `value`
    pub fn set_in_range_to_value(&mut self, lo: f64, hi: f64, value: f64) {
        for v in self.data.iter_mut().flatten() {
            if *v >= lo && *v <= hi {
                *v = value;
            }
        }
    }

    /// (min, max) over present cells, `None` if all missing
    #[must_use]
    pub fn range(&self) -> Option<(f64, f64)> {
        self.data.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Subsample by an integer factor, keeping every `factor`-th cell
    pub fn reduce(&mut self, factor: usize) -> GridResult<()> {
        if factor < 2 {
            return Err(GridError::factor(factor, "factor too small"));
        }
        let nx = self.nx / factor;
        let ny = self.ny / factor;
        if nx < 1 || ny < 1 {
            return Err(GridError::factor(factor, "factor too big"));
        }
        let reduced = Self::from_fn(self.name.clone(), nx, ny, |x, y| {
            self.get(x * factor, y * factor)
        });
        *self = reduced;
        Ok(())
    }

    /// Bilinearly upsample `low_res` into this grid
    ///
    /// Requires `nx == low_res.nx * factor` and likewise for y. Low-resolution
    /// corners that are missing or beyond the grid count as zero.
    pub fn interpolate(&mut self, low_res: &Grid, factor: usize) -> GridResult<()> {
        if factor == 0 {
            return Err(GridError::factor(factor, "factor must be positive"));
        }
        let expected = (low_res.nx * factor, low_res.ny * factor);
        if self.dims() != expected {
            return Err(GridError::mismatch(self.dims(), expected));
        }
        let nx = self.nx;
        self.data
            .par_chunks_mut(nx)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, cell) in row.iter_mut().enumerate() {
                    *cell = Some(bilinear(low_res, factor, x, y));
                }
            });
        Ok(())
    }
}

/// Bilinear weight of the four low-resolution neighbours of high-res (x, y)
fn bilinear(low: &Grid, res: usize, x: usize, y: usize) -> f64 {
    let rx0 = x / res;
    let ry0 = y / res;
    let corner = |rx: usize, ry: usize| -> f64 {
        if rx < low.nx && ry < low.ny {
            low.get(rx, ry).unwrap_or(0.0)
        } else {
            0.0
        }
    };
    let f00 = corner(rx0, ry0);
    let f01 = corner(rx0, ry0 + 1);
    let f10 = corner(rx0 + 1, ry0);
    let f11 = corner(rx0 + 1, ry0 + 1);

    let x0 = (rx0 * res) as f64;
    let y0 = (ry0 * res) as f64;
    let r = res as f64;
    let x1 = x0 + r;
    let y1 = y0 + r;
    let (xf, yf) = (x as f64, y as f64);

    (f00 * (x1 - xf) * (y1 - yf)
        + f10 * (xf - x0) * (y1 - yf)
        + f01 * (x1 - xf) * (yf - y0)
        + f11 * (xf - x0) * (yf - y0))
        / (r * r)
}
