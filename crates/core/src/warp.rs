//! Applying a phase correction field to a data grid
//!
//! Every cell with a nonzero (weighted) vector moves its data value to the
//! cell the vector points at. Cells that are left empty are filled from their
//! nearest surviving neighbours, remaining gaps are box-filled, and the result
//! is smoothed to hide the seams.
//!
//! ```
//! use phase_correct_core::{Grid, UvUnits, VectorField, WarpConfig};
//!
//! let mut field = VectorField::zeroed("pc", 4, 1, UvUnits::PureGridpoints);
//! field.set_values_at(0, 0, 1.0, 0.0);
//! let mut data = Grid::from_fn("data", 4, 1, |x, _| Some(x as f64 * 10.0));
//! field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
//! assert_eq!(data.get(1, 0), Some(0.0));
//! ```

use crate::error::GridResult;
use crate::field::{PcType, VectorField};
use crate::grid::Grid;
use crate::units::UvUnits;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Gap filling and smoothing applied after the move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarpConfig {
    /// Half-widths of the gap fill box
    pub gap_fill: (usize, usize),
    /// Half-widths of the smoothing box
    pub smooth: (usize, usize),
    /// Average only window values at least as large as the centre
    pub use_high_smooth: bool,
    /// Smooth only cells that were vacated or received a value
    pub smooth_where_corrected: bool,
    /// Value that never blends into a smoothing average
    pub exclude_when_smoothing: Option<f64>,
    /// Correct even when the field was judged to have low skill
    pub always_phase_correct: bool,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            gap_fill: (2, 2),
            smooth: (1, 1),
            use_high_smooth: false,
            smooth_where_corrected: true,
            exclude_when_smoothing: None,
            always_phase_correct: false,
        }
    }
}

impl WarpConfig {
    /// No gap filling and no smoothing: only the move and nearest-value fill
    #[must_use]
    pub fn identity() -> Self {
        Self {
            gap_fill: (0, 0),
            smooth: (0, 0),
            smooth_where_corrected: false,
            ..Self::default()
        }
    }
}

/// Whether a field gets applied to the data, and at what weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WarpDecision {
    PassThrough,
    ForceCorrection { weight: f64 },
}

impl WarpDecision {
    #[must_use]
    pub fn choose(pc_type: PcType, always_phase_correct: bool) -> Self {
        match pc_type {
            PcType::NoUvOrZeroUvData => WarpDecision::PassThrough,
            PcType::LowSkill if !always_phase_correct => WarpDecision::PassThrough,
            _ => WarpDecision::ForceCorrection { weight: 1.0 },
        }
    }
}

/// Output cell state during a warp
#[derive(Debug, Clone, Copy, PartialEq)]
enum WarpCell {
    Data(Option<f64>),
    /// Moved away from and not yet refilled
    Vacated,
}

/// Cells at Chebyshev distance exactly `r` from `(x0, y0)` that lie on the grid
fn ring(
    x0: usize,
    y0: usize,
    r: usize,
    nx: usize,
    ny: usize,
) -> impl Iterator<Item = (usize, usize)> {
    let (x0, y0, r) = (x0 as isize, y0 as isize, r as isize);
    let rows = [-r, r]
        .into_iter()
        .flat_map(move |dy| (-r..=r).map(move |dx| (dx, dy)));
    let cols = [-r, r]
        .into_iter()
        .flat_map(move |dx| (1 - r..r).map(move |dy| (dx, dy)));
    rows.chain(cols)
        .map(move |(dx, dy)| (x0 + dx, y0 + dy))
        .filter(move |&(x, y)| x >= 0 && y >= 0 && (x as usize) < nx && (y as usize) < ny)
        .map(|(x, y)| (x as usize, y as usize))
}

/// Largest present value on the nearest ring holding any non-vacated cell;
/// missing when that ring holds only missing cells, or no ring does
fn nearest_ring_max(cells: &[WarpCell], nx: usize, ny: usize, x: usize, y: usize) -> Option<f64> {
    for r in 1..nx.max(ny) {
        let mut found = false;
        let mut best: Option<f64> = None;
        for (rx, ry) in ring(x, y, r, nx, ny) {
            if let WarpCell::Data(value) = cells[ry * nx + rx] {
                found = true;
                if let Some(v) = value {
                    best = Some(best.map_or(v, |b| b.max(v)));
                }
            }
        }
        if found {
            return best;
        }
    }
    None
}

/// Resolve every vacated cell against the buffer as it stands after the move
fn resolve_vacated(cells: &[WarpCell], nx: usize, ny: usize) -> Vec<Option<f64>> {
    cells
        .par_iter()
        .enumerate()
        .map(|(i, cell)| match *cell {
            WarpCell::Data(value) => value,
            WarpCell::Vacated => nearest_ring_max(cells, nx, ny, i % nx, i / nx),
        })
        .collect()
}

impl VectorField {
    /// Weighted displacement at a cell, `None` when it would move nothing
    ///
    /// A missing component counts as zero. A non-finite displacement has no
    /// destination and leaves the cell in place.
    fn shift_at(&self, x: usize, y: usize, weight: f64) -> Option<(f64, f64)> {
        let u = self.u.get(x, y).unwrap_or(0.0) * weight;
        let v = self.v.get(x, y).unwrap_or(0.0) * weight;
        (u.is_finite() && v.is_finite() && (u != 0.0 || v != 0.0)).then_some((u, v))
    }

    /// Phase-correct `data` according to the field's correction type
    pub fn phase_correct(&self, config: &WarpConfig, data: &Grid) -> GridResult<Grid> {
        let mut out = data.clone();
        match WarpDecision::choose(self.metadata().pc_type, config.always_phase_correct) {
            WarpDecision::PassThrough => {
                tracing::debug!(pc_type = ?self.metadata().pc_type, "phase correction skipped");
            }
            WarpDecision::ForceCorrection { weight } => self.apply(weight, config, &mut out)?,
        }
        Ok(out)
    }

    /// Warp `data` by this field scaled by `weight`
    ///
    /// The field must be in grid-point units. Fails without touching `data`
    /// when its dimensions differ from the field's. A field whose units are
    /// unknown leaves `data` alone.
    pub fn apply(&self, weight: f64, config: &WarpConfig, data: &mut Grid) -> GridResult<()> {
        if weight == 0.0 {
            return Ok(());
        }
        self.u.check_shape(data)?;
        match self.units() {
            UvUnits::Unknown => {
                tracing::error!(units = %self.units(), "cannot warp with unknown units");
                return Ok(());
            }
            units if !units.is_local() => {
                tracing::warn!(%units, "warping with non-local units");
            }
            _ => {}
        }

        let (nx, ny) = self.dims();
        let shifts: Vec<Option<(f64, f64)>> = (0..nx * ny)
            .map(|i| self.shift_at(i % nx, i / nx, weight))
            .collect();
        if shifts.iter().all(Option::is_none) {
            return Ok(());
        }

        let mut cells: Vec<WarpCell> = data.values().iter().map(|&v| WarpCell::Data(v)).collect();
        let mut mask = vec![false; nx * ny];
        for (i, shift) in shifts.iter().enumerate() {
            if shift.is_some() {
                cells[i] = WarpCell::Vacated;
                mask[i] = true;
            }
        }

        let mut moved = 0usize;
        let mut dropped = 0usize;
        for (i, shift) in shifts.iter().enumerate() {
            let Some((u, v)) = *shift else {
                continue;
            };
            let fx = ((i % nx) as f64 + u).round();
            let fy = ((i / nx) as f64 + v).round();
            if fx < 0.0 || fy < 0.0 || fx >= nx as f64 || fy >= ny as f64 {
                dropped += 1;
                continue;
            }
            let to = fy as usize * nx + fx as usize;
            mask[to] = true;
            cells[to] = WarpCell::Data(data.get_at(i));
            moved += 1;
        }
        let vacated = cells.iter().filter(|c| **c == WarpCell::Vacated).count();
        tracing::debug!(moved, dropped, vacated, weight, "warp moves");

        let mut out = Grid::from_values(data.name(), nx, ny, resolve_vacated(&cells, nx, ny))?;
        out.fill_gaps(config.gap_fill.0, config.gap_fill.1);

        let (sx, sy) = config.smooth;
        let exclude = config.exclude_when_smoothing;
        match (config.use_high_smooth, config.smooth_where_corrected) {
            (true, true) => out.high_smooth_in_mask(&mask, sx, sy, exclude)?,
            (true, false) => out.high_smooth(sx, sy, exclude),
            (false, true) => out.smooth_in_mask(&mask, sx, sy, exclude)?,
            (false, false) => out.smooth(sx, sy, exclude),
        }

        *data = out;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldMetadata;
    use approx::assert_relative_eq;

    fn uniform(nx: usize, ny: usize, u: f64, v: f64) -> VectorField {
        VectorField::from_grids(
            Grid::filled("u", nx, ny, u),
            Grid::filled("v", nx, ny, v),
            UvUnits::PureGridpoints,
            FieldMetadata::with_pc_type(PcType::Standard),
        )
        .unwrap()
    }

    fn row(values: &[Option<f64>]) -> Grid {
        Grid::from_values("data", values.len(), 1, values.to_vec()).unwrap()
    }

    #[test]
    fn test_ring_perimeter() {
        let mut cells: Vec<_> = ring(2, 2, 1, 5, 5).collect();
        cells.sort_unstable();
        assert_eq!(cells.len(), 8);
        assert!(!cells.contains(&(2, 2)));
        assert_eq!(ring(0, 0, 2, 5, 5).count(), 5);
        assert_eq!(ring(0, 0, 1, 1, 1).count(), 0);
    }

    #[test]
    fn test_uniform_shift_fills_trailing_columns() {
        let field = uniform(5, 5, 2.0, 0.0);
        let mut data = Grid::from_fn("data", 5, 5, |x, _| Some(x as f64));
        field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
        for y in 0..5 {
            let got: Vec<_> = (0..5).map(|x| data.get(x, y).unwrap()).collect();
            assert_eq!(got, vec![0.0, 0.0, 0.0, 1.0, 2.0], "row {y}");
        }
    }

    #[test]
    fn test_zero_field_is_identity_for_any_weight() {
        let field = uniform(4, 3, 0.0, 0.0);
        let source = Grid::from_fn("data", 4, 3, |x, y| (x != y).then(|| (x * 7 + y) as f64));
        for weight in [0.0, 0.5, 1.0, -3.0] {
            let mut data = source.clone();
            field.apply(weight, &WarpConfig::default(), &mut data).unwrap();
            assert_eq!(data, source);
        }
    }

    #[test]
    fn test_zero_weight_is_identity() {
        let field = uniform(4, 3, 1.0, -1.0);
        let source = Grid::from_fn("data", 4, 3, |x, y| Some((x + y) as f64));
        let mut data = source.clone();
        field.apply(0.0, &WarpConfig::default(), &mut data).unwrap();
        assert_eq!(data, source);
    }

    #[test]
    fn test_missing_source_travels_and_gap_fill_recovers() {
        let mut field = VectorField::zeroed("pc", 3, 1, UvUnits::PureGridpoints);
        field.set_values_at(0, 0, 1.0, 0.0);
        let mut data = row(&[None, Some(5.0), Some(7.0)]);
        field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
        assert_eq!(data.values(), &[None, None, Some(7.0)]);

        let mut data = row(&[None, Some(5.0), Some(7.0)]);
        let config = WarpConfig {
            gap_fill: (1, 0),
            ..WarpConfig::identity()
        };
        field.apply(1.0, &config, &mut data).unwrap();
        assert_eq!(data.values(), &[None, Some(7.0), Some(7.0)]);
    }

    #[test]
    fn test_off_grid_destination_is_dropped() {
        let mut field = VectorField::zeroed("pc", 3, 1, UvUnits::PureGridpoints);
        field.set_values_at(2, 0, 5.0, 0.0);
        let mut data = row(&[Some(1.0), Some(2.0), Some(3.0)]);
        field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
        assert_eq!(data.values(), &[Some(1.0), Some(2.0), Some(2.0)]);
    }

    #[test]
    fn test_vacated_cell_takes_ring_maximum() {
        let mut field = VectorField::zeroed("pc", 3, 3, UvUnits::PureGridpoints);
        field.set_values_at(1, 1, 0.0, 9.0);
        let mut data = Grid::from_fn("data", 3, 3, |x, y| Some((y * 3 + x) as f64));
        field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
        assert_eq!(data.get(1, 1), Some(8.0));
        assert_eq!(data.get(0, 0), Some(0.0));
    }

    #[test]
    fn test_smoothing_restricted_to_corrected_cells() {
        let mut field = VectorField::zeroed("pc", 5, 1, UvUnits::PureGridpoints);
        field.set_values_at(0, 0, 1.0, 0.0);
        let source = row(&[Some(3.0), Some(0.0), Some(9.0), Some(0.0), Some(6.0)]);
        let config = WarpConfig {
            gap_fill: (0, 0),
            smooth: (1, 0),
            smooth_where_corrected: true,
            ..WarpConfig::default()
        };
        let mut data = source.clone();
        field.apply(1.0, &config, &mut data).unwrap();
        // after the move: [3, 3, 9, 0, 6]; only cells 0 and 1 are masked
        assert_relative_eq!(data.get(0, 0).unwrap(), 3.0);
        assert_relative_eq!(data.get(1, 0).unwrap(), 5.0);
        assert_eq!(data.get(2, 0), Some(9.0));
        assert_eq!(data.get(3, 0), Some(0.0));
    }

    #[test]
    fn test_policy_follows_correction_type() {
        assert_eq!(
            WarpDecision::choose(PcType::NoUvOrZeroUvData, true),
            WarpDecision::PassThrough
        );
        assert_eq!(WarpDecision::choose(PcType::LowSkill, false), WarpDecision::PassThrough);
        assert_eq!(
            WarpDecision::choose(PcType::LowSkill, true),
            WarpDecision::ForceCorrection { weight: 1.0 }
        );
        assert_eq!(
            WarpDecision::choose(PcType::Lagrangian, false),
            WarpDecision::ForceCorrection { weight: 1.0 }
        );
    }

    #[test]
    fn test_phase_correct_passes_through_low_skill() {
        let mut field = uniform(3, 1, 1.0, 0.0);
        field.metadata_mut().pc_type = PcType::LowSkill;
        let data = row(&[Some(1.0), Some(2.0), Some(3.0)]);
        let config = WarpConfig::identity();
        assert_eq!(field.phase_correct(&config, &data).unwrap(), data);

        let forced = WarpConfig {
            always_phase_correct: true,
            ..config
        };
        let out = field.phase_correct(&forced, &data).unwrap();
        assert_eq!(out.values(), &[Some(1.0), Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_unknown_units_leave_data_alone() {
        let mut field = VectorField::zeroed("pc", 3, 1, UvUnits::Unknown);
        field.set_values_at(0, 0, 1.0, 0.0);
        let source = row(&[Some(0.0), Some(10.0), Some(20.0)]);
        let mut data = source.clone();
        field.apply(1.0, &WarpConfig::default(), &mut data).unwrap();
        assert_eq!(data, source);

        field.metadata_mut().pc_type = PcType::Standard;
        assert_eq!(field.phase_correct(&WarpConfig::identity(), &source).unwrap(), source);
    }

    #[test]
    fn test_non_finite_shift_stays_in_place() {
        let mut field = VectorField::zeroed("pc", 3, 1, UvUnits::PureGridpoints);
        field.set_values_at(1, 0, f64::NAN, 0.0);
        field.set_values_at(2, 0, 0.0, f64::INFINITY);
        let source = row(&[Some(1.0), Some(2.0), Some(3.0)]);
        let mut data = source.clone();
        field.apply(1.0, &WarpConfig::default(), &mut data).unwrap();
        assert_eq!(data, source);

        field.set_values_at(0, 0, 1.0, 0.0);
        let mut data = source.clone();
        field.apply(1.0, &WarpConfig::identity(), &mut data).unwrap();
        // cell 0 refills from its only neighbour, which kept its own value
        assert_eq!(data.values(), &[Some(1.0), Some(1.0), Some(3.0)]);
    }

    #[test]
    fn test_apply_rejects_mismatched_data() {
        let field = uniform(3, 3, 1.0, 0.0);
        let mut data = Grid::filled("data", 2, 3, 1.0);
        assert!(field.apply(1.0, &WarpConfig::default(), &mut data).is_err());
        assert_eq!(data, Grid::filled("data", 2, 3, 1.0));
    }
}
