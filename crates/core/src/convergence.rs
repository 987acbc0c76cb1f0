//! Convergence of a vector field and the run-based convergence filter
//!
//! Strong convergence or divergence in a phase correction field tears or
//! folds the warped data. The filter finds runs of strongly convergent cells
//! along each axis and smooths the matching component across a window
//! widened in proportion to the run's length, leaving calm regions alone.

use crate::error::GridResult;
use crate::field::VectorField;
use crate::grid::smoothing::clipped_window;
use crate::grid::Grid;
use crate::lookup::{ExpansionLookup, PiecewiseLinear};
use crate::units::{local_to_external, GridSpacing};
use serde::{Deserialize, Serialize};

/// Convergence filter settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvFilterConfig {
    /// Minimum (negated) derivative for a cell to join a run
    pub threshold: f64,
    /// Run length to expansion factor
    pub expansion: PiecewiseLinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    /// Grid coordinate of position `i` along line `line`
    fn cell(self, i: usize, line: usize) -> (usize, usize) {
        match self {
            Axis::X => (i, line),
            Axis::Y => (line, i),
        }
    }

    /// (cells per line, number of lines)
    fn extent(self, nx: usize, ny: usize) -> (usize, usize) {
        match self {
            Axis::X => (nx, ny),
            Axis::Y => (ny, nx),
        }
    }
}

/// Maximal stretch of above-threshold cells along one row or column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub axis: Axis,
    /// Row (x runs) or column (y runs) index
    pub line: usize,
    pub start: usize,
    /// Inclusive
    pub end: usize,
}

impl Run {
    #[must_use]
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }

    /// Half-width of the smoothing window, or `None` for no smoothing
    pub fn width<L: ExpansionLookup + ?Sized>(&self, lookup: &L) -> Option<usize> {
        let n = self.length() as f64;
        let expansion = lookup.expansion(n);
        (expansion > 0.0).then(|| (n * expansion).floor() as usize)
    }
}

/// Runs of cells with `gate >= threshold` along `axis`; missing cells and
/// the end of each line close a run
#[must_use]
pub fn find_runs(gate: &Grid, axis: Axis, threshold: f64) -> Vec<Run> {
    let (len, lines) = axis.extent(gate.nx(), gate.ny());
    let mut runs = Vec::new();
    for line in 0..lines {
        let mut open: Option<usize> = None;
        for i in 0..len {
            let (x, y) = axis.cell(i, line);
            let inside = gate.get(x, y).is_some_and(|g| g >= threshold);
            match (inside, open) {
                (true, None) => open = Some(i),
                (false, Some(start)) => {
                    runs.push(Run { axis, line, start, end: i - 1 });
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(start) = open {
            runs.push(Run { axis, line, start, end: len - 1 });
        }
    }
    runs
}

/// Write into `dst` the moving average of `src` over `[c-w, c+w]` for every
/// `c` in `[start-w, end+w]`, all clipped to the line
fn smooth_run(src: &Grid, dst: &mut Grid, run: &Run, w: usize) {
    let (len, _) = run.axis.extent(src.nx(), src.ny());
    let at = |i: usize| {
        let (x, y) = run.axis.cell(i, run.line);
        src.get(x, y)
    };

    let w = w.min(len);
    let lo = run.start.saturating_sub(w);
    let hi = (run.end + w).min(len - 1);
    let mut sum = 0.0;
    let mut count = 0usize;
    for v in clipped_window(lo, w, len).filter_map(at) {
        sum += v;
        count += 1;
    }
    for c in lo..=hi {
        if c > lo {
            if let Some(v) = c.checked_sub(w + 1).and_then(at) {
                sum -= v;
                count -= 1;
            }
            if let Some(v) = (c + w < len).then(|| at(c + w)).flatten() {
                sum += v;
                count += 1;
            }
        }
        let (x, y) = run.axis.cell(c, run.line);
        dst.put(x, y, (count > 0).then(|| sum / count as f64));
    }
}

/// Filter one component along `axis`; averages always read the component
/// as it was before the pass
fn filter_component<L: ExpansionLookup + ?Sized>(
    component: &mut Grid,
    gate: &Grid,
    axis: Axis,
    threshold: f64,
    lookup: &L,
) -> usize {
    let src = component.clone();
    let mut smoothed = 0;
    for run in find_runs(gate, axis, threshold) {
        let Some(w) = run.width(lookup) else {
            continue;
        };
        tracing::trace!(?run, w, "convergence run");
        smooth_run(&src, component, &run, w);
        smoothed += 1;
    }
    smoothed
}

impl VectorField {
    /// Centred-difference convergence
    ///
    /// Returns `(conv, -du, -dv)` where `conv = -(du + dv)` in meters/second.
    /// The outermost ring of cells, and any cell missing a needed neighbour,
    /// is missing in all three grids.
    #[must_use]
    pub fn convergence(&self, spacing: GridSpacing) -> (Grid, Grid, Grid) {
        let (nx, ny) = self.dims();
        let interior = |x: usize, y: usize| x > 0 && y > 0 && x + 1 < nx && y + 1 < ny;

        let diffs = |x: usize, y: usize| {
            if !interior(x, y) {
                return None;
            }
            let du = (self.u.get(x + 1, y)? - self.u.get(x - 1, y)?) / 2.0;
            let dv = (self.v.get(x, y + 1)? - self.v.get(x, y - 1)?) / 2.0;
            Some((du, dv))
        };

        let km = spacing.km_per_gridpt();
        let conv = Grid::from_fn("convergence", nx, ny, |x, y| {
            diffs(x, y).map(|(du, dv)| -local_to_external(du + dv, km))
        });
        let du = Grid::from_fn("du", nx, ny, |x, y| diffs(x, y).map(|(du, _)| -du));
        let dv = Grid::from_fn("dv", nx, ny, |x, y| diffs(x, y).map(|(_, dv)| -dv));
        (conv, du, dv)
    }

    /// Smooth U across runs of `du >= threshold` along rows, then V across
    /// runs of `dv >= threshold` along columns
    ///
    /// `du` and `dv` are normally the derivative grids returned by
    /// [`VectorField::convergence`]. Fails without touching the field when
    /// either disagrees with the field's dimensions.
    pub fn conv_thresh_filter<L: ExpansionLookup + ?Sized>(
        &mut self,
        threshold: f64,
        lookup: &L,
        du: &Grid,
        dv: &Grid,
    ) -> GridResult<()> {
        self.u.check_shape(du)?;
        self.u.check_shape(dv)?;

        let x_runs = filter_component(&mut self.u, du, Axis::X, threshold, lookup);
        let y_runs = filter_component(&mut self.v, dv, Axis::Y, threshold, lookup);
        tracing::debug!(x_runs, y_runs, threshold, "convergence filter");
        self.refresh_all_zero();
        Ok(())
    }

    /// [`VectorField::conv_thresh_filter`] driven by a config
    pub fn conv_filter(
        &mut self,
        config: &ConvFilterConfig,
        du: &Grid,
        dv: &Grid,
    ) -> GridResult<()> {
        self.conv_thresh_filter(config.threshold, &config.expansion, du, dv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridError;
    use crate::field::FieldMetadata;
    use crate::units::{external_to_local, UvUnits};
    use approx::assert_relative_eq;

    fn row_field(u: &[f64]) -> VectorField {
        let n = u.len();
        VectorField::from_grids(
            Grid::from_fn("u", n, 1, |x, _| Some(u[x])),
            Grid::filled("v", n, 1, 0.0),
            UvUnits::PureGridpoints,
            FieldMetadata::default(),
        )
        .unwrap()
    }

    fn gate(values: &[Option<f64>]) -> Grid {
        Grid::from_values("gate", values.len(), 1, values.to_vec()).unwrap()
    }

    #[test]
    fn test_convergence_of_linear_stretch() {
        let u = Grid::from_fn("u", 4, 4, |x, _| Some(x as f64));
        let v = Grid::filled("v", 4, 4, 0.0);
        let f = VectorField::from_grids(u, v, UvUnits::PureGridpoints, FieldMetadata::default())
            .unwrap();
        let spacing = GridSpacing::uniform(2.0);
        let (conv, du, dv) = f.convergence(spacing);

        for (x, y) in [(0, 0), (3, 1), (1, 3), (0, 2)] {
            assert!(conv.is_missing(x, y));
            assert!(du.is_missing(x, y));
        }
        assert_eq!(du.get(1, 1), Some(-1.0));
        assert_eq!(dv.get(2, 2), Some(-0.0));
        assert_relative_eq!(conv.get(2, 1).unwrap(), -local_to_external(1.0, 2.0));
        assert_relative_eq!(
            external_to_local(-conv.get(1, 2).unwrap(), 2.0),
            1.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_missing_neighbour_leaves_cell_missing() {
        let mut u = Grid::filled("u", 3, 3, 1.0);
        u.set_missing(0, 1);
        let f = VectorField::from_grids(
            u,
            Grid::filled("v", 3, 3, 1.0),
            UvUnits::PureGridpoints,
            FieldMetadata::default(),
        )
        .unwrap();
        let (conv, du, dv) = f.convergence(GridSpacing::default());
        assert!(conv.is_missing(1, 1));
        assert!(du.is_missing(1, 1));
        assert!(dv.is_missing(1, 1));
    }

    #[test]
    fn test_find_runs_closes_on_missing_and_axis_end() {
        let g = gate(&[Some(2.0), Some(3.0), None, Some(5.0), Some(0.0), Some(1.0), Some(1.0)]);
        let runs = find_runs(&g, Axis::X, 1.0);
        let spans: Vec<_> = runs.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(spans, vec![(0, 1), (3, 3), (5, 6)]);
        assert_eq!(runs[2].length(), 2);
    }

    #[test]
    fn test_run_width_from_lookup() {
        let run = Run { axis: Axis::Y, line: 0, start: 2, end: 4 };
        assert_eq!(run.width(&|_: f64| 0.5), Some(1));
        assert_eq!(run.width(&|_: f64| 0.0), None);
        assert_eq!(run.width(&|_: f64| -1.0), None);
    }

    #[test]
    fn test_filter_replaces_expanded_window_with_moving_average() {
        let mut f = row_field(&[0.0, 0.0, 6.0, 0.0, 0.0, 0.0, 0.0]);
        let du = gate(&[
            Some(0.0),
            Some(0.0),
            Some(5.0),
            Some(5.0),
            Some(0.0),
            Some(0.0),
            Some(0.0),
        ]);
        let dv = Grid::new("dv", 7, 1);
        f.conv_thresh_filter(1.0, &|_: f64| 0.5, &du, &dv).unwrap();

        let u: Vec<_> = (0..7).map(|x| f.u().get(x, 0).unwrap()).collect();
        assert_relative_eq!(u[0], 0.0);
        assert_relative_eq!(u[1], 2.0);
        assert_relative_eq!(u[2], 2.0);
        assert_relative_eq!(u[3], 2.0);
        assert_relative_eq!(u[4], 0.0);
        assert_relative_eq!(u[6], 0.0);
    }

    #[test]
    fn test_filter_columns_use_dv_and_v() {
        let v = Grid::from_fn("v", 1, 5, |_, y| Some(if y == 4 { 9.0 } else { 0.0 }));
        let mut f = VectorField::from_grids(
            Grid::filled("u", 1, 5, 1.0),
            v,
            UvUnits::PureGridpoints,
            FieldMetadata::default(),
        )
        .unwrap();
        let du = Grid::filled("du", 1, 5, 10.0);
        let dv = Grid::from_fn("dv", 1, 5, |_, y| Some(if y >= 3 { 4.0 } else { 0.0 }));
        f.conv_thresh_filter(1.0, &|_: f64| 0.5, &du, &dv).unwrap();

        // U rows are one cell long: width 0 keeps the value
        assert_eq!(f.u().get(0, 2), Some(1.0));
        // run [3,4], w = 1: cells 2..=4 averaged over clipped windows
        assert_relative_eq!(f.v().get(0, 2).unwrap(), 0.0);
        assert_relative_eq!(f.v().get(0, 3).unwrap(), 3.0);
        assert_relative_eq!(f.v().get(0, 4).unwrap(), 4.5);
        assert_eq!(f.v().get(0, 1), Some(0.0));
    }

    #[test]
    fn test_filter_is_identity_below_threshold() {
        let mut f = row_field(&[1.0, -2.0, 3.0, 0.5]);
        let before = f.clone();
        let du = gate(&[Some(0.1), Some(0.9), None, Some(-4.0)]);
        let dv = Grid::filled("dv", 4, 1, 0.0);
        let config = ConvFilterConfig {
            threshold: 1.0,
            expansion: PiecewiseLinear::new(vec![(1.0, 2.0), (10.0, 0.5)]),
        };
        f.conv_filter(&config, &du, &dv).unwrap();
        assert_eq!(f, before);
        f.conv_filter(&config, &du, &dv).unwrap();
        assert_eq!(f, before);
    }

    #[test]
    fn test_second_pass_is_identity_once_runs_are_smoothed() {
        let mut f = VectorField::from_grids(
            Grid::from_fn("u", 7, 3, |x, _| Some(if x == 3 { 4.0 } else { 0.0 })),
            Grid::filled("v", 7, 3, 0.0),
            UvUnits::PureGridpoints,
            FieldMetadata::default(),
        )
        .unwrap();
        let config = ConvFilterConfig {
            threshold: 1.0,
            expansion: PiecewiseLinear::new(vec![(1.0, 1.0)]),
        };
        let spacing = GridSpacing::default();

        // divergence behind the spike at x = 4 is the only run
        let (_, du, dv) = f.convergence(spacing);
        assert_eq!(find_runs(&du, Axis::X, 1.0).len(), 1);
        f.conv_filter(&config, &du, &dv).unwrap();
        assert_relative_eq!(f.u().get(3, 1).unwrap(), 4.0 / 3.0);
        assert_relative_eq!(f.u().get(4, 1).unwrap(), 4.0 / 3.0);
        assert_eq!(f.u().get(3, 0), Some(4.0));

        let (_, du, dv) = f.convergence(spacing);
        assert!(find_runs(&du, Axis::X, 1.0).is_empty());
        assert!(find_runs(&dv, Axis::Y, 1.0).is_empty());
        let once = f.clone();
        f.conv_filter(&config, &du, &dv).unwrap();
        assert_eq!(f, once);
    }

    #[test]
    fn test_config_from_json_sorts_lookup() {
        let config: ConvFilterConfig = serde_json::from_str(
            r#"{"threshold":1.5,"expansion":{"points":[[10,0],[2,1]]}}"#,
        )
        .unwrap();
        assert_eq!(config.threshold, 1.5);
        assert_relative_eq!(config.expansion.evaluate(6.0), 0.5);
    }

    #[test]
    fn test_huge_expansion_clamps_to_line() {
        let du = gate(&[Some(0.0), Some(0.0), Some(5.0), Some(0.0), Some(0.0)]);
        let dv = Grid::new("dv", 5, 1);
        for lookup in [
            PiecewiseLinear::new(vec![(1.0, 1e300)]),
            PiecewiseLinear::new(vec![(1.0, f64::INFINITY)]),
        ] {
            let mut f = row_field(&[0.0, 0.0, 10.0, 0.0, 0.0]);
            f.conv_thresh_filter(1.0, &lookup, &du, &dv).unwrap();
            for x in 0..5 {
                assert_relative_eq!(f.u().get(x, 0).unwrap(), 2.0);
            }
        }
        let run = Run { axis: Axis::X, line: 0, start: 2, end: 2 };
        assert_eq!(run.width(&|_: f64| f64::NAN), None);
    }

    #[test]
    fn test_filter_rejects_mismatched_derivatives() {
        let mut f = row_field(&[1.0, 2.0, 3.0]);
        let before = f.clone();
        let err = f
            .conv_thresh_filter(
                0.0,
                &|_: f64| 1.0,
                &Grid::filled("du", 3, 1, 1.0),
                &Grid::filled("dv", 2, 1, 1.0),
            )
            .unwrap_err();
        assert!(matches!(err, GridError::DimensionMismatch { .. }));
        assert_eq!(f, before);
    }
}
