//! Neighbourhood maximum-magnitude vector consolidation
//!
//! Each output cell takes the vector of largest magnitude found within
//! `[x-sx, x+sx] × [y-sy, y+sy]` of the input. This suppresses small noisy
//! vectors next to strong ones and widens the footprint of strong motion.
//! The sweep is incremental (see [`crate::window`]): a full-resolution grid
//! with a wide box costs roughly one strip scan per cell instead of one box
//! scan per cell.

use crate::field::VectorField;
use crate::window::{SweepCounts, WindowTraversal, WindowedExtremum};

impl VectorField {
    /// Replace every vector by the largest-magnitude vector within the
    /// half-width box `(sx, sy)` around it
    ///
    /// Cells whose whole box is missing become missing. Returns the sweep's
    /// update counters.
    pub fn vector_max(&mut self, sx: usize, sy: usize) -> SweepCounts {
        let (nx, ny) = self.dims();
        if nx == 0 || ny == 0 {
            return SweepCounts::default();
        }

        // Magnitudes are consulted many times per cell; compute them once
        let mag = self.magnitude();
        let mut out = self.clone();
        let mut traversal = WindowTraversal::new(nx, ny, sx, sy);
        let mut extremum = WindowedExtremum::new();

        extremum.reset(&mag, &traversal);
        self.write_peak(&extremum, &traversal, &mut out);
        while traversal.advance() {
            extremum.update(&mag, &traversal);
            self.write_peak(&extremum, &traversal, &mut out);
        }

        let counts = extremum.counts();
        counts.log();
        self.u = out.u;
        self.v = out.v;
        self.refresh_all_zero();
        counts
    }

    /// Square-box form of [`VectorField::vector_max`]
    pub fn expand(&mut self, half_box: usize) -> SweepCounts {
        self.vector_max(half_box, half_box)
    }

    fn write_peak(
        &self,
        extremum: &WindowedExtremum,
        traversal: &WindowTraversal,
        out: &mut VectorField,
    ) {
        let (x, y) = traversal.position();
        // A peak only lands on cells where both components are present
        match extremum
            .peak()
            .and_then(|p| self.u.get(p.x, p.y).zip(self.v.get(p.x, p.y)))
        {
            Some((u, v)) => {
                out.u.set(x, y, u);
                out.v.set(x, y, v);
            }
            None => {
                out.u.set_missing(x, y);
                out.v.set_missing(x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::field::{FieldMetadata, VectorField};
    use crate::grid::Grid;
    use crate::units::UvUnits;

    fn field(nx: usize, ny: usize, cells: &[(usize, usize, f64, f64)]) -> VectorField {
        let mut f = VectorField::zeroed("pc", nx, ny, UvUnits::PureGridpoints);
        for &(x, y, u, v) in cells {
            f.set_values_at(x, y, u, v);
        }
        f
    }

    #[test]
    fn test_single_vector_spreads_over_box() {
        let mut f = field(7, 7, &[(3, 3, 2.0, -1.0)]);
        f.vector_max(1, 2);
        for y in 0..7 {
            for x in 0..7 {
                let inside = (2..=4).contains(&x) && (1..=5).contains(&y);
                let expected = if inside { (2.0, -1.0) } else { (0.0, 0.0) };
                assert_eq!(f.values_or_zero(x, y), expected, "({x},{y})");
            }
        }
    }

    #[test]
    fn test_corner_peaks_reach_their_neighbourhoods() {
        let n = 6;
        let corners = [
            (0, 0, 1.0, 0.0),
            (n - 1, 0, 0.0, 2.0),
            (0, n - 1, -3.0, 0.0),
            (n - 1, n - 1, 0.0, -4.0),
        ];
        let mut f = field(n, n, &corners);
        f.expand(1);
        assert_eq!(f.values_or_zero(1, 1), (1.0, 0.0));
        assert_eq!(f.values_or_zero(n - 2, 1), (0.0, 2.0));
        assert_eq!(f.values_or_zero(1, n - 2), (-3.0, 0.0));
        assert_eq!(f.values_or_zero(n - 2, n - 2), (0.0, -4.0));
        assert_eq!(f.values_or_zero(2, 2), (0.0, 0.0));
    }

    #[test]
    fn test_box_larger_than_grid_takes_global_max() {
        let mut f = field(4, 3, &[(0, 0, 1.0, 1.0), (3, 2, -5.0, 0.0), (2, 1, 0.0, 2.0)]);
        f.vector_max(10, 10);
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(f.values_or_zero(x, y), (-5.0, 0.0));
            }
        }
    }

    #[test]
    fn test_unbounded_half_width_along_one_axis() {
        let mut f = field(4, 3, &[(3, 1, 0.0, -3.0), (0, 2, 1.0, 0.0)]);
        f.vector_max(usize::MAX, 0);
        for x in 0..4 {
            assert_eq!(f.values_or_zero(x, 0), (0.0, 0.0));
            assert_eq!(f.values_or_zero(x, 1), (0.0, -3.0));
            assert_eq!(f.values_or_zero(x, 2), (1.0, 0.0));
        }
    }

    #[test]
    fn test_all_missing_box_stays_missing() {
        let f = VectorField::from_grids(
            Grid::new("u", 5, 1),
            Grid::new("v", 5, 1),
            UvUnits::PureGridpoints,
            FieldMetadata::default(),
        )
        .unwrap();
        let mut g = f.clone();
        g.vector_max(1, 1);
        assert!(g.u().values().iter().all(Option::is_none));
        assert!(g.is_zero());
    }

    #[test]
    fn test_half_missing_vector_never_wins() {
        let mut u = Grid::filled("u", 3, 1, 0.0);
        let v = Grid::filled("v", 3, 1, 0.0);
        u.set(0, 0, 100.0);
        let mut v = v;
        v.set_missing(0, 0);
        u.set(2, 0, 1.0);
        let mut f =
            VectorField::from_grids(u, v, UvUnits::PureGridpoints, FieldMetadata::default())
                .unwrap();
        f.vector_max(1, 0);
        assert_eq!(f.values_or_zero(0, 0), (0.0, 0.0));
        assert_eq!(f.values_or_zero(1, 0), (1.0, 0.0));
    }
}
