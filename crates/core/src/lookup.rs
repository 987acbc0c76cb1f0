//! Run-length to expansion lookup
//!
//! The convergence filter widens each strong-convergence run by an amount that
//! depends on the run's length. The mapping is supplied by the caller; any
//! `Fn(f64) -> f64` works, and `PiecewiseLinear` covers the usual
//! configuration-driven case.

use crate::units::EPSILON;
use serde::{Deserialize, Serialize};

/// Maps a run length (in cells) to an expansion factor
pub trait ExpansionLookup {
    fn expansion(&self, run_length: f64) -> f64;
}

impl<F> ExpansionLookup for F
where
    F: Fn(f64) -> f64,
{
    fn expansion(&self, run_length: f64) -> f64 {
        self(run_length)
    }
}

/// Piecewise-linear function through sorted `(x, y)` points
///
/// Clamped to the first/last `y` outside the x range. An empty mapping
/// returns 0.0, and a zero-width segment evaluates to its left value.
/// Deserialized points are sorted the same way as in [`PiecewiseLinear::new`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "LookupPoints")]
pub struct PiecewiseLinear {
    points: Vec<(f64, f64)>,
}

#[derive(Deserialize)]
struct LookupPoints {
    points: Vec<(f64, f64)>,
}

impl From<LookupPoints> for PiecewiseLinear {
    fn from(raw: LookupPoints) -> Self {
        Self::new(raw.points)
    }
}

impl PiecewiseLinear {
    /// Build from points, sorting them by x
    #[must_use]
    pub fn new(mut points: Vec<(f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self { points }
    }

    #[must_use]
    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    #[must_use]
    pub fn evaluate(&self, x: f64) -> f64 {
        let (Some(&(x_first, y_first)), Some(&(x_last, y_last))) =
            (self.points.first(), self.points.last())
        else {
            return 0.0;
        };
        if x <= x_first {
            return y_first;
        }
        if x >= x_last {
            return y_last;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x >= x0 && x <= x1 {
                if (x1 - x0).abs() < EPSILON {
                    tracing::warn!(x0, x1, "degenerate lookup segment");
                    return y0;
                }
                return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
            }
        }
        y_last
    }
}

impl ExpansionLookup for PiecewiseLinear {
    fn expansion(&self, run_length: f64) -> f64 {
        self.evaluate(run_length)
    }
}
