//! Displacement unit policy
//!
//! Phase correction vectors live in two unit systems:
//! - **local**: grid points (optionally per a known interval), the units the
//!   algorithms work in;
//! - **external**: meters per second, used for display and storage. A
//!   displacement is pretended to span one hour when shown as a velocity.
//!
//! # Usage
//! ```
//! use phase_correct_core::units::{external_to_local, local_to_external};
//!
//! // 10 m/s over one hour on a 4 km grid is 9 grid points
//! let local = external_to_local(10.0, 4.0);
//! assert!((local - 9.0).abs() < 1e-12);
//! assert!((local_to_external(local, 4.0) - 10.0).abs() < 1e-12);
//! ```

use crate::grid::Grid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nominal time span of one displacement when expressed as a velocity (s)
pub const SECONDS_PER_EXTERNAL_STEP: f64 = 3600.0;

pub const METERS_PER_KM: f64 = 1000.0;

/// Spacings closer to zero than this are degenerate
pub const EPSILON: f64 = 1.0e-10;

/// Convert meters/second into grid points per external step
///
/// A degenerate (zero) grid spacing yields 0.0.
#[inline]
#[must_use]
pub fn external_to_local(value: f64, km_per_gridpt: f64) -> f64 {
    let meters = km_per_gridpt * METERS_PER_KM;
    if meters.abs() < EPSILON {
        return 0.0;
    }
    value * SECONDS_PER_EXTERNAL_STEP / meters
}

/// Convert grid points per external step into meters/second
#[inline]
#[must_use]
pub fn local_to_external(value: f64, km_per_gridpt: f64) -> f64 {
    value * km_per_gridpt * METERS_PER_KM / SECONDS_PER_EXTERNAL_STEP
}

/// Scale every present cell from external to local units
pub fn grid_external_to_local(grid: &mut Grid, km_per_gridpt: f64) {
    grid.multiply(external_to_local(1.0, km_per_gridpt));
}

/// Scale every present cell from local to external units
pub fn grid_local_to_external(grid: &mut Grid, km_per_gridpt: f64) {
    grid.multiply(local_to_external(1.0, km_per_gridpt));
}

/// Kilometers between adjacent grid points along each axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSpacing {
    pub km_per_gridpt_x: f64,
    pub km_per_gridpt_y: f64,
}

impl GridSpacing {
    #[must_use]
    pub fn new(km_per_gridpt_x: f64, km_per_gridpt_y: f64) -> Self {
        Self {
            km_per_gridpt_x,
            km_per_gridpt_y,
        }
    }

    /// Same spacing on both axes
    #[must_use]
    pub fn uniform(km_per_gridpt: f64) -> Self {
        Self::new(km_per_gridpt, km_per_gridpt)
    }

    /// Mean spacing, used where a single isotropic scale is needed
    #[must_use]
    pub fn km_per_gridpt(&self) -> f64 {
        0.5 * (self.km_per_gridpt_x + self.km_per_gridpt_y)
    }
}

impl Default for GridSpacing {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

/// Units carried by a vector field's U/V values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UvUnits {
    /// Displacement in grid points
    #[default]
    PureGridpoints,
    /// Grid points per `dt_seconds`
    GridpointsPerInterval { dt_seconds: u32 },
    /// External display units
    MetersPerSecond,
    /// Not set, or could not be parsed
    Unknown,
}

impl UvUnits {
    /// Name used in metadata
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            UvUnits::PureGridpoints => "PURE_PC_GRIDPTS",
            UvUnits::GridpointsPerInterval { .. } => "GRIDPTS_PER_DT_SECONDS",
            UvUnits::MetersPerSecond => "METERS_PER_SECOND",
            UvUnits::Unknown => "UNKNOWN",
        }
    }

    /// Parse a metadata name
    ///
    /// `GRIDPTS_PER_DT_SECONDS` is only meaningful with its interval; without
    /// one the units are unknown.
    #[must_use]
    pub fn from_name(name: &str, dt_seconds: Option<u32>) -> Self {
        match (name.trim(), dt_seconds) {
            ("PURE_PC_GRIDPTS", _) => UvUnits::PureGridpoints,
            ("METERS_PER_SECOND", _) => UvUnits::MetersPerSecond,
            ("GRIDPTS_PER_DT_SECONDS", Some(dt_seconds)) if dt_seconds > 0 => {
                UvUnits::GridpointsPerInterval { dt_seconds }
            }
            _ => UvUnits::Unknown,
        }
    }

    /// True for units the algorithms can work in directly
    #[must_use]
    pub fn is_local(self) -> bool {
        matches!(
            self,
            UvUnits::PureGridpoints | UvUnits::GridpointsPerInterval { .. }
        )
    }

    /// Factor taking one value along an axis with spacing `km_per_gridpt`
    /// into meters/second, `None` for unknown units
    #[must_use]
    pub fn external_scale(self, km_per_gridpt: f64) -> Option<f64> {
        match self {
            UvUnits::PureGridpoints => Some(local_to_external(1.0, km_per_gridpt)),
            UvUnits::GridpointsPerInterval { dt_seconds } => {
                Some(km_per_gridpt * METERS_PER_KM / f64::from(dt_seconds))
            }
            UvUnits::MetersPerSecond => Some(1.0),
            UvUnits::Unknown => None,
        }
    }
}

impl fmt::Display for UvUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UvUnits::GridpointsPerInterval { dt_seconds } => {
                write!(f, "{},dtSec={}", self.name(), dt_seconds)
            }
            _ => f.write_str(self.name()),
        }
    }
}
