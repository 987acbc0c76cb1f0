//! Metadata carried alongside a vector field

use serde::{Deserialize, Serialize};

/// How (or whether) a field's phase correction was derived
///
/// The integer codes match those written into forecast metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PcType {
    /// No correction: the vectors were absent or all zero
    NoUvOrZeroUvData,
    /// No correction: the correction did not show enough skill
    LowSkill,
    /// No correction by choice of algorithm
    NoCorrection,
    /// Standard phase correction
    Standard,
    /// Lagrangian phase correction
    Lagrangian,
    /// Eulerian correction used because advection data was unavailable
    EulerianFallback,
    #[default]
    Unknown,
}

impl PcType {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            PcType::NoUvOrZeroUvData => -2,
            PcType::LowSkill => -1,
            PcType::NoCorrection => 0,
            PcType::Standard => 3,
            PcType::Lagrangian => 4,
            PcType::EulerianFallback => 5,
            PcType::Unknown => -99,
        }
    }

    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => PcType::NoUvOrZeroUvData,
            -1 => PcType::LowSkill,
            0 => PcType::NoCorrection,
            3 => PcType::Standard,
            4 => PcType::Lagrangian,
            5 => PcType::EulerianFallback,
            _ => PcType::Unknown,
        }
    }
}

/// Free-form description attached to a field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub pc_type: PcType,
    /// Where the field came from, one entry per processing step
    pub provenance: Vec<String>,
}

impl FieldMetadata {
    #[must_use]
    pub fn with_pc_type(pc_type: PcType) -> Self {
        Self {
            pc_type,
            provenance: Vec::new(),
        }
    }

    pub fn note(&mut self, step: impl Into<String>) {
        self.provenance.push(step.into());
    }
}
