use serde::{Deserialize, Serialize};

use crate::layer::LayerStack;
use crate::model::{DisplacementField, DistortionField, FitDiagnostics};
use crate::peaks::{BraggPeak, LatticeBasis};
use crate::phase::PhaseMap;

/// Drift correction stage, used for progress reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftStage {
    FindingPeaks,
    SelectingBasis,
    SamplingPhase,
    FittingModel,
    Resampling,
    Cropping,
}

impl std::fmt::Display for DriftStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FindingPeaks => write!(f, "Finding Bragg peaks"),
            Self::SelectingBasis => write!(f, "Selecting lattice basis"),
            Self::SamplingPhase => write!(f, "Sampling lattice phase"),
            Self::FittingModel => write!(f, "Fitting drift model"),
            Self::Resampling => write!(f, "Resampling layers"),
            Self::Cropping => write!(f, "Cropping"),
        }
    }
}

/// Thread-safe progress reporting for drift correction.
///
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    /// A new stage has started. `total_items` is the number of work items in
    /// this stage (e.g. layer count), if known.
    fn begin_stage(&self, _stage: DriftStage, _total_items: Option<usize>) {}

    /// Work items within the current stage have completed.
    fn advance(&self, _items_done: usize) {}

    /// The current stage is finished.
    fn finish_stage(&self) {}
}

pub(super) struct NoOpReporter;
impl ProgressReporter for NoOpReporter {}

/// Plain-data summary of a correction run, for reports and overlays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftSummary {
    /// Grid `(height, width)` the drift was measured on.
    pub shape: (usize, usize),
    pub layers: usize,
    pub peaks: Vec<BraggPeak>,
    pub basis: LatticeBasis,
    pub window_sigma: f64,
    pub field: DistortionField,
    /// RMS and maximum correction magnitude (px).
    pub displacement_rms: f64,
    pub displacement_max: f64,
    pub out_of_bounds_fraction: f64,
}

impl DriftSummary {
    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.field.diagnostics
    }
}

/// Everything a correction run produces. The input is never modified.
#[derive(Clone, Debug)]
pub struct DriftCorrection {
    pub corrected: LayerStack,
    pub phase_maps: Vec<PhaseMap>,
    pub displacement: DisplacementField,
    pub summary: DriftSummary,
}
