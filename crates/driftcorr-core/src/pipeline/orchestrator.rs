use ndarray::{ArrayView2, Axis};
use tracing::{info, info_span};

use crate::error::{DriftError, Result};
use crate::filters::crop::{commensurate_stack, crop_stack_edges};
use crate::fit::fit_distortion;
use crate::layer::{Layer, LayerStack, ScanMetadata};
use crate::model::DistortionField;
use crate::peaks::{find_bragg_peaks, regenerate_basis, select_basis, BraggPeak, LatticeBasis};
use crate::phase::{sample_phases, PhaseMap};
use crate::warp::{resample_stack, SourceMap};

use super::config::DriftConfig;
use super::types::{DriftCorrection, DriftStage, DriftSummary, NoOpReporter, ProgressReporter};

/// Drift measured on one reference image, before any layer is resampled.
#[derive(Clone, Debug)]
pub struct DriftEstimate {
    pub peaks: Vec<BraggPeak>,
    pub basis: LatticeBasis,
    pub phase_maps: Vec<PhaseMap>,
    pub field: DistortionField,
}

/// Measure the drift of a reference image: Bragg peaks, reference basis
/// (optionally regenerated as an ideal lattice), phase maps and fitted
/// distortion field.
pub fn estimate_drift(
    reference: ArrayView2<'_, f64>,
    metadata: &ScanMetadata,
    config: &DriftConfig,
    reporter: &dyn ProgressReporter,
) -> Result<DriftEstimate> {
    let shape = reference.dim();

    reporter.begin_stage(DriftStage::FindingPeaks, None);
    let peaks = info_span!("peaks").in_scope(|| find_bragg_peaks(reference, &config.peaks))?;
    reporter.finish_stage();

    reporter.begin_stage(DriftStage::SelectingBasis, None);
    let mut basis = select_basis(&peaks, shape, config.basis.count)?;
    if let Some(symmetry) = config.basis.symmetry {
        basis = regenerate_basis(&basis, symmetry, config.basis.orientation_deg, metadata)?;
        info!(%symmetry, "Regenerated ideal lattice basis");
    }
    reporter.finish_stage();

    let wavevectors = basis.wavevectors();
    reporter.begin_stage(DriftStage::SamplingPhase, Some(wavevectors.len()));
    let phase_maps = info_span!("phase")
        .in_scope(|| sample_phases(reference, &wavevectors, &config.phase))?;
    reporter.advance(phase_maps.len());
    reporter.finish_stage();

    reporter.begin_stage(DriftStage::FittingModel, None);
    let field = info_span!("fit").in_scope(|| fit_distortion(&phase_maps, &config.fit))?;
    reporter.finish_stage();

    Ok(DriftEstimate {
        peaks,
        basis,
        phase_maps,
        field,
    })
}

/// Correct a single layer.
pub fn correct_drift(layer: &Layer, config: &DriftConfig) -> Result<DriftCorrection> {
    let data = layer.data.clone().insert_axis(Axis(0));
    let stack = LayerStack::new(data, layer.metadata.clone())?;
    correct_drift_stack(&stack, config)
}

/// Correct every layer of a stack with one drift field.
pub fn correct_drift_stack(stack: &LayerStack, config: &DriftConfig) -> Result<DriftCorrection> {
    correct_drift_stack_reported(stack, config, &NoOpReporter)
}

/// Correct every layer of a stack with one drift field, reporting progress.
///
/// The drift is measured on `config.reference_layer` (or the mean of all
/// layers) and applied identically to every layer.
pub fn correct_drift_stack_reported(
    stack: &LayerStack,
    config: &DriftConfig,
    reporter: &dyn ProgressReporter,
) -> Result<DriftCorrection> {
    let (h, w) = stack.shape();
    info!(layers = stack.len(), width = w, height = h, "Starting drift correction");

    let reference = match config.reference_layer {
        Some(index) => stack
            .layer(index)
            .ok_or_else(|| {
                DriftError::InvalidLayer(format!(
                    "reference layer {index} out of range ({} layers)",
                    stack.len()
                ))
            })?
            .to_owned(),
        None => stack.mean_layer(),
    };

    let estimate = estimate_drift(reference.view(), &stack.metadata, config, reporter)?;

    reporter.begin_stage(DriftStage::Resampling, Some(stack.len()));
    let map = SourceMap::from_field(&estimate.field);
    let out_of_bounds_fraction = map.check(&config.warp)?;
    let mut corrected = resample_stack(stack.data.view(), &map, &config.warp)?;
    reporter.advance(stack.len());
    reporter.finish_stage();

    let margins = config.crop.filter(|m| !m.is_empty());
    let mut stretch = (1.0, 1.0);
    if margins.is_some() || config.commensurate {
        reporter.begin_stage(DriftStage::Cropping, None);
        if let Some(margins) = margins {
            corrected = crop_stack_edges(corrected.view(), &margins)?;
        }
        if config.commensurate {
            let period = estimate.basis.max_period();
            let (resampled, factors) = commensurate_stack(corrected.view(), period)?;
            info!(period, sx = factors.0, sy = factors.1, "Resampled to whole lattice periods");
            corrected = resampled;
            stretch = factors;
        }
        reporter.finish_stage();
    }

    let mut metadata = stack.metadata.clone();
    let (_, ch, cw) = corrected.dim();
    if let Some((fx, fy)) = metadata.field_of_view {
        metadata.field_of_view = Some((
            fx * stretch.0 * cw as f64 / w as f64,
            fy * stretch.1 * ch as f64 / h as f64,
        ));
    }

    let displacement = map.displacement();
    let summary = DriftSummary {
        shape: (h, w),
        layers: stack.len(),
        peaks: estimate.peaks,
        basis: estimate.basis,
        window_sigma: estimate
            .phase_maps
            .first()
            .map(|m| m.window_sigma)
            .unwrap_or_default(),
        field: estimate.field,
        displacement_rms: displacement.rms(),
        displacement_max: displacement.max_magnitude(),
        out_of_bounds_fraction,
    };

    info!(
        converged = summary.field.diagnostics.converged,
        iterations = summary.field.diagnostics.iterations,
        rms_residual = summary.field.diagnostics.rms_residual,
        displacement_rms = summary.displacement_rms,
        displacement_max = summary.displacement_max,
        "Drift correction complete"
    );

    Ok(DriftCorrection {
        corrected: LayerStack::new(corrected, metadata)?,
        phase_maps: estimate.phase_maps,
        displacement,
        summary,
    })
}
