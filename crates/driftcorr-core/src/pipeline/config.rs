use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::filters::crop::CropMargins;
use crate::fit::FitOptions;
use crate::peaks::{BasisOptions, PeakSearchOptions};
use crate::phase::PhaseOptions;
use crate::warp::WarpOptions;

/// Every option of a drift correction run. Missing TOML sections fall back
/// to their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    pub peaks: PeakSearchOptions,
    pub basis: BasisOptions,
    pub phase: PhaseOptions,
    pub fit: FitOptions,
    pub warp: WarpOptions,
    /// Layer of a stack used to measure the drift. `None` uses the mean of
    /// all layers.
    pub reference_layer: Option<usize>,
    /// Pixels removed from each side after correction.
    pub crop: Option<CropMargins>,
    /// After cropping, stretch the layers so each axis spans a whole number
    /// of reference lattice periods.
    pub commensurate: bool,
}

impl DriftConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DriftError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| DriftError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::InitialGuess;
    use crate::peaks::LatticeSymmetry;
    use crate::warp::{BoundaryPolicy, Interpolation};

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = DriftConfig::from_toml_str(
            r#"
            [fit]
            order = 2
            initial_guess = "phase-gradient"

            [warp]
            interpolation = "linear"
            boundary = { fill = -1.0 }

            [basis]
            symmetry = "hexagonal"
            count = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fit.order, 2);
        assert_eq!(cfg.fit.initial_guess, InitialGuess::PhaseGradient);
        assert_eq!(cfg.fit.max_iterations, FitOptions::default().max_iterations);
        assert_eq!(cfg.warp.interpolation, Interpolation::Linear);
        assert_eq!(cfg.warp.boundary, BoundaryPolicy::Fill(-1.0));
        assert_eq!(cfg.basis.symmetry, Some(LatticeSymmetry::Hexagonal));
        assert_eq!(cfg.peaks, PeakSearchOptions::default());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            DriftConfig::from_toml_str("[fit]\norder = \"high\""),
            Err(DriftError::Config(_))
        ));
    }
}
