use std::f64::consts::{PI, TAU};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::consts::MIN_BASIS_ANGLE_DEG;
use crate::error::{DriftError, Result};
use crate::layer::ScanMetadata;

use super::{BraggPeak, Wavevector};

/// Expected angle between neighbouring lattice wavevectors.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatticeSymmetry {
    /// 90° between wavevectors.
    Square,
    /// 60° between wavevectors.
    Hexagonal,
    /// Explicit angle in degrees.
    Angle(f64),
}

impl LatticeSymmetry {
    /// Angle between neighbouring wavevectors in radians.
    pub fn step(&self) -> f64 {
        match self {
            Self::Square => PI / 2.0,
            Self::Hexagonal => PI / 3.0,
            Self::Angle(deg) => deg.to_radians(),
        }
    }
}

impl std::fmt::Display for LatticeSymmetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Square => write!(f, "Square"),
            Self::Hexagonal => write!(f, "Hexagonal"),
            Self::Angle(deg) => write!(f, "Angle {deg}°"),
        }
    }
}

/// How the reference wavevectors are chosen from the detected peaks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasisOptions {
    /// Number of independent reference wavevectors (2 for square, 2 or 3
    /// for hexagonal lattices).
    pub count: usize,
    /// Ideal lattice that replaces the measured wavevectors before fitting.
    /// `None` (`"measured"` in config files) fits against the measured
    /// peaks, which leaves any uniform shear in place.
    #[serde(with = "symmetry_or_measured")]
    pub symmetry: Option<LatticeSymmetry>,
    /// Orientation (degrees, from +x towards +y) of one ideal wavevector;
    /// the others follow from the symmetry. `None` takes it from the
    /// measured peak closest to the slow-scan axis.
    pub orientation_deg: Option<f64>,
}

impl Default for BasisOptions {
    fn default() -> Self {
        Self {
            count: 2,
            symmetry: Some(LatticeSymmetry::Square),
            orientation_deg: None,
        }
    }
}

/// Reference Bragg peaks defining the undistorted lattice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeBasis {
    pub peaks: Vec<BraggPeak>,
    /// Grid `(height, width)` the peaks refer to.
    pub shape: (usize, usize),
}

impl LatticeBasis {
    pub fn new(peaks: Vec<BraggPeak>, shape: (usize, usize)) -> Self {
        Self { peaks, shape }
    }

    pub fn wavevectors(&self) -> Vec<Wavevector> {
        self.peaks.iter().map(|p| p.wavevector(self.shape)).collect()
    }

    /// Longest real-space period among the reference wavevectors (px).
    pub fn max_period(&self) -> f64 {
        self.wavevectors()
            .iter()
            .map(Wavevector::period)
            .fold(0.0, f64::max)
    }
}

/// Pick `count` linearly independent reference peaks, one per `±k` pair,
/// strongest first.
pub fn select_basis(
    peaks: &[BraggPeak],
    shape: (usize, usize),
    count: usize,
) -> Result<LatticeBasis> {
    if count == 0 {
        return Err(DriftError::InvalidParameter("basis count must be at least 1".into()));
    }
    let min_angle = MIN_BASIS_ANGLE_DEG.to_radians();
    let mut chosen: Vec<BraggPeak> = Vec::with_capacity(count);

    // One representative per pair: the member in the upper half plane.
    for peak in peaks.iter().filter(|p| p.angle() < PI) {
        let independent = chosen
            .iter()
            .all(|c| axial_separation(c.angle(), peak.angle()) >= min_angle);
        if independent {
            chosen.push(*peak);
        }
        if chosen.len() == count {
            break;
        }
    }

    if chosen.len() < count {
        return Err(DriftError::InsufficientPeaks {
            found: 2 * chosen.len(),
            required: 2 * count,
        });
    }

    Ok(LatticeBasis::new(chosen, shape))
}

/// Replace the measured reference peaks by an ideal lattice of the given
/// symmetry: common magnitude (mean of the measured ones), fixed angles,
/// and either the requested or the measured orientation.
///
/// Drift that accumulates along the slow scan (y) only changes `ky`, so a
/// measured orientation is taken from the peak closest to the y axis, whose
/// direction such drift leaves intact.
///
/// Angles are evaluated in physical units, so non-square pixels described
/// by the scan metadata are honoured.
pub fn regenerate_basis(
    basis: &LatticeBasis,
    symmetry: LatticeSymmetry,
    orientation_deg: Option<f64>,
    metadata: &ScanMetadata,
) -> Result<LatticeBasis> {
    let step = symmetry.step();
    if !(step > 0.0 && step < PI) {
        return Err(DriftError::InvalidParameter(format!(
            "lattice angle must lie in (0°, 180°), got {:.3}°",
            step.to_degrees()
        )));
    }
    if basis.peaks.is_empty() {
        return Err(DriftError::InsufficientPeaks {
            found: 0,
            required: 2,
        });
    }

    let aspect = metadata.pixel_aspect(basis.shape);
    let to_physical = |w: Wavevector| (w.qx, w.qy / aspect);
    let to_pixel = |(x, y): (f64, f64)| Wavevector::new(x, y * aspect);

    let physical: Vec<(f64, f64)> = basis.wavevectors().into_iter().map(to_physical).collect();
    let magnitude =
        physical.iter().map(|(x, y)| x.hypot(*y)).sum::<f64>() / physical.len() as f64;

    let orientation = match orientation_deg {
        Some(deg) => deg.to_radians(),
        None => {
            let slow_axis_share = |(x, y): &(f64, f64)| y.abs() / x.hypot(*y);
            physical
                .iter()
                .max_by(|a, b| slow_axis_share(a).total_cmp(&slow_axis_share(b)))
                .map(|(x, y)| y.atan2(*x))
                .unwrap_or_default()
        }
    };

    let directions = ((PI / step).round() as usize).max(2);
    let ideal_angles: Vec<f64> = (0..directions)
        .flat_map(|j| {
            let a = orientation + j as f64 * step;
            [a, a + PI]
        })
        .collect();

    let peaks = basis
        .peaks
        .iter()
        .zip(&physical)
        .map(|(peak, (x, y))| {
            let measured = y.atan2(*x);
            let angle = ideal_angles
                .iter()
                .copied()
                .min_by(|a, b| {
                    angular_distance(*a, measured).total_cmp(&angular_distance(*b, measured))
                })
                .unwrap_or(measured);
            let ideal = to_pixel((magnitude * angle.cos(), magnitude * angle.sin()));
            let regenerated = ideal.to_peak(basis.shape, peak.magnitude);
            debug!(
                measured_kx = peak.kx,
                measured_ky = peak.ky,
                ideal_kx = regenerated.kx,
                ideal_ky = regenerated.ky,
                "Regenerated reference peak"
            );
            regenerated
        })
        .collect();

    Ok(LatticeBasis::new(peaks, basis.shape))
}

/// Serde adapter writing `None` as the keyword `"measured"`, so the opt-out
/// survives a TOML round trip.
mod symmetry_or_measured {
    use super::*;

    const MEASURED: &str = "measured";

    pub fn serialize<S: Serializer>(
        value: &Option<LatticeSymmetry>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(symmetry) => symmetry.serialize(serializer),
            None => serializer.serialize_str(MEASURED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<LatticeSymmetry>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Symmetry(LatticeSymmetry),
            Keyword(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Symmetry(symmetry) => Ok(Some(symmetry)),
            Repr::Keyword(word) if word == MEASURED => Ok(None),
            Repr::Keyword(word) => Err(serde::de::Error::custom(format!(
                "unknown lattice symmetry `{word}`"
            ))),
        }
    }
}

/// Smallest absolute difference between two angles, in `[0, π]`.
fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    d.min(TAU - d)
}

/// Angle between two undirected axes, in `[0, π/2]`.
fn axial_separation(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(PI);
    d.min(PI - d)
}
