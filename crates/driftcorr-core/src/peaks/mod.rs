pub mod basis;
pub mod finder;
pub mod subpixel;

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::consts::{
    DEFAULT_MAX_PEAK_PAIRS, DEFAULT_NOISE_SIGMAS, DEFAULT_PEAK_MIN_RADIUS,
    DEFAULT_PEAK_MIN_SEPARATION, DEFAULT_RELATIVE_THRESHOLD, DEFAULT_REQUIRED_PEAKS,
};

pub use basis::{regenerate_basis, select_basis, BasisOptions, LatticeBasis, LatticeSymmetry};
pub use finder::{find_bragg_peaks, find_peaks_in_spectrum};

/// A Bragg peak in cycles per image, relative to the zero-frequency bin.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BraggPeak {
    pub kx: f64,
    pub ky: f64,
    /// Spectral magnitude at the (refined) peak position.
    pub magnitude: f64,
}

impl BraggPeak {
    pub fn new(kx: f64, ky: f64, magnitude: f64) -> Self {
        Self { kx, ky, magnitude }
    }

    /// Distance from the origin in bins.
    pub fn radius(&self) -> f64 {
        self.kx.hypot(self.ky)
    }

    /// Polar angle in `[0, 2π)`.
    pub fn angle(&self) -> f64 {
        self.ky.atan2(self.kx).rem_euclid(TAU)
    }

    /// The centrosymmetric partner at `(-kx, -ky)`.
    pub fn mirrored(&self) -> Self {
        Self::new(-self.kx, -self.ky, self.magnitude)
    }

    pub fn distance_to(&self, other: &BraggPeak) -> f64 {
        (self.kx - other.kx).hypot(self.ky - other.ky)
    }

    /// Angular wavevector in radians per pixel for a grid of `(height, width)`.
    pub fn wavevector(&self, shape: (usize, usize)) -> Wavevector {
        let (h, w) = shape;
        Wavevector::new(TAU * self.kx / w as f64, TAU * self.ky / h as f64)
    }
}

/// Angular wavevector in radians per pixel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wavevector {
    pub qx: f64,
    pub qy: f64,
}

impl Wavevector {
    pub fn new(qx: f64, qy: f64) -> Self {
        Self { qx, qy }
    }

    pub fn norm(&self) -> f64 {
        self.qx.hypot(self.qy)
    }

    /// Lattice phase `q · (x, y)` at a pixel position.
    pub fn phase_at(&self, x: f64, y: f64) -> f64 {
        self.qx * x + self.qy * y
    }

    /// Real-space period in pixels.
    pub fn period(&self) -> f64 {
        TAU / self.norm()
    }

    /// Back to a peak position in cycles per image.
    pub fn to_peak(&self, shape: (usize, usize), magnitude: f64) -> BraggPeak {
        let (h, w) = shape;
        BraggPeak::new(self.qx * w as f64 / TAU, self.qy * h as f64 / TAU, magnitude)
    }
}

/// Bragg peak search options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakSearchOptions {
    /// Inner radius (bins) of the search annulus; excludes the low-q core.
    pub min_radius: f64,
    /// Outer radius (bins); `None` searches up to the Nyquist limit.
    pub max_radius: Option<f64>,
    /// Maxima closer than this (bins) are merged into one peak.
    pub min_separation: f64,
    /// Noise floor = mean + `noise_sigmas` * std of the annulus magnitude.
    pub noise_sigmas: f64,
    /// Peaks must also exceed this fraction of the strongest annulus value.
    pub relative_threshold: f64,
    /// Half-width (bins) of the band masked around the `kx = 0` and `ky = 0`
    /// axes, where scan-line noise concentrates. 0 disables the mask.
    pub axis_mask_width: f64,
    /// Fewer peaks than this is reported as `InsufficientPeaks`.
    pub required_peaks: usize,
    /// At most this many symmetric pairs are returned.
    pub max_pairs: usize,
    /// Polish peak positions on the windowed DTFT after quadratic refinement.
    pub subpixel: bool,
}

impl Default for PeakSearchOptions {
    fn default() -> Self {
        Self {
            min_radius: DEFAULT_PEAK_MIN_RADIUS,
            max_radius: None,
            min_separation: DEFAULT_PEAK_MIN_SEPARATION,
            noise_sigmas: DEFAULT_NOISE_SIGMAS,
            relative_threshold: DEFAULT_RELATIVE_THRESHOLD,
            axis_mask_width: 0.0,
            required_peaks: DEFAULT_REQUIRED_PEAKS,
            max_pairs: DEFAULT_MAX_PEAK_PAIRS,
            subpixel: true,
        }
    }
}

/// Sort peaks by descending magnitude, ties by ascending angle from 0.
pub fn sort_peaks(peaks: &mut [BraggPeak]) {
    peaks.sort_by(|a, b| {
        b.magnitude
            .total_cmp(&a.magnitude)
            .then(a.angle().total_cmp(&b.angle()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_is_in_zero_to_tau() {
        assert!((BraggPeak::new(0.0, -1.0, 1.0).angle() - 1.5 * std::f64::consts::PI).abs() < 1e-12);
        assert_eq!(BraggPeak::new(1.0, 0.0, 1.0).angle(), 0.0);
    }

    #[test]
    fn wavevector_round_trips_through_peak() {
        let peak = BraggPeak::new(12.8, -3.5, 2.0);
        let back = peak.wavevector((100, 128)).to_peak((100, 128), 2.0);
        assert!(peak.distance_to(&back) < 1e-12);
    }

    #[test]
    fn sort_breaks_ties_by_angle() {
        let mut peaks = vec![
            BraggPeak::new(-5.0, 0.0, 1.0),
            BraggPeak::new(0.0, 5.0, 2.0),
            BraggPeak::new(5.0, 0.0, 1.0),
        ];
        sort_peaks(&mut peaks);
        assert_eq!(peaks[0].ky, 5.0);
        assert_eq!(peaks[1].kx, 5.0);
        assert_eq!(peaks[2].kx, -5.0);
    }
}
