use std::f64::consts::{PI, TAU};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::EPSILON;
use crate::error::{DriftError, Result};
use crate::filters::gaussian_blur::{gaussian_blur_zero_padded, support_map};
use crate::filters::map_pixels;
use crate::peaks::Wavevector;

/// Phase sampling options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseOptions {
    /// Gaussian window sigma in pixels. `None` uses one lattice period of
    /// the longest reference wavevector.
    pub window_sigma: Option<f64>,
}

/// Locally demodulated phase of one reference wavevector.
///
/// The phase is relative to a perfect `cos(q · r)` lattice with zero phase
/// at pixel (0, 0) and is not unwrapped.
#[derive(Clone, Debug)]
pub struct PhaseMap {
    pub wavevector: Wavevector,
    /// Wrapped phase in `(-π, π]`.
    pub phase: Array2<f64>,
    /// Local amplitude of the lattice component.
    pub amplitude: Array2<f64>,
    /// Fraction of the Gaussian window inside the grid (1.0 in the interior,
    /// lower near edges).
    pub support: Array2<f64>,
    pub window_sigma: f64,
}

impl PhaseMap {
    pub fn shape(&self) -> (usize, usize) {
        self.phase.dim()
    }

    /// Per-pixel confidence weight in `[0, 1]`: window support times the
    /// amplitude relative to its maximum.
    pub fn confidence(&self) -> Array2<f64> {
        let max_amp = self.amplitude.iter().cloned().fold(0.0f64, f64::max);
        if max_amp <= EPSILON {
            return Array2::zeros(self.shape());
        }
        let (h, w) = self.shape();
        map_pixels(h, w, |row, col| {
            self.support[[row, col]] * self.amplitude[[row, col]] / max_amp
        })
    }
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_phase(angle: f64) -> f64 {
    let wrapped = PI - (PI - angle).rem_euclid(TAU);
    // rem_euclid may round up to TAU
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Resolve the window sigma for a set of reference wavevectors.
pub fn resolve_window_sigma(options: &PhaseOptions, wavevectors: &[Wavevector]) -> Result<f64> {
    let sigma = match options.window_sigma {
        Some(s) => s,
        None => wavevectors
            .iter()
            .map(Wavevector::period)
            .filter(|p| p.is_finite())
            .fold(0.0, f64::max),
    };
    if !(sigma > 0.0) || !sigma.is_finite() {
        return Err(DriftError::InvalidParameter(format!(
            "phase window sigma must be positive and finite, got {sigma}"
        )));
    }
    Ok(sigma)
}

/// Spatial lock-in: demodulate the image at `q` and low-pass the result with
/// a Gaussian window of `window_sigma` pixels.
///
/// Near the boundary the window is truncated; the truncated result is
/// renormalized so the amplitude stays comparable, and the reduced support is
/// reported in [`PhaseMap::support`].
pub fn sample_phase(
    image: ArrayView2<'_, f64>,
    wavevector: Wavevector,
    window_sigma: f64,
) -> Result<PhaseMap> {
    let (h, w) = image.dim();
    if h == 0 || w == 0 {
        return Err(DriftError::InvalidDimensions {
            width: w,
            height: h,
        });
    }
    if !(window_sigma > 0.0) {
        return Err(DriftError::InvalidParameter(format!(
            "phase window sigma must be positive, got {window_sigma}"
        )));
    }

    let mean = image.mean().unwrap_or(0.0);
    let carrier = |row: usize, col: usize| wavevector.phase_at(col as f64, row as f64);

    // image * exp(-i q.r), split into real and imaginary channels
    let re = map_pixels(h, w, |row, col| {
        (image[[row, col]] - mean) * carrier(row, col).cos()
    });
    let im = map_pixels(h, w, |row, col| {
        -(image[[row, col]] - mean) * carrier(row, col).sin()
    });

    let re_f = gaussian_blur_zero_padded(re.view(), window_sigma);
    let im_f = gaussian_blur_zero_padded(im.view(), window_sigma);
    let support = support_map(h, w, window_sigma);

    let phase = map_pixels(h, w, |row, col| {
        im_f[[row, col]].atan2(re_f[[row, col]])
    });
    // A cosine of amplitude A demodulates to A/2.
    let amplitude = map_pixels(h, w, |row, col| {
        let s = support[[row, col]].max(EPSILON);
        2.0 * re_f[[row, col]].hypot(im_f[[row, col]]) / s
    });

    debug!(
        qx = wavevector.qx,
        qy = wavevector.qy,
        window_sigma,
        "Sampled lattice phase"
    );

    Ok(PhaseMap {
        wavevector,
        phase: phase.mapv(wrap_phase),
        amplitude,
        support,
        window_sigma,
    })
}

/// Sample one phase map per reference wavevector.
pub fn sample_phases(
    image: ArrayView2<'_, f64>,
    wavevectors: &[Wavevector],
    options: &PhaseOptions,
) -> Result<Vec<PhaseMap>> {
    let sigma = resolve_window_sigma(options, wavevectors)?;
    wavevectors
        .iter()
        .map(|q| sample_phase(image, *q, sigma))
        .collect()
}
