use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::warp::{resample_stack, BoundaryPolicy, Interpolation, SourceMap, WarpOptions};

/// Number of pixels to remove from each side of a layer.
///
/// `top` counts rows from row 0, `bottom` from the last row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropMargins {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl CropMargins {
    /// Same margin on every side.
    pub fn uniform(n: usize) -> Self {
        Self {
            left: n,
            right: n,
            top: n,
            bottom: n,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check the margins leave at least one pixel of a `(h, w)` grid.
    pub fn validated(&self, h: usize, w: usize) -> Result<CropMargins> {
        if self.left + self.right >= w || self.top + self.bottom >= h {
            return Err(DriftError::InvalidParameter(format!(
                "Crop margins (l={}, r={}, t={}, b={}) leave nothing of a {}x{} layer",
                self.left, self.right, self.top, self.bottom, w, h
            )));
        }
        Ok(*self)
    }
}

/// Crop bad or heavily drifted edge pixels from a layer.
pub fn crop_edges(data: ArrayView2<'_, f64>, margins: &CropMargins) -> Result<Array2<f64>> {
    let (h, w) = data.dim();
    let m = margins.validated(h, w)?;
    Ok(data
        .slice(s![m.top..h - m.bottom, m.left..w - m.right])
        .to_owned())
}

/// Crop every layer of a stack with the same margins.
pub fn crop_stack_edges(data: ArrayView3<'_, f64>, margins: &CropMargins) -> Result<Array3<f64>> {
    let (_, h, w) = data.dim();
    let m = margins.validated(h, w)?;
    Ok(data
        .slice(s![.., m.top..h - m.bottom, m.left..w - m.right])
        .to_owned())
}

/// Largest whole number of `period`s (px) that fits in `len` pixels.
pub fn commensurate_span(len: usize, period: f64) -> f64 {
    period * (len as f64 / period).floor()
}

/// Stretch every layer so each axis spans a whole number of lattice
/// periods, keeping the grid size. Output pixel `i` samples the input at
/// `i * span / len` with cubic interpolation, which puts the lattice peaks
/// on integer FFT bins when a wavevector lies along each axis.
///
/// Returns the resampled stack and the `(x, y)` factors by which the field
/// of view shrinks.
pub fn commensurate_stack(
    data: ArrayView3<'_, f64>,
    period: f64,
) -> Result<(Array3<f64>, (f64, f64))> {
    let (_, h, w) = data.dim();
    if !(period.is_finite() && period > 0.0 && period <= h.min(w) as f64) {
        return Err(DriftError::InvalidParameter(format!(
            "lattice period {period} px does not fit a {w}x{h} layer"
        )));
    }
    let sx = commensurate_span(w, period) / w as f64;
    let sy = commensurate_span(h, period) / h as f64;

    let map = SourceMap {
        x: Array2::from_shape_fn((h, w), |(_, col)| col as f64 * sx),
        y: Array2::from_shape_fn((h, w), |(row, _)| row as f64 * sy),
    };
    let options = WarpOptions {
        interpolation: Interpolation::Cubic,
        boundary: BoundaryPolicy::Clamp,
        max_out_of_bounds_fraction: 1.0,
    };
    let out = resample_stack(data, &map, &options)?;
    Ok((out, (sx, sy)))
}
