use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consts::{DEFAULT_MAX_OUT_OF_BOUNDS_FRACTION, PARALLEL_LAYER_THRESHOLD};
use crate::error::{DriftError, Result};
use crate::filters::map_pixels;
use crate::model::{DisplacementField, DistortionField};

/// Keys cubic convolution parameter.
const CUBIC_A: f64 = -0.5;

/// Slack (px) before a source coordinate counts as outside the grid.
const BOUNDS_SLACK: f64 = 1e-9;

/// Interpolation used when sampling the input at non-integer positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Interpolation {
    Nearest,
    Linear,
    /// Keys cubic convolution (a = -0.5).
    #[default]
    Cubic,
}

impl std::fmt::Display for Interpolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "Nearest"),
            Self::Linear => write!(f, "Linear"),
            Self::Cubic => write!(f, "Cubic"),
        }
    }
}

/// What an output pixel receives when its source lies outside the input.
///
/// A NaN source coordinate has no nearest edge, so `Clamp` yields NaN for
/// it; infinite coordinates clamp like any other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BoundaryPolicy {
    /// Sample at the nearest point of the input grid.
    #[default]
    Clamp,
    /// Write a constant.
    Fill(f64),
    /// Write NaN.
    Nan,
}

impl std::fmt::Display for BoundaryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clamp => write!(f, "Clamp"),
            Self::Fill(v) => write!(f, "Fill {v}"),
            Self::Nan => write!(f, "NaN"),
        }
    }
}

/// Resampler options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpOptions {
    pub interpolation: Interpolation,
    pub boundary: BoundaryPolicy,
    /// A field sending more than this fraction of the output outside the
    /// input is rejected as `DisplacementOutOfBounds`.
    pub max_out_of_bounds_fraction: f64,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Cubic,
            boundary: BoundaryPolicy::Clamp,
            max_out_of_bounds_fraction: DEFAULT_MAX_OUT_OF_BOUNDS_FRACTION,
        }
    }
}

/// Source coordinate in the input grid of every output pixel.
#[derive(Clone, Debug)]
pub struct SourceMap {
    pub x: Array2<f64>,
    pub y: Array2<f64>,
}

impl SourceMap {
    /// Invert the forward model of `field` at every output pixel.
    pub fn from_field(field: &DistortionField) -> Self {
        let (h, w) = field.shape();
        let sources = map_pixels(h, w, |row, col| {
            field.source_coordinate(col as f64, row as f64)
        });
        Self {
            x: sources.mapv(|(x, _)| x),
            y: sources.mapv(|(_, y)| y),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.x.dim()
    }

    /// Correction applied at every output pixel, `(x, y) - source(x, y)`.
    pub fn displacement(&self) -> DisplacementField {
        let (h, w) = self.shape();
        DisplacementField {
            dx: map_pixels(h, w, |row, col| col as f64 - self.x[[row, col]]),
            dy: map_pixels(h, w, |row, col| row as f64 - self.y[[row, col]]),
        }
    }

    /// Fraction of output pixels whose source lies outside the grid.
    pub fn out_of_bounds_fraction(&self) -> f64 {
        let (h, w) = self.shape();
        if h == 0 || w == 0 {
            return 0.0;
        }
        let outside = self
            .x
            .iter()
            .zip(self.y.iter())
            .filter(|&(&x, &y)| !in_bounds(x, y, h, w))
            .count();
        outside as f64 / (h * w) as f64
    }

    /// Fail with `DisplacementOutOfBounds` when too much of the output would
    /// be sampled outside the input.
    pub fn check(&self, options: &WarpOptions) -> Result<f64> {
        let fraction = self.out_of_bounds_fraction();
        if fraction > options.max_out_of_bounds_fraction {
            return Err(DriftError::DisplacementOutOfBounds { fraction });
        }
        Ok(fraction)
    }

    fn resample(&self, layer: ArrayView2<'_, f64>, options: &WarpOptions) -> Array2<f64> {
        let (h, w) = self.shape();
        map_pixels(h, w, |row, col| {
            sample(
                layer,
                self.x[[row, col]],
                self.y[[row, col]],
                options.interpolation,
                options.boundary,
            )
        })
    }
}

fn in_bounds(x: f64, y: f64, h: usize, w: usize) -> bool {
    x >= -BOUNDS_SLACK
        && y >= -BOUNDS_SLACK
        && x <= (w - 1) as f64 + BOUNDS_SLACK
        && y <= (h - 1) as f64 + BOUNDS_SLACK
}

fn check_shape(field: &DistortionField, shape: (usize, usize)) -> Result<()> {
    if field.shape() != shape {
        return Err(DriftError::ShapeMismatch {
            expected: field.shape(),
            actual: shape,
        });
    }
    Ok(())
}

/// Warp one layer with a fitted distortion field.
///
/// Output pixel `r` takes the input value at the source `s` that satisfies
/// `s + u(s) = r`. A zero field returns the input exactly.
pub fn apply_distortion(
    layer: ArrayView2<'_, f64>,
    field: &DistortionField,
    options: &WarpOptions,
) -> Result<Array2<f64>> {
    check_shape(field, layer.dim())?;
    let map = SourceMap::from_field(field);
    let fraction = map.check(options)?;
    debug!(
        out_of_bounds = fraction,
        interpolation = %options.interpolation,
        "Resampling layer"
    );
    Ok(map.resample(layer, options))
}

/// Warp every layer of a `(layers, height, width)` stack with the same field,
/// so all layers stay co-registered.
pub fn apply_distortion_stack(
    stack: ArrayView3<'_, f64>,
    field: &DistortionField,
    options: &WarpOptions,
) -> Result<Array3<f64>> {
    let (_, h, w) = stack.dim();
    check_shape(field, (h, w))?;
    resample_stack(stack, &SourceMap::from_field(field), options)
}

/// Resample every layer through one precomputed source map, in parallel
/// across layers.
pub fn resample_stack(
    stack: ArrayView3<'_, f64>,
    map: &SourceMap,
    options: &WarpOptions,
) -> Result<Array3<f64>> {
    let (n, h, w) = stack.dim();
    if map.shape() != (h, w) {
        return Err(DriftError::ShapeMismatch {
            expected: map.shape(),
            actual: (h, w),
        });
    }
    let fraction = map.check(options)?;

    info!(
        layers = n,
        out_of_bounds = fraction,
        interpolation = %options.interpolation,
        "Resampling layer stack"
    );

    let mut out = Array3::<f64>::zeros((n, h, w));
    if n >= PARALLEL_LAYER_THRESHOLD {
        out.axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(stack.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut dst, src)| dst.assign(&map.resample(src, options)));
    } else {
        for (mut dst, src) in out.axis_iter_mut(Axis(0)).zip(stack.axis_iter(Axis(0))) {
            dst.assign(&map.resample(src, options));
        }
    }
    Ok(out)
}

/// Sample `data` at `(x, y)` (column, row) with the given interpolation and
/// boundary policy. Integer positions return the stored value unchanged.
pub fn sample(
    data: ArrayView2<'_, f64>,
    x: f64,
    y: f64,
    interpolation: Interpolation,
    boundary: BoundaryPolicy,
) -> f64 {
    let (h, w) = data.dim();
    if x.is_nan() || y.is_nan() {
        return match boundary {
            BoundaryPolicy::Fill(v) => v,
            _ => f64::NAN,
        };
    }
    let (x, y) = if in_bounds(x, y, h, w) {
        (x.clamp(0.0, (w - 1) as f64), y.clamp(0.0, (h - 1) as f64))
    } else {
        match boundary {
            BoundaryPolicy::Clamp => (x.clamp(0.0, (w - 1) as f64), y.clamp(0.0, (h - 1) as f64)),
            BoundaryPolicy::Fill(v) => return v,
            BoundaryPolicy::Nan => return f64::NAN,
        }
    };

    if x.fract() == 0.0 && y.fract() == 0.0 {
        return data[[y as usize, x as usize]];
    }

    match interpolation {
        Interpolation::Nearest => data[[y.round() as usize, x.round() as usize]],
        Interpolation::Linear => bilinear_sample(data, x, y),
        Interpolation::Cubic => cubic_sample(data, x, y),
    }
}

/// Edge-clamped read.
fn at(data: ArrayView2<'_, f64>, row: i64, col: i64) -> f64 {
    let (h, w) = data.dim();
    let r = row.clamp(0, h as i64 - 1) as usize;
    let c = col.clamp(0, w as i64 - 1) as usize;
    data[[r, c]]
}

fn bilinear_sample(data: ArrayView2<'_, f64>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let v00 = at(data, y0, x0);
    let v10 = at(data, y0, x0 + 1);
    let v01 = at(data, y0 + 1, x0);
    let v11 = at(data, y0 + 1, x0 + 1);

    v00 * (1.0 - fx) * (1.0 - fy) + v10 * fx * (1.0 - fy) + v01 * (1.0 - fx) * fy + v11 * fx * fy
}

fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (CUBIC_A + 2.0) * t * t * t - (CUBIC_A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        CUBIC_A * t * t * t - 5.0 * CUBIC_A * t * t + 8.0 * CUBIC_A * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn cubic_sample(data: ArrayView2<'_, f64>, x: f64, y: f64) -> f64 {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let wx: [f64; 4] = std::array::from_fn(|i| cubic_weight(fx - (i as f64 - 1.0)));
    let wy: [f64; 4] = std::array::from_fn(|j| cubic_weight(fy - (j as f64 - 1.0)));

    let mut acc = 0.0;
    for (j, wyj) in wy.iter().enumerate() {
        let row = y0 + j as i64 - 1;
        let mut line = 0.0;
        for (i, wxi) in wx.iter().enumerate() {
            line += wxi * at(data, row, x0 + i as i64 - 1);
        }
        acc += wyj * line;
    }
    acc
}
