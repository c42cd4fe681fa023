use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// Scalar metadata delivered with a decoded scan.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// Physical field of view `(x, y)` in length units (e.g. nm).
    pub field_of_view: Option<(f64, f64)>,
    /// Bias / energy value of each layer of a stack.
    #[serde(default)]
    pub bias: Vec<f64>,
}

impl ScanMetadata {
    /// Physical size of one pixel `(x, y)` for a grid of `(height, width)`.
    pub fn pixel_size(&self, shape: (usize, usize)) -> Option<(f64, f64)> {
        let (h, w) = shape;
        self.field_of_view
            .filter(|_| h > 0 && w > 0)
            .map(|(fx, fy)| (fx / w as f64, fy / h as f64))
    }

    /// Ratio of the y pixel size to the x pixel size (1.0 when unknown).
    pub fn pixel_aspect(&self, shape: (usize, usize)) -> f64 {
        match self.pixel_size(shape) {
            Some((px, py)) if px > 0.0 && py > 0.0 => py / px,
            _ => 1.0,
        }
    }
}

/// A single real-valued 2-D scan (topography or one spectroscopic slice).
/// Row-major, shape = (height, width).
#[derive(Clone, Debug)]
pub struct Layer {
    pub data: Array2<f64>,
    pub metadata: ScanMetadata,
}

impl Layer {
    pub fn new(data: Array2<f64>) -> Self {
        Self {
            data,
            metadata: ScanMetadata::default(),
        }
    }

    pub fn with_metadata(data: Array2<f64>, metadata: ScanMetadata) -> Self {
        Self { data, metadata }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Layers sharing one spatial grid, stacked along axis 0 (bias / energy).
#[derive(Clone, Debug)]
pub struct LayerStack {
    /// Shape = (layers, height, width).
    pub data: Array3<f64>,
    pub metadata: ScanMetadata,
}

impl LayerStack {
    pub fn new(data: Array3<f64>, metadata: ScanMetadata) -> Result<Self> {
        let (n, h, w) = data.dim();
        if n == 0 || h == 0 || w == 0 {
            return Err(DriftError::InvalidDimensions {
                width: w,
                height: h,
            });
        }
        if !metadata.bias.is_empty() && metadata.bias.len() != n {
            return Err(DriftError::InvalidLayer(format!(
                "{} bias values for {} layers",
                metadata.bias.len(),
                n
            )));
        }
        Ok(Self { data, metadata })
    }

    /// Build a stack from individual layers with identical shapes.
    pub fn from_layers(layers: &[Array2<f64>], metadata: ScanMetadata) -> Result<Self> {
        let first = layers
            .first()
            .ok_or_else(|| DriftError::InvalidLayer("empty layer list".into()))?;
        let (h, w) = first.dim();
        let mut data = Array3::<f64>::zeros((layers.len(), h, w));
        for (i, layer) in layers.iter().enumerate() {
            if layer.dim() != (h, w) {
                return Err(DriftError::ShapeMismatch {
                    expected: (h, w),
                    actual: layer.dim(),
                });
            }
            data.index_axis_mut(Axis(0), i).assign(layer);
        }
        Self::new(data, metadata)
    }

    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial grid shape (height, width).
    pub fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.data.dim();
        (h, w)
    }

    pub fn layer(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.len()).then(|| self.data.index_axis(Axis(0), index))
    }

    /// Pixel-wise mean over all layers, used as the drift reference of a map.
    pub fn mean_layer(&self) -> Array2<f64> {
        self.data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array2::zeros(self.shape()))
    }
}

/// Mean and population standard deviation of an iterator of samples.
pub fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_size_from_field_of_view() {
        let meta = ScanMetadata {
            field_of_view: Some((20.0, 10.0)),
            bias: vec![],
        };
        assert_eq!(meta.pixel_size((100, 200)), Some((0.1, 0.1)));
        assert!((meta.pixel_aspect((100, 100)) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn stack_rejects_mismatched_layers() {
        let a = Array2::<f64>::zeros((4, 4));
        let b = Array2::<f64>::zeros((4, 5));
        let err = LayerStack::from_layers(&[a, b], ScanMetadata::default());
        assert!(matches!(err, Err(DriftError::ShapeMismatch { .. })));
    }

    #[test]
    fn mean_std_of_constant_is_zero_spread() {
        let (m, s) = mean_std([2.0, 2.0, 2.0].into_iter());
        assert_eq!(m, 2.0);
        assert_eq!(s, 0.0);
    }
}
