pub mod image_io;
pub mod raw;

use std::path::{Path, PathBuf};

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::layer::{LayerStack, ScanMetadata};

pub use image_io::{load_layer, save_layer_image};
pub use raw::{write_raw_f32, RawF32Reader};

/// Supported layer inputs. Every variant decodes into the same
/// [`LayerStack`] shape; a single image becomes a one-layer stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LayerSource {
    /// Grayscale PNG/TIFF topograph, normalized to `[0, 1]`.
    Image { path: PathBuf },
    /// Headerless `f32` cube of `layers` slices of `height x width`.
    RawF32 {
        path: PathBuf,
        width: usize,
        height: usize,
        layers: usize,
        #[serde(default)]
        big_endian: bool,
    },
}

impl LayerSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::Image { path } | Self::RawF32 { path, .. } => path,
        }
    }

    pub fn load(&self, metadata: ScanMetadata) -> Result<LayerStack> {
        let stack = match self {
            Self::Image { path } => {
                let layer = load_layer(path, ScanMetadata::default())?;
                let data = layer.data.insert_axis(Axis(0));
                LayerStack::new(data, metadata)?
            }
            Self::RawF32 {
                path,
                width,
                height,
                layers,
                big_endian,
            } => {
                let reader = RawF32Reader::open(path, *width, *height, *layers, *big_endian)?;
                LayerStack::new(reader.read_stack()?, metadata)?
            }
        };

        let (h, w) = stack.shape();
        info!(
            path = %self.path().display(),
            layers = stack.len(),
            width = w,
            height = h,
            "Loaded layer source"
        );
        Ok(stack)
    }
}
