pub mod config;
pub mod correct;
pub mod info;
pub mod peaks;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use driftcorr_core::io::LayerSource;
use driftcorr_core::layer::{LayerStack, ScanMetadata};
use driftcorr_core::pipeline::DriftConfig;

/// Input selection shared by every command that reads layers.
#[derive(Args)]
pub struct InputArgs {
    /// Input file: PNG/TIFF image, or a headerless f32 cube with --width/--height
    pub file: PathBuf,

    /// Width of a raw f32 cube
    #[arg(long, requires = "height")]
    pub width: Option<usize>,

    /// Height of a raw f32 cube
    #[arg(long, requires = "width")]
    pub height: Option<usize>,

    /// Number of layers in a raw f32 cube
    #[arg(long, default_value = "1")]
    pub layers: usize,

    /// Raw samples are big-endian
    #[arg(long)]
    pub big_endian: bool,

    /// Physical field of view "x,y" (e.g. nm)
    #[arg(long)]
    pub fov: Option<String>,
}

impl InputArgs {
    pub fn source(&self) -> LayerSource {
        match (self.width, self.height) {
            (Some(width), Some(height)) => LayerSource::RawF32 {
                path: self.file.clone(),
                width,
                height,
                layers: self.layers,
                big_endian: self.big_endian,
            },
            _ => LayerSource::Image {
                path: self.file.clone(),
            },
        }
    }

    pub fn metadata(&self) -> Result<ScanMetadata> {
        let field_of_view = match &self.fov {
            Some(text) => {
                let parts: Vec<f64> = text
                    .split(',')
                    .map(|s| s.trim().parse::<f64>())
                    .collect::<std::result::Result<_, _>>()
                    .with_context(|| format!("Invalid field of view '{text}'"))?;
                match parts.as_slice() {
                    [x, y] => Some((*x, *y)),
                    _ => anyhow::bail!("Field of view needs two values, got '{text}'"),
                }
            }
            None => None,
        };
        Ok(ScanMetadata {
            field_of_view,
            bias: Vec::new(),
        })
    }

    pub fn load(&self) -> Result<LayerStack> {
        let source = self.source();
        source
            .load(self.metadata()?)
            .with_context(|| format!("Failed to load {}", self.file.display()))
    }
}

/// Read a TOML config, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<DriftConfig> {
    match path {
        Some(path) => DriftConfig::load(path)
            .with_context(|| format!("Failed to read config {}", path.display())),
        None => Ok(DriftConfig::default()),
    }
}
