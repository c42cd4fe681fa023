use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use driftcorr_core::filters::crop::CropMargins;
use driftcorr_core::io::{save_layer_image, write_raw_f32};
use driftcorr_core::layer::LayerStack;
use driftcorr_core::peaks::LatticeSymmetry;
use driftcorr_core::pipeline::{
    correct_drift_stack_reported, DriftConfig, DriftStage, ProgressReporter,
};
use driftcorr_core::warp::Interpolation;
use indicatif::{ProgressBar, ProgressStyle};

use super::{load_config, InputArgs};
use crate::summary::print_drift_summary;

#[derive(Clone, Copy, ValueEnum)]
pub enum SymmetryArg {
    Square,
    Hexagonal,
    /// Fit against the measured peaks
    Measured,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum InterpolationArg {
    Nearest,
    Linear,
    Cubic,
}

#[derive(Args)]
pub struct CorrectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Drift config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Polynomial order of the drift model
    #[arg(long)]
    pub order: Option<usize>,

    /// Ideal lattice replacing the measured reference peaks [default: square]
    #[arg(long, value_enum)]
    pub symmetry: Option<SymmetryArg>,

    /// Orientation of the ideal lattice in degrees
    #[arg(long)]
    pub orientation: Option<f64>,

    /// Number of reference wavevectors
    #[arg(long)]
    pub basis: Option<usize>,

    /// Interpolation used when resampling
    #[arg(long, value_enum)]
    pub interpolation: Option<InterpolationArg>,

    /// Crop this many pixels from every side after correction
    #[arg(long)]
    pub crop: Option<usize>,

    /// Stretch the output so it spans a whole number of lattice periods
    #[arg(long)]
    pub commensurate: bool,

    /// Save the correction summary as TOML
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Output file (.tiff/.png per layer, or .f32 for a raw cube)
    #[arg(short, long, default_value = "corrected.tiff")]
    pub output: PathBuf,
}

/// Drives an indicatif bar from pipeline stages.
struct BarReporter {
    pb: ProgressBar,
}

impl ProgressReporter for BarReporter {
    fn begin_stage(&self, stage: DriftStage, total_items: Option<usize>) {
        self.pb.set_message(stage.to_string());
        self.pb.set_length(total_items.unwrap_or(1) as u64);
        self.pb.set_position(0);
    }

    fn advance(&self, items_done: usize) {
        self.pb.inc(items_done as u64);
    }

    fn finish_stage(&self) {
        if let Some(len) = self.pb.length() {
            self.pb.set_position(len);
        }
    }
}

pub fn run(args: &CorrectArgs) -> Result<()> {
    let config = apply_overrides(load_config(args.config.as_deref())?, args);
    let stack = args.input.load()?;

    let pb = ProgressBar::new(1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:24} [{bar:40}] {pos}/{len}")?
            .progress_chars("=> "),
    );
    let reporter = BarReporter { pb };

    let result = correct_drift_stack_reported(&stack, &config, &reporter)?;
    reporter.pb.finish_with_message("Done");

    print_drift_summary(&args.input.file, &args.output, &result.summary, &config);

    if !result.summary.field.diagnostics.converged {
        tracing::warn!("Drift fit did not converge; inspect the residual before relying on the output");
    }

    write_output(&result.corrected, &args.output)?;
    println!("\nOutput saved to {}", args.output.display());

    if let Some(ref path) = args.report {
        let text = toml::to_string_pretty(&result.summary).context("Failed to encode report")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report saved to {}", path.display());
    }

    Ok(())
}

fn apply_overrides(mut config: DriftConfig, args: &CorrectArgs) -> DriftConfig {
    if let Some(order) = args.order {
        config.fit.order = order;
    }
    if let Some(sym) = args.symmetry {
        config.basis.symmetry = match sym {
            SymmetryArg::Square => Some(LatticeSymmetry::Square),
            SymmetryArg::Hexagonal => Some(LatticeSymmetry::Hexagonal),
            SymmetryArg::Measured => None,
        };
    }
    if args.orientation.is_some() {
        config.basis.orientation_deg = args.orientation;
    }
    if let Some(count) = args.basis {
        config.basis.count = count;
    }
    if let Some(interp) = args.interpolation {
        config.warp.interpolation = match interp {
            InterpolationArg::Nearest => Interpolation::Nearest,
            InterpolationArg::Linear => Interpolation::Linear,
            InterpolationArg::Cubic => Interpolation::Cubic,
        };
    }
    if let Some(n) = args.crop {
        config.crop = Some(CropMargins::uniform(n));
    }
    if args.commensurate {
        config.commensurate = true;
    }
    config
}

/// Raw cubes go to one file; image formats get one file per layer.
fn write_output(stack: &LayerStack, path: &Path) -> Result<()> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if matches!(ext, "f32" | "raw") {
        return write_raw_f32(stack.data.view(), path, false)
            .with_context(|| format!("Failed to write {}", path.display()));
    }

    for i in 0..stack.len() {
        let Some(layer) = stack.layer(i) else {
            continue;
        };
        let target = if stack.len() == 1 {
            path.to_path_buf()
        } else {
            layer_path(path, i)
        };
        save_layer_image(layer, &target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }
    Ok(())
}

fn layer_path(path: &Path, index: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("layer");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("tiff");
    path.with_file_name(format!("{stem}_{index:03}.{ext}"))
}
