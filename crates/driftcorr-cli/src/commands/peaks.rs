use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use driftcorr_core::peaks::find_bragg_peaks;

use super::{load_config, InputArgs};

#[derive(Args)]
pub struct PeaksArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Drift config file (TOML); only the [peaks] section is used
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Inner radius of the search annulus (bins)
    #[arg(long)]
    pub min_radius: Option<f64>,

    /// Outer radius of the search annulus (bins)
    #[arg(long)]
    pub max_radius: Option<f64>,

    /// Minimum separation between peaks (bins)
    #[arg(long)]
    pub min_separation: Option<f64>,

    /// Number of peaks that must be found
    #[arg(long)]
    pub required: Option<usize>,
}

pub fn run(args: &PeaksArgs) -> Result<()> {
    let mut options = load_config(args.config.as_deref())?.peaks;
    if let Some(r) = args.min_radius {
        options.min_radius = r;
    }
    if args.max_radius.is_some() {
        options.max_radius = args.max_radius;
    }
    if let Some(s) = args.min_separation {
        options.min_separation = s;
    }
    if let Some(n) = args.required {
        options.required_peaks = n;
    }

    let stack = args.input.load()?;
    let reference = stack.mean_layer();
    let shape = reference.dim();
    let peaks = find_bragg_peaks(reference.view(), &options)?;

    println!(
        "{:>4}  {:>9}  {:>9}  {:>8}  {:>8}  {:>9}  {:>12}",
        "#", "kx", "ky", "|k|", "angle", "period", "magnitude"
    );
    for (i, peak) in peaks.iter().enumerate() {
        let period = peak.wavevector(shape).period();
        println!(
            "{:>4}  {:>9.3}  {:>9.3}  {:>8.3}  {:>7.2}°  {:>7.3}px  {:>12.4e}",
            i,
            peak.kx,
            peak.ky,
            peak.radius(),
            peak.angle().to_degrees(),
            period,
            peak.magnitude
        );
    }

    Ok(())
}
