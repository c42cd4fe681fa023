use anyhow::Result;
use clap::Args;
use driftcorr_core::layer::mean_std;

use super::InputArgs;

#[derive(Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub input: InputArgs,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let stack = args.input.load()?;
    let (h, w) = stack.shape();

    println!("File:        {}", args.input.file.display());
    println!("Layers:      {}", stack.len());
    println!("Dimensions:  {}x{}", w, h);

    if let Some((fx, fy)) = stack.metadata.field_of_view {
        println!("Field:       {} x {}", fx, fy);
    }
    if let Some((px, py)) = stack.metadata.pixel_size((h, w)) {
        println!("Pixel size:  {:.4} x {:.4}", px, py);
    }

    for i in 0..stack.len() {
        let Some(layer) = stack.layer(i) else {
            continue;
        };
        let (mean, std) = mean_std(layer.iter().copied());
        let (lo, hi) = layer
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        println!(
            "Layer {:>3}:   min {:>10.4}  max {:>10.4}  mean {:>10.4}  std {:>10.4}",
            i, lo, hi, mean, std
        );
    }

    Ok(())
}
