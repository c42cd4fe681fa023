use std::path::Path;

use console::Style;
use driftcorr_core::pipeline::{DriftConfig, DriftSummary};

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    warning: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            warning: Style::new().yellow().bold(),
            path: Style::new().underlined(),
        }
    }
}

pub fn print_drift_summary(input: &Path, output: &Path, summary: &DriftSummary, config: &DriftConfig) {
    let s = Styles::new();
    let diag = &summary.field.diagnostics;

    println!();
    println!("  {}", s.title.apply_to("Drift Correction"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
    println!();

    println!("  {:<14}{}", s.label.apply_to("Input"), s.path.apply_to(input.display()));
    println!("  {:<14}{}", s.label.apply_to("Output"), s.path.apply_to(output.display()));
    println!(
        "  {:<14}{}",
        s.label.apply_to("Grid"),
        s.value.apply_to(format!(
            "{}x{} x {} layer(s)",
            summary.shape.1, summary.shape.0, summary.layers
        ))
    );
    println!();

    println!("  {}", s.header.apply_to("Lattice"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Peaks"),
        s.value.apply_to(summary.peaks.len())
    );
    let symmetry = config
        .basis
        .symmetry
        .map(|sym| sym.to_string())
        .unwrap_or_else(|| "measured".into());
    println!("    {:<14}{}", s.label.apply_to("Basis"), s.method.apply_to(symmetry));
    for peak in &summary.basis.peaks {
        println!(
            "    {:<14}{}",
            "",
            s.value.apply_to(format!(
                "({:+.3}, {:+.3})  {:.2}°",
                peak.kx,
                peak.ky,
                peak.angle().to_degrees()
            ))
        );
    }
    println!(
        "    {:<14}{}",
        s.label.apply_to("Window"),
        s.value.apply_to(format!("{:.2} px", summary.window_sigma))
    );
    println!();

    println!("  {}", s.header.apply_to("Fit"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Order"),
        s.value.apply_to(summary.field.model.order)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Initial"),
        s.method.apply_to(&config.fit.initial_guess)
    );
    let status = if diag.converged {
        s.method.apply_to("converged".to_string())
    } else {
        s.warning.apply_to("not converged".to_string())
    };
    println!(
        "    {:<14}{} after {} iteration(s)",
        s.label.apply_to("Status"),
        status,
        diag.iterations
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Residual"),
        s.value.apply_to(format!("{:.4} rad rms", diag.rms_residual))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Condition"),
        s.value.apply_to(format!("{:.3}", diag.condition_number))
    );
    println!();

    println!("  {}", s.header.apply_to("Resampling"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Method"),
        s.method.apply_to(format!("{} / {}", config.warp.interpolation, config.warp.boundary))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Shift"),
        s.value.apply_to(format!(
            "{:.3} px rms, {:.3} px max",
            summary.displacement_rms, summary.displacement_max
        ))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Outside"),
        s.value.apply_to(format!("{:.2}%", summary.out_of_bounds_fraction * 100.0))
    );
}
