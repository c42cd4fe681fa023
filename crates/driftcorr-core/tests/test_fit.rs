#[allow(dead_code)]
mod common;

use std::f64::consts::TAU;

use approx::assert_abs_diff_eq;

use driftcorr_core::error::DriftError;
use driftcorr_core::fit::{fit_distortion, FitOptions, InitialGuess};
use driftcorr_core::model::PolynomialModel;
use driftcorr_core::peaks::Wavevector;
use driftcorr_core::phase::{sample_phases, PhaseMap, PhaseOptions};

use common::{add_noise, displacement_rms, hexagonal_lattice, square_lattice, PERIOD};

const SIZE: usize = 128;

fn square_wavevectors() -> Vec<Wavevector> {
    let q = TAU / PERIOD;
    vec![Wavevector::new(q, 0.0), Wavevector::new(0.0, q)]
}

fn phase_maps<F>(drift: F) -> Vec<PhaseMap>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let img = square_lattice(SIZE, PERIOD, drift);
    sample_phases(img.view(), &square_wavevectors(), &PhaseOptions::default()).unwrap()
}

// ---------------------------------------------------------------------------
// Recovery of known drift
// ---------------------------------------------------------------------------

#[test]
fn test_recovers_constant_offset() {
    let truth = |_: f64, _: f64| (1.3, -0.7);
    let maps = phase_maps(truth);
    let field = fit_distortion(&maps, &FitOptions::default()).unwrap();
    assert!(field.diagnostics.converged);
    let rms = displacement_rms(SIZE, truth, |x, y| field.displacement_at(x, y));
    assert!(rms < 0.05, "rms {rms}");
}

#[test]
fn test_recovers_linear_shear() {
    let truth = |_: f64, y: f64| (0.02 * y, 0.0);
    let maps = phase_maps(truth);
    let field = fit_distortion(&maps, &FitOptions::default()).unwrap();
    assert!(field.diagnostics.converged);
    assert!(field.diagnostics.final_cost < field.diagnostics.initial_cost);
    let rms = displacement_rms(SIZE, truth, |x, y| field.displacement_at(x, y));
    assert!(rms < 0.05, "rms {rms}");
}

#[test]
fn test_recovers_quadratic_drift_with_noise() {
    let c = (SIZE as f64 - 1.0) / 2.0;
    let truth = move |x: f64, y: f64| {
        let (xn, yn) = ((x - c) / 64.0, (y - c) / 64.0);
        (0.4 + 0.3 * yn * yn, -0.2 + 0.25 * xn * yn)
    };
    let mut img = square_lattice(SIZE, PERIOD, truth);
    add_noise(&mut img, 0.3, 11);
    let maps = sample_phases(img.view(), &square_wavevectors(), &PhaseOptions::default()).unwrap();
    let options = FitOptions {
        order: 2,
        ..Default::default()
    };
    let field = fit_distortion(&maps, &options).unwrap();
    assert!(field.diagnostics.converged);
    let rms = displacement_rms(SIZE, truth, |x, y| field.displacement_at(x, y));
    assert!(rms < 0.08, "rms {rms}");
}

#[test]
fn test_hexagonal_fit_uses_all_wavevectors() {
    let q = TAU / 8.0;
    let truth = |_: f64, y: f64| (0.5 + 0.01 * y, -0.3);
    let img = hexagonal_lattice(SIZE, 8.0, truth);
    let wavevectors: Vec<Wavevector> = (0..3)
        .map(|j| {
            let a = j as f64 * TAU / 6.0;
            Wavevector::new(q * a.cos(), q * a.sin())
        })
        .collect();
    let maps = sample_phases(img.view(), &wavevectors, &PhaseOptions::default()).unwrap();
    let field = fit_distortion(&maps, &FitOptions::default()).unwrap();
    assert_eq!(field.diagnostics.samples % 3, 0);
    let rms = displacement_rms(SIZE, truth, |x, y| field.displacement_at(x, y));
    assert!(rms < 0.05, "rms {rms}");
}

#[test]
fn test_phase_gradient_guess_recovers_wrapping_shear() {
    // 0.06 px/px moves the lattice by more than half a period across the
    // scan, so the phase wraps.
    let truth = |_: f64, y: f64| (0.06 * y, 0.0);
    let maps = phase_maps(truth);
    let options = FitOptions {
        initial_guess: InitialGuess::PhaseGradient,
        ..Default::default()
    };
    let field = fit_distortion(&maps, &options).unwrap();
    assert!(field.diagnostics.converged);
    let (ux_top, _) = field.displacement_at(64.0, 32.0);
    let (ux_bottom, _) = field.displacement_at(64.0, 96.0);
    let slope = (ux_bottom - ux_top) / 64.0;
    assert_abs_diff_eq!(slope, 0.06, epsilon = 0.005);
}

#[test]
fn test_explicit_initial_guess_is_used() {
    let truth = |_: f64, _: f64| (0.8, 0.2);
    let maps = phase_maps(truth);
    let model = PolynomialModel::new(1, (SIZE, SIZE)).unwrap();
    let options = FitOptions {
        initial_guess: InitialGuess::Coefficients(model.affine_parameters((0.8, 0.2), [[0.0; 2]; 2])),
        ..Default::default()
    };
    let field = fit_distortion(&maps, &options).unwrap();
    assert!(field.diagnostics.initial_cost < 1e-2 * maps.len() as f64 * (SIZE * SIZE) as f64);
    let (ux, uy) = field.displacement_at(64.0, 64.0);
    assert_abs_diff_eq!(ux, 0.8, epsilon = 0.02);
    assert_abs_diff_eq!(uy, 0.2, epsilon = 0.02);
}

#[test]
fn test_wrong_guess_length_is_rejected() {
    let maps = phase_maps(|_, _| (0.0, 0.0));
    let options = FitOptions {
        initial_guess: InitialGuess::Coefficients(vec![0.0; 3]),
        ..Default::default()
    };
    assert!(matches!(
        fit_distortion(&maps, &options),
        Err(DriftError::InvalidParameter(_))
    ));
}

// ---------------------------------------------------------------------------
// Degenerate input and convergence reporting
// ---------------------------------------------------------------------------

#[test]
fn test_parallel_wavevectors_are_underdetermined() {
    let q = TAU / PERIOD;
    let img = square_lattice(64, PERIOD, |_, _| (0.0, 0.0));
    let maps = sample_phases(
        img.view(),
        &[Wavevector::new(q, 0.0), Wavevector::new(2.0 * q, 0.0)],
        &PhaseOptions { window_sigma: Some(8.0) },
    )
    .unwrap();
    assert!(matches!(
        fit_distortion(&maps, &FitOptions::default()),
        Err(DriftError::UnderdeterminedModel { .. })
    ));
}

#[test]
fn test_single_wavevector_is_underdetermined() {
    let maps = phase_maps(|_, _| (0.0, 0.0));
    assert!(matches!(
        fit_distortion(&maps[..1], &FitOptions::default()),
        Err(DriftError::UnderdeterminedModel { .. })
    ));
}

#[test]
fn test_iteration_cap_is_reported_not_fatal() {
    let maps = phase_maps(|_, y| (0.02 * y, 0.0));
    let options = FitOptions {
        max_iterations: 1,
        ..Default::default()
    };
    let field = fit_distortion(&maps, &options).unwrap();
    assert!(!field.diagnostics.converged);
    assert_eq!(field.diagnostics.iterations, 1);
    assert!(matches!(
        field.require_converged(),
        Err(DriftError::NonConvergence { iterations: 1, .. })
    ));
}

#[test]
fn test_excessive_order_is_rejected() {
    let maps = phase_maps(|_, _| (0.0, 0.0));
    let options = FitOptions {
        order: 9,
        ..Default::default()
    };
    assert!(matches!(
        fit_distortion(&maps, &options),
        Err(DriftError::InvalidParameter(_))
    ));
}
