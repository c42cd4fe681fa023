#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use driftcorr_core::error::DriftError;
use driftcorr_core::fft::magnitude_spectrum;
use driftcorr_core::layer::ScanMetadata;
use driftcorr_core::peaks::{
    find_bragg_peaks, find_peaks_in_spectrum, regenerate_basis, select_basis, LatticeSymmetry,
    PeakSearchOptions,
};

use common::{add_noise, hexagonal_lattice, nearest_peak, square_lattice, PERIOD};

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[test]
fn test_square_lattice_yields_two_pairs() {
    let img = square_lattice(128, PERIOD, |_, _| (0.0, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    assert_eq!(peaks.len(), 4);
    for (kx, ky) in [(12.8, 0.0), (-12.8, 0.0), (0.0, 12.8), (0.0, -12.8)] {
        let p = nearest_peak(&peaks, kx, ky);
        assert_abs_diff_eq!(p.kx, kx, epsilon = 0.02);
        assert_abs_diff_eq!(p.ky, ky, epsilon = 0.02);
    }
}

#[test]
fn test_sheared_lattice_peak_positions() {
    let img = square_lattice(128, PERIOD, |_, y| (0.02 * y, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    assert_eq!(peaks.len(), 4);
    // Shear adds a ky cross term of 12.8 * 0.02 to the x peak.
    let p = nearest_peak(&peaks, 12.8, 0.256);
    assert_abs_diff_eq!(p.kx, 12.8, epsilon = 0.02);
    assert_abs_diff_eq!(p.ky, 0.256, epsilon = 0.02);
    let p = nearest_peak(&peaks, 0.0, 12.8);
    assert_abs_diff_eq!(p.kx, 0.0, epsilon = 0.02);
    assert_abs_diff_eq!(p.ky, 12.8, epsilon = 0.02);
}

#[test]
fn test_peaks_come_in_symmetric_pairs() {
    let mut img = hexagonal_lattice(96, 8.0, |_, _| (0.3, -0.2));
    add_noise(&mut img, 0.5, 7);
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    assert!(peaks.len() >= 6);
    for p in &peaks {
        let m = nearest_peak(&peaks, -p.kx, -p.ky);
        assert!(m.distance_to(&p.mirrored()) < 1e-9);
        assert_abs_diff_eq!(m.magnitude, p.magnitude, epsilon = 1e-9);
    }
}

#[test]
fn test_peaks_sorted_by_magnitude_then_angle() {
    let img = square_lattice(64, 8.0, |_, _| (0.0, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    for pair in peaks.windows(2) {
        assert!(pair[0].magnitude >= pair[1].magnitude);
        if pair[0].magnitude == pair[1].magnitude {
            assert!(pair[0].angle() < pair[1].angle());
        }
    }
}

#[test]
fn test_stripes_report_insufficient_peaks() {
    let q = std::f64::consts::TAU / PERIOD;
    let img = Array2::from_shape_fn((64, 64), |(_, c)| (q * c as f64).cos());
    let err = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        DriftError::InsufficientPeaks {
            found: 2,
            required: 4
        }
    ));
}

#[test]
fn test_axis_mask_hides_axis_peaks() {
    let img = hexagonal_lattice(96, 8.0, |_, _| (0.0, 0.0));
    let options = PeakSearchOptions {
        axis_mask_width: 2.0,
        ..Default::default()
    };
    let peaks = find_bragg_peaks(img.view(), &options).unwrap();
    // Only the 60° and 120° pairs survive the mask.
    assert_eq!(peaks.len(), 4);
    for p in &peaks {
        assert!(p.kx.abs() > 2.0 && p.ky.abs() > 2.0);
    }
}

#[test]
fn test_tiny_grid_is_rejected() {
    let img = Array2::<f64>::zeros((4, 32));
    assert!(matches!(
        find_bragg_peaks(img.view(), &PeakSearchOptions::default()),
        Err(DriftError::InvalidDimensions { .. })
    ));
}

#[test]
fn test_nan_pixel_is_rejected() {
    let mut img = square_lattice(128, PERIOD, |_, y| (0.02 * y, 0.0));
    img[[5, 5]] = f64::NAN;
    assert!(matches!(
        find_bragg_peaks(img.view(), &PeakSearchOptions::default()),
        Err(DriftError::InvalidLayer(_))
    ));
}

#[test]
fn test_spectrum_search_matches_image_search() {
    let img = square_lattice(64, 8.0, |_, _| (0.0, 0.0));
    let spectrum = magnitude_spectrum(img.view());
    let peaks = find_peaks_in_spectrum(spectrum.view(), &PeakSearchOptions::default()).unwrap();
    assert_eq!(peaks.len(), 4);
    let p = nearest_peak(&peaks, 8.0, 0.0);
    assert_abs_diff_eq!(p.kx, 8.0, epsilon = 0.05);
}

// ---------------------------------------------------------------------------
// Basis
// ---------------------------------------------------------------------------

#[test]
fn test_basis_from_hexagonal_lattice() {
    let img = hexagonal_lattice(96, 8.0, |_, _| (0.0, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    let basis = select_basis(&peaks, img.dim(), 3).unwrap();
    assert_eq!(basis.peaks.len(), 3);
    assert_abs_diff_eq!(basis.max_period(), 8.0, epsilon = 0.01);
}

#[test]
fn test_regenerated_hexagonal_basis_is_ideal() {
    let img = hexagonal_lattice(96, 8.0, |_, y| (0.01 * y, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    let basis = select_basis(&peaks, img.dim(), 2).unwrap();
    let ideal = regenerate_basis(
        &basis,
        LatticeSymmetry::Hexagonal,
        Some(0.0),
        &ScanMetadata::default(),
    )
    .unwrap();
    let q = ideal.wavevectors();
    let angle = (q[0].qx * q[1].qx + q[0].qy * q[1].qy) / (q[0].norm() * q[1].norm());
    assert_abs_diff_eq!(angle.abs(), 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(q[0].norm(), q[1].norm(), epsilon = 1e-12);
}

#[test]
fn test_regeneration_honours_pixel_aspect() {
    // 64x64 grid covering 10 x 20 units: y pixels are twice as tall.
    let metadata = ScanMetadata {
        field_of_view: Some((10.0, 20.0)),
        bias: vec![],
    };
    let img = square_lattice(64, 8.0, |_, _| (0.0, 0.0));
    let peaks = find_bragg_peaks(img.view(), &PeakSearchOptions::default()).unwrap();
    let basis = select_basis(&peaks, img.dim(), 2).unwrap();
    let ideal = regenerate_basis(&basis, LatticeSymmetry::Square, Some(0.0), &metadata).unwrap();
    let kx_peak = nearest_peak(&ideal.peaks, 8.0, 0.0);
    let ky_peak = nearest_peak(&ideal.peaks, 0.0, 8.0);
    // Equal physical magnitude means twice the pixel frequency along y.
    assert_abs_diff_eq!(ky_peak.ky.abs(), 2.0 * kx_peak.kx.abs(), epsilon = 1e-9);
}
