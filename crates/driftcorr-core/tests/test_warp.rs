#[allow(dead_code)]
mod common;

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3, Axis};

use driftcorr_core::error::DriftError;
use driftcorr_core::model::{DistortionField, PolynomialModel};
use driftcorr_core::peaks::{find_bragg_peaks, PeakSearchOptions};
use driftcorr_core::warp::{
    apply_distortion, apply_distortion_stack, resample_stack, sample, BoundaryPolicy,
    Interpolation, SourceMap, WarpOptions,
};

use common::{nearest_peak, square_lattice, PERIOD};

fn shift_field(shape: (usize, usize), ux: f64, uy: f64) -> DistortionField {
    let model = PolynomialModel::new(0, shape).unwrap();
    DistortionField::from_coefficients(model, vec![ux, uy]).unwrap()
}

fn ramp(h: usize, w: usize) -> Array2<f64> {
    Array2::from_shape_fn((h, w), |(r, c)| (r * w + c) as f64)
}

// ---------------------------------------------------------------------------
// Identity and exact shifts
// ---------------------------------------------------------------------------

#[test]
fn test_zero_field_is_identity_for_every_interpolation() {
    let img = square_lattice(48, PERIOD, |_, _| (0.3, 0.1));
    let field = DistortionField::identity(PolynomialModel::new(2, (48, 48)).unwrap());
    for interpolation in [Interpolation::Nearest, Interpolation::Linear, Interpolation::Cubic] {
        let options = WarpOptions {
            interpolation,
            ..Default::default()
        };
        let out = apply_distortion(img.view(), &field, &options).unwrap();
        assert_eq!(out, img, "{interpolation}");
    }
}

#[test]
fn test_integer_shift_moves_columns() {
    let data = ramp(16, 20);
    let field = shift_field((16, 20), 3.0, 0.0);
    let options = WarpOptions {
        boundary: BoundaryPolicy::Fill(-1.0),
        ..Default::default()
    };
    let out = apply_distortion(data.view(), &field, &options).unwrap();
    for row in 0..16 {
        for col in 0..20 {
            if col < 3 {
                assert_eq!(out[[row, col]], -1.0);
            } else {
                assert_eq!(out[[row, col]], data[[row, col - 3]]);
            }
        }
    }
}

#[test]
fn test_nan_boundary_marks_uncovered_pixels() {
    let data = ramp(16, 16);
    let field = shift_field((16, 16), 0.0, -2.0);
    let options = WarpOptions {
        boundary: BoundaryPolicy::Nan,
        interpolation: Interpolation::Linear,
        ..Default::default()
    };
    let out = apply_distortion(data.view(), &field, &options).unwrap();
    let nan_rows: Vec<usize> = (0..16).filter(|&r| out[[r, 0]].is_nan()).collect();
    assert_eq!(nan_rows, vec![14, 15]);
    assert_eq!(out[[0, 5]], data[[2, 5]]);
}

#[test]
fn test_clamp_boundary_repeats_edge() {
    let data = ramp(8, 8);
    let field = shift_field((8, 8), 2.0, 0.0);
    let out = apply_distortion(data.view(), &field, &WarpOptions::default()).unwrap();
    for row in 0..8 {
        assert_eq!(out[[row, 0]], data[[row, 0]]);
        assert_eq!(out[[row, 1]], data[[row, 0]]);
        assert_eq!(out[[row, 2]], data[[row, 0]]);
    }
}

#[test]
fn test_infinite_source_clamps_to_edge() {
    let data = ramp(6, 7);
    for interpolation in [Interpolation::Nearest, Interpolation::Linear, Interpolation::Cubic] {
        let v = sample(data.view(), f64::INFINITY, 2.0, interpolation, BoundaryPolicy::Clamp);
        assert_eq!(v, data[[2, 6]]);
        let v = sample(data.view(), 3.0, f64::NEG_INFINITY, interpolation, BoundaryPolicy::Clamp);
        assert_eq!(v, data[[0, 3]]);
    }
}

#[test]
fn test_nan_source_has_no_edge() {
    let data = ramp(6, 7);
    let nan = f64::NAN;
    assert!(sample(data.view(), nan, 2.0, Interpolation::Cubic, BoundaryPolicy::Clamp).is_nan());
    assert_eq!(
        sample(data.view(), 1.0, nan, Interpolation::Cubic, BoundaryPolicy::Fill(-2.0)),
        -2.0
    );
}

#[test]
fn test_source_map_matches_field_inverse() {
    // Large enough for the row-parallel path.
    let model = PolynomialModel::new(2, (300, 260)).unwrap();
    let mut params = model.affine_parameters((0.5, -0.25), [[0.01, 0.02], [-0.01, 0.005]]);
    params[3] = 0.3;
    let field = DistortionField::from_coefficients(model, params).unwrap();
    let map = SourceMap::from_field(&field);
    assert_eq!(map.shape(), (300, 260));
    for (row, col) in [(0, 0), (17, 250), (150, 130), (299, 3), (299, 259)] {
        let (sx, sy) = field.source_coordinate(col as f64, row as f64);
        assert_eq!(map.x[[row, col]], sx);
        assert_eq!(map.y[[row, col]], sy);
    }
}

#[test]
fn test_displacement_of_constant_shift() {
    let field = shift_field((10, 12), 1.5, -0.5);
    let displacement = field.displacement_field();
    assert_eq!(displacement.shape(), (10, 12));
    assert_abs_diff_eq!(displacement.dx[[4, 7]], 1.5, epsilon = 1e-12);
    assert_abs_diff_eq!(displacement.dy[[4, 7]], -0.5, epsilon = 1e-12);
    assert_abs_diff_eq!(displacement.rms(), 2.5f64.sqrt(), epsilon = 1e-12);
}

// ---------------------------------------------------------------------------
// Drift removal
// ---------------------------------------------------------------------------

#[test]
fn test_known_shear_is_removed() {
    let img = square_lattice(128, PERIOD, |_, y| (0.02 * y, 0.0));
    let model = PolynomialModel::new(1, (128, 128)).unwrap();
    let params = model.affine_parameters((0.0, 0.0), [[0.0, 0.02], [0.0, 0.0]]);
    let field = DistortionField::from_coefficients(model, params).unwrap();

    let out = apply_distortion(img.view(), &field, &WarpOptions::default()).unwrap();
    let peaks = find_bragg_peaks(out.view(), &PeakSearchOptions::default()).unwrap();
    let p = nearest_peak(&peaks, 12.8, 0.0);
    assert_abs_diff_eq!(p.kx, 12.8, epsilon = 0.05);
    assert_abs_diff_eq!(p.ky, 0.0, epsilon = 0.05);

    // Away from the clamped edge the corrected image is the ideal lattice.
    let ideal = square_lattice(128, PERIOD, |_, _| (0.0, 0.0));
    for row in 20..108 {
        for col in 20..108 {
            assert_abs_diff_eq!(out[[row, col]], ideal[[row, col]], epsilon = 0.05);
        }
    }
}

#[test]
fn test_stack_layers_stay_coregistered() {
    let base = square_lattice(64, PERIOD, |x, y| (0.01 * y, -0.005 * x));
    let contrast = [(1.0, 0.0), (0.5, 3.0), (2.0, -1.0)];
    let mut stack = Array3::<f64>::zeros((3, 64, 64));
    for (i, (a, b)) in contrast.iter().enumerate() {
        stack
            .index_axis_mut(Axis(0), i)
            .assign(&base.mapv(|v| a * v + b));
    }

    let model = PolynomialModel::new(1, (64, 64)).unwrap();
    let params = model.affine_parameters((0.2, -0.1), [[0.0, 0.01], [-0.005, 0.0]]);
    let field = DistortionField::from_coefficients(model, params).unwrap();
    let out = apply_distortion_stack(stack.view(), &field, &WarpOptions::default()).unwrap();
    assert_eq!(out.dim(), (3, 64, 64));

    let first = out.index_axis(Axis(0), 0);
    for (i, (a, b)) in contrast.iter().enumerate().skip(1) {
        let layer = out.index_axis(Axis(0), i);
        for (v, v0) in layer.iter().zip(first.iter()) {
            assert_abs_diff_eq!(*v, a * v0 + b, epsilon = 1e-9);
        }
    }
}

// ---------------------------------------------------------------------------
// Rejected input
// ---------------------------------------------------------------------------

#[test]
fn test_field_shape_must_match_layer() {
    let data = Array2::<f64>::zeros((32, 40));
    let field = DistortionField::identity(PolynomialModel::new(1, (32, 32)).unwrap());
    assert!(matches!(
        apply_distortion(data.view(), &field, &WarpOptions::default()),
        Err(DriftError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_source_map_shape_must_match_stack() {
    let stack = Array3::<f64>::zeros((2, 16, 16));
    let map = SourceMap::from_field(&shift_field((16, 20), 0.0, 0.0));
    assert!(matches!(
        resample_stack(stack.view(), &map, &WarpOptions::default()),
        Err(DriftError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_stack_rejects_field_leaving_grid() {
    let stack = Array3::<f64>::zeros((2, 32, 32));
    let field = shift_field((32, 32), 40.0, 0.0);
    match apply_distortion_stack(stack.view(), &field, &WarpOptions::default()) {
        Err(DriftError::DisplacementOutOfBounds { fraction }) => {
            assert_abs_diff_eq!(fraction, 1.0, epsilon = 1e-12)
        }
        other => panic!("expected DisplacementOutOfBounds, got {other:?}"),
    }
}

#[test]
fn test_out_of_bounds_threshold_is_configurable() {
    let data = ramp(20, 20);
    let field = shift_field((20, 20), 4.0, 0.0);
    let strict = WarpOptions {
        max_out_of_bounds_fraction: 0.1,
        ..Default::default()
    };
    assert!(matches!(
        apply_distortion(data.view(), &field, &strict),
        Err(DriftError::DisplacementOutOfBounds { .. })
    ));
    let map = SourceMap::from_field(&field);
    assert_abs_diff_eq!(map.out_of_bounds_fraction(), 0.2, epsilon = 1e-12);
    assert!(apply_distortion(data.view(), &field, &WarpOptions::default()).is_ok());
}
