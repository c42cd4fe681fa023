use std::f64::consts::TAU;

use driftcorr_core::peaks::BraggPeak;
use ndarray::Array2;

/// Lattice constant (px) used by most synthetic scans.
pub const PERIOD: f64 = 10.0;

/// Square lattice `cos(q (x + ux)) + cos(q (y + uy))` recorded with the
/// drift `u(x, y)`, i.e. `recorded(s) = ideal(s + u(s))`.
pub fn square_lattice<F>(size: usize, period: f64, drift: F) -> Array2<f64>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let q = TAU / period;
    Array2::from_shape_fn((size, size), |(row, col)| {
        let (x, y) = (col as f64, row as f64);
        let (ux, uy) = drift(x, y);
        (q * (x + ux)).cos() + (q * (y + uy)).cos()
    })
}

/// Hexagonal lattice from three wavevectors 60° apart, starting along +x.
pub fn hexagonal_lattice<F>(size: usize, period: f64, drift: F) -> Array2<f64>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let q = TAU / period;
    let dirs: Vec<(f64, f64)> = (0..3)
        .map(|j| {
            let a = j as f64 * TAU / 6.0;
            (q * a.cos(), q * a.sin())
        })
        .collect();
    Array2::from_shape_fn((size, size), |(row, col)| {
        let (x, y) = (col as f64, row as f64);
        let (ux, uy) = drift(x, y);
        dirs.iter()
            .map(|(qx, qy)| (qx * (x + ux) + qy * (y + uy)).cos())
            .sum()
    })
}

/// Deterministic uniform noise in `[-amplitude, amplitude]`.
pub fn add_noise(data: &mut Array2<f64>, amplitude: f64, seed: u64) {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    for v in data.iter_mut() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (state >> 11) as f64 / (1u64 << 53) as f64;
        *v += amplitude * (2.0 * unit - 1.0);
    }
}

/// The detected peak closest to `(kx, ky)`.
pub fn nearest_peak(peaks: &[BraggPeak], kx: f64, ky: f64) -> BraggPeak {
    let target = BraggPeak::new(kx, ky, 0.0);
    *peaks
        .iter()
        .min_by(|a, b| a.distance_to(&target).total_cmp(&b.distance_to(&target)))
        .expect("at least one peak")
}

/// Root-mean-square difference between two displacement functions over a
/// `size x size` grid.
pub fn displacement_rms<F, G>(size: usize, a: F, b: G) -> f64
where
    F: Fn(f64, f64) -> (f64, f64),
    G: Fn(f64, f64) -> (f64, f64),
{
    let mut sum = 0.0;
    for row in 0..size {
        for col in 0..size {
            let (x, y) = (col as f64, row as f64);
            let (ax, ay) = a(x, y);
            let (bx, by) = b(x, y);
            sum += (ax - bx).powi(2) + (ay - by).powi(2);
        }
    }
    (sum / (size * size) as f64).sqrt()
}
