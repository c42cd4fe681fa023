use ndarray::{Array2, ArrayView2};
use num_complex::Complex;
use rustfft::FftPlanner;

/// Index of the zero-frequency bin after an fftshift of length `n`.
pub fn zero_bin(n: usize) -> usize {
    n / 2
}

/// Separable Hann window value at `(row, col)` of a `(h, w)` grid.
pub fn hann_weight(row: usize, col: usize, h: usize, w: usize) -> f64 {
    let wy = 0.5 * (1.0 - (std::f64::consts::TAU * row as f64 / h as f64).cos());
    let wx = 0.5 * (1.0 - (std::f64::consts::TAU * col as f64 / w as f64).cos());
    wy * wx
}

/// Remove the mean and apply a Hann window to reduce spectral leakage.
pub fn apply_hann(data: ArrayView2<'_, f64>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mean = data.mean().unwrap_or(0.0);
    let mut result = Array2::<f64>::zeros((h, w));

    for row in 0..h {
        for col in 0..w {
            result[[row, col]] = (data[[row, col]] - mean) * hann_weight(row, col, h, w);
        }
    }

    result
}

/// 2D FFT: row-wise FFT, then column-wise FFT.
pub fn fft2d(data: ArrayView2<'_, f64>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v, 0.0));

    // Row-wise FFT
    for row in 0..h {
        let mut row_data: Vec<Complex<f64>> = (0..w).map(|c| result[[row, c]]).collect();
        fft_row.process(&mut row_data);
        for col in 0..w {
            result[[row, col]] = row_data[col];
        }
    }

    // Column-wise FFT
    for col in 0..w {
        let mut col_data: Vec<Complex<f64>> = (0..h).map(|r| result[[r, col]]).collect();
        fft_col.process(&mut col_data);
        for row in 0..h {
            result[[row, col]] = col_data[row];
        }
    }

    result
}

/// Move the zero-frequency bin to `(h / 2, w / 2)`.
pub fn fftshift<T: Clone + Default>(data: &Array2<T>) -> Array2<T> {
    let (h, w) = data.dim();
    let mut result = Array2::<T>::default((h, w));
    let (sy, sx) = (zero_bin(h), zero_bin(w));

    for row in 0..h {
        for col in 0..w {
            result[[(row + sy) % h, (col + sx) % w]] = data[[row, col]].clone();
        }
    }

    result
}

/// Centered magnitude spectrum of a real image (mean removed, Hann windowed).
///
/// Bin `(h / 2, w / 2)` is the zero frequency; a bin at `(row, col)` holds
/// the frequency `(col - w / 2, row - h / 2)` in cycles per image.
pub fn magnitude_spectrum(image: ArrayView2<'_, f64>) -> Array2<f64> {
    let windowed = apply_hann(image);
    let spectrum = fft2d(windowed.view());
    fftshift(&spectrum.mapv(|c| c.norm()))
}

/// Magnitude of the windowed discrete-time Fourier transform at a fractional
/// frequency `(kx, ky)` in cycles per image.
///
/// `windowed` must already be mean-subtracted and windowed (see [`apply_hann`]).
pub fn dtft_magnitude(windowed: &Array2<f64>, kx: f64, ky: f64) -> f64 {
    let (h, w) = windowed.dim();
    let ex: Vec<Complex<f64>> = (0..w)
        .map(|x| Complex::from_polar(1.0, -std::f64::consts::TAU * kx * x as f64 / w as f64))
        .collect();

    let mut total = Complex::new(0.0, 0.0);
    for row in 0..h {
        let mut row_sum = Complex::new(0.0, 0.0);
        for col in 0..w {
            row_sum += ex[col] * windowed[[row, col]];
        }
        let ey = Complex::from_polar(1.0, -std::f64::consts::TAU * ky * row as f64 / h as f64);
        total += row_sum * ey;
    }

    total.norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectrum_peak_at_lattice_frequency() {
        let (h, w) = (64, 64);
        let img = Array2::from_shape_fn((h, w), |(_, c)| {
            (std::f64::consts::TAU * 8.0 * c as f64 / w as f64).cos()
        });
        let mag = magnitude_spectrum(img.view());
        let cy = zero_bin(h);
        let cx = zero_bin(w);
        assert!(mag[[cy, cx + 8]] > 10.0 * mag[[cy, cx + 4]]);
        assert!((mag[[cy, cx + 8]] - mag[[cy, cx - 8]]).abs() < 1e-6 * mag[[cy, cx + 8]]);
    }

    #[test]
    fn dtft_matches_fft_on_integer_bins() {
        let img = Array2::from_shape_fn((16, 16), |(r, c)| ((r * 3 + c * 5) % 7) as f64);
        let windowed = apply_hann(img.view());
        let spectrum = fft2d(windowed.view());
        let direct = dtft_magnitude(&windowed, 3.0, 2.0);
        assert!((direct - spectrum[[2, 3]].norm()).abs() < 1e-9);
    }
}
