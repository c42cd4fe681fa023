use ndarray::{Array2, ArrayView2};

use crate::consts::{
    SUBPIXEL_POLISH_ITERATIONS, SUBPIXEL_POLISH_RADIUS, SUBPIXEL_POLISH_ROUNDS,
};
use crate::fft::dtft_magnitude;

/// Refine peak location using paraboloid fitting on the 3x3 neighborhood.
///
/// Returns (delta_row, delta_col) as fractional pixel offsets from the integer peak.
pub fn refine_peak_paraboloid(surface: ArrayView2<'_, f64>, peak_row: usize, peak_col: usize) -> (f64, f64) {
    refine_with(surface, peak_row, peak_col, |v| v)
}

/// Paraboloid fit on the log surface (a Gaussian fit), which matches the
/// main lobe of a Hann-windowed spectral peak much better than a plain
/// paraboloid. Falls back to the plain paraboloid when a neighbour is not
/// positive.
pub fn refine_peak_gaussian(surface: ArrayView2<'_, f64>, peak_row: usize, peak_col: usize) -> (f64, f64) {
    let (h, w) = surface.dim();
    let positive = [(0, 0), (-1, 0), (1, 0), (0, -1), (0, 1)].iter().all(|&(dr, dc)| {
        let r = peak_row as isize + dr;
        let c = peak_col as isize + dc;
        r < 0 || c < 0 || r >= h as isize || c >= w as isize || surface[[r as usize, c as usize]] > 0.0
    });
    if !positive {
        return refine_peak_paraboloid(surface, peak_row, peak_col);
    }
    refine_with(surface, peak_row, peak_col, f64::ln)
}

fn refine_with(
    surface: ArrayView2<'_, f64>,
    peak_row: usize,
    peak_col: usize,
    transform: impl Fn(f64) -> f64,
) -> (f64, f64) {
    let (h, w) = surface.dim();

    // no 3x3 neighbourhood at the border
    if peak_row == 0 || peak_row + 1 >= h || peak_col == 0 || peak_col + 1 >= w {
        return (0.0, 0.0);
    }

    let y_prev = transform(surface[[peak_row - 1, peak_col]]);
    let y_curr = transform(surface[[peak_row, peak_col]]);
    let y_next = transform(surface[[peak_row + 1, peak_col]]);
    let delta_row = parabola_vertex(y_prev, y_curr, y_next);

    let x_prev = transform(surface[[peak_row, peak_col - 1]]);
    let x_curr = transform(surface[[peak_row, peak_col]]);
    let x_next = transform(surface[[peak_row, peak_col + 1]]);
    let delta_col = parabola_vertex(x_prev, x_curr, x_next);

    // Clamp to within +/- 0.5 pixel
    (delta_row.clamp(-0.5, 0.5), delta_col.clamp(-0.5, 0.5))
}

fn parabola_vertex(prev: f64, curr: f64, next: f64) -> f64 {
    let denom = prev - 2.0 * curr + next;
    if denom.abs() > 1e-12 {
        (prev - next) / (2.0 * denom)
    } else {
        0.0
    }
}

/// Polish a peak position by maximizing the windowed DTFT magnitude.
///
/// Alternates golden-section searches along kx and ky inside a bracket of
/// `SUBPIXEL_POLISH_RADIUS` bins around the starting point. Returns the
/// polished `(kx, ky, magnitude)`.
pub fn polish_peak_dtft(windowed: &Array2<f64>, kx: f64, ky: f64) -> (f64, f64, f64) {
    let (mut best_x, mut best_y) = (kx, ky);
    let r = SUBPIXEL_POLISH_RADIUS;

    for _ in 0..SUBPIXEL_POLISH_ROUNDS {
        best_x = golden_section_max(kx - r, kx + r, |x| dtft_magnitude(windowed, x, best_y));
        best_y = golden_section_max(ky - r, ky + r, |y| dtft_magnitude(windowed, best_x, y));
    }

    (best_x, best_y, dtft_magnitude(windowed, best_x, best_y))
}

/// Maximize a unimodal function on `[lo, hi]`.
fn golden_section_max(mut lo: f64, mut hi: f64, f: impl Fn(f64) -> f64) -> f64 {
    let inv_phi = (5.0f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - inv_phi * (hi - lo);
    let mut d = lo + inv_phi * (hi - lo);
    let mut fc = f(c);
    let mut fd = f(d);

    for _ in 0..SUBPIXEL_POLISH_ITERATIONS {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - inv_phi * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + inv_phi * (hi - lo);
            fd = f(d);
        }
    }

    0.5 * (lo + hi)
}
