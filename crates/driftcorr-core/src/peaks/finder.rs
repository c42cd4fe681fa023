use ndarray::{Array2, ArrayView2};
use tracing::{debug, info};

use crate::error::{DriftError, Result};
use crate::fft::{apply_hann, fft2d, fftshift, zero_bin};
use crate::layer::mean_std;

use super::subpixel::{polish_peak_dtft, refine_peak_gaussian};
use super::{sort_peaks, BraggPeak, PeakSearchOptions};

/// Smallest grid the peak finder accepts on either axis.
const MIN_GRID_SIZE: usize = 8;

/// Locate the dominant Bragg peaks of a real-space image.
///
/// The image is mean-subtracted and Hann-windowed before its magnitude
/// spectrum is searched, and peaks are optionally polished on the windowed
/// DTFT. The result holds symmetric `±k` pairs sorted by descending
/// magnitude, ties broken by ascending angle.
pub fn find_bragg_peaks(
    image: ArrayView2<'_, f64>,
    options: &PeakSearchOptions,
) -> Result<Vec<BraggPeak>> {
    validate(image.dim(), options)?;
    ensure_finite(image, "image")?;

    let windowed = apply_hann(image);
    let spectrum = fftshift(&fft2d(windowed.view()).mapv(|c| c.norm()));
    let mut candidates = locate_candidates(spectrum.view(), options);

    if options.subpixel {
        for peak in &mut candidates {
            let (kx, ky, magnitude) = polish_peak_dtft(&windowed, peak.kx, peak.ky);
            *peak = BraggPeak::new(kx, ky, magnitude);
        }
    }

    finish(candidates, options)
}

/// Locate Bragg peaks directly in a centered magnitude spectrum (zero
/// frequency at `(h / 2, w / 2)`), with quadratic sub-bin refinement only.
pub fn find_peaks_in_spectrum(
    spectrum: ArrayView2<'_, f64>,
    options: &PeakSearchOptions,
) -> Result<Vec<BraggPeak>> {
    validate(spectrum.dim(), options)?;
    ensure_finite(spectrum, "spectrum")?;
    let candidates = locate_candidates(spectrum, options);
    finish(candidates, options)
}

fn validate(shape: (usize, usize), options: &PeakSearchOptions) -> Result<()> {
    let (h, w) = shape;
    if h < MIN_GRID_SIZE || w < MIN_GRID_SIZE {
        return Err(DriftError::InvalidDimensions {
            width: w,
            height: h,
        });
    }
    if !(options.min_separation > 0.0) {
        return Err(DriftError::InvalidParameter(format!(
            "min_separation must be positive, got {}",
            options.min_separation
        )));
    }
    if options.max_pairs == 0 {
        return Err(DriftError::InvalidParameter("max_pairs must be at least 1".into()));
    }
    Ok(())
}

/// One NaN or infinity spreads through the whole spectrum, so reject it
/// up front.
fn ensure_finite(data: ArrayView2<'_, f64>, what: &str) -> Result<()> {
    match data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), v)) => Err(DriftError::InvalidLayer(format!(
            "{what} has non-finite value {v} at row {row}, column {col}"
        ))),
        None => Ok(()),
    }
}

fn finish(candidates: Vec<BraggPeak>, options: &PeakSearchOptions) -> Result<Vec<BraggPeak>> {
    let peaks = symmetrize(&candidates, options.min_separation, options.max_pairs);

    info!(
        candidates = candidates.len(),
        peaks = peaks.len(),
        "Bragg peak search complete"
    );

    if peaks.len() < options.required_peaks {
        return Err(DriftError::InsufficientPeaks {
            found: peaks.len(),
            required: options.required_peaks,
        });
    }
    Ok(peaks)
}

/// Integer local maxima above the noise floor inside the search annulus,
/// non-maximum suppressed and refined to sub-bin precision.
fn locate_candidates(spectrum: ArrayView2<'_, f64>, options: &PeakSearchOptions) -> Vec<BraggPeak> {
    let (h, w) = spectrum.dim();
    let (cy, cx) = (zero_bin(h), zero_bin(w));
    let nyquist = (h.min(w) / 2) as f64 - 1.0;
    let max_radius = options.max_radius.unwrap_or(nyquist).min(nyquist);

    let in_search_region = |row: usize, col: usize| -> bool {
        let kx = col as f64 - cx as f64;
        let ky = row as f64 - cy as f64;
        let r = kx.hypot(ky);
        if r < options.min_radius || r > max_radius {
            return false;
        }
        options.axis_mask_width <= 0.0
            || (kx.abs() > options.axis_mask_width && ky.abs() > options.axis_mask_width)
    };

    let masked = Array2::from_shape_fn((h, w), |(row, col)| {
        if in_search_region(row, col) {
            spectrum[[row, col]]
        } else {
            0.0
        }
    });

    let (mean, std) = mean_std(
        masked
            .indexed_iter()
            .filter(|((row, col), _)| in_search_region(*row, *col))
            .map(|(_, &v)| v),
    );
    let strongest = masked.iter().cloned().fold(0.0f64, f64::max);
    let floor = (mean + options.noise_sigmas * std).max(options.relative_threshold * strongest);
    debug!(mean, std, strongest, floor, "Spectrum noise floor");

    let window = options.min_separation.ceil() as isize;
    let mut maxima: Vec<(usize, usize, f64)> = Vec::new();
    for row in 0..h {
        for col in 0..w {
            let v = masked[[row, col]];
            if !(v > 0.0 && v >= floor) {
                continue;
            }
            if is_local_max(&masked, row, col, window) {
                maxima.push((row, col, v));
            }
        }
    }

    // Non-maximum suppression by proximity
    maxima.sort_by(|a, b| b.2.total_cmp(&a.2));
    let mut accepted: Vec<(usize, usize, f64)> = Vec::new();
    for &(row, col, v) in &maxima {
        let far_enough = accepted.iter().all(|&(ar, ac, _)| {
            let dr = row as f64 - ar as f64;
            let dc = col as f64 - ac as f64;
            dr.hypot(dc) >= options.min_separation
        });
        if far_enough {
            accepted.push((row, col, v));
        }
        if accepted.len() >= 4 * options.max_pairs {
            break;
        }
    }

    accepted
        .into_iter()
        .map(|(row, col, v)| {
            let (dr, dc) = refine_peak_gaussian(spectrum, row, col);
            BraggPeak::new(
                col as f64 + dc - cx as f64,
                row as f64 + dr - cy as f64,
                v,
            )
        })
        .collect()
}

/// A pixel is a local maximum if no neighbour in the window is larger and
/// no earlier neighbour (raster order) is equal, so plateaus yield one peak.
fn is_local_max(data: &Array2<f64>, row: usize, col: usize, window: isize) -> bool {
    let (h, w) = data.dim();
    let v = data[[row, col]];
    for dr in -window..=window {
        for dc in -window..=window {
            if dr == 0 && dc == 0 {
                continue;
            }
            let r = row as isize + dr;
            let c = col as isize + dc;
            if r < 0 || c < 0 || r >= h as isize || c >= w as isize {
                continue;
            }
            let n = data[[r as usize, c as usize]];
            let earlier = dr < 0 || (dr == 0 && dc < 0);
            if n > v || (earlier && n == v) {
                return false;
            }
        }
    }
    true
}

/// Pair every peak with its partner near `-k`, average the pair so it is
/// exactly centrosymmetric, and synthesize the mirror when the partner was
/// not found. Returns at most `max_pairs` pairs in sorted order.
fn symmetrize(candidates: &[BraggPeak], tolerance: f64, max_pairs: usize) -> Vec<BraggPeak> {
    let mut ordered = candidates.to_vec();
    ordered.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));

    let mut used = vec![false; ordered.len()];
    let mut pairs: Vec<BraggPeak> = Vec::new();

    for i in 0..ordered.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let p = ordered[i];
        let mirror = p.mirrored();

        let partner = (0..ordered.len())
            .filter(|&j| !used[j])
            .map(|j| (j, ordered[j].distance_to(&mirror)))
            .filter(|&(_, d)| d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let representative = match partner {
            Some((j, _)) => {
                used[j] = true;
                let q = ordered[j];
                BraggPeak::new(
                    0.5 * (p.kx - q.kx),
                    0.5 * (p.ky - q.ky),
                    0.5 * (p.magnitude + q.magnitude),
                )
            }
            None => p,
        };
        pairs.push(representative);
    }

    pairs.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
    pairs.truncate(max_pairs);

    let mut peaks: Vec<BraggPeak> = pairs
        .iter()
        .flat_map(|p| [*p, p.mirrored()])
        .collect();
    sort_peaks(&mut peaks);
    peaks
}
