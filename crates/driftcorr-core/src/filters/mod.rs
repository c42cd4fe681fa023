pub mod crop;
pub mod gaussian_blur;

use ndarray::{Array2, Axis};
use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;

/// Build a `(h, w)` array from a per-pixel function, splitting rows across
/// threads once the grid is large enough.
pub(crate) fn map_pixels<T, F>(h: usize, w: usize, f: F) -> Array2<T>
where
    T: Clone + Default + Send + Sync,
    F: Fn(usize, usize) -> T + Sync,
{
    let mut result = Array2::<T>::default((h, w));

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        result
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut out)| {
                for col in 0..w {
                    out[col] = f(row, col);
                }
            });
    } else {
        for row in 0..h {
            for col in 0..w {
                result[[row, col]] = f(row, col);
            }
        }
    }

    result
}
