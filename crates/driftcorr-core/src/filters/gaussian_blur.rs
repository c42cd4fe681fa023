use ndarray::{Array2, ArrayView2};

use crate::consts::GAUSSIAN_RADIUS_SIGMAS;

use super::map_pixels;

/// Gaussian blur with zero padding outside the grid (separable 1D passes).
///
/// Pixels near the border see only part of the kernel, so their output is
/// attenuated by the covered kernel mass. Divide by [`support_map`] to get a
/// normalized convolution.
pub fn gaussian_blur_zero_padded(data: ArrayView2<'_, f64>, sigma: f64) -> Array2<f64> {
    let kernel = make_gaussian_kernel(sigma);
    let row_pass = convolve_rows(data, &kernel);
    convolve_cols(row_pass.view(), &kernel)
}

/// Fraction of the Gaussian window that falls inside the grid at each pixel.
///
/// 1.0 in the interior, dropping to roughly a third in the corners.
pub fn support_map(h: usize, w: usize, sigma: f64) -> Array2<f64> {
    let kernel = make_gaussian_kernel(sigma);
    let col_support = edge_support(w, &kernel);
    let row_support = edge_support(h, &kernel);
    map_pixels(h, w, |row, col| row_support[row] * col_support[col])
}

pub(crate) fn make_gaussian_kernel(sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (sigma * GAUSSIAN_RADIUS_SIGMAS).ceil() as usize;
    let size = 2 * radius + 1;
    let mut kernel = vec![0.0f64; size];
    let s2 = 2.0 * sigma * sigma;
    let mut sum = 0.0f64;

    for (i, k) in kernel.iter_mut().enumerate() {
        let x = i as f64 - radius as f64;
        *k = (-x * x / s2).exp();
        sum += *k;
    }

    for v in &mut kernel {
        *v /= sum;
    }

    kernel
}

fn edge_support(n: usize, kernel: &[f64]) -> Vec<f64> {
    let radius = kernel.len() / 2;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter(|(ki, _)| {
                    let src = i as isize + *ki as isize - radius as isize;
                    src >= 0 && src < n as isize
                })
                .map(|(_, &kv)| kv)
                .sum()
        })
        .collect()
}

fn convolve_rows(data: ArrayView2<'_, f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = data.dim();
    let radius = kernel.len() / 2;

    map_pixels(h, w, |row, col| {
        let mut sum = 0.0f64;
        for (ki, &kv) in kernel.iter().enumerate() {
            let src_col = col as isize + ki as isize - radius as isize;
            if src_col >= 0 && src_col < w as isize {
                sum += data[[row, src_col as usize]] * kv;
            }
        }
        sum
    })
}

fn convolve_cols(data: ArrayView2<'_, f64>, kernel: &[f64]) -> Array2<f64> {
    let (h, w) = data.dim();
    let radius = kernel.len() / 2;

    map_pixels(h, w, |row, col| {
        let mut sum = 0.0f64;
        for (ki, &kv) in kernel.iter().enumerate() {
            let src_row = row as isize + ki as isize - radius as isize;
            if src_row >= 0 && src_row < h as isize {
                sum += data[[src_row as usize, col]] * kv;
            }
        }
        sum
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_is_normalized() {
        let k = make_gaussian_kernel(2.5);
        assert!((k.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert_eq!(k.len() % 2, 1);
    }

    #[test]
    fn blur_of_ones_equals_support() {
        let ones = Array2::<f64>::ones((40, 50));
        let blurred = gaussian_blur_zero_padded(ones.view(), 3.0);
        let support = support_map(40, 50, 3.0);
        for (a, b) in blurred.iter().zip(support.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        // Centre pixel lies farther than the kernel radius from every edge.
        let reach = (3.0 * GAUSSIAN_RADIUS_SIGMAS).ceil() as usize;
        assert!(reach <= 19);
        assert!((support[[20, 25]] - 1.0).abs() < 1e-9);
        assert!(support[[0, 0]] < 0.4);
    }
}
