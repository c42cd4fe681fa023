use std::path::Path;

use image::{GrayImage, ImageBuffer, ImageFormat, Luma};
use ndarray::{Array2, ArrayView2};

use crate::error::{DriftError, Result};
use crate::layer::{Layer, ScanMetadata};

/// Load a grayscale image file as a layer with values in `[0, 1]`.
pub fn load_layer(path: &Path, metadata: ScanMetadata) -> Result<Layer> {
    let img = image::open(path)?;
    let gray = img.to_luma16();
    let (w, h) = gray.dimensions();
    let mut data = Array2::<f64>::zeros((h as usize, w as usize));

    for row in 0..h as usize {
        for col in 0..w as usize {
            let pixel = gray.get_pixel(col as u32, row as u32);
            data[[row, col]] = pixel.0[0] as f64 / 65535.0;
        }
    }

    Ok(Layer::with_metadata(data, metadata))
}

/// Linear map from the finite data range onto `[0, 1]`. NaN pixels map to 0.
pub fn normalize_range(data: ArrayView2<'_, f64>) -> Array2<f64> {
    let (lo, hi) = data
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let span = hi - lo;
    data.mapv(|v| {
        if !v.is_finite() || !(span > 0.0) {
            0.0
        } else {
            (v - lo) / span
        }
    })
}

/// Save a layer as 16-bit grayscale TIFF, stretched to the full range.
pub fn save_tiff(data: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let norm = normalize_range(data);
    let pixels: Vec<u16> = norm.iter().map(|v| (v * 65535.0).round() as u16).collect();

    let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .ok_or_else(|| DriftError::InvalidLayer("pixel buffer does not match dimensions".into()))?;
    img.save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a layer as 8-bit grayscale PNG, stretched to the full range.
pub fn save_png(data: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    let norm = normalize_range(data);

    let mut img = GrayImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let val = (norm[[row, col]] * 255.0).round() as u8;
            img.put_pixel(col as u32, row as u32, Luma([val]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a layer, choosing the format from the file extension (TIFF default).
pub fn save_layer_image(data: ArrayView2<'_, f64>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(data, path),
        _ => save_tiff(data, path),
    }
}
