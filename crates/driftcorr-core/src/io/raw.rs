use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use ndarray::{Array2, Array3, ArrayView3, Axis};

use crate::error::{DriftError, Result};

const BYTES_PER_SAMPLE: usize = 4;

/// Memory-mapped reader for headerless `f32` cubes laid out as
/// `(layers, height, width)` in row-major order.
pub struct RawF32Reader {
    mmap: Mmap,
    pub width: usize,
    pub height: usize,
    pub layers: usize,
    pub big_endian: bool,
}

impl RawF32Reader {
    pub fn open(
        path: &Path,
        width: usize,
        height: usize,
        layers: usize,
        big_endian: bool,
    ) -> Result<Self> {
        if width == 0 || height == 0 || layers == 0 {
            return Err(DriftError::InvalidDimensions { width, height });
        }
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(layers))
            .and_then(|n| n.checked_mul(BYTES_PER_SAMPLE))
            .ok_or(DriftError::InvalidDimensions { width, height })?;
        if mmap.len() != expected {
            return Err(DriftError::InvalidLayer(format!(
                "raw cube size mismatch: expected {expected} bytes for {layers}x{height}x{width}, got {}",
                mmap.len()
            )));
        }

        Ok(Self {
            mmap,
            width,
            height,
            layers,
            big_endian,
        })
    }

    fn layer_bytes(&self) -> usize {
        self.width * self.height * BYTES_PER_SAMPLE
    }

    /// Decode one layer.
    pub fn read_layer(&self, index: usize) -> Result<Array2<f64>> {
        if index >= self.layers {
            return Err(DriftError::InvalidLayer(format!(
                "layer index {index} out of range ({} layers)",
                self.layers
            )));
        }
        let offset = index * self.layer_bytes();
        let raw = &self.mmap[offset..offset + self.layer_bytes()];

        let mut data = Array2::<f64>::zeros((self.height, self.width));
        for (dst, chunk) in data.iter_mut().zip(raw.chunks_exact(BYTES_PER_SAMPLE)) {
            let v = if self.big_endian {
                BigEndian::read_f32(chunk)
            } else {
                LittleEndian::read_f32(chunk)
            };
            *dst = v as f64;
        }
        Ok(data)
    }

    /// Decode every layer into a `(layers, height, width)` cube.
    pub fn read_stack(&self) -> Result<Array3<f64>> {
        let mut cube = Array3::<f64>::zeros((self.layers, self.height, self.width));
        for (i, mut dst) in cube.axis_iter_mut(Axis(0)).enumerate() {
            dst.assign(&self.read_layer(i)?);
        }
        Ok(cube)
    }
}

/// Write a cube as headerless `f32` samples.
pub fn write_raw_f32(data: ArrayView3<'_, f64>, path: &Path, big_endian: bool) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for &v in data.iter() {
        if big_endian {
            writer.write_f32::<BigEndian>(v as f32)?;
        } else {
            writer.write_f32::<LittleEndian>(v as f32)?;
        }
    }
    writer.flush()?;
    Ok(())
}
