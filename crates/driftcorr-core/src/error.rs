use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriftError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Invalid layer data: {0}")]
    InvalidLayer(String),

    #[error("Invalid layer dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Insufficient Bragg peaks: found {found}, need {required}")]
    InsufficientPeaks { found: usize, required: usize },

    #[error("Underdetermined distortion model (wavevector condition number {condition:.3e})")]
    UnderdeterminedModel { condition: f64 },

    #[error("Fit did not converge after {iterations} iterations (rms phase residual {rms_residual:.4} rad)")]
    NonConvergence { iterations: usize, rms_residual: f64 },

    #[error("Displacement field maps {:.1}% of the output outside the input grid", fraction * 100.0)]
    DisplacementOutOfBounds { fraction: f64 },

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DriftError>;
