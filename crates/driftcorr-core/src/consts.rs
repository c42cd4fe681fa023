/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum layer count to use layer-level Rayon parallelism.
pub const PARALLEL_LAYER_THRESHOLD: usize = 2;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;

/// Default inner radius (bins) of the Bragg peak search annulus.
pub const DEFAULT_PEAK_MIN_RADIUS: f64 = 3.0;

/// Default minimum separation (bins) between two distinct Bragg peaks.
pub const DEFAULT_PEAK_MIN_SEPARATION: f64 = 3.0;

/// Default noise floor multiplier: mean + k * std of the annulus magnitude.
pub const DEFAULT_NOISE_SIGMAS: f64 = 4.0;

/// Default threshold relative to the strongest in-annulus magnitude.
pub const DEFAULT_RELATIVE_THRESHOLD: f64 = 0.1;

/// Default number of peaks (two symmetric pairs) a square lattice must yield.
pub const DEFAULT_REQUIRED_PEAKS: usize = 4;

/// Default cap on the number of symmetric pairs returned.
pub const DEFAULT_MAX_PEAK_PAIRS: usize = 6;

/// Half-width (bins) of the golden-section bracket for DTFT peak polishing.
pub const SUBPIXEL_POLISH_RADIUS: f64 = 0.75;

/// Golden-section iterations per axis and round of DTFT peak polishing.
pub const SUBPIXEL_POLISH_ITERATIONS: usize = 32;

/// Alternating x/y rounds of DTFT peak polishing.
pub const SUBPIXEL_POLISH_ROUNDS: usize = 3;

/// Smallest angle (degrees) two reference wavevectors may enclose.
pub const MIN_BASIS_ANGLE_DEG: f64 = 15.0;

/// Gaussian kernel half-width in units of sigma.
pub const GAUSSIAN_RADIUS_SIGMAS: f64 = 4.0;

/// Default polynomial order of the displacement model.
pub const DEFAULT_MODEL_ORDER: usize = 1;

/// Default relative objective decrease that counts as converged.
pub const DEFAULT_FIT_TOLERANCE: f64 = 1e-10;

/// Default Levenberg-Marquardt iteration cap.
pub const DEFAULT_FIT_MAX_ITERATIONS: usize = 50;

/// Default pixel stride between phase samples fed to the fitter.
pub const DEFAULT_FIT_SAMPLE_STRIDE: usize = 2;

/// Default limit on the condition number of the reference wavevector matrix.
pub const DEFAULT_MAX_CONDITION: f64 = 1e3;

/// Initial Levenberg-Marquardt damping.
pub const LM_INITIAL_LAMBDA: f64 = 1e-3;

/// Damping above which the fitter gives up on finding a downhill step.
pub const LM_MAX_LAMBDA: f64 = 1e12;

/// Fixed-point iterations used to invert the forward displacement model.
pub const INVERSE_MAP_ITERATIONS: usize = 20;

/// Convergence tolerance (px) of the forward-model inversion.
pub const INVERSE_MAP_TOLERANCE: f64 = 1e-9;

/// Default fraction of out-of-bounds output pixels tolerated by the resampler.
pub const DEFAULT_MAX_OUT_OF_BOUNDS_FRACTION: f64 = 0.5;
