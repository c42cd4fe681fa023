use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{INVERSE_MAP_ITERATIONS, INVERSE_MAP_TOLERANCE};
use crate::error::{DriftError, Result};
use crate::warp::SourceMap;

/// Highest supported polynomial order of the displacement model.
pub const MAX_MODEL_ORDER: usize = 5;

/// Displacement `u(x, y) = (ux, uy)` as a 2-D polynomial of total degree
/// `order` in normalized coordinates.
///
/// Coordinates are centered on the grid and scaled by half its longest side,
/// so they lie in roughly `[-1, 1]`. Terms are ordered by degree, then by
/// descending power of x: `1, x, y, x², xy, y², ...`. The parameter vector
/// holds all `ux` coefficients followed by all `uy` coefficients, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolynomialModel {
    pub order: usize,
    /// Grid `(height, width)` the model is defined on.
    pub shape: (usize, usize),
}

impl PolynomialModel {
    pub fn new(order: usize, shape: (usize, usize)) -> Result<Self> {
        if order > MAX_MODEL_ORDER {
            return Err(DriftError::InvalidParameter(format!(
                "model order {order} exceeds maximum {MAX_MODEL_ORDER}"
            )));
        }
        let (h, w) = shape;
        if h == 0 || w == 0 {
            return Err(DriftError::InvalidDimensions {
                width: w,
                height: h,
            });
        }
        Ok(Self { order, shape })
    }

    /// Number of monomials per displacement component.
    pub fn terms(&self) -> usize {
        (self.order + 1) * (self.order + 2) / 2
    }

    pub fn parameter_count(&self) -> usize {
        2 * self.terms()
    }

    /// Scale (px) of one normalized coordinate unit.
    pub fn scale(&self) -> f64 {
        let (h, w) = self.shape;
        h.max(w) as f64 / 2.0
    }

    pub fn normalize(&self, x: f64, y: f64) -> (f64, f64) {
        let (h, w) = self.shape;
        let s = self.scale();
        ((x - (w as f64 - 1.0) / 2.0) / s, (y - (h as f64 - 1.0) / 2.0) / s)
    }

    /// Evaluate all monomials at pixel `(x, y)` into `out` (length `terms()`).
    pub fn monomials(&self, x: f64, y: f64, out: &mut [f64]) {
        let (xn, yn) = self.normalize(x, y);
        let mut k = 0;
        for degree in 0..=self.order {
            for px in (0..=degree).rev() {
                out[k] = xn.powi(px as i32) * yn.powi((degree - px) as i32);
                k += 1;
            }
        }
    }

    /// Evaluate `(ux, uy)` for a parameter vector.
    pub fn evaluate(&self, params: &[f64], x: f64, y: f64) -> (f64, f64) {
        let (xn, yn) = self.normalize(x, y);
        let terms = self.terms();
        let mut ux = 0.0;
        let mut uy = 0.0;
        let mut k = 0;
        for degree in 0..=self.order {
            for px in (0..=degree).rev() {
                let m = xn.powi(px as i32) * yn.powi((degree - px) as i32);
                ux += params[k] * m;
                uy += params[terms + k] * m;
                k += 1;
            }
        }
        (ux, uy)
    }

    /// Parameters of an affine displacement `u = u0 + J · (x, y)`, where
    /// `gradient = [[dux/dx, dux/dy], [duy/dx, duy/dy]]` is in px/px and
    /// `u0` is the displacement at pixel (0, 0).
    pub fn affine_parameters(&self, u0: (f64, f64), gradient: [[f64; 2]; 2]) -> Vec<f64> {
        let mut params = vec![0.0; self.parameter_count()];
        if self.order == 0 {
            params[0] = u0.0;
            params[1] = u0.1;
            return params;
        }
        let (h, w) = self.shape;
        let s = self.scale();
        let (cx, cy) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
        let terms = self.terms();
        for (component, offset) in [(0usize, 0usize), (1, terms)] {
            let g = gradient[component];
            let u0c = if component == 0 { u0.0 } else { u0.1 };
            // value at the grid center, then slopes per normalized unit
            params[offset] = u0c + g[0] * cx + g[1] * cy;
            params[offset + 1] = g[0] * s;
            params[offset + 2] = g[1] * s;
        }
        params
    }
}

/// Convergence report of a distortion fit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub converged: bool,
    pub iterations: usize,
    /// Weighted objective at the initial guess.
    pub initial_cost: f64,
    /// Weighted objective at the returned parameters.
    pub final_cost: f64,
    /// Weighted root-mean-square wrapped phase residual (rad).
    pub rms_residual: f64,
    /// Number of (position, wavevector) residuals used.
    pub samples: usize,
    /// Condition number of the normalized reference wavevector matrix.
    pub condition_number: f64,
}

/// Fitted drift: the displacement from the ideal lattice to the recorded
/// data, `recorded(s) = ideal(s + u(s))`, as polynomial coefficients.
///
/// Immutable once returned by the fitter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DistortionField {
    pub model: PolynomialModel,
    pub coefficients: Vec<f64>,
    pub diagnostics: FitDiagnostics,
}

impl DistortionField {
    /// The zero field: no displacement anywhere.
    pub fn identity(model: PolynomialModel) -> Self {
        Self {
            model,
            coefficients: vec![0.0; model.parameter_count()],
            diagnostics: FitDiagnostics {
                converged: true,
                condition_number: 1.0,
                ..Default::default()
            },
        }
    }

    /// Build a field from explicit coefficients (e.g. a known calibration).
    pub fn from_coefficients(model: PolynomialModel, coefficients: Vec<f64>) -> Result<Self> {
        if coefficients.len() != model.parameter_count() {
            return Err(DriftError::InvalidParameter(format!(
                "expected {} coefficients for order {}, got {}",
                model.parameter_count(),
                model.order,
                coefficients.len()
            )));
        }
        Ok(Self {
            coefficients,
            ..Self::identity(model)
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.model.shape
    }

    pub fn is_identity(&self) -> bool {
        self.coefficients.iter().all(|&c| c == 0.0)
    }

    /// Forward displacement `u(s)` at a recorded-grid position.
    pub fn displacement_at(&self, x: f64, y: f64) -> (f64, f64) {
        self.model.evaluate(&self.coefficients, x, y)
    }

    /// Recorded-grid coordinate whose content belongs at output pixel
    /// `(x, y)`: solves `s + u(s) = (x, y)` by fixed-point iteration.
    pub fn source_coordinate(&self, x: f64, y: f64) -> (f64, f64) {
        if self.is_identity() {
            return (x, y);
        }
        let (ux, uy) = self.displacement_at(x, y);
        let (mut sx, mut sy) = (x - ux, y - uy);
        for _ in 0..INVERSE_MAP_ITERATIONS {
            let (ux, uy) = self.displacement_at(sx, sy);
            let (nx, ny) = (x - ux, y - uy);
            let step = (nx - sx).hypot(ny - sy);
            sx = nx;
            sy = ny;
            if step < INVERSE_MAP_TOLERANCE {
                break;
            }
        }
        (sx, sy)
    }

    /// Per-output-pixel displacement `(x, y) - source(x, y)`.
    pub fn displacement_field(&self) -> DisplacementField {
        SourceMap::from_field(self).displacement()
    }

    /// Turn an unconverged fit into a `NonConvergence` error.
    pub fn require_converged(self) -> Result<Self> {
        if self.diagnostics.converged {
            Ok(self)
        } else {
            Err(DriftError::NonConvergence {
                iterations: self.diagnostics.iterations,
                rms_residual: self.diagnostics.rms_residual,
            })
        }
    }
}

/// Correction applied at every output pixel: the output pixel `(x, y)`
/// pulls from the input at `(x - dx, y - dy)`.
#[derive(Clone, Debug)]
pub struct DisplacementField {
    pub dx: Array2<f64>,
    pub dy: Array2<f64>,
}

impl DisplacementField {
    pub fn shape(&self) -> (usize, usize) {
        self.dx.dim()
    }

    /// Root-mean-square displacement magnitude (px).
    pub fn rms(&self) -> f64 {
        let n = self.dx.len().max(1) as f64;
        let sum: f64 = self
            .dx
            .iter()
            .zip(self.dy.iter())
            .map(|(x, y)| x * x + y * y)
            .sum();
        (sum / n).sqrt()
    }

    /// Largest displacement magnitude (px).
    pub fn max_magnitude(&self) -> f64 {
        self.dx
            .iter()
            .zip(self.dy.iter())
            .map(|(x, y)| x.hypot(*y))
            .fold(0.0, f64::max)
    }
}
