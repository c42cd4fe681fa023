use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use num_complex::Complex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::consts::{
    DEFAULT_FIT_MAX_ITERATIONS, DEFAULT_FIT_SAMPLE_STRIDE, DEFAULT_FIT_TOLERANCE,
    DEFAULT_MAX_CONDITION, DEFAULT_MODEL_ORDER, EPSILON, LM_INITIAL_LAMBDA, LM_MAX_LAMBDA,
};
use crate::error::{DriftError, Result};
use crate::model::{DistortionField, FitDiagnostics, PolynomialModel};
use crate::peaks::Wavevector;
use crate::phase::{wrap_phase, PhaseMap};

/// Residuals handled per rayon task.
const SAMPLE_CHUNK: usize = 1024;

/// Starting point of the optimization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitialGuess {
    /// No drift.
    #[default]
    Zero,
    /// Affine drift estimated from wrapped phase gradients.
    PhaseGradient,
    /// Explicit model coefficients (see [`PolynomialModel`] for the layout).
    Coefficients(Vec<f64>),
}

impl std::fmt::Display for InitialGuess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Zero => write!(f, "Zero"),
            Self::PhaseGradient => write!(f, "Phase Gradient"),
            Self::Coefficients(c) => write!(f, "Coefficients ({})", c.len()),
        }
    }
}

/// Distortion fitter options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Polynomial order of the displacement model.
    pub order: usize,
    pub initial_guess: InitialGuess,
    /// Stop once an accepted step lowers the objective by less than this
    /// fraction.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Use every n-th pixel along both axes as a fit sample.
    pub sample_stride: usize,
    /// Reject reference wavevector sets with a larger condition number.
    pub max_condition: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            order: DEFAULT_MODEL_ORDER,
            initial_guess: InitialGuess::Zero,
            tolerance: DEFAULT_FIT_TOLERANCE,
            max_iterations: DEFAULT_FIT_MAX_ITERATIONS,
            sample_stride: DEFAULT_FIT_SAMPLE_STRIDE,
            max_condition: DEFAULT_MAX_CONDITION,
        }
    }
}

/// Condition number of the normalized wavevector matrix. Fails with
/// `UnderdeterminedModel` when the wavevectors cannot constrain both
/// displacement components.
pub fn check_wavevectors(wavevectors: &[Wavevector], max_condition: f64) -> Result<f64> {
    if wavevectors.len() < 2 {
        return Err(DriftError::UnderdeterminedModel {
            condition: f64::INFINITY,
        });
    }

    let mut m = Matrix2::<f64>::zeros();
    for q in wavevectors {
        let n = q.norm();
        if n <= EPSILON || !n.is_finite() {
            return Err(DriftError::UnderdeterminedModel {
                condition: f64::INFINITY,
            });
        }
        let u = Vector2::new(q.qx / n, q.qy / n);
        m += u * u.transpose();
    }

    let eigen = m.symmetric_eigen().eigenvalues;
    let (lo, hi) = (eigen.min(), eigen.max());
    let condition = if lo <= EPSILON { f64::INFINITY } else { (hi / lo).sqrt() };

    if condition > max_condition {
        return Err(DriftError::UnderdeterminedModel { condition });
    }
    Ok(condition)
}

/// Flattened fit samples: monomials per position, phase and weight per
/// (position, wavevector).
struct SampleSet {
    terms: usize,
    wavevectors: Vec<Wavevector>,
    monomials: Vec<f64>,
    phases: Vec<f64>,
    weights: Vec<f64>,
}

impl SampleSet {
    fn build(model: &PolynomialModel, maps: &[PhaseMap], stride: usize) -> Self {
        let (h, w) = model.shape;
        let terms = model.terms();
        let confidences: Vec<_> = maps.iter().map(PhaseMap::confidence).collect();

        let mut monomials = Vec::new();
        let mut phases = Vec::new();
        let mut weights = Vec::new();
        let mut m = vec![0.0; terms];

        for row in (0..h).step_by(stride) {
            for col in (0..w).step_by(stride) {
                if confidences.iter().all(|c| c[[row, col]] <= 0.0) {
                    continue;
                }
                model.monomials(col as f64, row as f64, &mut m);
                monomials.extend_from_slice(&m);
                for (map, conf) in maps.iter().zip(&confidences) {
                    phases.push(map.phase[[row, col]]);
                    weights.push(conf[[row, col]]);
                }
            }
        }

        Self {
            terms,
            wavevectors: maps.iter().map(|m| m.wavevector).collect(),
            monomials,
            phases,
            weights,
        }
    }

    fn positions(&self) -> usize {
        self.monomials.len() / self.terms.max(1)
    }

    fn residual_count(&self) -> usize {
        self.phases.len()
    }

    fn weight_sum_sq(&self) -> f64 {
        self.weights.iter().map(|c| c * c).sum()
    }

    /// Constant Gauss-Newton matrix J^T J (the model is linear in its
    /// parameters; only the residual wrapping is non-linear).
    fn normal_matrix(&self) -> DMatrix<f64> {
        let t = self.terms;
        let n = self.wavevectors.len();
        let mut jtj = DMatrix::<f64>::zeros(2 * t, 2 * t);

        for s in 0..self.positions() {
            let m = &self.monomials[s * t..(s + 1) * t];
            let (mut axx, mut axy, mut ayy) = (0.0, 0.0, 0.0);
            for (i, q) in self.wavevectors.iter().enumerate() {
                let c2 = self.weights[s * n + i].powi(2);
                axx += c2 * q.qx * q.qx;
                axy += c2 * q.qx * q.qy;
                ayy += c2 * q.qy * q.qy;
            }
            for k in 0..t {
                for l in 0..t {
                    let mm = m[k] * m[l];
                    jtj[(k, l)] += axx * mm;
                    jtj[(k, t + l)] += axy * mm;
                    jtj[(t + k, l)] += axy * mm;
                    jtj[(t + k, t + l)] += ayy * mm;
                }
            }
        }

        jtj
    }

    /// Weighted cost and gradient J^T r at `params`.
    fn evaluate(&self, params: &[f64]) -> (f64, Vec<f64>) {
        let t = self.terms;
        let n = self.wavevectors.len();
        let positions: Vec<usize> = (0..self.positions()).collect();

        positions
            .par_chunks(SAMPLE_CHUNK)
            .map(|chunk| {
                let mut cost = 0.0;
                let mut grad = vec![0.0; 2 * t];
                for &s in chunk {
                    let m = &self.monomials[s * t..(s + 1) * t];
                    let ux: f64 = m.iter().zip(&params[..t]).map(|(a, b)| a * b).sum();
                    let uy: f64 = m.iter().zip(&params[t..]).map(|(a, b)| a * b).sum();
                    for (i, q) in self.wavevectors.iter().enumerate() {
                        let c = self.weights[s * n + i];
                        if c <= 0.0 {
                            continue;
                        }
                        let r = c * wrap_phase(self.phases[s * n + i] - (q.qx * ux + q.qy * uy));
                        cost += r * r;
                        for k in 0..t {
                            grad[k] -= c * q.qx * m[k] * r;
                            grad[t + k] -= c * q.qy * m[k] * r;
                        }
                    }
                }
                (cost, grad)
            })
            .reduce(
                || (0.0, vec![0.0; 2 * t]),
                |(ca, mut ga), (cb, gb)| {
                    for (a, b) in ga.iter_mut().zip(gb) {
                        *a += b;
                    }
                    (ca + cb, ga)
                },
            )
    }
}

/// Fit the polynomial displacement model to one phase map per reference
/// wavevector by Levenberg-Marquardt on wrapped, confidence-weighted phase
/// residuals `c · wrap(θ_i - q_i · u)`.
///
/// All wavevectors are combined in one least-squares problem, so three
/// directions of a hexagonal lattice constrain the fit jointly. An
/// exhausted iteration cap is reported through
/// [`FitDiagnostics::converged`], not as an error.
pub fn fit_distortion(maps: &[PhaseMap], options: &FitOptions) -> Result<DistortionField> {
    let first = maps.first().ok_or(DriftError::UnderdeterminedModel {
        condition: f64::INFINITY,
    })?;
    let shape = first.shape();
    for map in maps {
        if map.shape() != shape {
            return Err(DriftError::ShapeMismatch {
                expected: shape,
                actual: map.shape(),
            });
        }
    }
    if options.sample_stride == 0 {
        return Err(DriftError::InvalidParameter("sample_stride must be at least 1".into()));
    }

    let wavevectors: Vec<Wavevector> = maps.iter().map(|m| m.wavevector).collect();
    let condition = check_wavevectors(&wavevectors, options.max_condition)?;
    let model = PolynomialModel::new(options.order, shape)?;
    let samples = SampleSet::build(&model, maps, options.sample_stride);
    let p = model.parameter_count();

    if samples.positions() < model.terms() {
        return Err(DriftError::UnderdeterminedModel {
            condition: f64::INFINITY,
        });
    }

    let jtj = samples.normal_matrix();
    if (0..p).any(|i| jtj[(i, i)] <= EPSILON) {
        return Err(DriftError::UnderdeterminedModel {
            condition: f64::INFINITY,
        });
    }

    let mut params = match &options.initial_guess {
        InitialGuess::Zero => vec![0.0; p],
        InitialGuess::PhaseGradient => phase_gradient_guess(&model, maps)?,
        InitialGuess::Coefficients(c) => {
            if c.len() != p {
                return Err(DriftError::InvalidParameter(format!(
                    "initial guess has {} coefficients, model needs {}",
                    c.len(),
                    p
                )));
            }
            c.clone()
        }
    };

    info!(
        order = model.order,
        positions = samples.positions(),
        residuals = samples.residual_count(),
        condition,
        "Fitting distortion model"
    );

    let (mut cost, mut grad) = samples.evaluate(&params);
    let initial_cost = cost;
    let mut lambda = LM_INITIAL_LAMBDA;
    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iterations {
        iterations += 1;
        if cost <= f64::MIN_POSITIVE {
            converged = true;
            break;
        }

        let mut a = jtj.clone();
        for i in 0..p {
            a[(i, i)] += lambda * jtj[(i, i)];
        }
        let rhs = -DVector::from_column_slice(&grad);
        let delta = match a.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => match a.lu().solve(&rhs) {
                Some(d) => d,
                None => {
                    warn!(iterations, lambda, "Singular normal equations");
                    break;
                }
            },
        };

        let step_norm = delta.norm();
        let param_norm = params.iter().map(|v| v * v).sum::<f64>().sqrt();
        if step_norm <= 1e-12 * (param_norm + 1e-12) {
            converged = true;
            break;
        }

        let trial: Vec<f64> = params.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
        let (trial_cost, trial_grad) = samples.evaluate(&trial);

        if trial_cost < cost {
            let relative = (cost - trial_cost) / cost;
            params = trial;
            cost = trial_cost;
            grad = trial_grad;
            lambda = (lambda / 10.0).max(1e-12);
            debug!(iterations, cost, relative, lambda, "Accepted LM step");
            if relative < options.tolerance {
                converged = true;
                break;
            }
        } else {
            lambda *= 10.0;
            debug!(iterations, trial_cost, lambda, "Rejected LM step");
            if lambda > LM_MAX_LAMBDA {
                // No downhill direction left at machine precision.
                converged = true;
                break;
            }
        }
    }

    let rms_residual = (cost / samples.weight_sum_sq().max(EPSILON)).sqrt();
    let diagnostics = FitDiagnostics {
        converged,
        iterations,
        initial_cost,
        final_cost: cost,
        rms_residual,
        samples: samples.residual_count(),
        condition_number: condition,
    };

    if converged {
        info!(iterations, rms_residual, "Distortion fit converged");
    } else {
        warn!(
            iterations,
            rms_residual, "Distortion fit hit the iteration cap without converging"
        );
    }

    Ok(DistortionField {
        model,
        coefficients: params,
        diagnostics,
    })
}

/// Affine drift estimate from wrapped phase gradients.
///
/// The mean wrapped phase difference between neighbouring pixels of map `i`
/// estimates `q_i · ∂u/∂x` (and `∂u/∂y`), which is free of 2π ambiguity.
/// The constant term follows from the circular mean of the remaining phase.
pub fn phase_gradient_guess(model: &PolynomialModel, maps: &[PhaseMap]) -> Result<Vec<f64>> {
    let (h, w) = model.shape;
    let mut normal = Matrix2::<f64>::zeros();
    let mut rhs_x = Vector2::<f64>::zeros();
    let mut rhs_y = Vector2::<f64>::zeros();
    let confidences: Vec<_> = maps.iter().map(PhaseMap::confidence).collect();

    for (map, conf) in maps.iter().zip(&confidences) {
        let q = Vector2::new(map.wavevector.qx, map.wavevector.qy);
        let (mut gx, mut wx, mut gy, mut wy) = (0.0, 0.0, 0.0, 0.0);
        for row in 0..h {
            for col in 0..w {
                let c = conf[[row, col]];
                if col + 1 < w {
                    let cw = c.min(conf[[row, col + 1]]);
                    gx += cw * wrap_phase(map.phase[[row, col + 1]] - map.phase[[row, col]]);
                    wx += cw;
                }
                if row + 1 < h {
                    let cw = c.min(conf[[row + 1, col]]);
                    gy += cw * wrap_phase(map.phase[[row + 1, col]] - map.phase[[row, col]]);
                    wy += cw;
                }
            }
        }
        normal += q * q.transpose();
        rhs_x += q * (gx / wx.max(EPSILON));
        rhs_y += q * (gy / wy.max(EPSILON));
    }

    let inverse = normal.try_inverse().ok_or(DriftError::UnderdeterminedModel {
        condition: f64::INFINITY,
    })?;
    // Columns: derivative along x and along y of (ux, uy)
    let d_dx = inverse * rhs_x;
    let d_dy = inverse * rhs_y;
    let gradient = [[d_dx[0], d_dy[0]], [d_dx[1], d_dy[1]]];

    // Constant term from the circular mean of the phase left after the
    // affine part.
    let mut rhs_0 = Vector2::<f64>::zeros();
    for (map, conf) in maps.iter().zip(&confidences) {
        let q = map.wavevector;
        let mut acc = Complex::new(0.0, 0.0);
        for row in 0..h {
            for col in 0..w {
                let (x, y) = (col as f64, row as f64);
                let ux = gradient[0][0] * x + gradient[0][1] * y;
                let uy = gradient[1][0] * x + gradient[1][1] * y;
                let rest = map.phase[[row, col]] - (q.qx * ux + q.qy * uy);
                acc += Complex::from_polar(conf[[row, col]], rest);
            }
        }
        rhs_0 += Vector2::new(q.qx, q.qy) * acc.arg();
    }
    let u0 = inverse * rhs_0;

    debug!(
        u0x = u0[0],
        u0y = u0[1],
        dux_dx = gradient[0][0],
        dux_dy = gradient[0][1],
        duy_dx = gradient[1][0],
        duy_dy = gradient[1][1],
        "Phase-gradient initial guess"
    );

    Ok(model.affine_parameters((u0[0], u0[1]), gradient))
}
