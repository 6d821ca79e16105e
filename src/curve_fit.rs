/// One-dimensional least-squares curve fitting.
/// Levenberg-Marquardt over an analytic model with Marquardt diagonal damping.
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("not enough data points: {points} for {params} parameters")]
    NotEnoughPoints { points: usize, params: usize },
    #[error("fit did not converge within {0} evaluations")]
    MaxEvaluations(usize),
    #[error("model produced non-finite values")]
    NonFinite,
}

/// A model y = f(x; params) with an analytic gradient
pub trait CurveModel {
    fn n_params(&self) -> usize;

    fn value(&self, x: f64, params: &[f64]) -> f64;

    /// Partial derivatives of `value` with respect to each parameter
    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]);
}

/// `amplitude * exp(-(x - center)^2 / (2 sigma^2))`
/// Parameters: [amplitude, center, sigma]
pub struct Gaussian1D;

impl CurveModel for Gaussian1D {
    fn n_params(&self) -> usize {
        3
    }

    fn value(&self, x: f64, params: &[f64]) -> f64 {
        let (amplitude, center, sigma) = (params[0], params[1], params[2]);
        let dx = x - center;
        amplitude * (-(dx * dx) / (2.0 * sigma * sigma)).exp()
    }

    fn gradient(&self, x: f64, params: &[f64], grad: &mut [f64]) {
        let (amplitude, center, sigma) = (params[0], params[1], params[2]);
        let dx = x - center;
        let s2 = sigma * sigma;
        let e = (-(dx * dx) / (2.0 * s2)).exp();
        grad[0] = e;
        grad[1] = amplitude * e * dx / s2;
        grad[2] = amplitude * e * dx * dx / (s2 * sigma);
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: Vec<f64>,
    pub sum_squares: f64,
    pub evaluations: usize,
}

/// Levenberg-Marquardt optimizer
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Budget of full model evaluations over the data
    pub max_evaluations: usize,
    /// Relative decrease in the sum of squares treated as converged
    pub tolerance: f64,
    pub lambda: f64,
    pub lambda_factor: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_evaluations: 1000,
            tolerance: 1e-10,
            lambda: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

impl LevenbergMarquardt {
    pub fn with_max_evaluations(max_evaluations: usize) -> Self {
        Self {
            max_evaluations,
            ..Default::default()
        }
    }

    pub fn fit(
        &self,
        model: &dyn CurveModel,
        xs: &[f64],
        ys: &[f64],
        initial_params: &[f64],
    ) -> Result<FitResult, FitError> {
        let n_params = model.n_params();
        let n_points = xs.len().min(ys.len());
        if n_points < n_params {
            return Err(FitError::NotEnoughPoints {
                points: n_points,
                params: n_params,
            });
        }

        let sum_squares = |params: &[f64]| -> f64 {
            xs.iter()
                .zip(ys)
                .map(|(&x, &y)| {
                    let r = y - model.value(x, params);
                    r * r
                })
                .sum()
        };

        let mut params = initial_params.to_vec();
        let mut lambda = self.lambda;
        let mut current = sum_squares(&params);
        let mut evaluations = 1;
        if !current.is_finite() {
            return Err(FitError::NonFinite);
        }

        let mut jacobian = DMatrix::<f64>::zeros(n_points, n_params);
        let mut residuals = DVector::<f64>::zeros(n_points);
        let mut grad = vec![0.0; n_params];

        loop {
            for (i, (&x, &y)) in xs.iter().zip(ys).enumerate() {
                residuals[i] = y - model.value(x, &params);
                model.gradient(x, &params, &mut grad);
                for (j, &g) in grad.iter().enumerate() {
                    jacobian[(i, j)] = g;
                }
            }
            evaluations += 1;

            let jt = jacobian.transpose();
            let jtj = &jt * &jacobian;
            let jtr = &jt * &residuals;

            // Inner loop: raise damping until a step lowers the residual
            let accepted = loop {
                if evaluations >= self.max_evaluations {
                    return Err(FitError::MaxEvaluations(self.max_evaluations));
                }

                let mut h = jtj.clone();
                for i in 0..n_params {
                    h[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
                }

                let step = h.lu().solve(&jtr);
                let Some(delta) = step else {
                    lambda *= self.lambda_factor;
                    if lambda > 1e12 {
                        break None;
                    }
                    continue;
                };

                let trial: Vec<f64> = params.iter().zip(delta.iter()).map(|(p, d)| p + d).collect();
                let trial_error = sum_squares(&trial);
                evaluations += 1;

                if trial_error.is_finite() && trial_error < current {
                    lambda = (lambda / self.lambda_factor).max(1e-12);
                    break Some((trial, trial_error));
                }
                lambda *= self.lambda_factor;
                if lambda > 1e12 {
                    break None;
                }
            };

            match accepted {
                Some((trial, trial_error)) => {
                    let improvement = (current - trial_error) / current.max(f64::MIN_POSITIVE);
                    params = trial;
                    current = trial_error;
                    if improvement < self.tolerance || current == 0.0 {
                        break;
                    }
                }
                // No downhill step exists: already at a minimum
                None => break,
            }
        }

        if params.iter().any(|p| !p.is_finite()) {
            return Err(FitError::NonFinite);
        }

        Ok(FitResult {
            params,
            sum_squares: current,
            evaluations,
        })
    }
}
