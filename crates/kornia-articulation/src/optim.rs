//! Levenberg-Marquardt optimizer for small dense non-linear least squares.
//!
//! The Levenberg-Marquardt algorithm is a trust-region method that combines
//! the advantages of gradient descent and Gauss-Newton methods. It solves
//! the damped normal equations: (J^T J + λI) δ = -J^T r

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// The problem has no parameters or no residuals.
    #[error("Empty problem: {num_params} parameters, {num_residuals} residuals")]
    EmptyProblem {
        /// Number of parameters.
        num_params: usize,
        /// Number of residuals at the initial guess.
        num_residuals: usize,
    },

    /// The residual function returned NaN or infinity at the initial guess.
    #[error("Residuals are not finite at the initial guess")]
    NonFiniteResidual,
}

/// A residual function whose sum of squares is minimized.
pub trait LeastSquaresProblem {
    /// Evaluate the residual vector at `params`.
    ///
    /// The number of residuals must not depend on `params`.
    fn residuals(&self, params: &[f64]) -> Vec<f64>;
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged: relative cost change below tolerance
    CostConverged,
    /// Converged: gradient norm below tolerance
    GradientConverged,
    /// Maximum iterations reached
    MaxIterations,
    /// Lambda exceeded maximum (likely numerical issues)
    LambdaMaxExceeded,
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Final parameter vector.
    pub params: Vec<f64>,
    /// Final cost (sum of squared residuals)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Reason for termination
    pub termination_reason: TerminationReason,
}

impl OptimizerResult {
    /// Whether the solver stopped on a convergence criterion.
    pub fn converged(&self) -> bool {
        matches!(
            self.termination_reason,
            TerminationReason::CostConverged | TerminationReason::GradientConverged
        )
    }
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter
    pub lambda_init: f64,
    /// Maximum damping parameter
    pub lambda_max: f64,
    /// Factor for lambda adaptation
    pub lambda_factor: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost change of an accepted step
    pub cost_tolerance: f64,
    /// Convergence threshold for the gradient norm
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 100,
            cost_tolerance: 1e-4,
            gradient_tolerance: 1e-10,
        }
    }
}

impl LevenbergMarquardt {
    /// Central difference step for the numerical Jacobian.
    const JACOBIAN_EPS: f64 = 1e-6;

    /// Cost below which the residuals are considered exactly fitted.
    const ZERO_COST: f64 = 1e-30;

    /// Create a new optimizer with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set cost tolerance.
    pub fn with_cost_tolerance(mut self, tol: f64) -> Self {
        self.cost_tolerance = tol;
        self
    }

    /// Set gradient tolerance.
    pub fn with_gradient_tolerance(mut self, tol: f64) -> Self {
        self.gradient_tolerance = tol;
        self
    }

    /// Set initial lambda.
    pub fn with_initial_lambda(mut self, lambda: f64) -> Self {
        self.lambda_init = lambda;
        self
    }

    /// Minimize the sum of squared residuals of `problem` starting at `initial`.
    ///
    /// Running out of iterations or damping is not an error: the best
    /// parameters found so far are returned together with the termination
    /// reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the problem is empty or its residuals are not finite
    /// at the initial guess.
    pub fn optimize<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &P,
        initial: &[f64],
    ) -> Result<OptimizerResult, OptimizerError> {
        let mut params = initial.to_vec();
        let mut residuals = problem.residuals(&params);

        if params.is_empty() || residuals.is_empty() {
            return Err(OptimizerError::EmptyProblem {
                num_params: params.len(),
                num_residuals: residuals.len(),
            });
        }
        if residuals.iter().any(|r| !r.is_finite()) {
            return Err(OptimizerError::NonFiniteResidual);
        }

        let mut current_cost = sum_of_squares(&residuals);
        let mut lambda = self.lambda_init;
        let mut iterations = 0;

        let finish = |params: Vec<f64>, cost: f64, iterations: usize, reason: TerminationReason| {
            log::trace!(
                "LM terminated after {} iterations with cost {:e} ({:?})",
                iterations,
                cost,
                reason
            );
            OptimizerResult {
                params,
                final_cost: cost,
                iterations,
                termination_reason: reason,
            }
        };

        loop {
            if current_cost < Self::ZERO_COST {
                return Ok(finish(
                    params,
                    current_cost,
                    iterations,
                    TerminationReason::CostConverged,
                ));
            }

            if iterations >= self.max_iterations {
                return Ok(finish(
                    params,
                    current_cost,
                    iterations,
                    TerminationReason::MaxIterations,
                ));
            }

            // Build normal equations: J^T J and J^T r
            let jacobian = self.numerical_jacobian(problem, &params, residuals.len());
            let r = DVector::from_column_slice(&residuals);
            let jtj = jacobian.transpose() * &jacobian;
            let jtr = jacobian.transpose() * r;

            if jtr.norm() < self.gradient_tolerance {
                return Ok(finish(
                    params,
                    current_cost,
                    iterations,
                    TerminationReason::GradientConverged,
                ));
            }

            // Inner loop: increase damping until a step reduces the cost
            loop {
                iterations += 1;

                let candidate = self
                    .solve_damped_system(&jtj, &jtr, lambda)
                    .map(|delta| {
                        params
                            .iter()
                            .zip(delta.iter())
                            .map(|(p, d)| p + d)
                            .collect::<Vec<_>>()
                    })
                    .map(|candidate| {
                        let candidate_residuals = problem.residuals(&candidate);
                        let cost = sum_of_squares(&candidate_residuals);
                        (candidate, candidate_residuals, cost)
                    });

                match candidate {
                    Some((candidate, candidate_residuals, new_cost))
                        if new_cost.is_finite() && new_cost < current_cost =>
                    {
                        let relative_cost_change = (current_cost - new_cost) / current_cost;

                        params = candidate;
                        residuals = candidate_residuals;
                        current_cost = new_cost;
                        lambda = (lambda / self.lambda_factor).max(1e-12);

                        if relative_cost_change < self.cost_tolerance {
                            return Ok(finish(
                                params,
                                current_cost,
                                iterations,
                                TerminationReason::CostConverged,
                            ));
                        }
                        break;
                    }
                    _ => {
                        lambda *= self.lambda_factor;
                        if lambda > self.lambda_max {
                            return Ok(finish(
                                params,
                                current_cost,
                                iterations,
                                TerminationReason::LambdaMaxExceeded,
                            ));
                        }
                        if iterations >= self.max_iterations {
                            return Ok(finish(
                                params,
                                current_cost,
                                iterations,
                                TerminationReason::MaxIterations,
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Compute the Jacobian of the residuals using central differences.
    fn numerical_jacobian<P: LeastSquaresProblem + ?Sized>(
        &self,
        problem: &P,
        params: &[f64],
        num_residuals: usize,
    ) -> DMatrix<f64> {
        let mut jacobian = DMatrix::<f64>::zeros(num_residuals, params.len());
        let mut perturbed = params.to_vec();
        let inv_2eps = 1.0 / (2.0 * Self::JACOBIAN_EPS);

        for j in 0..params.len() {
            perturbed[j] = params[j] + Self::JACOBIAN_EPS;
            let r_plus = problem.residuals(&perturbed);
            perturbed[j] = params[j] - Self::JACOBIAN_EPS;
            let r_minus = problem.residuals(&perturbed);
            perturbed[j] = params[j];

            for (i, (rp, rm)) in r_plus.iter().zip(r_minus.iter()).enumerate() {
                jacobian[(i, j)] = (rp - rm) * inv_2eps;
            }
        }

        jacobian
    }

    /// Solve the damped system (J^T J + λI) δ = -J^T r.
    fn solve_damped_system(
        &self,
        jtj: &DMatrix<f64>,
        jtr: &DVector<f64>,
        lambda: f64,
    ) -> Option<DVector<f64>> {
        let mut h = jtj.clone();
        for i in 0..h.nrows() {
            h[(i, i)] += lambda;
        }
        h.lu().solve(&(-jtr))
    }
}

fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}
