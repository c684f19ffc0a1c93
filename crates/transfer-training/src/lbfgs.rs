//! Limited-memory BFGS minimization.
//!
//! Two-loop recursion for the search direction, backtracking line search with
//! the Armijo sufficient-decrease condition. Parameters are a flat `f64`
//! vector; the objective decides how to interpret them.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use transfer_core::{ClassifierConfig, Error, Result};

/// A differentiable function to minimize
pub trait Objective {
    /// Number of parameters
    fn dimension(&self) -> usize;

    /// Loss and gradient at `params`
    fn evaluate(&self, params: &[f64]) -> Result<(f64, Vec<f64>)>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LbfgsConfig {
    /// Correction pairs kept
    pub history_size: usize,
    pub max_iterations: usize,
    /// Relative loss improvement or gradient norm treated as converged
    pub tolerance: f64,
    /// Sufficient decrease constant
    pub armijo: f64,
    /// Step halvings tried before giving up
    pub max_line_search: usize,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self::from(&ClassifierConfig::default())
    }
}

impl From<&ClassifierConfig> for LbfgsConfig {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            history_size: config.history_size,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            armijo: 1e-4,
            max_line_search: 40,
        }
    }
}

/// Outcome of a minimization
#[derive(Debug, Clone)]
pub struct Minimum {
    pub params: Vec<f64>,
    pub loss: f64,
    pub gradient_norm: f64,
    pub iterations: usize,
    /// False when the iteration cap was hit or no descent step was found
    pub converged: bool,
}

struct Correction {
    s: Vec<f64>,
    y: Vec<f64>,
    rho: f64,
}

pub struct Lbfgs {
    config: LbfgsConfig,
}

impl Lbfgs {
    pub fn new(config: LbfgsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LbfgsConfig {
        &self.config
    }

    /// Minimizes `objective` starting from `initial`.
    ///
    /// Running out of iterations is not an error: a warning is logged and the
    /// best parameters found so far are returned with `converged == false`.
    pub fn minimize<O: Objective + ?Sized>(
        &self,
        objective: &O,
        initial: Vec<f64>,
    ) -> Result<Minimum> {
        if initial.len() != objective.dimension() {
            return Err(Error::InvalidArgument(format!(
                "Initial point has {} parameters, objective expects {}",
                initial.len(),
                objective.dimension()
            )));
        }

        let tol = self.config.tolerance;
        let mut x = initial;
        let (mut loss, mut grad) = objective.evaluate(&x)?;
        if !loss.is_finite() {
            return Err(Error::Training(format!("Initial loss is not finite: {loss}")));
        }

        let mut history: VecDeque<Correction> = VecDeque::with_capacity(self.config.history_size);
        let mut iterations = 0;
        let mut converged = norm(&grad) <= tol;

        while !converged && iterations < self.config.max_iterations {
            iterations += 1;

            let mut direction = self.direction(&grad, &history);
            let mut slope = dot(&grad, &direction);
            if slope >= 0.0 {
                // Curvature pairs gave an ascent direction; restart from steepest descent
                history.clear();
                direction = grad.iter().map(|g| -g).collect();
                slope = dot(&grad, &direction);
            }

            let mut step = if history.is_empty() {
                (1.0 / norm(&grad)).min(1.0)
            } else {
                1.0
            };

            let mut accepted = None;
            for _ in 0..self.config.max_line_search {
                let candidate: Vec<f64> = x
                    .iter()
                    .zip(&direction)
                    .map(|(xi, di)| xi + step * di)
                    .collect();
                let (candidate_loss, candidate_grad) = objective.evaluate(&candidate)?;
                if candidate_loss.is_finite()
                    && candidate_loss <= loss + self.config.armijo * step * slope
                {
                    accepted = Some((candidate, candidate_loss, candidate_grad));
                    break;
                }
                step *= 0.5;
            }

            let Some((next_x, next_loss, next_grad)) = accepted else {
                warn!(
                    "L-BFGS line search failed at iteration {} (loss {:.6e})",
                    iterations, loss
                );
                break;
            };

            let s: Vec<f64> = next_x.iter().zip(&x).map(|(a, b)| a - b).collect();
            let y: Vec<f64> = next_grad.iter().zip(&grad).map(|(a, b)| a - b).collect();
            let sy = dot(&s, &y);
            if sy > 1e-12 {
                if history.len() == self.config.history_size {
                    history.pop_front();
                }
                history.push_back(Correction { s, y, rho: 1.0 / sy });
            }

            let improvement = (loss - next_loss) / loss.abs().max(next_loss.abs()).max(1.0);
            x = next_x;
            loss = next_loss;
            grad = next_grad;

            debug!(
                "L-BFGS iteration {}: loss={:.6e} |grad|={:.3e}",
                iterations,
                loss,
                norm(&grad)
            );

            converged = improvement <= tol || norm(&grad) <= tol;
        }

        if !converged {
            warn!(
                "L-BFGS stopped after {} iterations without converging (loss {:.6e}, tolerance {:e})",
                iterations, loss, tol
            );
        }

        Ok(Minimum {
            gradient_norm: norm(&grad),
            params: x,
            loss,
            iterations,
            converged,
        })
    }

    /// Two-loop recursion: approximates `-H * grad`
    fn direction(&self, grad: &[f64], history: &VecDeque<Correction>) -> Vec<f64> {
        let mut q = grad.to_vec();
        let mut alphas = Vec::with_capacity(history.len());

        for c in history.iter().rev() {
            let alpha = c.rho * dot(&c.s, &q);
            axpy(-alpha, &c.y, &mut q);
            alphas.push(alpha);
        }

        let gamma = history
            .back()
            .map(|c| dot(&c.s, &c.y) / dot(&c.y, &c.y))
            .filter(|g| g.is_finite() && *g > 0.0)
            .unwrap_or(1.0);
        q.iter_mut().for_each(|v| *v *= gamma);

        for (c, alpha) in history.iter().zip(alphas.iter().rev()) {
            let beta = c.rho * dot(&c.y, &q);
            axpy(alpha - beta, &c.s, &mut q);
        }

        q.iter().map(|v| -v).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// y += a * x
fn axpy(a: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}
