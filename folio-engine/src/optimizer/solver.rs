//! Long-only mean-variance solver.
//!
//! Every frontier point is the minimizer of the utility
//! `(γ/2)·w'Σw − μ'w` over the capped simplex `{0 ≤ wᵢ ≤ capᵢ, Σw = 1}`,
//! solved by accelerated projected gradient (FISTA with adaptive restart).
//! The projection onto the capped simplex is a bisection on the shift τ in
//! `wᵢ = clamp(vᵢ − τ, 0, capᵢ)`.
//!
//! ```text
//! min variance  γ = 1, μ ignored
//! max Sharpe    sweep γ on a log grid, keep the best Sharpe, refine by
//!               golden-section search between the neighbouring grid points
//! ```
//!
//! No randomness anywhere: identical problems yield bit-identical weights.

use serde::{Deserialize, Serialize};

/// Step size below which an iterate counts as converged.
pub const CONVERGENCE_TOLERANCE: f64 = 1e-10;

/// Cholesky pivots below this fraction of the largest variance mark the
/// covariance as singular.
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Absolute variance floor.
const DEGENERATE_VARIANCE: f64 = 1e-16;

const PROJECTION_STEPS: usize = 200;

/// Risk-aversion grid: `γ₀·10^(k/8)` for `k ∈ [-24, 24]`.
const SWEEP_HALF_WIDTH: i32 = 24;
const SWEEP_STEPS_PER_DECADE: f64 = 8.0;

const GOLDEN_SECTION_STEPS: usize = 40;

// ============================================================================
// Problem
// ============================================================================

/// One optimization problem. Dimensions are checked by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Problem<'a> {
    /// Annualized expected returns
    pub expected_returns: &'a [f64],
    /// Annualized covariance, row-major
    pub covariance: &'a [Vec<f64>],
    /// Per-asset maximum weight
    pub caps: &'a [f64],
    /// Iteration budget per utility solve
    pub max_iterations: usize,
}

impl Problem<'_> {
    fn len(&self) -> usize {
        self.expected_returns.len()
    }
}

/// Point of the efficient frontier to solve for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrontierTarget {
    /// Global minimum variance
    MinVariance,
    /// Tangency portfolio against a risk-free rate
    MaxSharpe { risk_free_rate: f64 },
    /// Utility optimum for one risk-aversion coefficient
    RiskAversion(f64),
}

/// Why the solver produced no weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolverFailure {
    /// Covariance is not positive definite
    SingularCovariance,
    /// Fewer than two assets carry any variance
    InsufficientVariance,
    /// Iteration budget exhausted
    NotConverged { iterations: usize },
}

impl std::fmt::Display for SolverFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingularCovariance => write!(f, "singular covariance matrix"),
            Self::InsufficientVariance => {
                write!(f, "fewer than two instruments with non-degenerate variance")
            }
            Self::NotConverged { iterations } => {
                write!(f, "no convergence within {iterations} iterations")
            }
        }
    }
}

/// Numerical backend of the optimizer.
pub trait FrontierSolver {
    /// Weights for one frontier point, or the reason none could be found.
    fn solve(
        &self,
        problem: &Problem<'_>,
        target: FrontierTarget,
    ) -> std::result::Result<Vec<f64>, SolverFailure>;
}

// ============================================================================
// Projected Gradient Solver
// ============================================================================

/// Default solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectedGradientSolver;

impl FrontierSolver for ProjectedGradientSolver {
    fn solve(
        &self,
        problem: &Problem<'_>,
        target: FrontierTarget,
    ) -> std::result::Result<Vec<f64>, SolverFailure> {
        check_conditioning(problem.covariance)?;
        let n = problem.len();
        let start = project_capped_simplex(&vec![1.0 / n as f64; n], problem.caps);

        match target {
            FrontierTarget::MinVariance => solve_utility(problem, 1.0, false, &start),
            FrontierTarget::RiskAversion(gamma) => solve_utility(problem, gamma, true, &start),
            FrontierTarget::MaxSharpe { risk_free_rate } => {
                max_sharpe(problem, risk_free_rate, &start)
            }
        }
    }
}

/// Reject covariances the solver cannot work with.
fn check_conditioning(covariance: &[Vec<f64>]) -> std::result::Result<(), SolverFailure> {
    let max_variance = covariance
        .iter()
        .enumerate()
        .map(|(i, row)| row[i])
        .fold(0.0, f64::max);
    let threshold = (max_variance * SINGULAR_TOLERANCE).max(DEGENERATE_VARIANCE);

    let usable = covariance
        .iter()
        .enumerate()
        .filter(|(i, row)| row[*i] > threshold)
        .count();
    if usable < 2 {
        return Err(SolverFailure::InsufficientVariance);
    }

    if !is_positive_definite(covariance, threshold) {
        return Err(SolverFailure::SingularCovariance);
    }
    Ok(())
}

/// Cholesky factorization with a pivot floor.
fn is_positive_definite(matrix: &[Vec<f64>], pivot_floor: f64) -> bool {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];

    for j in 0..n {
        let pivot = matrix[j][j] - (0..j).map(|k| lower[j][k] * lower[j][k]).sum::<f64>();
        if pivot.is_nan() || pivot <= pivot_floor {
            return false;
        }
        lower[j][j] = pivot.sqrt();
        for i in (j + 1)..n {
            let dot: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            lower[i][j] = (matrix[i][j] - dot) / lower[j][j];
        }
    }
    true
}

/// Minimize `(γ/2)·w'Σw − μ'w` (or `w'Σw / 2` without returns).
fn solve_utility(
    problem: &Problem<'_>,
    risk_aversion: f64,
    with_returns: bool,
    start: &[f64],
) -> std::result::Result<Vec<f64>, SolverFailure> {
    let covariance = problem.covariance;
    let mu = problem.expected_returns;

    let lipschitz = risk_aversion * row_sum_bound(covariance);
    if !(lipschitz.is_finite() && lipschitz > 0.0) {
        return Err(SolverFailure::InsufficientVariance);
    }
    let step = 1.0 / lipschitz;

    let gradient = |w: &[f64]| -> Vec<f64> {
        mat_vec(covariance, w)
            .into_iter()
            .zip(mu)
            .map(|(sw, m)| {
                if with_returns {
                    risk_aversion * sw - m
                } else {
                    risk_aversion * sw
                }
            })
            .collect()
    };

    let mut x = project_capped_simplex(start, problem.caps);
    let mut y = x.clone();
    let mut momentum = 1.0_f64;

    for _ in 0..problem.max_iterations {
        let grad = gradient(&y);
        let candidate: Vec<f64> = y.iter().zip(&grad).map(|(yi, g)| yi - step * g).collect();
        let next = project_capped_simplex(&candidate, problem.caps);

        let moved = max_abs_diff(&next, &x);
        let residual = max_abs_diff(&next, &y);
        if moved < CONVERGENCE_TOLERANCE && residual < CONVERGENCE_TOLERANCE {
            return Ok(next);
        }

        let restart: f64 = y
            .iter()
            .zip(&next)
            .zip(&x)
            .map(|((yi, ni), xi)| (yi - ni) * (ni - xi))
            .sum();
        if restart > 0.0 {
            momentum = 1.0;
            y = next.clone();
        } else {
            let next_momentum = (1.0 + (1.0 + 4.0 * momentum * momentum).sqrt()) / 2.0;
            let beta = (momentum - 1.0) / next_momentum;
            y = next
                .iter()
                .zip(&x)
                .map(|(ni, xi)| ni + beta * (ni - xi))
                .collect();
            momentum = next_momentum;
        }
        x = next;
    }

    Err(SolverFailure::NotConverged {
        iterations: problem.max_iterations,
    })
}

/// Tangency portfolio by risk-aversion sweep plus golden-section refinement.
fn max_sharpe(
    problem: &Problem<'_>,
    risk_free_rate: f64,
    start: &[f64],
) -> std::result::Result<Vec<f64>, SolverFailure> {
    let mu = problem.expected_returns;
    let covariance = problem.covariance;

    let min_variance = solve_utility(problem, 1.0, false, start)?;

    let lowest = mu.iter().copied().fold(f64::INFINITY, f64::min);
    let highest = mu.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let spread = highest - lowest;
    if spread <= 0.0 {
        // Identical returns: every frontier point has the same return, so
        // the least volatile one has the best Sharpe ratio.
        return Ok(min_variance);
    }

    let mean_variance =
        covariance.iter().enumerate().map(|(i, row)| row[i]).sum::<f64>() / mu.len() as f64;
    let gamma0 = spread / mean_variance;

    // High risk aversion first so each solve warm-starts near the previous one.
    let gammas: Vec<f64> = (-SWEEP_HALF_WIDTH..=SWEEP_HALF_WIDTH)
        .rev()
        .map(|k| gamma0 * 10f64.powf(f64::from(k) / SWEEP_STEPS_PER_DECADE))
        .collect();

    let mut best: Option<(usize, f64, Vec<f64>)> = None;
    let mut warm = min_variance.clone();
    for (idx, gamma) in gammas.iter().enumerate() {
        let weights = solve_utility(problem, *gamma, true, &warm)?;
        if let Some(sharpe) = sharpe_ratio(&weights, mu, covariance, risk_free_rate) {
            let improves = match &best {
                Some((_, best_sharpe, _)) => sharpe > *best_sharpe,
                None => true,
            };
            if improves {
                best = Some((idx, sharpe, weights.clone()));
            }
        }
        warm = weights;
    }

    let Some((idx, best_sharpe, best_weights)) = best else {
        return Ok(min_variance);
    };
    if best_sharpe <= 0.0 {
        // No frontier point beats the risk-free rate.
        return Ok(min_variance);
    }

    // Grid is descending in γ: idx + 1 is the lower neighbour.
    let lo = gammas[(idx + 1).min(gammas.len() - 1)].ln();
    let hi = gammas[idx.saturating_sub(1)].ln();
    golden_section(problem, risk_free_rate, (lo, hi), (best_sharpe, best_weights))
}

/// Golden-section search for the best Sharpe ratio over `ln γ ∈ [lo, hi]`.
///
/// Returns the best point seen, starting from the grid optimum.
fn golden_section(
    problem: &Problem<'_>,
    risk_free_rate: f64,
    (mut lo, mut hi): (f64, f64),
    (mut best_sharpe, mut best_weights): (f64, Vec<f64>),
) -> std::result::Result<Vec<f64>, SolverFailure> {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let evaluate_at = |log_gamma: f64, best_sharpe: &mut f64, best_weights: &mut Vec<f64>| {
        let weights = solve_utility(problem, log_gamma.exp(), true, best_weights)?;
        let sharpe = sharpe_ratio(
            &weights,
            problem.expected_returns,
            problem.covariance,
            risk_free_rate,
        )
        .unwrap_or(f64::MIN);
        if sharpe > *best_sharpe {
            *best_sharpe = sharpe;
            *best_weights = weights;
        }
        Ok::<f64, SolverFailure>(sharpe)
    };

    let mut a = hi - ratio * (hi - lo);
    let mut b = lo + ratio * (hi - lo);
    let mut fa = evaluate_at(a, &mut best_sharpe, &mut best_weights)?;
    let mut fb = evaluate_at(b, &mut best_sharpe, &mut best_weights)?;

    for _ in 0..GOLDEN_SECTION_STEPS {
        if fa >= fb {
            hi = b;
            b = a;
            fb = fa;
            a = hi - ratio * (hi - lo);
            fa = evaluate_at(a, &mut best_sharpe, &mut best_weights)?;
        } else {
            lo = a;
            a = b;
            fa = fb;
            b = lo + ratio * (hi - lo);
            fb = evaluate_at(b, &mut best_sharpe, &mut best_weights)?;
        }
    }

    Ok(best_weights)
}

// ============================================================================
// Helpers
// ============================================================================

/// Euclidean projection onto `{0 ≤ wᵢ ≤ capᵢ, Σw = 1}`.
///
/// Caps must be positive and sum to at least one.
pub(crate) fn project_capped_simplex(values: &[f64], caps: &[f64]) -> Vec<f64> {
    let mass = |tau: f64| -> f64 {
        values
            .iter()
            .zip(caps)
            .map(|(v, cap)| (v - tau).clamp(0.0, *cap))
            .sum()
    };

    // mass(lo) = Σcaps ≥ 1 and mass(hi) = 0.
    let mut lo = values
        .iter()
        .zip(caps)
        .map(|(v, cap)| v - cap)
        .fold(f64::INFINITY, f64::min)
        - 1.0;
    let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    for _ in 0..PROJECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if mass(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let tau = 0.5 * (lo + hi);
    values
        .iter()
        .zip(caps)
        .map(|(v, cap)| (v - tau).clamp(0.0, *cap))
        .collect()
}

/// Gershgorin bound on the largest eigenvalue.
fn row_sum_bound(matrix: &[Vec<f64>]) -> f64 {
    matrix
        .iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

fn mat_vec(matrix: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(v).map(|(a, b)| a * b).sum())
        .collect()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// `μ'w`
pub(crate) fn portfolio_return(weights: &[f64], expected_returns: &[f64]) -> f64 {
    weights.iter().zip(expected_returns).map(|(w, m)| w * m).sum()
}

/// `sqrt(w'Σw)`
pub(crate) fn portfolio_volatility(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    let variance: f64 = mat_vec(covariance, weights)
        .iter()
        .zip(weights)
        .map(|(sw, w)| sw * w)
        .sum();
    variance.max(0.0).sqrt()
}

/// Excess return per unit of volatility; `None` for a riskless portfolio.
pub(crate) fn sharpe_ratio(
    weights: &[f64],
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    risk_free_rate: f64,
) -> Option<f64> {
    let volatility = portfolio_volatility(weights, covariance);
    if volatility > 0.0 {
        Some((portfolio_return(weights, expected_returns) - risk_free_rate) / volatility)
    } else {
        None
    }
}
