//! Markowitz Optimizer.
//!
//! Finds a long-only point of the efficient frontier (minimum variance or
//! maximum Sharpe) and blends it with the current weights:
//!
//! ```text
//! w_target = α·w_opt + (1 − α)·w_current     (renormalized to Σ = 1)
//! ```
//!
//! A singular covariance, fewer than two instruments with non-degenerate
//! variance, or an exhausted iteration budget is not an error: the target
//! falls back to the current weights and the result is flagged degraded.
//!
//! # Usage
//!
//! ```ignore
//! use folio_engine::optimizer::{MarkowitzOptimizer, OptimizationInput, OptimizerSettings};
//!
//! let optimizer = MarkowitzOptimizer::new();
//! let result = optimizer.optimize(&input, &settings)?;
//! if let Some(reason) = result.degraded {
//!     tracing::warn!(%reason, "kept current weights");
//! }
//! ```

pub mod frontier;
pub mod solver;

use serde::{Deserialize, Serialize};

pub use folio_common::config::OptimizerObjective;

pub use frontier::{EfficientFrontier, FrontierPoint};
pub use solver::{FrontierSolver, FrontierTarget, Problem, ProjectedGradientSolver, SolverFailure};

use solver::project_capped_simplex;

use crate::error::{ensure_finite, EngineError, Result};
use crate::portfolio::{AssetClass, WEIGHT_TOLERANCE};

// ============================================================================
// Settings
// ============================================================================

/// Optimizer parameters resolved from policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// 0.0 keeps current weights, 1.0 takes the optimizer output
    pub blend_alpha: f64,
    /// Frontier point to target
    pub objective: OptimizerObjective,
    /// Annual risk-free rate for the Sharpe ratio
    pub risk_free_rate: f64,
    /// Iteration budget per solve
    pub max_iterations: usize,
}

impl OptimizerSettings {
    /// Settings with the given blend and default solver parameters.
    pub fn with_blend(blend_alpha: f64) -> Self {
        Self {
            blend_alpha,
            objective: OptimizerObjective::MaxSharpe,
            risk_free_rate: 0.15,
            max_iterations: 10_000,
        }
    }

    fn target(&self) -> FrontierTarget {
        match self.objective {
            OptimizerObjective::MinVariance => FrontierTarget::MinVariance,
            OptimizerObjective::MaxSharpe => FrontierTarget::MaxSharpe {
                risk_free_rate: self.risk_free_rate,
            },
        }
    }
}

// ============================================================================
// Degradation
// ============================================================================

/// Where an optimizer fell back to current weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layer", content = "asset_class", rename_all = "snake_case")]
pub enum DegradationScope {
    /// Class-level targets
    ClassLevel,
    /// Instrument weights inside one class
    WithinClass(AssetClass),
}

/// Degraded-result flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    pub scope: DegradationScope,
    pub reason: SolverFailure,
}

// ============================================================================
// Optimizer
// ============================================================================

/// Inputs of one optimization, all indexed alike.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationInput<'a> {
    /// Annualized expected returns
    pub expected_returns: &'a [f64],
    /// Annualized covariance, row-major
    pub covariance: &'a [Vec<f64>],
    /// Current weights (normalized internally)
    pub current_weights: &'a [f64],
    /// Per-asset maximum weight; unconstrained when `None`
    pub caps: Option<&'a [f64]>,
}

/// Result of one optimization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optimized {
    /// Blended target weights, summing to 1
    pub weights: Vec<f64>,
    /// Raw optimizer output; `None` when degraded
    pub optimal: Option<Vec<f64>>,
    /// Why the optimizer output was discarded
    pub degraded: Option<SolverFailure>,
}

impl Optimized {
    /// Whether the weights fell back to current weights.
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Mean-variance optimizer over a pluggable solver.
#[derive(Debug, Clone, Default)]
pub struct MarkowitzOptimizer<S = ProjectedGradientSolver> {
    solver: S,
}

impl MarkowitzOptimizer {
    /// Optimizer backed by the projected gradient solver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: FrontierSolver> MarkowitzOptimizer<S> {
    /// Optimizer backed by a custom solver.
    pub fn with_solver(solver: S) -> Self {
        Self { solver }
    }

    /// The underlying solver.
    pub fn solver(&self) -> &S {
        &self.solver
    }

    /// Optimize, blend and renormalize.
    pub fn optimize(
        &self,
        input: &OptimizationInput<'_>,
        settings: &OptimizerSettings,
    ) -> Result<Optimized> {
        let n = validate_input(input)?;

        ensure_finite(settings.blend_alpha, || "blend_alpha".into())?;
        if !(0.0..=1.0).contains(&settings.blend_alpha) {
            return Err(EngineError::Data(format!(
                "blend_alpha must be within [0, 1], got {}",
                settings.blend_alpha
            )));
        }

        let caps = resolve_caps(input.caps, n)?;
        let current = normalized_current(input.current_weights);

        if n == 1 {
            return Ok(Optimized {
                weights: vec![1.0],
                optimal: Some(vec![1.0]),
                degraded: None,
            });
        }

        let problem = Problem {
            expected_returns: input.expected_returns,
            covariance: input.covariance,
            caps: &caps,
            max_iterations: settings.max_iterations,
        };

        let optimal = match self.solver.solve(&problem, settings.target()) {
            Ok(weights) => weights,
            Err(reason) => {
                tracing::warn!(%reason, assets = n, "Optimizer degraded, keeping current weights");
                return Ok(Optimized {
                    weights: enforce_caps(current, &caps),
                    optimal: None,
                    degraded: Some(reason),
                });
            }
        };

        let alpha = settings.blend_alpha;
        let blended: Vec<f64> = optimal
            .iter()
            .zip(&current)
            .map(|(opt, cur)| alpha * opt + (1.0 - alpha) * cur)
            .collect();
        let weights = enforce_caps(renormalize(blended)?, &caps);

        tracing::debug!(
            assets = n,
            blend_alpha = alpha,
            objective = ?settings.objective,
            "Optimization complete"
        );

        Ok(Optimized {
            weights,
            optimal: Some(optimal),
            degraded: None,
        })
    }
}

fn validate_input(input: &OptimizationInput<'_>) -> Result<usize> {
    let n = validate_market(input.expected_returns, input.covariance)?;
    if input.current_weights.len() != n {
        return Err(EngineError::Data(format!(
            "{} current weights for {n} assets",
            input.current_weights.len()
        )));
    }
    for (i, w) in input.current_weights.iter().enumerate() {
        ensure_finite(*w, || format!("current weight {i}"))?;
        if *w < 0.0 {
            return Err(EngineError::Data(format!("negative current weight {i}: {w}")));
        }
    }
    Ok(n)
}

/// Expected returns must be finite and the covariance square, finite and
/// symmetric. Returns the number of assets.
pub(crate) fn validate_market(expected_returns: &[f64], covariance: &[Vec<f64>]) -> Result<usize> {
    let n = expected_returns.len();
    if n == 0 {
        return Err(EngineError::Data("nothing to optimize: no assets".into()));
    }
    if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
        return Err(EngineError::Data(format!(
            "covariance matrix must be {n}x{n}"
        )));
    }

    for (i, mu) in expected_returns.iter().enumerate() {
        ensure_finite(*mu, || format!("expected return {i}"))?;
    }
    for i in 0..n {
        for j in 0..n {
            let (a, b) = (covariance[i][j], covariance[j][i]);
            ensure_finite(a, || format!("covariance ({i}, {j})"))?;
            if (a - b).abs() > 1e-10 * (1.0 + a.abs().max(b.abs())) {
                return Err(EngineError::Data(format!(
                    "covariance matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }
    Ok(n)
}

/// Caps default to 1.0 and must leave room for a fully invested portfolio.
fn resolve_caps(caps: Option<&[f64]>, n: usize) -> Result<Vec<f64>> {
    let Some(caps) = caps else {
        return Ok(vec![1.0; n]);
    };
    if caps.len() != n {
        return Err(EngineError::Data(format!("{} caps for {n} assets", caps.len())));
    }
    for cap in caps {
        ensure_finite(*cap, || "weight cap".into())?;
        if *cap <= 0.0 || *cap > 1.0 {
            return Err(EngineError::Data(format!(
                "weight cap must be within (0, 1], got {cap}"
            )));
        }
    }
    let total: f64 = caps.iter().sum();
    if total < 1.0 - WEIGHT_TOLERANCE {
        return Err(EngineError::PolicyViolation(format!(
            "weight caps sum to {total:.6}, cannot hold a fully invested portfolio"
        )));
    }
    Ok(caps.to_vec())
}

/// Weights with every cap honoured. Weights already inside their caps are
/// returned unchanged; otherwise they are projected onto the capped simplex.
fn enforce_caps(weights: Vec<f64>, caps: &[f64]) -> Vec<f64> {
    if weights.iter().zip(caps).all(|(w, cap)| w <= cap) {
        return weights;
    }
    tracing::debug!(assets = weights.len(), "Weight cap binding, projecting target");
    project_capped_simplex(&weights, caps)
}

/// Current weights summing to 1; all-zero input means equal weights.
fn normalized_current(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total > 0.0 {
        weights.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len() as f64; weights.len()]
    }
}

/// Scale weights to sum to 1 and verify the result.
pub(crate) fn renormalize(weights: Vec<f64>) -> Result<Vec<f64>> {
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(EngineError::PolicyViolation(format!(
            "blended weights sum to {total}"
        )));
    }
    let normalized: Vec<f64> = weights.into_iter().map(|w| w / total).collect();
    let check: f64 = normalized.iter().sum();
    if (check - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::PolicyViolation(format!(
            "renormalized weights sum to {check}"
        )));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cov() -> Vec<Vec<f64>> {
        vec![vec![0.04, 0.0], vec![0.0, 0.16]]
    }

    fn min_variance(alpha: f64) -> OptimizerSettings {
        OptimizerSettings {
            objective: OptimizerObjective::MinVariance,
            ..OptimizerSettings::with_blend(alpha)
        }
    }

    #[test]
    fn test_blend_alpha_zero_keeps_current() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.3, 0.7],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &min_variance(0.0))
            .unwrap();
        assert!((result.weights[0] - 0.3).abs() < 1e-12);
        assert!((result.weights[1] - 0.7).abs() < 1e-12);
        assert!(!result.is_degraded());
    }

    #[test]
    fn test_blend_alpha_one_takes_optimizer_output() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.3, 0.7],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &min_variance(1.0))
            .unwrap();
        let optimal = result.optimal.clone().unwrap();
        for (w, o) in result.weights.iter().zip(&optimal) {
            assert!((w - o).abs() < 1e-12);
        }
        assert!((result.weights[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_blend_halfway() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.4, 0.6],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &min_variance(0.5))
            .unwrap();
        assert!((result.weights[0] - 0.6).abs() < 1e-6);
        assert!((result.weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_blend_alpha_out_of_range() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.5, 0.5],
            caps: None,
        };
        let err = MarkowitzOptimizer::new()
            .optimize(&input, &min_variance(1.5))
            .unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_singular_covariance_degrades_to_current() {
        let cov = vec![vec![0.04, 0.04], vec![0.04, 0.04]];
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[600.0, 400.0],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &OptimizerSettings::with_blend(1.0))
            .unwrap();
        assert_eq!(result.degraded, Some(SolverFailure::SingularCovariance));
        assert!((result.weights[0] - 0.6).abs() < 1e-12);
        assert!(result.optimal.is_none());
    }

    #[test]
    fn test_single_asset() {
        let cov = vec![vec![0.0]];
        let input = OptimizationInput {
            expected_returns: &[0.10],
            covariance: &cov,
            current_weights: &[0.0],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &OptimizerSettings::with_blend(0.3))
            .unwrap();
        assert_eq!(result.weights, vec![1.0]);
        assert!(!result.is_degraded());
    }

    #[test]
    fn test_zero_current_weights_mean_equal() {
        let cov = vec![vec![0.04, 0.04], vec![0.04, 0.04]];
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.0, 0.0],
            caps: None,
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &OptimizerSettings::with_blend(1.0))
            .unwrap();
        assert_eq!(result.weights, vec![0.5, 0.5]);
    }

    #[test]
    fn test_input_validation() {
        let cov = cov();
        let optimizer = MarkowitzOptimizer::new();
        let settings = OptimizerSettings::with_blend(0.5);

        let ragged = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[1.0],
            caps: None,
        };
        assert!(optimizer.optimize(&ragged, &settings).unwrap_err().is_data());

        let nan = OptimizationInput {
            expected_returns: &[f64::NAN, 0.12],
            covariance: &cov,
            current_weights: &[0.5, 0.5],
            caps: None,
        };
        assert!(optimizer.optimize(&nan, &settings).unwrap_err().is_data());

        let asymmetric = vec![vec![0.04, 0.01], vec![0.0, 0.16]];
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &asymmetric,
            current_weights: &[0.5, 0.5],
            caps: None,
        };
        assert!(optimizer.optimize(&input, &settings).unwrap_err().is_data());
    }

    #[test]
    fn test_infeasible_caps() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.5, 0.5],
            caps: Some(&[0.4, 0.4]),
        };
        let err = MarkowitzOptimizer::new()
            .optimize(&input, &OptimizerSettings::with_blend(1.0))
            .unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[test]
    fn test_blended_target_respects_caps() {
        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.1, 0.9],
            caps: Some(&[1.0, 0.6]),
        };
        // Raw blend is [0.31, 0.69]; the second asset is held at its cap.
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &min_variance(0.3))
            .unwrap();
        assert!(result.weights[1] <= 0.6);
        assert!((result.weights[1] - 0.6).abs() < 1e-9);
        assert!((result.weights[0] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_degraded_fallback_respects_caps() {
        let cov = vec![vec![0.04, 0.04], vec![0.04, 0.04]];
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.2, 0.8],
            caps: Some(&[1.0, 0.5]),
        };
        let result = MarkowitzOptimizer::new()
            .optimize(&input, &OptimizerSettings::with_blend(1.0))
            .unwrap();
        assert!(result.is_degraded());
        assert!((result.weights[0] - 0.5).abs() < 1e-9);
        assert!(result.weights[1] <= 0.5);
    }

    #[test]
    fn test_custom_solver() {
        struct Fixed;
        impl FrontierSolver for Fixed {
            fn solve(
                &self,
                _problem: &Problem<'_>,
                _target: FrontierTarget,
            ) -> std::result::Result<Vec<f64>, SolverFailure> {
                Ok(vec![1.0, 0.0])
            }
        }

        let cov = cov();
        let input = OptimizationInput {
            expected_returns: &[0.10, 0.12],
            covariance: &cov,
            current_weights: &[0.0, 1.0],
            caps: None,
        };
        let result = MarkowitzOptimizer::with_solver(Fixed)
            .optimize(&input, &OptimizerSettings::with_blend(0.25))
            .unwrap();
        assert!((result.weights[0] - 0.25).abs() < 1e-12);
        assert!((result.weights[1] - 0.75).abs() < 1e-12);
    }
}
