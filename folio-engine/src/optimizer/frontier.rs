//! Efficient frontier sampling.

use serde::Serialize;

use super::solver::{
    portfolio_return, portfolio_volatility, sharpe_ratio, FrontierSolver, FrontierTarget, Problem,
    SolverFailure,
};
use super::{resolve_caps, validate_market, MarkowitzOptimizer, OptimizerSettings};
use crate::error::{EngineError, Result};
use crate::returns::MarketEstimates;

/// Decades of risk aversion covered on each side of the reference value.
const FRONTIER_DECADES: f64 = 3.0;

/// One efficient portfolio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrontierPoint {
    /// Annualized expected return
    pub expected_return: f64,
    /// Annualized volatility
    pub volatility: f64,
    /// Sharpe ratio; `None` for a riskless portfolio
    pub sharpe_ratio: Option<f64>,
    /// Weights, indexed like `EfficientFrontier::ids`
    pub weights: Vec<f64>,
}

/// Sampled frontier, ordered by volatility.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficientFrontier {
    /// Asset labels
    pub ids: Vec<String>,
    /// Efficient portfolios, least volatile first
    pub points: Vec<FrontierPoint>,
    /// Why the frontier is empty
    pub degraded: Option<SolverFailure>,
}

impl EfficientFrontier {
    /// Point with the highest Sharpe ratio.
    pub fn tangency(&self) -> Option<&FrontierPoint> {
        self.points
            .iter()
            .filter_map(|p| p.sharpe_ratio.map(|sharpe| (sharpe, p)))
            .max_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, point)| point)
    }
}

impl<S: FrontierSolver> MarkowitzOptimizer<S> {
    /// Sample `points` efficient portfolios, from minimum variance towards
    /// the highest-return corner.
    pub fn frontier(
        &self,
        estimates: &MarketEstimates,
        caps: Option<&[f64]>,
        points: usize,
        settings: &OptimizerSettings,
    ) -> Result<EfficientFrontier> {
        if points < 2 {
            return Err(EngineError::Data(format!(
                "frontier needs at least 2 points, got {points}"
            )));
        }
        if estimates.ids.is_empty() {
            return Err(EngineError::Data("frontier of an empty universe".into()));
        }
        let n = validate_market(&estimates.expected_returns, &estimates.covariance)?;
        if estimates.ids.len() != n {
            return Err(EngineError::Data(format!(
                "{} asset labels for {n} expected returns",
                estimates.ids.len()
            )));
        }
        let caps = resolve_caps(caps, n)?;
        let mu = &estimates.expected_returns;
        let covariance = &estimates.covariance;

        let problem = Problem {
            expected_returns: mu,
            covariance,
            caps: &caps,
            max_iterations: settings.max_iterations,
        };

        let lowest = mu.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = mu.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_variance =
            covariance.iter().enumerate().map(|(i, row)| row[i]).sum::<f64>() / n as f64;
        let gamma0 = if mean_variance > 0.0 && highest > lowest {
            (highest - lowest) / mean_variance
        } else {
            1.0
        };

        let mut targets = vec![FrontierTarget::MinVariance];
        let intervals = (points - 2).max(1) as f64;
        for k in 0..points - 1 {
            let exponent = FRONTIER_DECADES * (1.0 - 2.0 * k as f64 / intervals);
            targets.push(FrontierTarget::RiskAversion(gamma0 * 10f64.powf(exponent)));
        }

        let mut sampled = Vec::with_capacity(targets.len());
        for target in targets {
            let weights = match self.solver().solve(&problem, target) {
                Ok(weights) => weights,
                Err(reason) => {
                    tracing::warn!(%reason, "Efficient frontier unavailable");
                    return Ok(EfficientFrontier {
                        ids: estimates.ids.clone(),
                        points: Vec::new(),
                        degraded: Some(reason),
                    });
                }
            };
            sampled.push(FrontierPoint {
                expected_return: portfolio_return(&weights, mu),
                volatility: portfolio_volatility(&weights, covariance),
                sharpe_ratio: sharpe_ratio(&weights, mu, covariance, settings.risk_free_rate),
                weights,
            });
        }

        sampled.sort_by(|a, b| {
            a.volatility
                .total_cmp(&b.volatility)
                .then(a.expected_return.total_cmp(&b.expected_return))
        });
        sampled.dedup_by(|later, earlier| {
            (later.volatility - earlier.volatility).abs() < 1e-9
                && (later.expected_return - earlier.expected_return).abs() < 1e-9
        });

        Ok(EfficientFrontier {
            ids: estimates.ids.clone(),
            points: sampled,
            degraded: None,
        })
    }
}
