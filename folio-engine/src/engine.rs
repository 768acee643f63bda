//! Rebalancing engine facade.
//!
//! One call turns a snapshot into a complete plan:
//!
//! ```text
//! snapshot ─▶ Portfolio + ReturnSeries + EmergencyReserve
//!                  │
//!                  ▼
//!          TwoLayerRebalancer ──▶ target, actions, class drift, degradations
//!                  │
//!                  ├──▶ CapitalAllocationSplitter   (only with new capital)
//!                  ├──▶ ReserveStatus
//!                  └──▶ order suggestions
//! ```
//!
//! The engine keeps only the resolved policy; every run is built from the
//! snapshot it is given.

use chrono::{DateTime, Utc};
use serde::Serialize;

use folio_common::config::{Config, ReserveConfig};

use crate::error::{Result, ResultExt};
use crate::optimizer::{
    Degradation, EfficientFrontier, FrontierSolver, MarkowitzOptimizer, OptimizerSettings,
    ProjectedGradientSolver,
};
use crate::policy::{ClassTargetPolicy, IntraClassPolicy, RebalancePolicy};
use crate::portfolio::{
    CapitalSplitPlan, ClassDrift, PortfolioSnapshot, RebalanceAction, ReserveStatus,
    TargetAllocation,
};
use crate::rebalance::two_layer::class_estimates;
use crate::rebalance::{
    suggest_orders, CapitalAllocationSplitter, OrderSuggestion, TwoLayerRebalancer,
};

/// Complete output of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalancePlan {
    /// Snapshot timestamp
    pub as_of: DateTime<Utc>,
    /// Value the weights are expressed against
    pub invested_value: f64,
    pub target_allocation: TargetAllocation,
    /// Per-instrument actions, largest deviation first
    pub actions: Vec<RebalanceAction>,
    /// Per-class drift, largest deviation first
    pub class_drift: Vec<ClassDrift>,
    /// Optimizer fallbacks; empty when every solve succeeded
    pub degradations: Vec<Degradation>,
    /// Present when new capital was supplied
    pub capital_plan: Option<CapitalSplitPlan>,
    pub reserve: ReserveStatus,
    /// Whole-unit order guidance
    pub orders: Vec<OrderSuggestion>,
}

impl RebalancePlan {
    /// Whether any optimizer fell back to current weights.
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// Stateless rebalancing engine over a resolved policy.
pub struct RebalanceEngine<S = ProjectedGradientSolver> {
    policy: RebalancePolicy,
    reserve: ReserveConfig,
    frontier_settings: OptimizerSettings,
    optimizer: MarkowitzOptimizer<S>,
}

impl RebalanceEngine {
    /// Engine for a loaded configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let policy = RebalancePolicy::from_config(&config.policy).context("resolving policy")?;
        let frontier_settings = OptimizerSettings {
            blend_alpha: 1.0,
            objective: config.policy.objective,
            risk_free_rate: config.policy.risk_free_rate,
            max_iterations: config.policy.max_iterations,
        };
        Ok(Self {
            frontier_settings,
            ..Self::from_policy(policy, config.reserve.clone())
        })
    }

    /// Engine for an already resolved policy.
    pub fn from_policy(policy: RebalancePolicy, reserve: ReserveConfig) -> Self {
        Self::with_solver(policy, reserve, ProjectedGradientSolver)
    }
}

impl<S: FrontierSolver> RebalanceEngine<S> {
    /// Engine backed by a custom frontier solver.
    pub fn with_solver(policy: RebalancePolicy, reserve: ReserveConfig, solver: S) -> Self {
        let frontier_settings = match (&policy.class_targets, policy.intra_class) {
            (ClassTargetPolicy::Markowitz(settings), _) => *settings,
            (_, IntraClassPolicy::Markowitz(settings)) => settings,
            _ => OptimizerSettings::with_blend(1.0),
        };
        Self {
            policy,
            reserve,
            frontier_settings,
            optimizer: MarkowitzOptimizer::with_solver(solver),
        }
    }

    /// Run the full pipeline on one snapshot.
    ///
    /// `new_capital` adds a capital split plan that funds BUY orders.
    pub fn run(
        &self,
        snapshot: &PortfolioSnapshot,
        new_capital: Option<f64>,
    ) -> Result<RebalancePlan> {
        let portfolio = snapshot.portfolio()?;
        let returns = snapshot.return_series()?;
        let reserve = snapshot.emergency_reserve(&self.reserve)?;

        let outcome = TwoLayerRebalancer::new(&self.policy, &self.optimizer)
            .run(&portfolio, &returns)?;

        let capital_plan = match new_capital {
            Some(capital) => Some(
                CapitalAllocationSplitter::new(self.policy.capital_ranking)
                    .split(capital, reserve.gap(), &outcome.target, &portfolio)
                    .context("splitting new capital")?,
            ),
            None => None,
        };

        let orders = suggest_orders(
            &outcome.actions,
            &portfolio,
            capital_plan.as_ref(),
            self.policy.max_orders,
        );

        for degradation in &outcome.degradations {
            tracing::warn!(
                scope = ?degradation.scope,
                reason = %degradation.reason,
                "Optimizer degraded, kept current weights"
            );
        }

        Ok(RebalancePlan {
            as_of: snapshot.as_of,
            invested_value: portfolio.invested_value(),
            target_allocation: outcome.target,
            actions: outcome.actions,
            class_drift: outcome.class_drift,
            degradations: outcome.degradations,
            capital_plan,
            reserve: ReserveStatus::evaluate(&reserve, &self.reserve),
            orders,
        })
    }

    /// Efficient frontier of the held asset classes.
    pub fn frontier(&self, snapshot: &PortfolioSnapshot, points: usize) -> Result<EfficientFrontier> {
        let portfolio = snapshot.portfolio()?;
        let returns = snapshot.return_series()?;
        let estimates = class_estimates(&portfolio, &returns, self.policy.periods_per_year)
            .context("estimating class returns")?;

        let classes: Vec<_> = portfolio.classes().into_keys().collect();
        let caps = if classes.iter().any(|c| self.policy.class_cap(*c).is_some()) {
            Some(
                classes
                    .iter()
                    .map(|c| self.policy.class_cap(*c).unwrap_or(1.0))
                    .collect::<Vec<_>>(),
            )
        } else {
            None
        };

        self.optimizer
            .frontier(&estimates, caps.as_deref(), points, &self.frontier_settings)
    }

    /// Reserve status of a snapshot.
    pub fn reserve_status(&self, snapshot: &PortfolioSnapshot) -> Result<ReserveStatus> {
        snapshot.reserve_status(&self.reserve)
    }
}
