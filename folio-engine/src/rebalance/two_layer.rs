//! Two-layer rebalancing run.
//!
//! ```text
//!  START ──▶ CLASS_TARGETS_COMPUTED ──▶ INSTRUMENT_TARGETS_COMPUTED ──▶ ACTIONS_COMPUTED ──▶ DONE
//!    │               │                              │                           │
//!    │  layer 1: static targets or        layer 2: intra-class        tolerance bands per
//!    │  optimizer over class aggregates   weights × class target      instrument and class
//! ```
//!
//! Every run builds its state from the portfolio it is given; nothing
//! survives between runs.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result, ResultExt};
use crate::optimizer::{
    Degradation, DegradationScope, FrontierSolver, MarkowitzOptimizer, OptimizationInput,
};
use crate::policy::{ClassTargetPolicy, RebalancePolicy};
use crate::portfolio::types::check_weight_vector;
use crate::portfolio::{
    ActionKind, AssetClass, ClassDrift, Instrument, Portfolio, RebalanceAction, TargetAllocation,
    WEIGHT_TOLERANCE,
};
use crate::returns::{MarketEstimates, ReturnSeries};

use super::intra_class::IntraClassAllocator;
use super::tolerance::evaluate;

/// Stage reached by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStage {
    Start,
    ClassTargetsComputed,
    InstrumentTargetsComputed,
    ActionsComputed,
    Done,
}

/// Everything a completed run exposes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOutcome {
    pub target: TargetAllocation,
    /// Per-instrument actions, largest deviation first
    pub actions: Vec<RebalanceAction>,
    /// Per-class drift, largest deviation first
    pub class_drift: Vec<ClassDrift>,
    /// Optimizer fallbacks during the run
    pub degradations: Vec<Degradation>,
}

enum RunState {
    Start,
    ClassTargetsComputed {
        classes: BTreeMap<AssetClass, f64>,
    },
    InstrumentTargetsComputed {
        target: TargetAllocation,
    },
    ActionsComputed {
        target: TargetAllocation,
        actions: Vec<RebalanceAction>,
        class_drift: Vec<ClassDrift>,
    },
    Done(RebalanceOutcome),
}

impl RunState {
    fn stage(&self) -> RunStage {
        match self {
            Self::Start => RunStage::Start,
            Self::ClassTargetsComputed { .. } => RunStage::ClassTargetsComputed,
            Self::InstrumentTargetsComputed { .. } => RunStage::InstrumentTargetsComputed,
            Self::ActionsComputed { .. } => RunStage::ActionsComputed,
            Self::Done(_) => RunStage::Done,
        }
    }
}

/// Orchestrates class targets, intra-class weights and band checks.
pub struct TwoLayerRebalancer<'a, S> {
    policy: &'a RebalancePolicy,
    optimizer: &'a MarkowitzOptimizer<S>,
}

impl<'a, S: FrontierSolver> TwoLayerRebalancer<'a, S> {
    pub fn new(policy: &'a RebalancePolicy, optimizer: &'a MarkowitzOptimizer<S>) -> Self {
        Self { policy, optimizer }
    }

    /// Run all stages on one portfolio.
    pub fn run(&self, portfolio: &Portfolio, returns: &ReturnSeries) -> Result<RebalanceOutcome> {
        let mut degradations = Vec::new();
        let mut state = RunState::Start;

        loop {
            let from = state.stage();
            state = match state {
                RunState::Start => RunState::ClassTargetsComputed {
                    classes: self
                        .class_targets(portfolio, returns, &mut degradations)
                        .context("computing class targets")?,
                },
                RunState::ClassTargetsComputed { classes } => {
                    RunState::InstrumentTargetsComputed {
                        target: self
                            .instrument_targets(portfolio, returns, classes, &mut degradations)
                            .context("computing instrument targets")?,
                    }
                }
                RunState::InstrumentTargetsComputed { target } => {
                    let actions = self.instrument_actions(portfolio, &target)?;
                    let class_drift = self.class_drift(portfolio, &target)?;
                    RunState::ActionsComputed {
                        target,
                        actions,
                        class_drift,
                    }
                }
                RunState::ActionsComputed {
                    target,
                    actions,
                    class_drift,
                } => RunState::Done(RebalanceOutcome {
                    target,
                    actions,
                    class_drift,
                    degradations: std::mem::take(&mut degradations),
                }),
                RunState::Done(outcome) => {
                    tracing::info!(
                        actions = outcome.actions.len(),
                        trades = outcome
                            .actions
                            .iter()
                            .filter(|a| a.kind != ActionKind::Hold)
                            .count(),
                        degraded = outcome.degradations.len(),
                        "Rebalance run complete"
                    );
                    return Ok(outcome);
                }
            };
            tracing::debug!(from = ?from, to = ?state.stage(), "Rebalance stage transition");
        }
    }

    // ========================================================================
    // Layer 1
    // ========================================================================

    fn class_targets(
        &self,
        portfolio: &Portfolio,
        returns: &ReturnSeries,
        degradations: &mut Vec<Degradation>,
    ) -> Result<BTreeMap<AssetClass, f64>> {
        let held = portfolio.classes();

        let targets = match &self.policy.class_targets {
            ClassTargetPolicy::Static(targets) => static_class_targets(targets, &held)?,
            ClassTargetPolicy::Markowitz(settings) => {
                if held.len() == 1 {
                    held.keys().map(|class| (*class, 1.0)).collect()
                } else {
                    let estimates =
                        class_estimates(portfolio, returns, self.policy.periods_per_year)?;
                    let class_values = portfolio.class_values();
                    let classes: Vec<AssetClass> = held.keys().copied().collect();
                    let current: Vec<f64> = classes.iter().map(|c| class_values[c]).collect();
                    let caps = self.class_caps(&classes);

                    let result = self.optimizer.optimize(
                        &OptimizationInput {
                            expected_returns: &estimates.expected_returns,
                            covariance: &estimates.covariance,
                            current_weights: &current,
                            caps: caps.as_deref(),
                        },
                        settings,
                    )?;
                    if let Some(reason) = result.degraded {
                        degradations.push(Degradation {
                            scope: DegradationScope::ClassLevel,
                            reason,
                        });
                    }
                    classes.into_iter().zip(result.weights).collect()
                }
            }
        };

        check_weight_vector("class targets", targets.values().copied())?;
        for (class, weight) in &targets {
            if let Some(cap) = self.policy.class_cap(*class) {
                if *weight > cap + WEIGHT_TOLERANCE {
                    return Err(EngineError::PolicyViolation(format!(
                        "target {weight:.6} for {class} exceeds its weight cap {cap}"
                    )));
                }
            }
        }
        Ok(targets)
    }

    fn class_caps(&self, classes: &[AssetClass]) -> Option<Vec<f64>> {
        if classes.iter().all(|c| self.policy.class_cap(*c).is_none()) {
            return None;
        }
        Some(
            classes
                .iter()
                .map(|c| self.policy.class_cap(*c).unwrap_or(1.0))
                .collect(),
        )
    }

    // ========================================================================
    // Layer 2
    // ========================================================================

    fn instrument_targets(
        &self,
        portfolio: &Portfolio,
        returns: &ReturnSeries,
        classes: BTreeMap<AssetClass, f64>,
        degradations: &mut Vec<Degradation>,
    ) -> Result<TargetAllocation> {
        let allocator =
            IntraClassAllocator::new(self.optimizer, returns, self.policy.periods_per_year);

        let mut instruments = BTreeMap::new();
        let mut within_class = BTreeMap::new();

        for (class, members) in portfolio.classes() {
            let class_target = classes.get(&class).copied().unwrap_or(0.0);
            if class_target <= 0.0 {
                // Held but untargeted: every member is sold down to zero.
                for member in &members {
                    instruments.insert(member.id.clone(), 0.0);
                }
                continue;
            }

            let caps = self.in_class_caps(&members, class_target);
            let policy = self.policy.intra_policy(class);
            let allocation = allocator
                .allocate_within_class(&members, &policy, caps.as_deref())
                .context(format!("allocating within {class}"))?;
            if let Some(reason) = allocation.degraded {
                degradations.push(Degradation {
                    scope: DegradationScope::WithinClass(class),
                    reason,
                });
            }

            for (id, weight) in &allocation.weights {
                instruments.insert(id.clone(), class_target * weight);
            }
            within_class.insert(class, allocation.weights);
        }

        let target = TargetAllocation {
            instruments,
            classes,
            within_class,
        };
        target.validate()?;
        Ok(target)
    }

    /// Portfolio-level instrument caps expressed inside the class.
    fn in_class_caps(&self, members: &[&Instrument], class_target: f64) -> Option<Vec<f64>> {
        if members
            .iter()
            .all(|m| self.policy.instrument_cap(&m.id).is_none())
        {
            return None;
        }
        Some(
            members
                .iter()
                .map(|m| {
                    self.policy
                        .instrument_cap(&m.id)
                        .map_or(1.0, |cap| (cap / class_target).min(1.0))
                })
                .collect(),
        )
    }

    // ========================================================================
    // Band checks
    // ========================================================================

    fn instrument_actions(
        &self,
        portfolio: &Portfolio,
        target: &TargetAllocation,
    ) -> Result<Vec<RebalanceAction>> {
        let invested = portfolio.invested_value();
        let mut actions = Vec::with_capacity(portfolio.instruments().len());

        for instrument in portfolio.instruments() {
            let current = portfolio.current_weight(&instrument.id);
            let target_weight = target.weight(&instrument.id);
            let band = self.policy.band_for(instrument);
            let evaluation = evaluate(current, target_weight, &band)
                .context(format!("evaluating {}", instrument.id))?;

            actions.push(RebalanceAction {
                instrument_id: instrument.id.clone(),
                asset_class: instrument.asset_class,
                kind: evaluation.kind,
                current_weight: current,
                target_weight,
                deviation: evaluation.deviation.abs(),
                tolerance: evaluation.tolerance,
                suggested_trade_value: (target_weight - current) * invested,
            });
        }

        actions.sort_by(|a, b| {
            by_deviation(a.deviation, b.deviation, &a.instrument_id, &b.instrument_id)
        });
        Ok(actions)
    }

    fn class_drift(
        &self,
        portfolio: &Portfolio,
        target: &TargetAllocation,
    ) -> Result<Vec<ClassDrift>> {
        let invested = portfolio.invested_value();
        let current = portfolio.class_weights();

        let mut classes: Vec<AssetClass> = current.keys().copied().collect();
        for class in target.classes.keys() {
            if !classes.contains(class) {
                classes.push(*class);
            }
        }

        let mut drift = Vec::with_capacity(classes.len());
        for class in classes {
            let current_weight = current.get(&class).copied().unwrap_or(0.0);
            let target_weight = target.class_weight(class);
            let band = self.policy.class_band(class);
            let evaluation = evaluate(current_weight, target_weight, &band)?;
            drift.push(ClassDrift {
                asset_class: class,
                kind: evaluation.kind,
                current_weight,
                target_weight,
                deviation: evaluation.deviation.abs(),
                tolerance: evaluation.tolerance,
                suggested_trade_value: (target_weight - current_weight) * invested,
            });
        }

        drift.sort_by(|a, b| {
            by_deviation(a.deviation, b.deviation, a.asset_class.as_str(), b.asset_class.as_str())
        });
        Ok(drift)
    }
}

/// Largest deviation first, ties by id.
fn by_deviation(a: f64, b: f64, a_id: &str, b_id: &str) -> Ordering {
    b.total_cmp(&a).then_with(|| a_id.cmp(b_id))
}

/// Static targets restricted to held classes.
///
/// Targets naming a class with no holdings are dropped and the rest
/// renormalized; held classes without a target get 0.
fn static_class_targets(
    targets: &BTreeMap<AssetClass, f64>,
    held: &BTreeMap<AssetClass, Vec<&Instrument>>,
) -> Result<BTreeMap<AssetClass, f64>> {
    check_weight_vector("static class targets", targets.values().copied())?;

    let mut resolved = BTreeMap::new();
    for (class, weight) in targets {
        if held.contains_key(class) {
            resolved.insert(*class, *weight);
        } else if *weight > 0.0 {
            tracing::warn!(
                asset_class = %class,
                weight = *weight,
                "Static target names a class with no holdings, redistributing"
            );
        }
    }

    let total: f64 = resolved.values().sum();
    if total <= 0.0 {
        return Err(EngineError::PolicyViolation(
            "no static class target matches a held class".into(),
        ));
    }
    if (total - 1.0).abs() > f64::EPSILON {
        for weight in resolved.values_mut() {
            *weight /= total;
        }
    }
    for class in held.keys() {
        resolved.entry(*class).or_insert(0.0);
    }
    Ok(resolved)
}

/// Class-level estimates from value-weighted member returns.
///
/// Classes come out in `AssetClass` order.
pub(crate) fn class_estimates(
    portfolio: &Portfolio,
    returns: &ReturnSeries,
    periods_per_year: u32,
) -> Result<MarketEstimates> {
    let mut ids = Vec::new();
    let mut series = Vec::new();
    for (class, members) in portfolio.classes() {
        let weighted: Vec<(&str, f64)> = members
            .iter()
            .map(|m| (m.id.as_str(), m.market_value))
            .collect();
        series.push(
            returns
                .aggregate(&weighted)
                .context(format!("aggregating {class}"))?,
        );
        ids.push(class.to_string());
    }
    let refs: Vec<&[f64]> = series.iter().map(Vec::as_slice).collect();
    MarketEstimates::from_series(ids, &refs, periods_per_year)
}
