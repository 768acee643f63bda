//! Intra-class allocation (layer 2).
//!
//! Splits one class's target among its members. Weights are relative to the
//! class and sum to 1 for a non-empty class.

use std::collections::BTreeMap;

use crate::error::{EngineError, Result, ResultExt};
use crate::optimizer::solver::project_capped_simplex;
use crate::optimizer::{FrontierSolver, MarkowitzOptimizer, OptimizationInput, SolverFailure};
use crate::policy::IntraClassPolicy;
use crate::portfolio::{Instrument, WEIGHT_TOLERANCE};
use crate::returns::ReturnSeries;

/// Member weights of one class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassAllocation {
    /// Weight of each member inside the class
    pub weights: BTreeMap<String, f64>,
    /// Set when the optimizer fell back to current weights
    pub degraded: Option<SolverFailure>,
}

/// Allocator for one run, sharing the optimizer and return history.
pub struct IntraClassAllocator<'a, S> {
    optimizer: &'a MarkowitzOptimizer<S>,
    returns: &'a ReturnSeries,
    periods_per_year: u32,
}

impl<'a, S: FrontierSolver> IntraClassAllocator<'a, S> {
    pub fn new(
        optimizer: &'a MarkowitzOptimizer<S>,
        returns: &'a ReturnSeries,
        periods_per_year: u32,
    ) -> Self {
        Self {
            optimizer,
            returns,
            periods_per_year,
        }
    }

    /// Weights of `members` inside their class.
    ///
    /// `caps` are in-class caps indexed like `members`; `None` leaves every
    /// member unconstrained.
    pub fn allocate_within_class(
        &self,
        members: &[&Instrument],
        policy: &IntraClassPolicy,
        caps: Option<&[f64]>,
    ) -> Result<ClassAllocation> {
        match members {
            [] => Ok(ClassAllocation::default()),
            [only] => {
                if let Some(cap) = caps.and_then(|caps| caps.first()) {
                    if *cap < 1.0 - WEIGHT_TOLERANCE {
                        return Err(EngineError::PolicyViolation(format!(
                            "{} is the only member of {} but capped at {cap:.6} of the class",
                            only.id, only.asset_class
                        )));
                    }
                }
                Ok(ClassAllocation {
                    weights: BTreeMap::from([(only.id.clone(), 1.0)]),
                    degraded: None,
                })
            }
            _ => match policy {
                IntraClassPolicy::EqualWeight => equal_weight(members, caps),
                IntraClassPolicy::Markowitz(settings) => {
                    let ids: Vec<String> = members.iter().map(|m| m.id.clone()).collect();
                    let estimates = self
                        .returns
                        .estimate(&ids, self.periods_per_year)
                        .context(format!("estimating {}", members[0].asset_class))?;
                    let current: Vec<f64> = members.iter().map(|m| m.market_value).collect();

                    let result = self.optimizer.optimize(
                        &OptimizationInput {
                            expected_returns: &estimates.expected_returns,
                            covariance: &estimates.covariance,
                            current_weights: &current,
                            caps,
                        },
                        settings,
                    )?;

                    Ok(ClassAllocation {
                        weights: ids.into_iter().zip(result.weights).collect(),
                        degraded: result.degraded,
                    })
                }
            },
        }
    }
}

fn equal_weight(members: &[&Instrument], caps: Option<&[f64]>) -> Result<ClassAllocation> {
    let n = members.len();
    let equal = vec![1.0 / n as f64; n];

    let weights = match caps {
        Some(caps) if caps.iter().any(|c| *c < equal[0]) => {
            let total: f64 = caps.iter().sum();
            if total < 1.0 - WEIGHT_TOLERANCE {
                return Err(EngineError::PolicyViolation(format!(
                    "in-class caps of {} sum to {total:.6}",
                    members[0].asset_class
                )));
            }
            project_capped_simplex(&equal, caps)
        }
        _ => equal,
    };

    Ok(ClassAllocation {
        weights: members.iter().map(|m| m.id.clone()).zip(weights).collect(),
        degraded: None,
    })
}
