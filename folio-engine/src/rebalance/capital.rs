//! Capital allocation splitter.
//!
//! ```text
//! new capital ──┬──▶ reserve       min(capital, reserve gap)
//!               └──▶ investments   the rest
//!                       ├─ 1. fill shortfalls   target × invested − value, ranked by policy
//!                       └─ 2. remainder         pro-rata to target weights
//! ```
//!
//! An instrument never receives more than its shortfall in step 1, and the
//! step 2 remainder stops at each instrument's target share of the enlarged
//! portfolio, so no allocation pushes an instrument above its target weight.

use std::collections::BTreeMap;

use folio_common::config::CapitalRanking;

use crate::error::{ensure_finite, EngineError, Result};
use crate::portfolio::{CapitalAllocation, CapitalSplitPlan, Portfolio, TargetAllocation};

/// Routes new capital between the emergency reserve and the investments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapitalAllocationSplitter {
    ranking: CapitalRanking,
}

struct Shortfall<'a> {
    id: &'a str,
    amount: f64,
    target_value: f64,
}

impl CapitalAllocationSplitter {
    pub fn new(ranking: CapitalRanking) -> Self {
        Self { ranking }
    }

    /// Split `new_capital`.
    ///
    /// `to_reserve + to_investments == new_capital` holds exactly in
    /// floating point.
    pub fn split(
        &self,
        new_capital: f64,
        reserve_gap: f64,
        target: &TargetAllocation,
        portfolio: &Portfolio,
    ) -> Result<CapitalSplitPlan> {
        ensure_finite(new_capital, || "new capital".into())?;
        ensure_finite(reserve_gap, || "reserve gap".into())?;
        if new_capital < 0.0 {
            return Err(EngineError::Data(format!(
                "new capital must be non-negative, got {new_capital}"
            )));
        }

        let reserve_share = new_capital.min(reserve_gap.max(0.0));
        let to_investments = new_capital - reserve_share;
        // Recomputed from the rounded investment share so the two parts add
        // back to new_capital without rounding error.
        let to_reserve = new_capital - to_investments;

        let allocations = if to_investments > 0.0 {
            self.allocate(to_investments, target, portfolio)?
        } else {
            Vec::new()
        };

        tracing::debug!(
            new_capital,
            to_reserve,
            to_investments,
            instruments = allocations.len(),
            ranking = ?self.ranking,
            "Capital split"
        );

        Ok(CapitalSplitPlan {
            new_capital,
            to_reserve,
            to_investments,
            allocations,
        })
    }

    fn allocate(
        &self,
        budget: f64,
        target: &TargetAllocation,
        portfolio: &Portfolio,
    ) -> Result<Vec<CapitalAllocation>> {
        if target.instruments.is_empty() {
            return Err(EngineError::Data(
                "cannot invest new capital without a target allocation".into(),
            ));
        }

        let invested = portfolio.invested_value();
        let current_value =
            |id: &str| portfolio.get(id).map_or(0.0, |instrument| instrument.market_value);

        let mut shortfalls: Vec<Shortfall<'_>> = target
            .instruments
            .iter()
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(id, weight)| {
                let target_value = weight * invested;
                Shortfall {
                    id: id.as_str(),
                    amount: (target_value - current_value(id)).max(0.0),
                    target_value,
                }
            })
            .filter(|s| s.amount > 0.0)
            .collect();
        let total_shortfall: f64 = shortfalls.iter().map(|s| s.amount).sum();

        let mut amounts: BTreeMap<&str, f64> = BTreeMap::new();
        match self.ranking {
            CapitalRanking::Proportional => {
                let scale = if total_shortfall > budget {
                    budget / total_shortfall
                } else {
                    1.0
                };
                for s in &shortfalls {
                    amounts.insert(s.id, s.amount * scale);
                }
            }
            CapitalRanking::LargestRelativeShortfall | CapitalRanking::LargestAbsoluteShortfall => {
                let relative = self.ranking == CapitalRanking::LargestRelativeShortfall;
                shortfalls.sort_by(|a, b| {
                    let (ka, kb) = if relative {
                        (a.amount / a.target_value, b.amount / b.target_value)
                    } else {
                        (a.amount, b.amount)
                    };
                    kb.total_cmp(&ka).then_with(|| a.id.cmp(b.id))
                });
                let mut remaining = budget;
                for s in &shortfalls {
                    if remaining <= 0.0 {
                        break;
                    }
                    let amount = s.amount.min(remaining);
                    amounts.insert(s.id, amount);
                    remaining -= amount;
                }
            }
        }

        let after_total = invested + budget;
        let remainder = budget - total_shortfall;
        if remainder > 0.0 {
            distribute_remainder(remainder, after_total, target, &current_value, &mut amounts);
        }

        let shortfall_of = |id: &str| {
            shortfalls
                .iter()
                .find(|s| s.id == id)
                .map_or(0.0, |s| s.amount)
        };
        let mut allocations: Vec<CapitalAllocation> = amounts
            .into_iter()
            .filter(|(_, amount)| *amount > 0.0)
            .map(|(id, amount)| CapitalAllocation {
                instrument_id: id.to_string(),
                amount,
                shortfall: shortfall_of(id),
                resulting_weight: (current_value(id) + amount) / after_total,
            })
            .collect();
        allocations.sort_by(|a, b| {
            b.amount
                .total_cmp(&a.amount)
                .then_with(|| a.instrument_id.cmp(&b.instrument_id))
        });
        Ok(allocations)
    }
}

/// Spread `remainder` pro-rata to target weight, never past an instrument's
/// target value after the injection. Capped shares are re-spread over the
/// instruments that still have room.
fn distribute_remainder<'a>(
    remainder: f64,
    after_total: f64,
    target: &'a TargetAllocation,
    current_value: &dyn Fn(&str) -> f64,
    amounts: &mut BTreeMap<&'a str, f64>,
) {
    let mut room: BTreeMap<&str, f64> = target
        .instruments
        .iter()
        .filter(|(_, weight)| **weight > 0.0)
        .map(|(id, weight)| {
            let held = current_value(id) + amounts.get(id.as_str()).copied().unwrap_or(0.0);
            (id.as_str(), (weight * after_total - held).max(0.0))
        })
        .collect();

    let mut leftover = remainder;
    for _ in 0..room.len() {
        if leftover <= remainder * 1e-12 {
            break;
        }
        let open_weight: f64 = room
            .iter()
            .filter(|(_, space)| **space > 0.0)
            .map(|(id, _)| target.weight(id))
            .sum();
        if open_weight <= 0.0 {
            break;
        }

        let mut distributed = 0.0;
        for (id, space) in room.iter_mut().filter(|(_, space)| **space > 0.0) {
            let share = (leftover * target.weight(id) / open_weight).min(*space);
            *space -= share;
            *amounts.entry(*id).or_insert(0.0) += share;
            distributed += share;
        }
        leftover -= distributed;
    }
}
