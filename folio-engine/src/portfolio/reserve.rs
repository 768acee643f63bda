//! Emergency reserve status.

use serde::{Deserialize, Serialize};

use folio_common::config::ReserveConfig;

use super::types::EmergencyReserve;

/// How far the reserve is from its target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReserveStatus {
    pub target_value: f64,
    pub current_value: f64,
    /// Amount missing to reach the target
    pub gap: f64,
    /// Amount held above the target
    pub surplus: f64,
    /// Months of expenses the current balance covers
    pub coverage_months: Option<f64>,
    /// Share of the target already held, capped at 100
    pub pct_complete: f64,
    /// Months of expenses still needed to close the gap
    pub months_to_fill: Option<f64>,
    /// Whether the target is met
    pub is_complete: bool,
}

impl ReserveStatus {
    /// Evaluate a reserve against the monthly expense setting.
    ///
    /// Month-based figures are `None` when no expenses are configured.
    pub fn evaluate(reserve: &EmergencyReserve, config: &ReserveConfig) -> Self {
        let gap = reserve.gap();
        let monthly = config.monthly_expenses;
        let (coverage_months, months_to_fill) = if monthly > 0.0 {
            (
                Some(reserve.current_value / monthly),
                Some(gap / monthly),
            )
        } else {
            (None, None)
        };

        let pct_complete = if reserve.target_value > 0.0 {
            (reserve.current_value / reserve.target_value * 100.0).min(100.0)
        } else {
            100.0
        };

        Self {
            target_value: reserve.target_value,
            current_value: reserve.current_value,
            gap,
            surplus: reserve.surplus(),
            coverage_months,
            pct_complete,
            months_to_fill,
            is_complete: gap == 0.0,
        }
    }
}
