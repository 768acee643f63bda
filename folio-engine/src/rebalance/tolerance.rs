//! Tolerance band ("gray zone") evaluation.
//!
//! ```text
//!   0 ──── BUY ────┤ lower ── HOLD ── target ── HOLD ── upper ├──── SELL ────
//!                  └──────── tolerance ───────┴──────── tolerance ───────┘
//! tolerance = max(relative_pct × target, absolute_value)
//! ```
//!
//! A deviation exactly on the band edge holds.

use serde::{Deserialize, Serialize};

use crate::error::{ensure_finite, Result};
use crate::portfolio::{ActionKind, ToleranceBand};

/// Full result of one band check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandEvaluation {
    pub kind: ActionKind,
    /// `current − target`
    pub deviation: f64,
    /// Half-width of the no-action zone
    pub tolerance: f64,
    /// Lowest weight that still holds (never below 0)
    pub lower_bound: f64,
    /// Highest weight that still holds
    pub upper_bound: f64,
}

/// Classify a weight against its target.
pub fn classify(current_weight: f64, target_weight: f64, band: &ToleranceBand) -> Result<ActionKind> {
    evaluate(current_weight, target_weight, band).map(|evaluation| evaluation.kind)
}

/// Classify and report deviation, tolerance and band bounds.
///
/// Weights outside `[0, 1]` are evaluated as given.
pub fn evaluate(
    current_weight: f64,
    target_weight: f64,
    band: &ToleranceBand,
) -> Result<BandEvaluation> {
    ensure_finite(current_weight, || "current weight".into())?;
    ensure_finite(target_weight, || "target weight".into())?;
    ensure_finite(band.relative_pct, || "band relative_pct".into())?;
    ensure_finite(band.absolute_value, || "band absolute_value".into())?;

    let deviation = current_weight - target_weight;
    let tolerance = band.tolerance(target_weight);
    let (lower_bound, upper_bound) = band.bounds(target_weight);

    let kind = if deviation.abs() <= tolerance {
        ActionKind::Hold
    } else if deviation < 0.0 {
        ActionKind::Buy
    } else {
        ActionKind::Sell
    };

    Ok(BandEvaluation {
        kind,
        deviation,
        tolerance,
        lower_bound,
        upper_bound,
    })
}
