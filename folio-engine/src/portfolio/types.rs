//! Portfolio Types and Structures.
//!
//! Instruments, asset classes and the per-run value objects the engine
//! produces. Nothing here is mutated after construction: every run builds
//! fresh values from the input snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use folio_common::config::BandConfig;

use crate::error::{ensure_finite, EngineError, Result};

/// Weight sums must land on 1.0 within this tolerance.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

// ============================================================================
// Asset Class
// ============================================================================

/// Asset class tag.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AssetClass {
    /// Listed stocks, ETFs and depositary receipts
    Equities,
    /// Listed real-estate funds
    Reits,
    /// Crypto assets
    Crypto,
    /// Sovereign bonds
    GovernmentBonds,
    /// Bank and corporate fixed income
    PrivateFixedIncome,
}

impl AssetClass {
    /// Every class, in canonical order.
    pub const ALL: [AssetClass; 5] = [
        Self::Equities,
        Self::Reits,
        Self::Crypto,
        Self::GovernmentBonds,
        Self::PrivateFixedIncome,
    ];

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equities => "equities",
            Self::Reits => "reits",
            Self::Crypto => "crypto",
            Self::GovernmentBonds => "government_bonds",
            Self::PrivateFixedIncome => "private_fixed_income",
        }
    }
}

impl std::fmt::Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetClass {
    type Err = EngineError;

    /// Accepts canonical names plus the broker labels snapshots carry
    /// (`ACAO`, `FII`, `TESOURO`, `RENDA_FIXA_PRIVADA`, ...). Unknown labels
    /// are rejected rather than guessed.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "equities" | "equity" | "stocks" | "acao" | "etf" | "bdr" => Ok(Self::Equities),
            "reits" | "reit" | "real_estate_funds" | "fii" => Ok(Self::Reits),
            "crypto" | "cryptocurrency" => Ok(Self::Crypto),
            "government_bonds" | "treasuries" | "tesouro" => Ok(Self::GovernmentBonds),
            "private_fixed_income" | "fixed_income" | "renda_fixa_privada" => {
                Ok(Self::PrivateFixedIncome)
            }
            _ => Err(EngineError::Data(format!("unknown asset class '{s}'"))),
        }
    }
}

impl TryFrom<String> for AssetClass {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

// ============================================================================
// Instrument
// ============================================================================

/// A held or targeted instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker or other unique id
    pub id: String,
    /// Asset class tag
    pub asset_class: AssetClass,
    /// Current market value
    pub market_value: f64,
    /// Units held
    #[serde(default)]
    pub quantity: f64,
    /// Price per unit, needed only when nothing is held yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
}

impl Instrument {
    /// Create an instrument from value and quantity.
    pub fn new(
        id: impl Into<String>,
        asset_class: AssetClass,
        market_value: f64,
        quantity: f64,
    ) -> Self {
        Self {
            id: id.into(),
            asset_class,
            market_value,
            quantity,
            unit_price: None,
        }
    }

    /// Price per unit: explicit, else derived from value and quantity.
    pub fn unit_price(&self) -> Option<f64> {
        match self.unit_price {
            Some(price) if price > 0.0 => Some(price),
            _ if self.quantity > 0.0 && self.market_value > 0.0 => {
                Some(self.market_value / self.quantity)
            }
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(EngineError::Data("instrument with empty id".into()));
        }
        ensure_finite(self.market_value, || format!("market value of {}", self.id))?;
        ensure_finite(self.quantity, || format!("quantity of {}", self.id))?;
        if self.market_value < 0.0 {
            return Err(EngineError::Data(format!(
                "negative market value for {}: {}",
                self.id, self.market_value
            )));
        }
        if self.quantity < 0.0 {
            return Err(EngineError::Data(format!(
                "negative quantity for {}: {}",
                self.id, self.quantity
            )));
        }
        if let Some(price) = self.unit_price {
            ensure_finite(price, || format!("unit price of {}", self.id))?;
            if price < 0.0 {
                return Err(EngineError::Data(format!(
                    "negative unit price for {}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Portfolio
// ============================================================================

/// Validated investment positions plus the separately tracked reserve.
///
/// Weights are always relative to the invested value; the reserve sits
/// outside the allocation.
#[derive(Debug, Clone, Serialize)]
pub struct Portfolio {
    instruments: Vec<Instrument>,
    reserve_value: f64,
    invested_value: f64,
}

impl Portfolio {
    /// Validate positions and build the portfolio.
    pub fn new(instruments: Vec<Instrument>, reserve_value: f64) -> Result<Self> {
        if instruments.is_empty() {
            return Err(EngineError::Data("empty portfolio: no instruments".into()));
        }

        let mut seen = BTreeSet::new();
        for instrument in &instruments {
            instrument.validate()?;
            if !seen.insert(instrument.id.as_str()) {
                return Err(EngineError::Data(format!(
                    "duplicate instrument id {}",
                    instrument.id
                )));
            }
        }

        ensure_finite(reserve_value, || "reserve value".into())?;
        if reserve_value < 0.0 {
            return Err(EngineError::Data(format!(
                "negative reserve value: {reserve_value}"
            )));
        }

        let invested_value: f64 = instruments.iter().map(|i| i.market_value).sum();
        if invested_value <= 0.0 {
            return Err(EngineError::Data(
                "empty portfolio: instruments carry no market value".into(),
            ));
        }

        Ok(Self {
            instruments,
            reserve_value,
            invested_value,
        })
    }

    /// Instruments in snapshot order.
    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    /// Look up an instrument by id.
    pub fn get(&self, id: &str) -> Option<&Instrument> {
        self.instruments.iter().find(|i| i.id == id)
    }

    /// Sum of instrument market values.
    pub fn invested_value(&self) -> f64 {
        self.invested_value
    }

    /// Emergency reserve balance.
    pub fn reserve_value(&self) -> f64 {
        self.reserve_value
    }

    /// Invested value plus reserve.
    pub fn total_value(&self) -> f64 {
        self.invested_value + self.reserve_value
    }

    /// Current weight of one instrument (0 when unknown).
    pub fn current_weight(&self, id: &str) -> f64 {
        self.get(id)
            .map(|i| i.market_value / self.invested_value)
            .unwrap_or(0.0)
    }

    /// Members per asset class, in snapshot order within each class.
    pub fn classes(&self) -> BTreeMap<AssetClass, Vec<&Instrument>> {
        let mut classes: BTreeMap<AssetClass, Vec<&Instrument>> = BTreeMap::new();
        for instrument in &self.instruments {
            classes
                .entry(instrument.asset_class)
                .or_default()
                .push(instrument);
        }
        classes
    }

    /// Market value per asset class.
    pub fn class_values(&self) -> BTreeMap<AssetClass, f64> {
        let mut values = BTreeMap::new();
        for instrument in &self.instruments {
            *values.entry(instrument.asset_class).or_insert(0.0) += instrument.market_value;
        }
        values
    }

    /// Current weight per asset class.
    pub fn class_weights(&self) -> BTreeMap<AssetClass, f64> {
        self.class_values()
            .into_iter()
            .map(|(class, value)| (class, value / self.invested_value))
            .collect()
    }
}

// ============================================================================
// Target Allocation
// ============================================================================

/// Target weights produced by one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAllocation {
    /// Absolute portfolio weight per instrument
    pub instruments: BTreeMap<String, f64>,
    /// Weight per asset class
    pub classes: BTreeMap<AssetClass, f64>,
    /// Weight of each instrument inside its class
    pub within_class: BTreeMap<AssetClass, BTreeMap<String, f64>>,
}

impl TargetAllocation {
    /// Target weight of an instrument (0 when not targeted).
    pub fn weight(&self, id: &str) -> f64 {
        self.instruments.get(id).copied().unwrap_or(0.0)
    }

    /// Target weight of a class (0 when not targeted).
    pub fn class_weight(&self, class: AssetClass) -> f64 {
        self.classes.get(&class).copied().unwrap_or(0.0)
    }

    /// Check the weight-sum invariants.
    pub fn validate(&self) -> Result<()> {
        check_weight_vector("instrument targets", self.instruments.values().copied())?;
        check_weight_vector("class targets", self.classes.values().copied())?;
        for (class, weights) in &self.within_class {
            if !weights.is_empty() {
                check_weight_vector(
                    &format!("intra-class targets of {class}"),
                    weights.values().copied(),
                )?;
            }
        }
        Ok(())
    }
}

/// Weights must be finite, non-negative and sum to one.
pub(crate) fn check_weight_vector(
    label: &str,
    weights: impl IntoIterator<Item = f64>,
) -> Result<()> {
    let mut total = 0.0;
    for w in weights {
        if !w.is_finite() || w < -WEIGHT_TOLERANCE {
            return Err(EngineError::PolicyViolation(format!(
                "{label} contain an invalid weight {w}"
            )));
        }
        total += w;
    }
    if (total - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(EngineError::PolicyViolation(format!(
            "{label} sum to {total:.9}, expected 1.0"
        )));
    }
    Ok(())
}

// ============================================================================
// Tolerance Band
// ============================================================================

/// No-action zone around a target weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    /// Tolerance as a fraction of the target weight
    pub relative_pct: f64,
    /// Tolerance floor in weight units
    pub absolute_value: f64,
}

impl ToleranceBand {
    /// Create a band, rejecting negative or non-finite parameters.
    pub fn new(relative_pct: f64, absolute_value: f64) -> Result<Self> {
        ensure_finite(relative_pct, || "band relative_pct".into())?;
        ensure_finite(absolute_value, || "band absolute_value".into())?;
        if relative_pct < 0.0 || absolute_value < 0.0 {
            return Err(EngineError::Data(format!(
                "band parameters must be non-negative ({relative_pct}, {absolute_value})"
            )));
        }
        Ok(Self {
            relative_pct,
            absolute_value,
        })
    }

    /// Width of the no-action zone on each side of `target_weight`.
    pub fn tolerance(&self, target_weight: f64) -> f64 {
        (self.relative_pct * target_weight).max(self.absolute_value)
    }

    /// Lower and upper weight bounds of the no-action zone.
    pub fn bounds(&self, target_weight: f64) -> (f64, f64) {
        let tolerance = self.tolerance(target_weight);
        ((target_weight - tolerance).max(0.0), target_weight + tolerance)
    }
}

impl TryFrom<BandConfig> for ToleranceBand {
    type Error = EngineError;

    fn try_from(config: BandConfig) -> Result<Self> {
        Self::new(config.relative_pct, config.absolute_value)
    }
}

// ============================================================================
// Rebalance Actions
// ============================================================================

/// Discrete recommendation for one instrument or class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Buy,
    Hold,
    Sell,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Recommendation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceAction {
    /// Instrument id
    pub instrument_id: String,
    /// Class of the instrument
    pub asset_class: AssetClass,
    /// BUY / HOLD / SELL
    pub kind: ActionKind,
    /// Current portfolio weight
    pub current_weight: f64,
    /// Target portfolio weight
    pub target_weight: f64,
    /// `|current - target|`
    pub deviation: f64,
    /// Band half-width applied
    pub tolerance: f64,
    /// `(target - current) * invested value`; negative means sell
    pub suggested_trade_value: f64,
}

/// Current vs target weight of one asset class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDrift {
    pub asset_class: AssetClass,
    pub kind: ActionKind,
    pub current_weight: f64,
    pub target_weight: f64,
    pub deviation: f64,
    pub tolerance: f64,
    pub suggested_trade_value: f64,
}

// ============================================================================
// Reserve and Capital Split
// ============================================================================

/// Emergency reserve snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EmergencyReserve {
    /// Desired reserve size
    pub target_value: f64,
    /// Current reserve balance
    pub current_value: f64,
}

impl EmergencyReserve {
    /// Create a reserve snapshot.
    pub fn new(target_value: f64, current_value: f64) -> Result<Self> {
        ensure_finite(target_value, || "reserve target".into())?;
        ensure_finite(current_value, || "reserve balance".into())?;
        if target_value < 0.0 || current_value < 0.0 {
            return Err(EngineError::Data(format!(
                "reserve values must be non-negative (target {target_value}, current {current_value})"
            )));
        }
        Ok(Self {
            target_value,
            current_value,
        })
    }

    /// Amount missing to reach the target.
    pub fn gap(&self) -> f64 {
        (self.target_value - self.current_value).max(0.0)
    }

    /// Amount held above the target.
    pub fn surplus(&self) -> f64 {
        (self.current_value - self.target_value).max(0.0)
    }
}

/// Capital routed to one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalAllocation {
    pub instrument_id: String,
    /// Amount allocated
    pub amount: f64,
    /// Value missing to reach the target before the injection
    pub shortfall: f64,
    /// Portfolio weight after the whole injection is invested
    pub resulting_weight: f64,
}

/// How new capital is split between the reserve and the investments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalSplitPlan {
    /// Capital supplied
    pub new_capital: f64,
    /// Routed to the emergency reserve
    pub to_reserve: f64,
    /// Routed to investments
    pub to_investments: f64,
    /// Per-instrument breakdown of `to_investments`, largest first
    pub allocations: Vec<CapitalAllocation>,
}

impl CapitalSplitPlan {
    /// Amount allocated to one instrument.
    pub fn allocated_to(&self, id: &str) -> f64 {
        self.allocations
            .iter()
            .find(|a| a.instrument_id == id)
            .map(|a| a.amount)
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
