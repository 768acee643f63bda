//! Point-in-time input snapshot.
//!
//! ```json
//! {
//!   "as_of": "2026-03-31T21:00:00Z",
//!   "instruments": [
//!     { "id": "BOVA11", "asset_class": "ETF", "market_value": 65000.0, "quantity": 520 },
//!     { "id": "TESOURO_SELIC", "asset_class": "TESOURO", "market_value": 35000.0, "quantity": 2.3 }
//!   ],
//!   "returns": { "BOVA11": [0.004, -0.011, ...], "TESOURO_SELIC": [0.0005, ...] },
//!   "prices": { "HGLG11": [160.2, 161.0, ...] },
//!   "reserve": { "current_value": 14000.0 }
//! }
//! ```
//!
//! `returns` takes precedence over `prices` for the same instrument.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use folio_common::config::ReserveConfig;

use super::reserve::ReserveStatus;
use super::types::{EmergencyReserve, Instrument, Portfolio};
use crate::error::{EngineError, Result, ResultExt};
use crate::returns::{log_returns, ReturnSeries};

/// Reserve section of a snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ReserveSnapshot {
    /// Explicit reserve target; derived from expenses when absent
    #[serde(default)]
    pub target_value: Option<f64>,
    /// Current reserve balance
    #[serde(default)]
    pub current_value: f64,
}

/// Everything one run consumes besides policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Snapshot timestamp
    #[serde(default = "Utc::now")]
    pub as_of: DateTime<Utc>,
    /// Ordered positions
    pub instruments: Vec<Instrument>,
    /// Periodic returns per instrument
    #[serde(default)]
    pub returns: BTreeMap<String, Vec<f64>>,
    /// Price histories per instrument, converted to log returns
    #[serde(default)]
    pub prices: BTreeMap<String, Vec<f64>>,
    /// Emergency reserve
    #[serde(default)]
    pub reserve: ReserveSnapshot,
}

impl PortfolioSnapshot {
    /// Snapshot with positions only.
    pub fn new(instruments: Vec<Instrument>) -> Self {
        Self {
            as_of: Utc::now(),
            instruments,
            returns: BTreeMap::new(),
            prices: BTreeMap::new(),
            reserve: ReserveSnapshot::default(),
        }
    }

    /// Parse a JSON snapshot.
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| EngineError::Data(format!("invalid snapshot: {e}")))
    }

    /// Attach a return series.
    pub fn with_returns(mut self, id: impl Into<String>, returns: Vec<f64>) -> Self {
        self.returns.insert(id.into(), returns);
        self
    }

    /// Set the reserve section.
    pub fn with_reserve(mut self, target_value: Option<f64>, current_value: f64) -> Self {
        self.reserve = ReserveSnapshot {
            target_value,
            current_value,
        };
        self
    }

    /// Validated positions.
    pub fn portfolio(&self) -> Result<Portfolio> {
        Portfolio::new(self.instruments.clone(), self.reserve.current_value)
    }

    /// Reserve with its target resolved against the expense settings.
    pub fn emergency_reserve(&self, config: &ReserveConfig) -> Result<EmergencyReserve> {
        let target = self.reserve.target_value.unwrap_or_else(|| config.target_value());
        EmergencyReserve::new(target, self.reserve.current_value)
    }

    /// Reserve progress. Needs no rebalancing policy.
    pub fn reserve_status(&self, config: &ReserveConfig) -> Result<ReserveStatus> {
        let reserve = self.emergency_reserve(config)?;
        Ok(ReserveStatus::evaluate(&reserve, config))
    }

    /// Aligned return series, price histories converted to log returns.
    pub fn return_series(&self) -> Result<ReturnSeries> {
        let mut series = self.returns.clone();
        for (id, prices) in &self.prices {
            if series.contains_key(id) {
                continue;
            }
            let returns = log_returns(prices).context(format!("prices of {id}"))?;
            series.insert(id.clone(), returns);
        }
        ReturnSeries::new(series)
    }
}
