//! Return series and risk/return estimation.
//!
//! Series are periodic (daily by default) returns, aligned across
//! instruments: observation `t` of every series refers to the same period.
//! Estimates are annualized by `periods_per_year`.

use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

/// Periodic log returns `ln(p_t / p_{t-1})` from a price history.
pub fn log_returns(prices: &[f64]) -> Result<Vec<f64>> {
    if prices.len() < 2 {
        return Err(EngineError::Data(format!(
            "price history needs at least 2 points, got {}",
            prices.len()
        )));
    }
    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(EngineError::Data(format!(
            "price history contains a non-positive or non-finite price ({bad})"
        )));
    }
    Ok(prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect())
}

// ============================================================================
// Return Series
// ============================================================================

/// Aligned return series keyed by instrument id.
#[derive(Debug, Clone, Default)]
pub struct ReturnSeries {
    series: BTreeMap<String, Vec<f64>>,
    observations: usize,
}

impl ReturnSeries {
    /// Validate and wrap a set of series.
    ///
    /// Every series must be finite and of the same length.
    pub fn new(series: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let mut observations = None;
        for (id, values) in &series {
            if let Some(bad) = values.iter().find(|r| !r.is_finite()) {
                return Err(EngineError::Data(format!(
                    "return series of {id} contains a non-finite value ({bad})"
                )));
            }
            match observations {
                None => observations = Some(values.len()),
                Some(len) if len != values.len() => {
                    return Err(EngineError::Data(format!(
                        "return series of {id} has {} observations, expected {len}",
                        values.len()
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(Self {
            series,
            observations: observations.unwrap_or(0),
        })
    }

    /// Series of one instrument.
    pub fn get(&self, id: &str) -> Option<&[f64]> {
        self.series.get(id).map(Vec::as_slice)
    }

    fn require(&self, id: &str) -> Result<&[f64]> {
        self.get(id)
            .ok_or_else(|| EngineError::Data(format!("missing return series for {id}")))
    }

    /// Weighted aggregate series of a group of instruments.
    ///
    /// Weights are normalized; an all-zero weight vector falls back to
    /// equal weights.
    pub fn aggregate(&self, members: &[(&str, f64)]) -> Result<Vec<f64>> {
        if members.is_empty() {
            return Err(EngineError::Data("cannot aggregate an empty group".into()));
        }
        let total: f64 = members.iter().map(|(_, w)| w).sum();
        let equal = 1.0 / members.len() as f64;

        let mut aggregate = vec![0.0; self.observations];
        for (id, weight) in members {
            let series = self.require(id)?;
            let w = if total > 0.0 { weight / total } else { equal };
            for (acc, r) in aggregate.iter_mut().zip(series) {
                *acc += w * r;
            }
        }
        Ok(aggregate)
    }

    /// Annualized mean returns and covariance for `ids`, in that order.
    pub fn estimate(&self, ids: &[String], periods_per_year: u32) -> Result<MarketEstimates> {
        let series = ids
            .iter()
            .map(|id| self.require(id))
            .collect::<Result<Vec<_>>>()?;
        MarketEstimates::from_series(ids.to_vec(), &series, periods_per_year)
    }
}

// ============================================================================
// Market Estimates
// ============================================================================

/// Annualized expected returns and covariance matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketEstimates {
    /// Row/column labels
    pub ids: Vec<String>,
    /// Annualized mean returns
    pub expected_returns: Vec<f64>,
    /// Annualized sample covariance, row-major
    pub covariance: Vec<Vec<f64>>,
}

impl MarketEstimates {
    /// Estimate from raw aligned series.
    pub fn from_series(
        ids: Vec<String>,
        series: &[&[f64]],
        periods_per_year: u32,
    ) -> Result<Self> {
        if ids.len() != series.len() {
            return Err(EngineError::Data(format!(
                "{} labels for {} series",
                ids.len(),
                series.len()
            )));
        }
        let observations = series.first().map_or(0, |s| s.len());
        if observations < 2 {
            return Err(EngineError::Data(format!(
                "return estimation needs at least 2 observations, got {observations}"
            )));
        }
        if series.iter().any(|s| s.len() != observations) {
            return Err(EngineError::Data("return series are not aligned".into()));
        }

        let scale = f64::from(periods_per_year);
        let expected_returns = series.iter().map(|s| s.iter().mean() * scale).collect();

        let n = series.len();
        let mut covariance = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in i..n {
                let cov = series[i].iter().covariance(series[j].iter()) * scale;
                covariance[i][j] = cov;
                covariance[j][i] = cov;
            }
        }

        Ok(Self {
            ids,
            expected_returns,
            covariance,
        })
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there are no assets.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
