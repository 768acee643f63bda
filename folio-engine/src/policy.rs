//! Rebalancing policy, resolved once per engine from configuration.
//!
//! String keys from the config file become typed lookups here. Keys of
//! `tolerance_bands` and `weight_caps` name an asset class only with a
//! `class:` prefix (`class:crypto`); any other key is an instrument id, even
//! one that reads like a class alias such as `ETF` or `FII`.

use std::collections::BTreeMap;

use folio_common::config::{
    CapitalRanking, IntraClassPolicyKind, PolicyConfig, RebalancePolicyKind,
};

use crate::error::{EngineError, Result};
use crate::optimizer::OptimizerSettings;
use crate::portfolio::{AssetClass, Instrument, ToleranceBand};

/// Where class-level targets come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassTargetPolicy {
    /// Fixed weights per class
    Static(BTreeMap<AssetClass, f64>),
    /// Mean-variance optimization over class aggregates
    Markowitz(OptimizerSettings),
}

/// How a class target is split among the class members.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntraClassPolicy {
    EqualWeight,
    Markowitz(OptimizerSettings),
}

/// Fully resolved rebalancing policy.
#[derive(Debug, Clone)]
pub struct RebalancePolicy {
    pub class_targets: ClassTargetPolicy,
    pub intra_class: IntraClassPolicy,
    pub intra_class_overrides: BTreeMap<AssetClass, IntraClassPolicy>,
    pub default_band: ToleranceBand,
    pub class_bands: BTreeMap<AssetClass, ToleranceBand>,
    pub instrument_bands: BTreeMap<String, ToleranceBand>,
    pub class_caps: BTreeMap<AssetClass, f64>,
    pub instrument_caps: BTreeMap<String, f64>,
    pub periods_per_year: u32,
    pub capital_ranking: CapitalRanking,
    pub max_orders: usize,
}

impl RebalancePolicy {
    /// Resolve a policy configuration.
    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let settings = if config.uses_optimizer() {
            let blend_alpha = config.blend_alpha.ok_or_else(|| {
                EngineError::Config(
                    "blend_alpha must be set explicitly when an optimizer policy is selected"
                        .into(),
                )
            })?;
            if !(0.0..=1.0).contains(&blend_alpha) {
                return Err(EngineError::Config(format!(
                    "blend_alpha must be within [0, 1], got {blend_alpha}"
                )));
            }
            Some(OptimizerSettings {
                blend_alpha,
                objective: config.objective,
                risk_free_rate: config.risk_free_rate,
                max_iterations: config.max_iterations,
            })
        } else {
            None
        };

        let optimizer = |kind: IntraClassPolicyKind| -> Result<IntraClassPolicy> {
            match (kind, settings) {
                (IntraClassPolicyKind::Equal, _) => Ok(IntraClassPolicy::EqualWeight),
                (IntraClassPolicyKind::Markowitz, Some(settings)) => {
                    Ok(IntraClassPolicy::Markowitz(settings))
                }
                (IntraClassPolicyKind::Markowitz, None) => Err(EngineError::Config(
                    "optimizer settings unavailable".into(),
                )),
            }
        };

        let class_targets = match (config.rebalance_policy, settings) {
            (RebalancePolicyKind::Static, _) => {
                let mut targets = BTreeMap::new();
                for (key, weight) in &config.static_class_targets {
                    targets.insert(parse_class(key)?, *weight);
                }
                if targets.is_empty() {
                    return Err(EngineError::Config(
                        "static policy selected without static_class_targets".into(),
                    ));
                }
                ClassTargetPolicy::Static(targets)
            }
            (RebalancePolicyKind::Markowitz, Some(settings)) => {
                ClassTargetPolicy::Markowitz(settings)
            }
            (RebalancePolicyKind::Markowitz, None) => {
                return Err(EngineError::Config("optimizer settings unavailable".into()))
            }
        };

        let mut intra_class_overrides = BTreeMap::new();
        for (key, kind) in &config.intra_class_overrides {
            intra_class_overrides.insert(parse_class(key)?, optimizer(*kind)?);
        }

        let mut class_bands = BTreeMap::new();
        let mut instrument_bands = BTreeMap::new();
        for (key, band) in &config.tolerance_bands {
            let band = ToleranceBand::try_from(*band)
                .map_err(|e| EngineError::Config(format!("band '{key}': {e}")))?;
            match class_key(key)? {
                Some(class) => {
                    class_bands.insert(class, band);
                }
                None => {
                    instrument_bands.insert(key.clone(), band);
                }
            }
        }

        let mut class_caps = BTreeMap::new();
        let mut instrument_caps = BTreeMap::new();
        for (key, cap) in &config.weight_caps {
            if !(cap.is_finite() && *cap > 0.0 && *cap <= 1.0) {
                return Err(EngineError::Config(format!(
                    "weight cap '{key}' must be within (0, 1], got {cap}"
                )));
            }
            match class_key(key)? {
                Some(class) => {
                    class_caps.insert(class, *cap);
                }
                None => {
                    instrument_caps.insert(key.clone(), *cap);
                }
            }
        }

        let default_band = ToleranceBand::try_from(config.default_band)
            .map_err(|e| EngineError::Config(format!("default band: {e}")))?;

        Ok(Self {
            class_targets,
            intra_class: optimizer(config.intra_class_policy)?,
            intra_class_overrides,
            default_band,
            class_bands,
            instrument_bands,
            class_caps,
            instrument_caps,
            periods_per_year: config.periods_per_year.max(1),
            capital_ranking: config.capital_ranking,
            max_orders: config.max_orders,
        })
    }

    /// Static class targets with default bands and equal intra-class weights.
    pub fn static_targets(targets: BTreeMap<AssetClass, f64>) -> Self {
        Self {
            class_targets: ClassTargetPolicy::Static(targets),
            intra_class: IntraClassPolicy::EqualWeight,
            intra_class_overrides: BTreeMap::new(),
            default_band: ToleranceBand {
                relative_pct: 0.20,
                absolute_value: 0.015,
            },
            class_bands: BTreeMap::new(),
            instrument_bands: BTreeMap::new(),
            class_caps: BTreeMap::new(),
            instrument_caps: BTreeMap::new(),
            periods_per_year: 252,
            capital_ranking: CapitalRanking::default(),
            max_orders: 5,
        }
    }

    /// Band for an instrument: its own, else its class band, else the default.
    pub fn band_for(&self, instrument: &Instrument) -> ToleranceBand {
        self.instrument_bands
            .get(&instrument.id)
            .copied()
            .unwrap_or_else(|| self.class_band(instrument.asset_class))
    }

    /// Band for a class, else the default.
    pub fn class_band(&self, class: AssetClass) -> ToleranceBand {
        self.class_bands
            .get(&class)
            .copied()
            .unwrap_or(self.default_band)
    }

    /// Intra-class policy for one class.
    pub fn intra_policy(&self, class: AssetClass) -> IntraClassPolicy {
        self.intra_class_overrides
            .get(&class)
            .copied()
            .unwrap_or(self.intra_class)
    }

    /// Portfolio-level cap of a class.
    pub fn class_cap(&self, class: AssetClass) -> Option<f64> {
        self.class_caps.get(&class).copied()
    }

    /// Portfolio-level cap of an instrument.
    pub fn instrument_cap(&self, id: &str) -> Option<f64> {
        self.instrument_caps.get(id).copied()
    }
}

fn parse_class(key: &str) -> Result<AssetClass> {
    key.parse()
        .map_err(|_| EngineError::Config(format!("unknown asset class '{key}'")))
}

/// Prefix marking a band or cap key as an asset class.
const CLASS_KEY_PREFIX: &str = "class:";

/// Class named by a band or cap key, `None` for an instrument id.
fn class_key(key: &str) -> Result<Option<AssetClass>> {
    key.strip_prefix(CLASS_KEY_PREFIX)
        .map(parse_class)
        .transpose()
}
