//! Configuration management for Folio.
//!
//! The engine reads a single configuration file at `~/.folio/config.json`.
//! A missing file is not an error: every section falls back to its defaults.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (FOLIO_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FOLIO_LOG_LEVEL` → observability.log_level
//! - `FOLIO_LOG_FORMAT` → observability.log_format
//! - `FOLIO_BLEND_ALPHA` → policy.blend_alpha
//! - `FOLIO_RISK_FREE_RATE` → policy.risk_free_rate
//! - `FOLIO_MONTHLY_EXPENSES` → reserve.monthly_expenses
//!
//! # Example
//!
//! ```json
//! {
//!   "observability": { "log_level": "debug", "log_format": "pretty" },
//!   "policy": {
//!     "rebalance_policy": "markowitz",
//!     "blend_alpha": 0.3,
//!     "intra_class_policy": "equal",
//!     "tolerance_bands": { "class:crypto": { "relative_pct": 0.25, "absolute_value": 0.01 } },
//!     "weight_caps": { "class:crypto": 0.10, "BOVA11": 0.30 }
//!   },
//!   "reserve": { "monthly_expenses": 3000.0, "emergency_months": 6 }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".folio"),
        |dirs| dirs.home_dir().join(".folio"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Expand `~` and environment variables in a user supplied path.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rebalancing policy
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Emergency reserve sizing
    #[serde(default)]
    pub reserve: ReserveConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    ///
    /// An explicit path must exist; the default path may be absent.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FOLIO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("FOLIO_LOG_FORMAT") {
            self.observability.log_format = format;
        }

        if let Ok(alpha) = std::env::var("FOLIO_BLEND_ALPHA") {
            match alpha.parse() {
                Ok(a) => self.policy.blend_alpha = Some(a),
                Err(_) => tracing::warn!(value = %alpha, "Ignoring unparsable FOLIO_BLEND_ALPHA"),
            }
        }
        if let Ok(rate) = std::env::var("FOLIO_RISK_FREE_RATE") {
            match rate.parse() {
                Ok(r) => self.policy.risk_free_rate = r,
                Err(_) => tracing::warn!(value = %rate, "Ignoring unparsable FOLIO_RISK_FREE_RATE"),
            }
        }
        if let Ok(expenses) = std::env::var("FOLIO_MONTHLY_EXPENSES") {
            match expenses.parse() {
                Ok(e) => self.reserve.monthly_expenses = e,
                Err(_) => {
                    tracing::warn!(value = %expenses, "Ignoring unparsable FOLIO_MONTHLY_EXPENSES")
                }
            }
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to cap at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

// ============================================================================
// Policy Configuration
// ============================================================================

/// Where class-level target weights come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancePolicyKind {
    /// Fixed class targets from `static_class_targets`
    #[default]
    Static,
    /// Mean-variance optimization over class aggregates
    Markowitz,
}

/// How weights are split among the instruments of one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntraClassPolicyKind {
    /// Every member gets the same weight
    #[default]
    #[serde(alias = "equal_weight")]
    Equal,
    /// Mean-variance optimization scoped to the class members
    Markowitz,
}

/// Point of the efficient frontier the optimizer targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerObjective {
    /// Tangency portfolio against the risk-free rate
    #[default]
    MaxSharpe,
    /// Global minimum variance portfolio
    MinVariance,
}

/// Order in which new capital fills underweight instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapitalRanking {
    /// Fill in order of shortfall relative to target value
    #[default]
    LargestRelativeShortfall,
    /// Fill in order of shortfall amount
    LargestAbsoluteShortfall,
    /// Pro-rata to shortfall amount
    Proportional,
}

/// No-action zone around a target weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    /// Tolerance as a fraction of the target weight (0.20 = ±20% of target)
    pub relative_pct: f64,
    /// Tolerance floor in weight units (0.015 = ±1.5 percentage points)
    pub absolute_value: f64,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            relative_pct: 0.20,
            absolute_value: 0.015,
        }
    }
}

/// Rebalancing policy.
///
/// Keys of `static_class_targets` and `intra_class_overrides` are asset class
/// names (`equities`, `reits`, `crypto`, `government_bonds`,
/// `private_fixed_income`). Keys of `tolerance_bands` and `weight_caps` are
/// instrument ids, or class names prefixed with `class:`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Class-level target source
    #[serde(default)]
    pub rebalance_policy: RebalancePolicyKind,

    /// Interpolation between current (0.0) and optimizer (1.0) weights.
    /// Required whenever an optimizer policy is selected.
    #[serde(default)]
    pub blend_alpha: Option<f64>,

    /// Class targets for the static policy, summing to 1.0
    #[serde(default)]
    pub static_class_targets: BTreeMap<String, f64>,

    /// Band used when neither the instrument nor its class has one
    #[serde(default)]
    pub default_band: BandConfig,

    /// Bands keyed by instrument id or `class:<asset class>`
    #[serde(default)]
    pub tolerance_bands: BTreeMap<String, BandConfig>,

    /// Intra-class policy applied to every class
    #[serde(default)]
    pub intra_class_policy: IntraClassPolicyKind,

    /// Intra-class policy per asset class
    #[serde(default)]
    pub intra_class_overrides: BTreeMap<String, IntraClassPolicyKind>,

    /// Maximum portfolio weight keyed by instrument id or `class:<asset class>`
    #[serde(default)]
    pub weight_caps: BTreeMap<String, f64>,

    /// Optimizer objective
    #[serde(default)]
    pub objective: OptimizerObjective,

    /// Annual risk-free rate for the Sharpe ratio
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Iteration budget per solver run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Return observations per year (252 for daily data)
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: u32,

    /// Shortfall ranking for new capital
    #[serde(default)]
    pub capital_ranking: CapitalRanking,

    /// Maximum number of order suggestions in a plan
    #[serde(default = "default_max_orders")]
    pub max_orders: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rebalance_policy: RebalancePolicyKind::default(),
            blend_alpha: None,
            static_class_targets: BTreeMap::new(),
            default_band: BandConfig::default(),
            tolerance_bands: BTreeMap::new(),
            intra_class_policy: IntraClassPolicyKind::default(),
            intra_class_overrides: BTreeMap::new(),
            weight_caps: BTreeMap::new(),
            objective: OptimizerObjective::default(),
            risk_free_rate: default_risk_free_rate(),
            max_iterations: default_max_iterations(),
            periods_per_year: default_periods_per_year(),
            capital_ranking: CapitalRanking::default(),
            max_orders: default_max_orders(),
        }
    }
}

impl PolicyConfig {
    /// Whether any layer runs the optimizer.
    pub fn uses_optimizer(&self) -> bool {
        self.rebalance_policy == RebalancePolicyKind::Markowitz
            || self.intra_class_policy == IntraClassPolicyKind::Markowitz
            || self
                .intra_class_overrides
                .values()
                .any(|p| *p == IntraClassPolicyKind::Markowitz)
    }
}

// ============================================================================
// Reserve Configuration
// ============================================================================

/// Emergency reserve sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveConfig {
    /// Monthly living expenses
    #[serde(default = "default_monthly_expenses")]
    pub monthly_expenses: f64,

    /// Months of expenses the reserve should cover
    #[serde(default = "default_emergency_months")]
    pub emergency_months: u32,
}

impl Default for ReserveConfig {
    fn default() -> Self {
        Self {
            monthly_expenses: default_monthly_expenses(),
            emergency_months: default_emergency_months(),
        }
    }
}

impl ReserveConfig {
    /// Reserve target implied by expenses and coverage months.
    pub fn target_value(&self) -> f64 {
        self.monthly_expenses * f64::from(self.emergency_months)
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_risk_free_rate() -> f64 {
    0.15
}
fn default_max_iterations() -> usize {
    10_000
}
fn default_periods_per_year() -> u32 {
    252
}
fn default_max_orders() -> usize {
    5
}
fn default_monthly_expenses() -> f64 {
    3000.0
}
fn default_emergency_months() -> u32 {
    6
}
