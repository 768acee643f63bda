//! Configuration validation.
//!
//! Checks ranges and cross-field requirements before the engine resolves
//! a policy, so misconfiguration surfaces as a named field error.

use thiserror::Error;

use crate::config::{
    BandConfig, Config, ObservabilityConfig, PolicyConfig, RebalancePolicyKind, ReserveConfig,
};

/// Class targets must sum to one within this tolerance.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        self.validate_sections(true)
    }

    /// Validate everything except the rebalancing policy.
    ///
    /// For commands that only read the reserve section.
    pub fn validate_without_policy(&self) -> ValidationResult<()> {
        self.validate_sections(false)
    }

    fn validate_sections(&self, with_policy: bool) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if with_policy {
            if let Err(e) = self.policy.validate() {
                errors.push(e);
            }
        }
        if let Err(e) = self.reserve.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration.
    pub fn load_and_validate(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = Self::load_with_env(path)?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }

    /// Load configuration and validate everything but the policy.
    pub fn load_for_reserve(path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let config = Self::load_with_env(path)?;
        config
            .validate_without_policy()
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

impl Validate for PolicyConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        match self.blend_alpha {
            Some(alpha) if !(0.0..=1.0).contains(&alpha) => {
                errors.push(ValidationError::InvalidValue {
                    field: "policy.blend_alpha".into(),
                    reason: format!("{alpha} is outside [0, 1]"),
                });
            }
            None if self.uses_optimizer() => {
                errors.push(ValidationError::MissingField {
                    field: "policy.blend_alpha (required by the markowitz policy)".into(),
                });
            }
            _ => {}
        }

        if self.rebalance_policy == RebalancePolicyKind::Static {
            if let Err(e) = validate_static_targets(self) {
                errors.push(e);
            }
        }

        if let Err(e) = validate_band("policy.default_band", &self.default_band) {
            errors.push(e);
        }
        for (key, band) in &self.tolerance_bands {
            if let Err(e) = validate_band(&format!("policy.tolerance_bands.{key}"), band) {
                errors.push(e);
            }
        }

        for (key, cap) in &self.weight_caps {
            if !cap.is_finite() || *cap <= 0.0 || *cap > 1.0 {
                errors.push(ValidationError::InvalidValue {
                    field: format!("policy.weight_caps.{key}"),
                    reason: format!("{cap} is outside (0, 1]"),
                });
            }
        }

        if !self.risk_free_rate.is_finite() {
            errors.push(ValidationError::InvalidValue {
                field: "policy.risk_free_rate".into(),
                reason: "must be a finite number".into(),
            });
        }
        if self.max_iterations == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "policy.max_iterations".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.periods_per_year == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "policy.periods_per_year".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for ReserveConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !self.monthly_expenses.is_finite() || self.monthly_expenses < 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "reserve.monthly_expenses".into(),
                reason: "must be a non-negative amount".into(),
            });
        }
        Ok(())
    }
}

fn validate_static_targets(policy: &PolicyConfig) -> ValidationResult<()> {
    if policy.static_class_targets.is_empty() {
        return Err(ValidationError::MissingField {
            field: "policy.static_class_targets (required by the static policy)".into(),
        });
    }

    for (class, weight) in &policy.static_class_targets {
        if !weight.is_finite() || !(0.0..=1.0).contains(weight) {
            return Err(ValidationError::InvalidValue {
                field: format!("policy.static_class_targets.{class}"),
                reason: format!("{weight} is outside [0, 1]"),
            });
        }
    }

    let total: f64 = policy.static_class_targets.values().sum();
    if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ValidationError::Conflict {
            reason: format!("policy.static_class_targets sum to {total:.6}, expected 1.0"),
        });
    }

    Ok(())
}

fn validate_band(field: &str, band: &BandConfig) -> ValidationResult<()> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if !valid(band.relative_pct) || !valid(band.absolute_value) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "relative_pct and absolute_value must be non-negative".into(),
        });
    }
    Ok(())
}
