//! Folio Common - configuration, validation and logging shared by the
//! Folio rebalancing engine and its command line front end.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.folio/config.json` + `FOLIO_*` overrides)
//! - Configuration validation
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod validation;

pub use config::{
    BandConfig, CapitalRanking, Config, IntraClassPolicyKind, ObservabilityConfig,
    OptimizerObjective, PolicyConfig, RebalancePolicyKind, ReserveConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};
