//! Folio Engine Library
//!
//! Two-layer portfolio rebalancing: asset-class targets first, instrument
//! weights inside each class second, then tolerance bands decide what to
//! trade.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      folio-engine (Rust Library)                    │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Markowitz      │  │  Two-Layer      │  │  Capital        │     │
//! │  │  Optimizer      │─▶│  Rebalancer     │─▶│  Splitter       │     │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘     │
//! │           ▲                    │                                    │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐     │
//! │  │  Return         │  │  Tolerance      │  │  Reserve /      │     │
//! │  │  Estimates      │  │  Bands          │  │  Orders         │     │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────┘     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Tolerance bands
//! - `tolerance = max(relative_pct × target, absolute_value)`
//! - Inside the band: HOLD. Above: SELL. Below: BUY.
//!
//! ## Blending
//! - `w = α·w_optimizer + (1 − α)·w_current`
//! - α = 0 keeps the portfolio as is, α = 1 takes the optimizer output
//!
//! ## Capital
//! - The emergency reserve is filled before anything is invested
//! - Investments close shortfalls against target first, largest relative
//!   shortfall first by default

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod engine;
pub mod error;
pub mod optimizer;
pub mod policy;
pub mod portfolio;
pub mod rebalance;
pub mod returns;

pub use engine::{RebalanceEngine, RebalancePlan};
pub use error::{EngineError, Result};
pub use optimizer::{MarkowitzOptimizer, OptimizerSettings};
pub use policy::RebalancePolicy;
pub use portfolio::{AssetClass, Instrument, Portfolio, PortfolioSnapshot};
