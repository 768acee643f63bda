//! Rebalancing.
//!
//! # Components
//!
//! - **Tolerance**: weight deviation → BUY / HOLD / SELL
//! - **Intra-class**: class target → member weights (layer 2)
//! - **Two-layer**: the run state machine from class targets to actions
//! - **Capital**: new capital → reserve vs investments, per-instrument breakdown
//! - **Orders**: whole-unit order suggestions from actions

pub mod capital;
pub mod intra_class;
pub mod orders;
pub mod tolerance;
pub mod two_layer;

pub use capital::CapitalAllocationSplitter;
pub use intra_class::{ClassAllocation, IntraClassAllocator};
pub use orders::{suggest_orders, OrderSuggestion};
pub use tolerance::{classify, evaluate, BandEvaluation};
pub use two_layer::{RebalanceOutcome, RunStage, TwoLayerRebalancer};
