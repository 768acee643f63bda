//! Portfolio model.
//!
//! # Components
//!
//! - **Types**: asset classes, instruments, the validated portfolio, targets and actions
//! - **Snapshot**: the JSON input of a run (positions, return histories, reserve)
//! - **Reserve**: emergency reserve status against monthly expenses

pub mod reserve;
pub mod snapshot;
pub mod types;

pub use reserve::ReserveStatus;
pub use snapshot::{PortfolioSnapshot, ReserveSnapshot};
pub use types::{
    ActionKind, AssetClass, CapitalAllocation, CapitalSplitPlan, ClassDrift, EmergencyReserve,
    Instrument, Portfolio, RebalanceAction, TargetAllocation, ToleranceBand, WEIGHT_TOLERANCE,
};
