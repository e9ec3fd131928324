//! Position sizing. The bot's only sizer is Kelly-criterion based, with an
//! optional volatility damper, per §4.6 of the control-plane design.

pub mod error;
pub mod kelly;

pub use error::RiskError;
pub use kelly::KellyRiskSizer;
