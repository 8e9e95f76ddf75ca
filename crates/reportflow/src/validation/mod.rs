//! Structural validation of stage output.

pub mod contract;
pub mod gate;

pub use contract::{Contract, ContractError};
pub use gate::{synthesis_fallback, GateOutcome, ValidationGate};
