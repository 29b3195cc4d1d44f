//! Domain layer types and invariants.

pub mod error;
pub mod params;
pub mod session;
pub mod types;
