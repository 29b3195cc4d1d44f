//! Infrastructure adapters and runtime bootstrap.

pub mod device;
pub mod error;
pub mod http;
pub mod telemetry;
pub mod workspace;
