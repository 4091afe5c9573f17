//! Runtime bootstrap for the maintenance binary.

pub mod error;
pub mod telemetry;
