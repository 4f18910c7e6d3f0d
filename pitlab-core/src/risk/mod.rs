//! Per-cycle risk and cost inputs.

pub mod snapshot;

pub use snapshot::{universe_hash, RiskSnapshot, SnapshotBuilder};
