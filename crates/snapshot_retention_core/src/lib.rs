//! Provider-neutral snapshot retention primitives.
//!
//! This crate owns policy parsing, trigger/response contracts, snapshot
//! naming, and the deterministic oldest-snapshot selection. It intentionally
//! excludes AWS SDK and Lambda runtime concerns.

pub mod contract;
pub mod policy;
pub mod selection;
pub mod snapshot;
