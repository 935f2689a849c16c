//! AWS-oriented adapters and handlers for scheduled snapshot retention.
//!
//! This crate owns runtime integration details (the Lambda entry point, the
//! FSx provider adapter, and environment configuration) on top of the
//! provider-neutral primitives in `snapshot_retention_core`.

pub mod adapters;
pub mod config;
pub mod handlers;
