use std::io;
use std::str::FromStr;

use thiserror::Error;

use crate::adapters::fsx::{CreationPolling, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_BASE_SECS};

pub const POLICIES_JSON_ENV: &str = "RETENTION_POLICIES_JSON";
pub const POLICIES_PATH_ENV: &str = "RETENTION_POLICIES_PATH";
pub const POLL_ATTEMPTS_ENV: &str = "SNAPSHOT_POLL_ATTEMPTS";
pub const POLL_BASE_SECS_ENV: &str = "SNAPSHOT_POLL_BASE_SECS";

/// Deployment settings read once per invocation. The policy document is kept
/// as text so that parse errors surface through the policy loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    pub policies_json: String,
    pub polling: CreationPolling,
}

#[derive(Debug, Error)]
pub enum HandlerConfigError {
    #[error("RETENTION_POLICIES_JSON or RETENTION_POLICIES_PATH must be configured")]
    MissingPolicies,

    #[error("failed to read policy file {path}: {source}")]
    PolicyFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

impl HandlerConfig {
    pub fn from_env() -> Result<Self, HandlerConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Inline JSON wins over a file path when both are set.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HandlerConfigError> {
        let inline = lookup(POLICIES_JSON_ENV).filter(|value| !value.trim().is_empty());
        let policies_json = match inline {
            Some(text) => text,
            None => {
                let path = lookup(POLICIES_PATH_ENV)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .ok_or(HandlerConfigError::MissingPolicies)?;
                std::fs::read_to_string(&path)
                    .map_err(|source| HandlerConfigError::PolicyFile { path, source })?
            }
        };

        let attempts = parse_number(&lookup, POLL_ATTEMPTS_ENV)?;
        let base_secs = parse_number(&lookup, POLL_BASE_SECS_ENV)?;
        let polling = CreationPolling {
            attempts: attempts.unwrap_or(DEFAULT_POLL_ATTEMPTS),
            base_secs: base_secs.unwrap_or(DEFAULT_POLL_BASE_SECS),
        };

        Ok(Self {
            policies_json,
            polling,
        })
    }
}

fn parse_number<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, HandlerConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| HandlerConfigError::InvalidNumber { name, value: raw })
}
