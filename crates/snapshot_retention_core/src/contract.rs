use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const RESPONSE_SCHEMA_VERSION: &str = "v1";
/// Largest number of snapshots the provider keeps on one instance.
pub const PROVIDER_SNAPSHOT_CEILING: usize = 240;
pub const MAX_POLICY_NAME_LENGTH: usize = 50;
pub const MAX_INSTANCES_PER_POLICY: usize = 8;

pub const STATUS_OK: &str = "ok";
pub const STATUS_PARTIAL_FAILURE: &str = "partial_failure";
pub const INSTANCE_STATUS_ENFORCED: &str = "enforced";
pub const INSTANCE_STATUS_FAILED: &str = "failed";

/// Which policies a scheduled firing applies to. Empty means all of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TriggerRequest {
    #[serde(default)]
    pub policies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
}

impl TriggerRequest {
    pub fn for_policies<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policies: names.into_iter().map(Into::into).collect(),
            policy: None,
        }
    }

    /// Policy names requested by the trigger, in request order.
    pub fn selection(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policy.iter().cloned().collect();
        names.extend(self.policies.iter().cloned());
        names
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceOutcomeRecord {
    pub policy: String,
    pub instance: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retained_snapshots: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceOutcomeRecord {
    pub fn is_failure(&self) -> bool {
        self.status == INSTANCE_STATUS_FAILED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerResponse {
    pub status: String,
    pub schema_version: String,
    pub invoked_at: String,
    pub config_fingerprint: String,
    pub instances: Vec<InstanceOutcomeRecord>,
}

impl TriggerResponse {
    pub fn new(
        invoked_at: impl Into<String>,
        config_fingerprint: impl Into<String>,
        instances: Vec<InstanceOutcomeRecord>,
    ) -> Self {
        let status = if instances.iter().any(InstanceOutcomeRecord::is_failure) {
            STATUS_PARTIAL_FAILURE
        } else {
            STATUS_OK
        };
        Self {
            status: status.to_string(),
            schema_version: RESPONSE_SCHEMA_VERSION.to_string(),
            invoked_at: invoked_at.into(),
            config_fingerprint: config_fingerprint.into(),
            instances,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstanceOutcomeRecord> {
        self.instances.iter().filter(|record| record.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Invalid or missing policy configuration. Aborts the whole invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("malformed policy configuration: {0}")]
    MalformedJson(String),

    #[error("no retention policies are configured")]
    NoPolicies,

    #[error("policy name cannot be empty")]
    EmptyPolicyName,

    #[error("policy name '{name}' must be at most {max} characters long")]
    PolicyNameTooLong { name: String, max: usize },

    #[error("policy name '{name}' may only contain ASCII letters, digits, '-' and '_'")]
    InvalidPolicyName { name: String },

    #[error("policy '{name}' is defined more than once")]
    DuplicatePolicy { name: String },

    #[error("policy '{policy}' is missing required field '{field}'")]
    MissingField { policy: String, field: &'static str },

    #[error("policy '{policy}' has maxSnapshots={value}; it must be a positive integer")]
    NonPositiveMaxSnapshots { policy: String, value: i64 },

    #[error("policy '{policy}' has maxSnapshots={value}; the provider keeps at most {ceiling}")]
    MaxSnapshotsAboveCeiling {
        policy: String,
        value: i64,
        ceiling: usize,
    },

    #[error("policy '{policy}' has an empty instances list")]
    EmptyInstanceList { policy: String },

    #[error("policy '{policy}' lists {count} instances; at most {max} are allowed")]
    TooManyInstances {
        policy: String,
        count: usize,
        max: usize,
    },

    #[error("policy '{policy}' contains a blank instance identifier")]
    BlankInstance { policy: String },

    #[error("trigger requested unknown policy '{name}'")]
    UnknownPolicy { name: String },

    #[error("malformed trigger payload: {0}")]
    MalformedTrigger(String),
}

impl ConfigurationError {
    /// Configuration field the error points at, when there is one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::EmptyPolicyName
            | Self::PolicyNameTooLong { .. }
            | Self::InvalidPolicyName { .. }
            | Self::DuplicatePolicy { .. } => Some("name"),
            Self::MissingField { field, .. } => Some(*field),
            Self::NonPositiveMaxSnapshots { .. } | Self::MaxSnapshotsAboveCeiling { .. } => {
                Some("maxSnapshots")
            }
            Self::EmptyInstanceList { .. }
            | Self::TooManyInstances { .. }
            | Self::BlankInstance { .. } => Some("instances"),
            Self::MalformedJson(_)
            | Self::NoPolicies
            | Self::UnknownPolicy { .. }
            | Self::MalformedTrigger(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: &str) -> InstanceOutcomeRecord {
        InstanceOutcomeRecord {
            policy: "daily".to_string(),
            instance: "fsvol-1".to_string(),
            status: status.to_string(),
            created_snapshot: None,
            deleted_snapshot: None,
            retained_snapshots: None,
            error: None,
        }
    }

    #[test]
    fn selection_merges_single_and_list_forms() {
        let request: TriggerRequest =
            serde_json::from_str(r#"{"policy":"hourly","policies":["daily"]}"#)
                .expect("trigger should parse");
        assert_eq!(request.selection(), vec!["hourly", "daily"]);
    }

    #[test]
    fn trigger_rejects_unknown_fields() {
        let error = serde_json::from_str::<TriggerRequest>(r#"{"retention":"daily"}"#)
            .expect_err("unknown field should fail");
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn response_status_reflects_instance_failures() {
        let ok = TriggerResponse::new("t", "fp", vec![outcome(INSTANCE_STATUS_ENFORCED)]);
        assert_eq!(ok.status, STATUS_OK);
        assert!(!ok.has_failures());

        let partial = TriggerResponse::new(
            "t",
            "fp",
            vec![
                outcome(INSTANCE_STATUS_ENFORCED),
                outcome(INSTANCE_STATUS_FAILED),
            ],
        );
        assert_eq!(partial.status, STATUS_PARTIAL_FAILURE);
        assert_eq!(partial.failures().count(), 1);
    }

    #[test]
    fn optional_outcome_fields_are_omitted() {
        let json = serde_json::to_value(outcome(INSTANCE_STATUS_ENFORCED))
            .expect("outcome should serialize");
        assert!(json.get("error").is_none());
        assert!(json.get("deleted_snapshot").is_none());
    }

    #[test]
    fn errors_point_at_their_field() {
        let error = ConfigurationError::NonPositiveMaxSnapshots {
            policy: "daily".to_string(),
            value: 0,
        };
        assert_eq!(error.field(), Some("maxSnapshots"));
        assert_eq!(ConfigurationError::NoPolicies.field(), None);
    }
}
