use chrono::{DateTime, Utc};
use snapshot_retention_core::contract::{
    InstanceOutcomeRecord, INSTANCE_STATUS_ENFORCED, INSTANCE_STATUS_FAILED,
    PROVIDER_SNAPSHOT_CEILING,
};
use snapshot_retention_core::policy::RetentionPolicy;
use snapshot_retention_core::selection::plan_retention;
use snapshot_retention_core::snapshot::{scheduled_snapshot_name, InstanceRef, SnapshotRecord};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::adapters::provider::{ProviderError, ProviderOperation, SnapshotProvider};

const COMPONENT: &str = "retention_enforcer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementContext {
    pub invoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementSummary {
    pub created: SnapshotRecord,
    pub deleted: Option<SnapshotRecord>,
    /// Policy-owned snapshots left on the instance after this run.
    pub retained_snapshots: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnforcementError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("instance {instance} is not ready (state {state})")]
    InstanceNotReady { instance: String, state: String },

    #[error("instance {instance} of type {kind} does not support snapshots")]
    SnapshotsUnsupported { instance: String, kind: String },

    #[error("instance {instance} holds {count} snapshots; the provider limit is {ceiling}")]
    CeilingReached {
        instance: String,
        count: usize,
        ceiling: usize,
    },

    #[error("created {} but could not delete the oldest snapshot: {source}", .created.name)]
    TrimFailed {
        created: SnapshotRecord,
        #[source]
        source: ProviderError,
    },
}

impl EnforcementError {
    pub fn operation(&self) -> Option<ProviderOperation> {
        match self {
            Self::Provider(source) => Some(source.operation()),
            Self::TrimFailed { source, .. } => Some(source.operation()),
            Self::InstanceNotReady { .. }
            | Self::SnapshotsUnsupported { .. }
            | Self::CeilingReached { .. } => None,
        }
    }

    /// Name of the failed provider call, or `precondition` when the instance
    /// was refused before any call failed.
    pub fn operation_label(&self) -> &'static str {
        self.operation().map_or("precondition", ProviderOperation::as_str)
    }

    /// The snapshot this run created, when the failure came after creation.
    pub fn created(&self) -> Option<&SnapshotRecord> {
        match self {
            Self::TrimFailed { created, .. } => Some(created),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOutcome {
    pub policy: String,
    pub instance: InstanceRef,
    pub result: Result<EnforcementSummary, EnforcementError>,
}

impl InstanceOutcome {
    pub fn to_record(&self) -> InstanceOutcomeRecord {
        match &self.result {
            Ok(summary) => InstanceOutcomeRecord {
                policy: self.policy.clone(),
                instance: self.instance.to_string(),
                status: INSTANCE_STATUS_ENFORCED.to_string(),
                created_snapshot: Some(summary.created.name.clone()),
                deleted_snapshot: summary.deleted.as_ref().map(|snapshot| snapshot.name.clone()),
                retained_snapshots: Some(summary.retained_snapshots),
                error: None,
            },
            Err(error) => InstanceOutcomeRecord {
                policy: self.policy.clone(),
                instance: self.instance.to_string(),
                status: INSTANCE_STATUS_FAILED.to_string(),
                created_snapshot: error.created().map(|snapshot| snapshot.name.clone()),
                deleted_snapshot: None,
                retained_snapshots: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Creates one snapshot on `instance` and, when the policy's limit is now
/// exceeded, deletes the single oldest snapshot the policy owns.
///
/// Creation always happens first. A failed creation leaves existing
/// snapshots untouched, and a failed deletion still reports the snapshot
/// that was created.
pub fn enforce_instance(
    policy: &RetentionPolicy,
    instance: &InstanceRef,
    context: &EnforcementContext,
    provider: &impl SnapshotProvider,
) -> Result<EnforcementSummary, EnforcementError> {
    let description = provider.describe_instance(instance)?;
    if !description.supports_snapshots {
        return Err(EnforcementError::SnapshotsUnsupported {
            instance: instance.to_string(),
            kind: description.kind,
        });
    }
    if !description.ready {
        return Err(EnforcementError::InstanceNotReady {
            instance: instance.to_string(),
            state: description.state,
        });
    }

    let existing = provider.list_snapshots(instance)?;
    if existing.len() >= PROVIDER_SNAPSHOT_CEILING {
        return Err(EnforcementError::CeilingReached {
            instance: instance.to_string(),
            count: existing.len(),
            ceiling: PROVIDER_SNAPSHOT_CEILING,
        });
    }

    let plan = plan_retention(&existing, &policy.name, policy.max_snapshots);
    let snapshot_name = scheduled_snapshot_name(&policy.name, context.invoked_at);
    let created = provider.create_snapshot(instance, &snapshot_name)?;
    info!(
        component = COMPONENT,
        policy = %policy.name,
        instance = %instance.resource_name(),
        snapshot_id = %created.snapshot_id,
        snapshot_name = %created.name,
        owned_snapshots = plan.count_after_create,
        max_snapshots = policy.max_snapshots,
        "snapshot_created"
    );

    if plan.exceeds_limit_after_run(policy.max_snapshots) {
        warn!(
            component = COMPONENT,
            policy = %policy.name,
            instance = %instance.resource_name(),
            owned_snapshots = plan.owned_before,
            max_snapshots = policy.max_snapshots,
            "retention_exceeded"
        );
    }

    let deleted = match plan.deletion {
        Some(oldest) => {
            if let Err(source) = provider.delete_snapshot(instance, &oldest.snapshot_id) {
                return Err(EnforcementError::TrimFailed { created, source });
            }
            info!(
                component = COMPONENT,
                policy = %policy.name,
                instance = %instance.resource_name(),
                snapshot_id = %oldest.snapshot_id,
                snapshot_name = %oldest.name,
                "snapshot_deleted"
            );
            Some(oldest.clone())
        }
        None => {
            info!(
                component = COMPONENT,
                policy = %policy.name,
                instance = %instance.resource_name(),
                owned_snapshots = plan.count_after_create,
                max_snapshots = policy.max_snapshots,
                "retention_not_reached"
            );
            None
        }
    };

    Ok(EnforcementSummary {
        created,
        deleted,
        retained_snapshots: plan.retained_after,
    })
}

/// Enforces `policy` on each of its instances in order. A failing instance
/// is reported in its outcome and does not stop the remaining ones.
pub fn enforce_policy(
    policy: &RetentionPolicy,
    context: &EnforcementContext,
    provider: &impl SnapshotProvider,
) -> Vec<InstanceOutcome> {
    if policy.target_instances.is_empty() {
        info!(component = COMPONENT, policy = %policy.name, "policy_has_no_instances");
        return Vec::new();
    }

    let mut outcomes = Vec::with_capacity(policy.target_instances.len());
    for instance in &policy.target_instances {
        info!(
            component = COMPONENT,
            policy = %policy.name,
            instance = %instance,
            "instance_started"
        );
        let result = enforce_instance(policy, instance, context, provider);
        match &result {
            Ok(_) => info!(
                component = COMPONENT,
                policy = %policy.name,
                instance = %instance,
                "instance_finished"
            ),
            Err(failure) => error!(
                component = COMPONENT,
                policy = %policy.name,
                instance = %instance,
                operation = failure.operation_label(),
                error = %failure,
                "instance_failed"
            ),
        }
        outcomes.push(InstanceOutcome {
            policy: policy.name.clone(),
            instance: instance.clone(),
            result,
        });
    }

    outcomes
}
