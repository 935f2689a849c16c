use std::fmt;

use snapshot_retention_core::snapshot::{InstanceRef, SnapshotRecord};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderOperation {
    DescribeInstance,
    ListSnapshots,
    CreateSnapshot,
    DeleteSnapshot,
}

impl ProviderOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DescribeInstance => "describe_instance",
            Self::ListSnapshots => "list_snapshots",
            Self::CreateSnapshot => "create_snapshot",
            Self::DeleteSnapshot => "delete_snapshot",
        }
    }
}

impl fmt::Display for ProviderOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{operation}: instance {instance} was not found")]
    NotFound {
        operation: ProviderOperation,
        instance: String,
    },

    #[error("{operation} failed: {message}")]
    Unavailable {
        operation: ProviderOperation,
        message: String,
    },

    #[error("{operation} did not complete: {message}")]
    OperationFailed {
        operation: ProviderOperation,
        message: String,
    },
}

impl ProviderError {
    pub fn not_found(operation: ProviderOperation, instance: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            instance: instance.into(),
        }
    }

    pub fn unavailable(operation: ProviderOperation, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            message: message.into(),
        }
    }

    pub fn operation_failed(operation: ProviderOperation, message: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            message: message.into(),
        }
    }

    pub fn operation(&self) -> ProviderOperation {
        match self {
            Self::NotFound { operation, .. }
            | Self::Unavailable { operation, .. }
            | Self::OperationFailed { operation, .. } => *operation,
        }
    }
}

/// What the enforcer needs to know about an instance before snapshotting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: String,
    pub kind: String,
    pub ready: bool,
    pub supports_snapshots: bool,
}

/// Snapshot operations of the managed file-storage service.
///
/// Calls block until the provider answers. `create_snapshot` returns once the
/// snapshot is usable or has definitively failed.
pub trait SnapshotProvider {
    fn describe_instance(
        &self,
        instance: &InstanceRef,
    ) -> Result<InstanceDescription, ProviderError>;

    fn list_snapshots(&self, instance: &InstanceRef) -> Result<Vec<SnapshotRecord>, ProviderError>;

    fn create_snapshot(
        &self,
        instance: &InstanceRef,
        name: &str,
    ) -> Result<SnapshotRecord, ProviderError>;

    fn delete_snapshot(
        &self,
        instance: &InstanceRef,
        snapshot_id: &str,
    ) -> Result<(), ProviderError>;
}
