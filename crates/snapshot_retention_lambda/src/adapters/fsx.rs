use std::future::Future;
use std::time::Duration;

use aws_sdk_fsx::error::{DisplayErrorContext, SdkError};
use aws_sdk_fsx::types::{
    Snapshot, SnapshotFilter, SnapshotFilterName, SnapshotLifecycle, Volume, VolumeLifecycle,
    VolumeType,
};
use chrono::{DateTime, Utc};
use snapshot_retention_core::snapshot::{InstanceRef, SnapshotRecord, SnapshotState};
use tracing::{info, warn};

use super::provider::{InstanceDescription, ProviderError, ProviderOperation, SnapshotProvider};

pub const DEFAULT_POLL_ATTEMPTS: u32 = 8;
pub const DEFAULT_POLL_BASE_SECS: u64 = 2;

/// How long `create_snapshot` waits for a new snapshot to become available.
/// The snapshot is checked `attempts` times in total, counting the create
/// response, and the wait before check `n + 1` is `base_secs^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationPolling {
    pub attempts: u32,
    pub base_secs: u64,
}

impl Default for CreationPolling {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            base_secs: DEFAULT_POLL_BASE_SECS,
        }
    }
}

impl CreationPolling {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_secs.saturating_pow(attempt))
    }

    /// Waits between consecutive checks. Nothing is slept after the last one.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.attempts).map(|attempt| self.delay_for(attempt))
    }
}

/// FSx for OpenZFS volumes and their snapshots.
pub struct FsxSnapshotProvider {
    client: aws_sdk_fsx::Client,
    polling: CreationPolling,
}

impl FsxSnapshotProvider {
    pub fn new(client: aws_sdk_fsx::Client, polling: CreationPolling) -> Self {
        Self { client, polling }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
    }
}

impl SnapshotProvider for FsxSnapshotProvider {
    fn describe_instance(
        &self,
        instance: &InstanceRef,
    ) -> Result<InstanceDescription, ProviderError> {
        let client = self.client.clone();
        let volume_id = instance.resource_name().to_string();
        let operation = ProviderOperation::DescribeInstance;

        self.block_on(async move {
            let output = client
                .describe_volumes()
                .volume_ids(volume_id.clone())
                .send()
                .await;

            match output {
                Ok(output) => output
                    .volumes()
                    .iter()
                    .find(|volume| volume.volume_id() == Some(volume_id.as_str()))
                    .map(|volume| describe_volume(&volume_id, volume))
                    .ok_or(ProviderError::not_found(operation, volume_id)),
                Err(error)
                    if error
                        .as_service_error()
                        .map(|service_error| service_error.is_volume_not_found())
                        .unwrap_or(false) =>
                {
                    Err(ProviderError::not_found(operation, volume_id))
                }
                Err(error) => Err(unavailable(operation, error)),
            }
        })
    }

    fn list_snapshots(&self, instance: &InstanceRef) -> Result<Vec<SnapshotRecord>, ProviderError> {
        let client = self.client.clone();
        let volume_id = instance.resource_name().to_string();

        self.block_on(async move {
            let mut records = Vec::new();
            let mut next_token: Option<String> = None;
            loop {
                let output = client
                    .describe_snapshots()
                    .filters(
                        SnapshotFilter::builder()
                            .name(SnapshotFilterName::VolumeId)
                            .values(volume_id.clone())
                            .build(),
                    )
                    .set_next_token(next_token.take())
                    .send()
                    .await
                    .map_err(|error| unavailable(ProviderOperation::ListSnapshots, error))?;

                records.extend(
                    output
                        .snapshots()
                        .iter()
                        .filter_map(|snapshot| snapshot_record(&volume_id, snapshot)),
                );

                match output.next_token() {
                    Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                    _ => break,
                }
            }
            Ok(records)
        })
    }

    fn create_snapshot(
        &self,
        instance: &InstanceRef,
        name: &str,
    ) -> Result<SnapshotRecord, ProviderError> {
        let client = self.client.clone();
        let volume_id = instance.resource_name().to_string();
        let snapshot_name = name.to_string();
        let polling = self.polling;

        self.block_on(async move {
            let output = client
                .create_snapshot()
                .name(snapshot_name.clone())
                .volume_id(volume_id.clone())
                .send()
                .await
                .map_err(|error| unavailable(ProviderOperation::CreateSnapshot, error))?;

            let mut current = output
                .snapshot()
                .and_then(|snapshot| snapshot_record(&volume_id, snapshot))
                .ok_or_else(|| {
                    ProviderError::operation_failed(
                        ProviderOperation::CreateSnapshot,
                        format!("create response for {snapshot_name} carried no snapshot"),
                    )
                })?;
            info!(
                component = "fsx_provider",
                instance = %volume_id,
                snapshot_id = %current.snapshot_id,
                snapshot_name = %snapshot_name,
                "snapshot_creation_started"
            );

            for delay in polling.delays() {
                if current.is_ready() {
                    return Ok(current);
                }
                tokio::time::sleep(delay).await;
                current = describe_snapshot(&client, &volume_id, &current.snapshot_id).await?;
            }

            if current.is_ready() {
                Ok(current)
            } else {
                warn!(
                    component = "fsx_provider",
                    instance = %volume_id,
                    snapshot_id = %current.snapshot_id,
                    attempts = polling.attempts,
                    "snapshot_creation_timed_out"
                );
                let snapshot_id = &current.snapshot_id;
                let state = current.state;
                let checks = polling.attempts;
                Err(ProviderError::operation_failed(
                    ProviderOperation::CreateSnapshot,
                    format!("snapshot {snapshot_id} is still {state:?} after {checks} checks"),
                ))
            }
        })
    }

    fn delete_snapshot(
        &self,
        instance: &InstanceRef,
        snapshot_id: &str,
    ) -> Result<(), ProviderError> {
        let client = self.client.clone();
        let volume_id = instance.resource_name().to_string();
        let snapshot_id = snapshot_id.to_string();

        self.block_on(async move {
            client
                .delete_snapshot()
                .snapshot_id(snapshot_id.clone())
                .send()
                .await
                .map(|_| {
                    info!(
                        component = "fsx_provider",
                        instance = %volume_id,
                        snapshot_id = %snapshot_id,
                        "snapshot_deletion_started"
                    );
                })
                .map_err(|error| unavailable(ProviderOperation::DeleteSnapshot, error))
        })
    }
}

async fn describe_snapshot(
    client: &aws_sdk_fsx::Client,
    volume_id: &str,
    snapshot_id: &str,
) -> Result<SnapshotRecord, ProviderError> {
    let output = client
        .describe_snapshots()
        .snapshot_ids(snapshot_id)
        .send()
        .await
        .map_err(|error| unavailable(ProviderOperation::CreateSnapshot, error))?;

    output
        .snapshots()
        .iter()
        .filter_map(|snapshot| snapshot_record(volume_id, snapshot))
        .find(|record| record.snapshot_id == snapshot_id)
        .ok_or_else(|| {
            ProviderError::operation_failed(
                ProviderOperation::CreateSnapshot,
                format!("snapshot {snapshot_id} disappeared while being created"),
            )
        })
}

fn unavailable<E, R>(operation: ProviderOperation, error: SdkError<E, R>) -> ProviderError
where
    E: std::error::Error + 'static,
    R: std::fmt::Debug,
{
    ProviderError::unavailable(operation, DisplayErrorContext(&error).to_string())
}

fn describe_volume(volume_id: &str, volume: &Volume) -> InstanceDescription {
    let lifecycle = volume.lifecycle();
    let volume_type = volume.volume_type();
    InstanceDescription {
        instance_id: volume_id.to_string(),
        state: lifecycle
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        kind: volume_type
            .map(|value| value.as_str().to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        ready: matches!(lifecycle, Some(VolumeLifecycle::Available)),
        supports_snapshots: matches!(volume_type, Some(VolumeType::Openzfs)),
    }
}

/// Records without an id or creation time cannot be ordered or deleted and
/// are left out.
fn snapshot_record(volume_id: &str, snapshot: &Snapshot) -> Option<SnapshotRecord> {
    let snapshot_id = snapshot.snapshot_id()?;
    let created_at = snapshot
        .creation_time()
        .and_then(|time| DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos()))?;

    Some(SnapshotRecord {
        instance_id: snapshot.volume_id().unwrap_or(volume_id).to_string(),
        snapshot_id: snapshot_id.to_string(),
        name: snapshot.name().unwrap_or_default().to_string(),
        created_at,
        state: snapshot_state(snapshot.lifecycle()),
    })
}

fn snapshot_state(lifecycle: Option<&SnapshotLifecycle>) -> SnapshotState {
    match lifecycle {
        Some(SnapshotLifecycle::Available) => SnapshotState::Ready,
        Some(SnapshotLifecycle::Creating) | Some(SnapshotLifecycle::Pending) => {
            SnapshotState::Creating
        }
        Some(SnapshotLifecycle::Deleting) => SnapshotState::Deleting,
        _ => SnapshotState::Unknown,
    }
}
