use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use snapshot_retention_core::snapshot::{InstanceRef, SnapshotRecord, SnapshotState};

use super::provider::{InstanceDescription, ProviderError, ProviderOperation, SnapshotProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    DescribeInstance {
        instance: String,
    },
    ListSnapshots {
        instance: String,
    },
    CreateSnapshot {
        instance: String,
        name: String,
    },
    DeleteSnapshot {
        instance: String,
        snapshot_id: String,
    },
}

/// Provider backed by process memory. Records every call so callers can
/// assert on what would have reached the real service.
#[derive(Debug)]
pub struct InMemorySnapshotProvider {
    state: Mutex<MemoryState>,
}

#[derive(Debug)]
struct MemoryState {
    instances: BTreeMap<String, MemoryInstance>,
    calls: Vec<ProviderCall>,
    clock: DateTime<Utc>,
    next_snapshot: u64,
}

#[derive(Debug)]
struct MemoryInstance {
    description: InstanceDescription,
    snapshots: Vec<SnapshotRecord>,
    failing: BTreeSet<ProviderOperation>,
}

impl InMemorySnapshotProvider {
    /// Snapshots created through the provider are stamped starting at
    /// `clock`, one second apart.
    pub fn new(clock: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                instances: BTreeMap::new(),
                calls: Vec::new(),
                clock,
                next_snapshot: 1,
            }),
        }
    }

    pub fn add_instance(&self, instance_id: &str) {
        self.lock().instances.insert(
            instance_id.to_string(),
            MemoryInstance {
                description: InstanceDescription {
                    instance_id: instance_id.to_string(),
                    state: "AVAILABLE".to_string(),
                    kind: "OPENZFS".to_string(),
                    ready: true,
                    supports_snapshots: true,
                },
                snapshots: Vec::new(),
                failing: BTreeSet::new(),
            },
        );
    }

    pub fn set_description(&self, instance_id: &str, description: InstanceDescription) {
        if let Some(instance) = self.lock().instances.get_mut(instance_id) {
            instance.description = description;
        }
    }

    pub fn seed_snapshot(&self, instance_id: &str, snapshot: SnapshotRecord) {
        if let Some(instance) = self.lock().instances.get_mut(instance_id) {
            instance.snapshots.push(snapshot);
        }
    }

    /// Makes every later `operation` against the instance fail.
    pub fn fail_operation(&self, instance_id: &str, operation: ProviderOperation) {
        if let Some(instance) = self.lock().instances.get_mut(instance_id) {
            instance.failing.insert(operation);
        }
    }

    pub fn snapshots(&self, instance_id: &str) -> Vec<SnapshotRecord> {
        self.lock()
            .instances
            .get(instance_id)
            .map(|instance| instance.snapshots.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryState {
    fn instance_mut(
        &mut self,
        instance: &InstanceRef,
        operation: ProviderOperation,
    ) -> Result<&mut MemoryInstance, ProviderError> {
        let entry = self
            .instances
            .get_mut(instance.resource_name())
            .ok_or_else(|| ProviderError::not_found(operation, instance.to_string()))?;
        if entry.failing.contains(&operation) {
            return Err(ProviderError::unavailable(
                operation,
                format!("simulated outage for {instance}"),
            ));
        }
        Ok(entry)
    }
}

impl SnapshotProvider for InMemorySnapshotProvider {
    fn describe_instance(
        &self,
        instance: &InstanceRef,
    ) -> Result<InstanceDescription, ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::DescribeInstance {
            instance: instance.to_string(),
        });
        let entry = state.instance_mut(instance, ProviderOperation::DescribeInstance)?;
        Ok(entry.description.clone())
    }

    fn list_snapshots(&self, instance: &InstanceRef) -> Result<Vec<SnapshotRecord>, ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::ListSnapshots {
            instance: instance.to_string(),
        });
        let entry = state.instance_mut(instance, ProviderOperation::ListSnapshots)?;
        Ok(entry.snapshots.clone())
    }

    fn create_snapshot(
        &self,
        instance: &InstanceRef,
        name: &str,
    ) -> Result<SnapshotRecord, ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::CreateSnapshot {
            instance: instance.to_string(),
            name: name.to_string(),
        });

        let created_at = state.clock;
        let snapshot_id = format!("fsvolsnap-{:05}", state.next_snapshot);
        let entry = state.instance_mut(instance, ProviderOperation::CreateSnapshot)?;
        let record = SnapshotRecord {
            instance_id: entry.description.instance_id.clone(),
            snapshot_id,
            name: name.to_string(),
            created_at,
            state: SnapshotState::Ready,
        };
        entry.snapshots.push(record.clone());

        state.next_snapshot += 1;
        state.clock = created_at + Duration::seconds(1);
        Ok(record)
    }

    fn delete_snapshot(
        &self,
        instance: &InstanceRef,
        snapshot_id: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.calls.push(ProviderCall::DeleteSnapshot {
            instance: instance.to_string(),
            snapshot_id: snapshot_id.to_string(),
        });
        let entry = state.instance_mut(instance, ProviderOperation::DeleteSnapshot)?;
        let before = entry.snapshots.len();
        entry
            .snapshots
            .retain(|snapshot| snapshot.snapshot_id != snapshot_id);
        if entry.snapshots.len() == before {
            return Err(ProviderError::operation_failed(
                ProviderOperation::DeleteSnapshot,
                format!("snapshot {snapshot_id} does not exist"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn instance(id: &str) -> InstanceRef {
        InstanceRef::parse(id).expect("instance should parse")
    }

    #[test]
    fn resolves_full_paths_to_the_seeded_instance() {
        let provider =
            InMemorySnapshotProvider::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        provider.add_instance("fsvol-1");

        let description = provider
            .describe_instance(&instance("arn:aws:fsx:eu-west-1:1:volume/fs-1/fsvol-1"))
            .expect("instance should resolve");
        assert_eq!(description.instance_id, "fsvol-1");
    }

    #[test]
    fn unknown_instance_is_not_found() {
        let provider =
            InMemorySnapshotProvider::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let error = provider
            .list_snapshots(&instance("fsvol-missing"))
            .expect_err("unknown instance should fail");
        assert!(matches!(error, ProviderError::NotFound { .. }));
        assert_eq!(error.operation(), ProviderOperation::ListSnapshots);
        assert_eq!(provider.calls().len(), 1);
    }

    #[test]
    fn created_snapshots_get_increasing_ids_and_times() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let provider = InMemorySnapshotProvider::new(start);
        provider.add_instance("fsvol-1");

        let first = provider
            .create_snapshot(&instance("fsvol-1"), "a")
            .expect("create should succeed");
        let second = provider
            .create_snapshot(&instance("fsvol-1"), "b")
            .expect("create should succeed");

        assert!(first.snapshot_id < second.snapshot_id);
        assert_eq!(first.created_at, start);
        assert_eq!(second.created_at, start + Duration::seconds(1));
        assert_eq!(provider.snapshots("fsvol-1").len(), 2);
    }

    #[test]
    fn injected_failure_only_hits_the_named_operation() {
        let provider =
            InMemorySnapshotProvider::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        provider.add_instance("fsvol-1");
        provider.fail_operation("fsvol-1", ProviderOperation::CreateSnapshot);

        assert!(provider.list_snapshots(&instance("fsvol-1")).is_ok());
        let error = provider
            .create_snapshot(&instance("fsvol-1"), "a")
            .expect_err("create should fail");
        assert!(matches!(
            error,
            ProviderError::Unavailable {
                operation: ProviderOperation::CreateSnapshot,
                ..
            }
        ));
        assert!(provider.snapshots("fsvol-1").is_empty());
    }

    #[test]
    fn deleting_a_missing_snapshot_fails() {
        let provider =
            InMemorySnapshotProvider::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        provider.add_instance("fsvol-1");

        assert!(provider
            .delete_snapshot(&instance("fsvol-1"), "fsvolsnap-404")
            .is_err());
    }
}
