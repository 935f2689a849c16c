use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix carried by every snapshot this scheduler creates.
pub const SCHEDULED_SNAPSHOT_PREFIX: &str = "sched-";
/// Timestamp suffix of scheduled snapshot names, e.g. `20220303-153000`.
pub const SNAPSHOT_TIME_PATTERN: &str = "%Y%m%d-%H%M%S";

/// Reference to a file-storage instance, either a short id or a full
/// resource path. Surrounding slashes are not significant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceRef(String);

impl InstanceRef {
    /// Returns `None` when nothing remains after trimming.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, i.e. the bare provider id.
    pub fn resource_name(&self) -> &str {
        resource_name(&self.0)
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn resource_name(resource_path: &str) -> &str {
    resource_path.rsplit('/').next().unwrap_or(resource_path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Ready,
    Creating,
    Deleting,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub instance_id: String,
    pub snapshot_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub state: SnapshotState,
}

impl SnapshotRecord {
    pub fn is_ready(&self) -> bool {
        self.state == SnapshotState::Ready
    }

    /// Whether this snapshot was created by the scheduler for `policy`.
    ///
    /// The remainder after the policy prefix must be a timestamp, so that
    /// `daily` does not claim snapshots of a policy named `daily-extra`.
    pub fn is_owned_by(&self, policy: &str) -> bool {
        parse_scheduled_timestamp(policy, &self.name).is_some()
    }
}

pub fn owned_name_prefix(policy: &str) -> String {
    format!("{SCHEDULED_SNAPSHOT_PREFIX}{policy}-")
}

pub fn scheduled_snapshot_name(policy: &str, invoked_at: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        owned_name_prefix(policy),
        invoked_at.format(SNAPSHOT_TIME_PATTERN)
    )
}

/// Recovers the invocation time encoded in a scheduled snapshot name.
pub fn parse_scheduled_timestamp(policy: &str, name: &str) -> Option<DateTime<Utc>> {
    let suffix = name.strip_prefix(&owned_name_prefix(policy))?;
    NaiveDateTime::parse_from_str(suffix, SNAPSHOT_TIME_PATTERN)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn instance_ref_trims_slashes_and_exposes_resource_name() {
        let path = "/arn:aws:fsx:eu-west-1:123456789012:volume/fs-0abc/fsvol-0def/";
        let instance = InstanceRef::parse(path).expect("instance should parse");

        assert_eq!(
            instance.as_str(),
            "arn:aws:fsx:eu-west-1:123456789012:volume/fs-0abc/fsvol-0def"
        );
        assert_eq!(instance.resource_name(), "fsvol-0def");
    }

    #[test]
    fn short_instance_id_is_its_own_resource_name() {
        let instance = InstanceRef::parse("fsvol-0def").expect("instance should parse");
        assert_eq!(instance.resource_name(), "fsvol-0def");
    }

    #[test]
    fn blank_instance_ref_is_rejected() {
        assert!(InstanceRef::parse("  //  ").is_none());
    }

    #[test]
    fn scheduled_name_round_trips_its_timestamp() {
        let at = Utc.with_ymd_and_hms(2022, 3, 3, 15, 30, 0).unwrap();
        let name = scheduled_snapshot_name("daily", at);

        assert_eq!(name, "sched-daily-20220303-153000");
        assert_eq!(parse_scheduled_timestamp("daily", &name), Some(at));
        assert_eq!(parse_scheduled_timestamp("hourly", &name), None);
    }

    #[test]
    fn ownership_requires_full_policy_segment() {
        let record = SnapshotRecord {
            instance_id: "fsvol-1".to_string(),
            snapshot_id: "fsvolsnap-1".to_string(),
            name: "sched-daily-extra-20220303-153000".to_string(),
            created_at: Utc.with_ymd_and_hms(2022, 3, 3, 15, 30, 0).unwrap(),
            state: SnapshotState::Ready,
        };

        assert!(record.is_owned_by("daily-extra"));
        assert!(!record.is_owned_by("daily"));
    }
}
