use crate::snapshot::SnapshotRecord;

/// Outcome of comparing a policy's snapshots against its limit, computed
/// from the listing taken before the new snapshot is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPlan<'a> {
    /// Ready snapshots owned by the policy before creation.
    pub owned_before: usize,
    /// Owned snapshots once the new one exists, before any deletion.
    pub count_after_create: usize,
    /// Owned snapshots left once the plan is carried out.
    pub retained_after: usize,
    pub deletion: Option<&'a SnapshotRecord>,
}

impl RetentionPlan<'_> {
    /// The policy was tightened below what is already kept. Only one
    /// snapshot is removed per run, so the excess shrinks one at a time.
    pub fn exceeds_limit_after_run(&self, max_snapshots: usize) -> bool {
        self.retained_after > max_snapshots
    }
}

/// Ready snapshots that the scheduler created for `policy`.
pub fn owned_snapshots<'a>(
    snapshots: &'a [SnapshotRecord],
    policy: &str,
) -> Vec<&'a SnapshotRecord> {
    snapshots
        .iter()
        .filter(|snapshot| snapshot.is_ready() && snapshot.is_owned_by(policy))
        .collect()
}

/// Earliest `created_at` wins; equal timestamps fall back to the smaller
/// snapshot id so repeated runs pick the same record.
pub fn select_oldest<'a, I>(candidates: I) -> Option<&'a SnapshotRecord>
where
    I: IntoIterator<Item = &'a SnapshotRecord>,
{
    candidates.into_iter().min_by(|left, right| {
        left.created_at
            .cmp(&right.created_at)
            .then_with(|| left.snapshot_id.cmp(&right.snapshot_id))
    })
}

pub fn plan_retention<'a>(
    existing: &'a [SnapshotRecord],
    policy: &str,
    max_snapshots: usize,
) -> RetentionPlan<'a> {
    let owned = owned_snapshots(existing, policy);
    let owned_before = owned.len();
    let count_after_create = owned_before + 1;

    let deletion = if count_after_create > max_snapshots {
        select_oldest(owned)
    } else {
        None
    };
    let retained_after = count_after_create - usize::from(deletion.is_some());

    RetentionPlan {
        owned_before,
        count_after_create,
        retained_after,
        deletion,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::snapshot::{scheduled_snapshot_name, SnapshotState};

    use super::*;

    fn owned(policy: &str, snapshot_id: &str, minutes: i64) -> SnapshotRecord {
        let created_at =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        SnapshotRecord {
            instance_id: "fsvol-1".to_string(),
            snapshot_id: snapshot_id.to_string(),
            name: scheduled_snapshot_name(policy, created_at),
            created_at,
            state: SnapshotState::Ready,
        }
    }

    #[test]
    fn below_limit_plans_no_deletion() {
        let existing = vec![owned("daily", "snap-a", 0), owned("daily", "snap-b", 1)];
        let plan = plan_retention(&existing, "daily", 3);

        assert_eq!(plan.owned_before, 2);
        assert_eq!(plan.count_after_create, 3);
        assert_eq!(plan.retained_after, 3);
        assert!(plan.deletion.is_none());
    }

    #[test]
    fn at_limit_deletes_the_oldest() {
        let existing = vec![
            owned("daily", "snap-b", 2),
            owned("daily", "snap-a", 1),
            owned("daily", "snap-c", 3),
        ];
        let plan = plan_retention(&existing, "daily", 3);

        assert_eq!(plan.count_after_create, 4);
        assert_eq!(plan.retained_after, 3);
        assert_eq!(
            plan.deletion.map(|s| s.snapshot_id.as_str()),
            Some("snap-a")
        );
    }

    #[test]
    fn tightened_policy_still_deletes_only_one() {
        let existing: Vec<SnapshotRecord> = (0..6)
            .map(|minute| owned("daily", &format!("snap-{minute}"), minute))
            .collect();
        let plan = plan_retention(&existing, "daily", 2);

        assert_eq!(
            plan.deletion.map(|s| s.snapshot_id.as_str()),
            Some("snap-0")
        );
        assert_eq!(plan.retained_after, 6);
        assert!(plan.exceeds_limit_after_run(2));
    }

    #[test]
    fn foreign_and_unready_snapshots_are_not_counted() {
        let mut creating = owned("daily", "snap-creating", 0);
        creating.state = SnapshotState::Creating;
        let mut manual = owned("daily", "snap-manual", 0);
        manual.name = "before-upgrade".to_string();
        let existing = vec![
            creating,
            manual,
            owned("hourly", "snap-hourly", 0),
            owned("daily", "snap-daily", 5),
        ];

        let plan = plan_retention(&existing, "daily", 1);

        assert_eq!(plan.owned_before, 1);
        assert_eq!(
            plan.deletion.map(|s| s.snapshot_id.as_str()),
            Some("snap-daily")
        );
    }

    #[test]
    fn equal_timestamps_break_ties_by_snapshot_id() {
        let existing = vec![
            owned("daily", "snap-z", 0),
            owned("daily", "snap-m", 0),
            owned("daily", "snap-q", 0),
        ];

        for _ in 0..3 {
            let oldest = select_oldest(&existing).expect("oldest should exist");
            assert_eq!(oldest.snapshot_id, "snap-m");
        }

        let mut reversed = existing.clone();
        reversed.reverse();
        assert_eq!(
            select_oldest(&reversed).map(|s| s.snapshot_id.as_str()),
            Some("snap-m")
        );
    }

    #[test]
    fn select_oldest_of_nothing_is_none() {
        assert!(select_oldest(&Vec::<SnapshotRecord>::new()).is_none());
    }
}
