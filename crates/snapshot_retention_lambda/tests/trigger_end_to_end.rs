use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use snapshot_retention_core::contract::{STATUS_OK, STATUS_PARTIAL_FAILURE};
use snapshot_retention_core::snapshot::{scheduled_snapshot_name, SnapshotRecord, SnapshotState};
use snapshot_retention_lambda::adapters::fsx::CreationPolling;
use snapshot_retention_lambda::adapters::memory::InMemorySnapshotProvider;
use snapshot_retention_lambda::adapters::provider::ProviderOperation;
use snapshot_retention_lambda::config::HandlerConfig;
use snapshot_retention_lambda::handlers::trigger::handle_trigger_event;

const POLICIES: &str = r#"{
    "nightly": {"maxSnapshots": 3, "instances": ["arn:aws:fsx:eu-west-1:111122223333:volume/fs-0a1/fsvol-alpha", "fsvol-beta"]}
}"#;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).unwrap()
}

fn config() -> HandlerConfig {
    HandlerConfig {
        policies_json: POLICIES.to_string(),
        polling: CreationPolling::default(),
    }
}

fn owned_ids(provider: &InMemorySnapshotProvider, instance: &str) -> Vec<String> {
    let mut ids: Vec<String> = provider
        .snapshots(instance)
        .into_iter()
        .filter(|snapshot| snapshot.is_owned_by("nightly"))
        .map(|snapshot| snapshot.snapshot_id)
        .collect();
    ids.sort();
    ids
}

#[test]
fn nightly_runs_converge_on_the_configured_limit() {
    let provider = InMemorySnapshotProvider::new(start());
    provider.add_instance("fsvol-alpha");
    provider.add_instance("fsvol-beta");

    for night in 0..5 {
        let invoked_at = start() + Duration::days(night);
        let response = handle_trigger_event(json!(null), &config(), invoked_at, &provider)
            .expect("nightly run should succeed");
        assert_eq!(response.status, STATUS_OK);
    }

    // Five creations, the first two are aged out.
    assert_eq!(
        owned_ids(&provider, "fsvol-alpha"),
        vec!["fsvolsnap-00005", "fsvolsnap-00007", "fsvolsnap-00009"]
    );
    assert_eq!(owned_ids(&provider, "fsvol-beta").len(), 3);
}

#[test]
fn outage_on_one_volume_leaves_the_other_enforced() {
    let provider = InMemorySnapshotProvider::new(start());
    provider.add_instance("fsvol-alpha");
    provider.add_instance("fsvol-beta");
    for hour in 0..3 {
        let created_at = start() - Duration::days(10) + Duration::hours(hour);
        provider.seed_snapshot(
            "fsvol-beta",
            SnapshotRecord {
                instance_id: "fsvol-beta".to_string(),
                snapshot_id: format!("seed-{hour}"),
                name: scheduled_snapshot_name("nightly", created_at),
                created_at,
                state: SnapshotState::Ready,
            },
        );
    }
    provider.fail_operation("fsvol-alpha", ProviderOperation::ListSnapshots);

    let response = handle_trigger_event(
        json!({"detail-type": "Scheduled Event", "detail": {"policies": ["nightly"]}}),
        &config(),
        start(),
        &provider,
    )
    .expect("run should return a response");

    assert_eq!(response.status, STATUS_PARTIAL_FAILURE);
    assert!(response.instances[0].is_failure());
    assert_eq!(
        response.instances[1].deleted_snapshot.as_deref(),
        Some("sched-nightly-20241222-010000")
    );
    assert_eq!(owned_ids(&provider, "fsvol-beta").len(), 3);
    assert!(!owned_ids(&provider, "fsvol-beta").contains(&"seed-0".to_string()));
    assert!(provider.snapshots("fsvol-alpha").is_empty());
}

#[test]
fn response_serializes_with_the_documented_shape() {
    let provider = InMemorySnapshotProvider::new(start());
    provider.add_instance("fsvol-alpha");
    provider.add_instance("fsvol-beta");

    let response = handle_trigger_event(json!({"body": "{}"}), &config(), start(), &provider)
        .expect("run should succeed");
    let value = serde_json::to_value(&response).expect("response should serialize");

    assert_eq!(value["status"], "ok");
    assert_eq!(value["schema_version"], "v1");
    assert_eq!(value["invoked_at"], "2025-01-01T01:00:00Z");
    assert_eq!(value["config_fingerprint"].as_str().map(str::len), Some(64));
    assert_eq!(value["instances"][1]["instance"], "fsvol-beta");
    assert_eq!(
        value["instances"][1]["created_snapshot"],
        "sched-nightly-20250101-010000"
    );
    assert_eq!(value["instances"][1]["retained_snapshots"], 1);
    assert!(value["instances"][1].get("deleted_snapshot").is_none());
}
