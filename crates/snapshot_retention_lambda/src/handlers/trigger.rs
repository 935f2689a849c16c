use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use snapshot_retention_core::contract::{ConfigurationError, TriggerRequest, TriggerResponse};
use snapshot_retention_core::policy::{config_fingerprint, load_policies, resolve_policies};
use tracing::{error, info, warn};

use crate::adapters::provider::SnapshotProvider;
use crate::config::HandlerConfig;
use crate::handlers::enforce::{enforce_policy, EnforcementContext};

const COMPONENT: &str = "retention_trigger";

/// Runs one scheduled firing: loads the policies, resolves the ones the event
/// asks for and enforces each of them.
///
/// Configuration problems abort before any provider call. Instance failures
/// are reported in the response and never abort the run.
pub fn handle_trigger_event(
    event: Value,
    config: &HandlerConfig,
    invoked_at: DateTime<Utc>,
    provider: &impl SnapshotProvider,
) -> Result<TriggerResponse, ConfigurationError> {
    let policies = load_policies(&config.policies_json).map_err(log_configuration_error)?;
    let request = parse_trigger_event(event).map_err(log_configuration_error)?;
    let selected =
        resolve_policies(&policies, &request.selection()).map_err(log_configuration_error)?;
    let fingerprint = config_fingerprint(&policies);

    info!(
        component = COMPONENT,
        invoked_at = %invoked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        config_fingerprint = %fingerprint,
        policies = selected.len(),
        "job_cycle_started"
    );

    let context = EnforcementContext { invoked_at };
    let mut records = Vec::new();
    for policy in selected {
        records.extend(
            enforce_policy(policy, &context, provider)
                .iter()
                .map(|outcome| outcome.to_record()),
        );
    }

    let response = TriggerResponse::new(
        invoked_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        fingerprint,
        records,
    );
    let failed = response.failures().count();
    if failed == 0 {
        info!(
            component = COMPONENT,
            status = %response.status,
            instances = response.instances.len(),
            "job_cycle_finished"
        );
    } else {
        warn!(
            component = COMPONENT,
            status = %response.status,
            instances = response.instances.len(),
            failed,
            "job_cycle_finished"
        );
    }

    Ok(response)
}

/// Accepts a bare trigger object, an EventBridge event carrying it in
/// `detail`, or an HTTP event carrying it in `body`.
pub fn parse_trigger_event(event: Value) -> Result<TriggerRequest, ConfigurationError> {
    let payload = unwrap_envelope(event)?;
    serde_json::from_value::<TriggerRequest>(payload)
        .map_err(|error| ConfigurationError::MalformedTrigger(error.to_string()))
}

/// One line naming every failed instance, or `None` when all succeeded.
pub fn failure_summary(response: &TriggerResponse) -> Option<String> {
    let failures: Vec<String> = response
        .failures()
        .map(|record| {
            format!(
                "{}/{}: {}",
                record.policy,
                record.instance,
                record.error.as_deref().unwrap_or("unknown error")
            )
        })
        .collect();
    if failures.is_empty() {
        return None;
    }
    Some(format!(
        "{} of {} instances failed: {}",
        failures.len(),
        response.instances.len(),
        failures.join("; ")
    ))
}

fn unwrap_envelope(event: Value) -> Result<Value, ConfigurationError> {
    let object = match event {
        Value::Null => return Ok(json!({})),
        Value::Object(object) => object,
        _ => {
            return Err(ConfigurationError::MalformedTrigger(
                "trigger payload must be a JSON object".to_string(),
            ))
        }
    };

    let envelope = if object.contains_key("detail") {
        "detail"
    } else if object.contains_key("body") {
        "body"
    } else {
        return Ok(Value::Object(object));
    };

    match object.get(envelope) {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::Object(inner)) => Ok(Value::Object(inner.clone())),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(json!({})),
        Some(Value::String(text)) => serde_json::from_str(text).map_err(|error| {
            ConfigurationError::MalformedTrigger(format!("malformed JSON {envelope}: {error}"))
        }),
        Some(_) => Err(ConfigurationError::MalformedTrigger(format!(
            "{envelope} must be a JSON object"
        ))),
    }
}

fn log_configuration_error(failure: ConfigurationError) -> ConfigurationError {
    error!(
        component = COMPONENT,
        field = failure.field().unwrap_or("-"),
        error = %failure,
        "configuration_rejected"
    );
    failure
}
