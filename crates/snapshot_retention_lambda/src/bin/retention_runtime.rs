use chrono::Utc;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use snapshot_retention_lambda::adapters::fsx::FsxSnapshotProvider;
use snapshot_retention_lambda::config::HandlerConfig;
use snapshot_retention_lambda::handlers::trigger::{failure_summary, handle_trigger_event};
use tracing::info;

async fn handle_request(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let config = HandlerConfig::from_env()?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let provider = FsxSnapshotProvider::new(aws_sdk_fsx::Client::new(&aws_config), config.polling);

    info!(request_id = %event.context.request_id, "invocation_received");
    let response = handle_trigger_event(event.payload, &config, Utc::now(), &provider)?;

    if let Some(summary) = failure_summary(&response) {
        return Err(Error::from(summary));
    }
    serde_json::to_value(response)
        .map_err(|error| Error::from(format!("failed to serialize trigger response: {error}")))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_runtime::tracing::init_default_subscriber();
    lambda_runtime::run(service_fn(handle_request)).await
}
