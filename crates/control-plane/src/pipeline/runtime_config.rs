use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use tracing::info;

use crate::credentials::AssumedCredentials;
use crate::error::EngineError;

pub const RUNTIME_CONFIG_KEY: &str = "config.json";
const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Publish the runtime discovery document into the deployed web bucket so the
/// static front end finds its API without a rebuild. Written with cache
/// disabled; a stale copy would point a fresh deploy at an old backend.
pub async fn publish(
    creds: &AssumedCredentials,
    region: &str,
    bucket: &str,
    api_url: &str,
    environment: &str,
) -> Result<(), EngineError> {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_owned()))
        .credentials_provider(creds.as_provider())
        .load()
        .await;
    let client = aws_sdk_s3::Client::new(&config);
    let body = serde_json::json!({
        "apiBaseUrl": api_url,
        "environment": environment,
    });
    let bytes = serde_json::to_vec_pretty(&body)?;
    client
        .put_object()
        .bucket(bucket)
        .key(RUNTIME_CONFIG_KEY)
        .content_type("application/json")
        .cache_control(NO_CACHE)
        .body(ByteStream::from(bytes))
        .send()
        .await
        .map_err(|err| {
            let service_err = err.into_service_error();
            EngineError::Infrastructure(format!(
                "writing {RUNTIME_CONFIG_KEY} to bucket {bucket} failed: {service_err}"
            ))
        })?;
    info!(event = "runtime_config.published", bucket = %bucket, key = RUNTIME_CONFIG_KEY, environment = %environment);
    Ok(())
}
