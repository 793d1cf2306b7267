//! Object store configuration for publishing scores to S3 or a local
//! directory.

use crate::config::OutputConfig;
use anyhow::{Context, Result};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore, PutPayload, RetryConfig};
use std::sync::Arc;
use std::time::Duration;

/// Client options for a handful of large sequential uploads.
fn create_client_options() -> ClientOptions {
    ClientOptions::new()
        .with_connect_timeout(Duration::from_secs(5))
        // Parquet partitions can take a while on slow links
        .with_timeout(Duration::from_secs(120))
        .with_pool_idle_timeout(Duration::from_secs(90))
        .with_pool_max_idle_per_host(8)
}

/// Retry configuration for transient failures (429 and 5xx).
fn create_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        backoff: object_store::BackoffConfig {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            base: 2.0,
        },
        retry_timeout: Duration::from_secs(300),
    }
}

/// Create an authenticated S3 client for writing.
///
/// Credentials and region are loaded from (in order):
/// - Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_REGION)
/// - AWS config files (~/.aws/credentials, ~/.aws/config)
/// - EC2 instance profile (IMDS)
fn create_authenticated_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    tracing::info!("Creating authenticated S3 client for bucket: {}", bucket);

    let builder = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .with_client_options(create_client_options())
        .with_retry(create_retry_config())
        .with_virtual_hosted_style_request(true);

    Ok(Arc::new(builder.build()?))
}

/// Create the store receiving the score table.
/// Uses LocalFileSystem if local_path is set, otherwise S3 with credentials.
pub fn create_output_store(output: &OutputConfig) -> Result<Arc<dyn ObjectStore>> {
    match (&output.local_path, &output.bucket) {
        (Some(local_path), _) => {
            let path = std::path::Path::new(local_path);
            if !path.exists() {
                std::fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
            }
            tracing::info!("Creating LocalFileSystem store at: {}", path.display());
            Ok(Arc::new(LocalFileSystem::new_with_prefix(path)?))
        }
        (_, Some(bucket)) => create_authenticated_store(bucket),
        _ => anyhow::bail!("Invalid config: no output destination"),
    }
}

/// Key prefix inside the output store.
/// Empty for local output since the directory is baked into the store.
pub fn get_output_prefix(output: &OutputConfig) -> &str {
    if output.is_local() {
        ""
    } else {
        output.prefix().unwrap_or("").trim_matches('/')
    }
}

/// Object key for `relative` under `prefix`.
pub fn object_path(prefix: &str, relative: &str) -> ObjectPath {
    if prefix.is_empty() {
        ObjectPath::from(relative)
    } else {
        ObjectPath::from(format!("{}/{}", prefix, relative))
    }
}

/// Upload `bytes` to `path`, replacing any existing object.
pub async fn put_bytes(store: &dyn ObjectStore, path: &ObjectPath, bytes: Bytes) -> Result<()> {
    let size = bytes.len();
    store
        .put(path, PutPayload::from(bytes))
        .await
        .with_context(|| format!("Failed to write {}", path))?;
    tracing::info!("Wrote {} ({} bytes)", path, size);
    Ok(())
}
