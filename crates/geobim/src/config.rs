//! Worker configuration resolved from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::pipeline::RetryPolicy;
use crate::storage::S3Config;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
    pub s3_force_path_style: bool,

    /// Bucket holding raw uploaded model files.
    pub raw_bucket: String,
    /// Bucket receiving derived 3D artifacts.
    pub artifact_bucket: String,
    /// Key prefix for derived artifacts inside the artifact bucket.
    pub artifact_prefix: String,

    pub convert_tool: PathBuf,
    pub convert_timeout: Duration,

    pub worker_count: usize,
    pub poll_interval: Duration,
    pub poll_batch_size: u64,

    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Config {
    /// Reads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads configuration through an arbitrary lookup, so tests never
    /// touch process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVariable("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            s3_endpoint: lookup("S3_ENDPOINT").filter(|v| !v.is_empty()),
            s3_region: lookup("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            s3_access_key_id: lookup("S3_ACCESS_KEY_ID").filter(|v| !v.is_empty()),
            s3_secret_access_key: lookup("S3_SECRET_ACCESS_KEY").filter(|v| !v.is_empty()),
            s3_force_path_style: parse_bool(&lookup, "S3_FORCE_PATH_STYLE", true)?,
            raw_bucket: lookup("S3_BUCKET").unwrap_or_else(|| "ifc-raw".to_string()),
            artifact_bucket: lookup("S3_ARTIFACT_BUCKET")
                .unwrap_or_else(|| "ifc-models".to_string()),
            artifact_prefix: lookup("ARTIFACT_PREFIX").unwrap_or_else(|| "models".to_string()),
            convert_tool: PathBuf::from(
                lookup("CONVERT_TOOL").unwrap_or_else(|| "IfcConvert".to_string()),
            ),
            convert_timeout: Duration::from_secs(parse_number(
                &lookup,
                "PROCESSING_TIMEOUT_SECONDS",
                300,
            )?),
            worker_count: parse_number(&lookup, "WORKER_COUNT", 4)? as usize,
            poll_interval: Duration::from_secs(parse_number(&lookup, "POLL_INTERVAL_SECONDS", 5)?),
            poll_batch_size: parse_number(&lookup, "POLL_BATCH_SIZE", 8)?,
            max_attempts: parse_number(&lookup, "MAX_ATTEMPTS", 3)? as u32,
            retry_backoff: Duration::from_secs(parse_number(&lookup, "RETRY_BACKOFF_SECONDS", 60)?),
        })
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            region: self.s3_region.clone(),
            endpoint: self.s3_endpoint.clone(),
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
            force_path_style: self.s3_force_path_style,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff: self.retry_backoff,
        }
    }
}

fn parse_number(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
            reason: "expected a non-negative integer".to_string(),
        }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => match value.to_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                name,
                value,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}
