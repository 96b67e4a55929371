//! S3-compatible object store backend (AWS S3 or MinIO).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

use crate::error::StorageError;
use crate::storage::ObjectStore;

/// Connection settings for the storage collaborator. `endpoint` and
/// `force_path_style` exist for MinIO-style deployments.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: S3Config) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region));

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = Credentials::new(access_key, secret_key, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        let shared_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

/// Collapses an SDK failure into the retrieval taxonomy. Anything the
/// service does not explicitly classify is treated as transient.
fn classify<E>(err: &SdkError<E>, key: &str, no_such_key: bool) -> StorageError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match err {
        SdkError::ServiceError(ctx) => {
            let service_err = ctx.err();
            if no_such_key || service_err.code() == Some("NoSuchKey") {
                StorageError::NotFound(key.to_string())
            } else if service_err.code() == Some("AccessDenied") {
                StorageError::AccessDenied(key.to_string())
            } else {
                StorageError::Transient(format!("{err:?}"))
            }
        }
        other => StorageError::Transient(format!("{other:?}")),
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError> {
        debug!(bucket, key, "fetching object");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let no_such_key = matches!(
                    &err,
                    SdkError::ServiceError(ctx) if ctx.err().is_no_such_key()
                );
                classify(&err, key, no_such_key)
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transient(format!("body read failed for {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        debug!(bucket, key, bytes = bytes.len(), "publishing object");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|err| classify(&err, key, false))?;
        Ok(())
    }
}
