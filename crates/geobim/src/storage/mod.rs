//! Object storage access and scratch-file retrieval.

pub mod memory;
pub mod s3;

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::StorageError;

pub use memory::MemoryObjectStore;
pub use s3::{S3Config, S3ObjectStore};

/// The storage collaborator: fetch and publish objects by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StorageError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError>;
}

/// A downloaded object staged on local disk. The backing file is deleted
/// when this handle drops, on every exit path.
#[derive(Debug)]
pub struct ScratchFile {
    file: tempfile::NamedTempFile,
}

impl ScratchFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Fetches raw model files out of the input bucket into scratch storage.
pub struct FileRetriever {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl FileRetriever {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Downloads the object behind `storage_key` to a scratch file carrying
    /// the key's extension (parsers dispatch on it).
    pub async fn retrieve(&self, storage_key: &str) -> Result<ScratchFile, StorageError> {
        let bytes = self.store.get(&self.bucket, storage_key).await?;

        let suffix = storage_key
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| format!(".{ext}")))
            .unwrap_or_else(|| ".ifc".to_string());

        let mut file = tempfile::Builder::new()
            .prefix("geobim-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| StorageError::Transient(format!("could not stage scratch file: {e}")))?;
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| StorageError::Transient(format!("could not write scratch file: {e}")))?;

        debug!(
            key = storage_key,
            bytes = bytes.len(),
            path = %file.path().display(),
            "staged object to scratch"
        );
        Ok(ScratchFile { file })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn retriever_with(objects: &[(&str, &[u8])]) -> FileRetriever {
        let store = MemoryObjectStore::new();
        for (key, bytes) in objects {
            store.insert("ifc-raw", key, Bytes::copy_from_slice(bytes));
        }
        FileRetriever::new(Arc::new(store), "ifc-raw")
    }

    #[tokio::test]
    async fn retrieve_stages_object_content() {
        let retriever = retriever_with(&[("uploads/model.ifc", b"ISO-10303-21;")]);

        let scratch = retriever.retrieve("uploads/model.ifc").await.unwrap();
        let content = std::fs::read(scratch.path()).unwrap();
        assert_eq!(content, b"ISO-10303-21;");
        assert!(scratch.path().to_string_lossy().ends_with(".ifc"));
    }

    #[tokio::test]
    async fn retrieve_missing_object_is_not_found() {
        let retriever = retriever_with(&[]);
        let err = retriever.retrieve("missing.ifc").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn scratch_file_is_deleted_on_drop() {
        let retriever = retriever_with(&[("model.ifc", b"data")]);
        let path: PathBuf = {
            let scratch = retriever.retrieve("model.ifc").await.unwrap();
            let path = scratch.path().to_path_buf();
            assert!(path.exists());
            path
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn keys_without_extension_default_to_ifc_suffix() {
        let retriever = retriever_with(&[("rawobject", b"data")]);
        let scratch = retriever.retrieve("rawobject").await.unwrap();
        assert!(scratch.path().to_string_lossy().ends_with(".ifc"));
    }
}
