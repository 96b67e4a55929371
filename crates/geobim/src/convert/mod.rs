//! Best-effort 3D artifact conversion via an external tool.
//!
//! The tool is invoked as `<tool> <input> <output>` and must exit zero and
//! leave a non-empty output file behind to count as a success. Every other
//! outcome degrades to a skip: conversion can never fail a job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::storage::ObjectStore;

/// Wall-clock budget for one tool invocation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Why a conversion produced no artifact. Informational only — the pipeline
/// logs these and moves on.
#[derive(Error, Debug)]
pub enum ConversionSkipped {
    #[error("conversion tool '{0}' is not installed")]
    ToolMissing(String),

    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("conversion tool failed (exit code {code:?}): {detail}")]
    ToolFailure { code: Option<i32>, detail: String },

    #[error("artifact upload failed: {0}")]
    UploadFailed(#[source] StorageError),
}

/// Converts model files to a web-friendly binary glTF artifact and
/// publishes it to the artifacts bucket.
pub struct ModelConverter {
    store: Arc<dyn ObjectStore>,
    tool: PathBuf,
    timeout: Duration,
    artifact_bucket: String,
    artifact_prefix: String,
}

impl ModelConverter {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tool: impl Into<PathBuf>,
        artifact_bucket: impl Into<String>,
        artifact_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tool: tool.into(),
            timeout: DEFAULT_TIMEOUT,
            artifact_bucket: artifact_bucket.into(),
            artifact_prefix: artifact_prefix.into(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The deterministic storage key for a file's artifact.
    pub fn artifact_key(&self, file_id: &str) -> String {
        format!("{}/{}.glb", self.artifact_prefix, file_id)
    }

    /// Runs the tool against `input` and, on success, publishes the artifact
    /// and returns its relative reference URL. The local output file is
    /// deleted when this function returns, whatever happened.
    pub async fn convert(&self, input: &Path, file_id: &str) -> Result<String, ConversionSkipped> {
        let staged = tempfile::Builder::new()
            .prefix("geobim-")
            .suffix(".glb")
            .tempfile()
            .map_err(|e| ConversionSkipped::ToolFailure {
                code: None,
                detail: format!("could not stage output file: {e}"),
            })?;
        let output_path = staged.path().to_path_buf();

        debug!(tool = %self.tool.display(), input = %input.display(), "invoking conversion tool");

        let mut command = Command::new(&self.tool);
        command
            .arg(input)
            .arg(&output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ConversionSkipped::ToolMissing(
                    self.tool.display().to_string(),
                ));
            }
            Err(e) => {
                return Err(ConversionSkipped::ToolFailure {
                    code: None,
                    detail: e.to_string(),
                });
            }
        };

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            // The dropped child future kills the process.
            Err(_) => return Err(ConversionSkipped::Timeout(self.timeout)),
            Ok(Err(e)) => {
                return Err(ConversionSkipped::ToolFailure {
                    code: None,
                    detail: e.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.chars().take(1000).collect();
            return Err(ConversionSkipped::ToolFailure {
                code: output.status.code(),
                detail: excerpt.trim().to_string(),
            });
        }

        let artifact = tokio::fs::read(&output_path).await.map_err(|e| {
            ConversionSkipped::ToolFailure {
                code: None,
                detail: format!("tool reported success but output is unreadable: {e}"),
            }
        })?;
        if artifact.is_empty() {
            return Err(ConversionSkipped::ToolFailure {
                code: None,
                detail: "tool reported success but produced an empty output file".to_string(),
            });
        }

        let key = self.artifact_key(file_id);
        self.store
            .put(
                &self.artifact_bucket,
                &key,
                Bytes::from(artifact),
                "model/gltf-binary",
            )
            .await
            .map_err(ConversionSkipped::UploadFailed)?;

        info!(key = %key, "published 3D artifact");
        Ok(format!("/{}/{}", self.artifact_bucket, key))
    }
}
