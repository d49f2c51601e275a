//! Bulk upload of local archives through the AzCopy executable.
//!
//! The destination key is passed on the command line, so argument lists are
//! never logged and tool output is scrubbed before it reaches an error.

use std::path::{Path, PathBuf};
use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;
use tracing::info;
use url::Url;

use crate::error::AppError;

/// Maximum number of trailing output lines carried into an upload error.
const OUTPUT_TAIL_LINES: usize = 10;

/// One upload of every matching file in a directory to a blob container.
pub struct UploadRequest<'a> {
    pub source_dir: &'a Path,
    pub destination: &'a Url,
    pub key: &'a SecretString,
    /// File pattern, e.g. `*.bacpac`.
    pub pattern: &'a str,
    pub overwrite: bool,
}

/// Wrapper around the external bulk-copy executable.
#[derive(Debug, Clone)]
pub struct BulkCopyTool {
    executable: PathBuf,
}

impl BulkCopyTool {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Builds the AzCopy v7 style argument list.
    fn build_args(req: &UploadRequest<'_>) -> Vec<String> {
        let mut args = vec![
            format!("/Source:{}", req.source_dir.display()),
            format!("/Dest:{}", req.destination),
            format!("/DestKey:{}", req.key.expose_secret()),
            format!("/Pattern:{}", req.pattern),
        ];
        if req.overwrite {
            args.push("/Y".to_string());
        }
        args
    }

    /// Uploads the matching files and waits for the tool to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UploadFailed` if the tool cannot be started or
    /// exits unsuccessfully. The message carries the tail of its output with
    /// the key removed.
    pub async fn upload(&self, req: &UploadRequest<'_>) -> Result<(), AppError> {
        info!(
            "[AZCOPY] Uploading {} from {} to {}",
            req.pattern,
            req.source_dir.display(),
            req.destination.path()
        );
        let start = Instant::now();

        let output = Command::new(&self.executable)
            .args(Self::build_args(req))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                AppError::UploadFailed(format!(
                    "Failed to start {}: {}",
                    self.executable.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            let tail = output_tail(&scrub(&text, req.key.expose_secret()));
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(AppError::UploadFailed(if tail.is_empty() {
                format!("{} exited with {}", self.executable.display(), code)
            } else {
                format!(
                    "{} exited with {}: {}",
                    self.executable.display(),
                    code,
                    tail
                )
            }));
        }

        info!(
            "[AZCOPY] Upload completed in {}s",
            start.elapsed().as_secs()
        );
        Ok(())
    }
}

/// Removes every occurrence of the key from tool output.
fn scrub(text: &str, key: &str) -> String {
    if key.is_empty() {
        text.to_string()
    } else {
        text.replace(key, "***")
    }
}

fn output_tail(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join(" | ")
}
