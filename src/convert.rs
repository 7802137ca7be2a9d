//! Delegate to an external DDS→PNG/WebP converter (§1 Non-goal: this
//! crate never reimplements the image codec itself).

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout as tokio_timeout;

/// Budget for a single-file conversion invoked from the extraction
/// pipeline (§5).
pub const SINGLE_FILE_TIMEOUT: Duration = Duration::from_secs(15);
/// Budget for an on-demand preview conversion served by the backend's
/// `/file` endpoint (§5, §4.F).
pub const PREVIEW_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("conversion did not finish within its time budget")]
    Timeout,
    #[error("external converter exited non-zero: {0}")]
    ExternalToolError(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DdsConverter {
    tool_path: std::path::PathBuf,
}

impl DdsConverter {
    pub fn new(tool_path: std::path::PathBuf) -> Self {
        Self { tool_path }
    }

    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        format: &str,
        budget: Duration,
    ) -> Result<(), ConvertError> {
        let run = async {
            let out = Command::new(&self.tool_path)
                .arg(input)
                .arg(output)
                .arg("--format")
                .arg(format)
                .output()
                .await?;
            if !out.status.success() {
                return Err(ConvertError::ExternalToolError(
                    String::from_utf8_lossy(&out.stderr).into_owned(),
                ));
            }
            Ok(())
        };

        match tokio_timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => Err(ConvertError::Timeout),
        }
    }
}
