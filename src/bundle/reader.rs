//! Reader for the inner bundle subsystem. The block codec itself is
//! proprietary (Oodle); this module never reimplements it — it shells out
//! to an external utility and treats it as a function with a documented
//! stdout/stderr contract (§6).

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Case-insensitive path segments that mark a localized asset, used when
/// `exclude_languages` is set on a pattern extraction.
pub const LANGUAGE_PATTERNS: &[&str] = &[
    "/french/", "/german/", "/japanese/", "/korean/", "/portuguese/", "/russian/", "/spanish/",
    "/thai/", "/traditional chinese/", "/simplified chinese/",
    ".french.", ".german.", ".japanese.", ".korean.", ".portuguese.", ".russian.", ".spanish.",
    ".thai.", ".traditional chinese.", ".simplified chinese.",
];

/// Beyond this many paths, deliver them via stdin instead of argv, to stay
/// clear of platform argument-length limits.
const STDIN_PATH_THRESHOLD: usize = 50;

const SINGLE_FILE_TIMEOUT: Duration = Duration::from_secs(15);
const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("external bundle utility exited without the success sentinel: {0}")]
    ExternalToolError(String),
    #[error("external bundle utility did not finish within its time budget")]
    Timeout,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub missed: usize,
    pub total: usize,
}

pub struct BundleReader {
    utility_path: std::path::PathBuf,
}

impl BundleReader {
    pub fn new(utility_path: std::path::PathBuf) -> Self {
        Self { utility_path }
    }

    /// `list-files <archive>`: one logical path per stdout line; stderr
    /// carries the two count sentinels.
    pub async fn list_files(&self, archive_path: &Path) -> Result<(usize, usize, Vec<String>), BundleError> {
        let mut child = Command::new(&self.utility_path)
            .arg("list-files")
            .arg(archive_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let stdout_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if !line.is_empty() {
                    lines.push(line);
                }
            }
            lines
        });

        let mut bundle_count = 0usize;
        let mut file_count = 0usize;
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if let Some(n) = extract_count_after(&line, "Bundle count in index binary:") {
                bundle_count = n;
            } else if let Some(n) = extract_count_after(&line, "File count in index binary:") {
                file_count = n;
            }
        }

        let status = child.wait().await?;
        let paths = stdout_task.await.unwrap_or_default();
        if !status.success() {
            return Err(BundleError::ExternalToolError(format!(
                "list-files exited with {status}"
            )));
        }
        Ok((bundle_count, file_count, paths))
    }

    /// `extract-files [--regex] <archive> <outdir> <paths…>`. Long path
    /// lists are delivered on stdin instead of argv.
    pub async fn extract_by_paths<F: FnMut(&str)>(
        &self,
        archive_path: &Path,
        output_dir: &Path,
        paths: &[String],
        use_regex: bool,
        mut on_progress: F,
    ) -> Result<ExtractSummary, BundleError> {
        let mut cmd = Command::new(&self.utility_path);
        cmd.arg("extract-files");
        if use_regex {
            cmd.arg("--regex");
        }
        cmd.arg(archive_path).arg(output_dir);

        let use_stdin = paths.len() > STDIN_PATH_THRESHOLD;
        if !use_stdin {
            cmd.args(paths);
            cmd.stdin(Stdio::null());
        } else {
            cmd.stdin(Stdio::piped());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn()?;

        if use_stdin {
            let mut stdin = child.stdin.take().expect("piped stdin");
            let payload = paths.join("\n");
            stdin.write_all(payload.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let stderr = child.stderr.take().expect("piped stderr");
        let mut reader = BufReader::new(stderr).lines();
        let mut summary = ExtractSummary::default();
        let mut last_emit = Instant::now() - PROGRESS_THROTTLE;
        let mut success_seen = false;
        let mut full_output = String::new();

        while let Ok(Some(line)) = reader.next_line().await {
            full_output.push_str(&line);
            full_output.push('\n');
            if line.contains("Extracting:") {
                if last_emit.elapsed() >= PROGRESS_THROTTLE {
                    on_progress(&line);
                    last_emit = Instant::now();
                }
            } else if let Some(s) = parse_done_line(&line) {
                summary = s;
                success_seen = true;
            }
        }

        let status = child.wait().await?;
        if !status.success() && !success_seen {
            return Err(BundleError::ExternalToolError(full_output));
        }
        if !success_seen {
            return Err(BundleError::ExternalToolError(
                "missing 'Done,' sentinel in utility output".into(),
            ));
        }
        Ok(summary)
    }

    /// Enumerates paths first, filters by `regex` and (optionally) by the
    /// language-exclusion list, then delegates to `extract_by_paths`.
    pub async fn extract_by_pattern<F: FnMut(&str)>(
        &self,
        archive_path: &Path,
        output_dir: &Path,
        pattern: &str,
        exclude_languages: bool,
        on_progress: F,
    ) -> Result<ExtractSummary, BundleError> {
        let re = Regex::new(pattern)
            .map_err(|e| BundleError::ExternalToolError(format!("invalid pattern: {e}")))?;

        let (_, _, all_paths) = self.list_files(archive_path).await?;
        let filtered: Vec<String> = all_paths
            .into_iter()
            .filter(|p| re.is_match(p))
            .filter(|p| !exclude_languages || !is_localized(p))
            .collect();

        debug!(count = filtered.len(), "pattern-matched paths after language filter");
        self.extract_by_paths(archive_path, output_dir, &filtered, false, on_progress).await
    }

    /// Convenience wrapper applying `SINGLE_FILE_TIMEOUT` around a single
    /// awaited future, used by callers that need a hard ceiling beyond the
    /// process's own lifetime (e.g. a hung pipe).
    pub async fn with_timeout<T>(
        fut: impl std::future::Future<Output = Result<T, BundleError>>,
    ) -> Result<T, BundleError> {
        match timeout(SINGLE_FILE_TIMEOUT, fut).await {
            Ok(r) => r,
            Err(_) => {
                warn!("external bundle operation timed out");
                Err(BundleError::Timeout)
            }
        }
    }
}

fn is_localized(path: &str) -> bool {
    let lower = path.to_lowercase();
    LANGUAGE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn extract_count_after(line: &str, prefix: &str) -> Option<usize> {
    let idx = line.find(prefix)?;
    line[idx + prefix.len()..].trim().parse().ok()
}

/// Parses `Done, X/Y extracted, Z missed.`
fn parse_done_line(line: &str) -> Option<ExtractSummary> {
    let rest = line.strip_prefix("Done, ")?;
    let (counts, rest) = rest.split_once(" extracted, ")?;
    let (extracted_str, total_str) = counts.split_once('/')?;
    let missed_str = rest.strip_suffix(" missed.")?;
    Some(ExtractSummary {
        extracted: extracted_str.trim().parse().ok()?,
        total: total_str.trim().parse().ok()?,
        missed: missed_str.trim().parse().ok()?,
    })
}
