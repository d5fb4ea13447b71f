//! On-disk output: per-session screenshot directories and JSON reports.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::ExplorationResult;

/// Consumer of a finished run. Turning the results into prose is someone
/// else's job; implementations only need an ordered result list with
/// readable screenshot paths.
#[async_trait]
pub trait DocumentationWriter: Send + Sync {
    async fn write(&self, result: &ExplorationResult) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub session_id: String,
    pub platform_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
}

impl OutputStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            root: std::path::absolute(root.as_ref())?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn report_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.json"))
    }

    /// Creates the session's screenshot directory if needed.
    pub async fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.root.join(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    pub async fn save_report(&self, result: &ExplorationResult) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.report_path(&result.session_id);
        let json = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, json).await?;
        info!(session_id = %result.session_id, path = %path.display(), "report saved");
        Ok(path)
    }

    pub async fn load_report(&self, session_id: &str) -> Result<Option<ExplorationResult>> {
        match tokio::fs::read(self.report_path(session_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Newest first. Unreadable reports are skipped.
    pub async fn list_reports(&self) -> Result<Vec<ReportSummary>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load_report(session_id).await {
                Ok(Some(report)) => summaries.push(ReportSummary {
                    session_id: report.session_id,
                    platform_name: report.platform_name,
                    timestamp: report.timestamp,
                }),
                Ok(None) => {}
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable report"),
            }
        }
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Removes the report and screenshot directory. Missing files are fine.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        match tokio::fs::remove_file(self.report_path(session_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match tokio::fs::remove_dir_all(self.root.join(session_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentationWriter for OutputStore {
    async fn write(&self, result: &ExplorationResult) -> Result<PathBuf> {
        self.save_report(result).await
    }
}
