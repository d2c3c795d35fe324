//! Export error definitions and artifact records

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::basecamp::BasecampError;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Basecamp error: {0}")]
    Basecamp(#[from] BasecampError),

    #[error("Missing account_id; run `authorize` first")]
    MissingAccountId,
}

/// One flattened CSV row per task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvRecord {
    #[serde(rename = "Project")]
    pub project: String,
    #[serde(rename = "List")]
    pub list: String,
    #[serde(rename = "Group")]
    pub group: String,
    #[serde(rename = "Basecamp Todo ID")]
    pub todo_id: u64,
    #[serde(rename = "Todo Title")]
    pub title: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Assignees")]
    pub assignees: String,
    #[serde(rename = "Created By")]
    pub created_by: String,
    #[serde(rename = "Due Date")]
    pub due_date: String,
    #[serde(rename = "Completed")]
    pub completed: bool,
    #[serde(rename = "Comments")]
    pub comments: String,
    #[serde(rename = "Attachments")]
    pub attachments: String,
    #[serde(rename = "App URL")]
    pub app_url: String,
}

/// Outcome of a single attachment download, as written to the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub todo_id: u64,
    pub url: String,
    /// Relative to the attachments directory.
    pub path: String,
    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub manifest: Option<PathBuf>,
}

impl DownloadSummary {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }
}

/// What a finished export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub run_dir: PathBuf,
    pub projects: usize,
    pub tasks: usize,
    pub csv_rows: usize,
}
