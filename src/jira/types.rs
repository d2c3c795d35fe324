//! Jira API types and error definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JiraError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Jira configuration error: {0}")]
    Config(String),

    #[error("Jira API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Status '{status}' not available for {issue}; available: {available:?}")]
    TransitionUnavailable {
        issue: String,
        status: String,
        available: Vec<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssue {
    pub key: String,
    #[serde(default)]
    pub fields: Option<JiraIssueFields>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JiraIssueFields {
    pub summary: Option<String>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub issues: Vec<JiraIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transition {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub to: TransitionTarget,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionTarget {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransitionsResponse {
    pub transitions: Vec<Transition>,
}

/// The `/myself` record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JiraUser {
    pub account_id: Option<String>,
    pub display_name: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub todos: usize,
    pub issues_processed: usize,
    pub files_uploaded: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub completed_todos: usize,
    pub updated: usize,
    pub failed: usize,
}
