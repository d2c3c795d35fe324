//! Jira Cloud uploader for exported todos
//!
//! Consumes the CSV and attachment folders an export produced.

pub mod auth;
pub mod client;
pub mod types;
pub mod uploader;

pub use auth::{JiraAuth, JiraSettings};
pub use client::{find_transition, label_jql, IssueTracker, JiraClient};
pub use types::*;
pub use uploader::{read_completed_ids, read_todo_ids, todo_files, JiraUploader};
