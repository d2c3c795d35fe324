//! Export Basecamp 3 projects, todos, comments and attachments into JSON
//! snapshots and a Jira-ready CSV, then push attachments and completion
//! state into Jira.

pub mod auth;
pub mod basecamp;
pub mod config;
pub mod export;
pub mod jira;
