//! Basecamp resource records, enriched export records and error definitions

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum BasecampError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Unexpected response: {0}")]
    Structure(String),

    #[error("Not a Basecamp to-do URL: {0}")]
    InvalidUrl(String),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

impl BasecampError {
    pub fn status(&self) -> Option<u16> {
        match self {
            BasecampError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// One entry of a project's dock: a tool enabled in that project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DockEntry {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub name: String,
    pub enabled: bool,
    pub position: Option<i64>,
    pub url: Option<String>,
    pub app_url: Option<String>,
}

/// A Basecamp project ("bucket" in API paths).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub dock: Vec<DockEntry>,
}

/// The to-do container of a project.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Todoset {
    pub id: Option<u64>,
    pub title: Option<String>,
    pub todolists_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TodoList {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub todos_url: Option<String>,
    #[serde(default)]
    pub groups_url: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
}

impl TodoList {
    pub fn label(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("List {}", self.id))
    }
}

/// A named section inside a to-do list.
#[derive(Debug, Clone, Deserialize)]
pub struct TodoGroup {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub todos_url: Option<String>,
}

impl TodoGroup {
    pub fn label(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| format!("Group {}", self.id))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Person {
    pub id: Option<u64>,
    pub name: Option<String>,
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketRef {
    pub id: Option<u64>,
    pub name: Option<String>,
}

/// The list (or group) a to-do detail record points back to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentRef {
    pub id: Option<u64>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Attachment metadata as the API reports it; key names vary by endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

impl AttachmentMeta {
    pub fn display_name(&self) -> &str {
        self.filename
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("unnamed")
    }

    pub fn link(&self) -> Option<&str> {
        self.url.as_deref().or(self.href.as_deref())
    }

    pub fn download_link(&self) -> Option<&str> {
        self.download_url.as_deref().or_else(|| self.link())
    }
}

/// A to-do as returned by the list and detail endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct Todo {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_html: Option<String>,
    #[serde(default)]
    pub assignees: Vec<Person>,
    #[serde(default)]
    pub due_on: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub creator: Option<Person>,
    #[serde(default)]
    pub comments_count: Option<u64>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub comments_url: Option<String>,
    #[serde(default)]
    pub bucket: Option<BucketRef>,
    #[serde(default)]
    pub parent: Option<ParentRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub creator: Option<Person>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedComment {
    pub id: u64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub content_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
}

impl From<Comment> for EnrichedComment {
    fn from(comment: Comment) -> Self {
        let creator = comment.creator.unwrap_or_default();
        Self {
            id: comment.id,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            author: creator.name,
            author_email: creator.email_address,
            content_html: comment.content,
            attachments: comment.attachments,
        }
    }
}

/// A to-do merged with its detail record and full comment list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTask {
    pub id: u64,
    pub bucket_id: u64,
    pub list: String,
    #[serde(default)]
    pub group: Option<String>,
    pub title: Option<String>,
    pub assignees: Vec<String>,
    pub due_on: Option<String>,
    pub created_at: Option<String>,
    pub completed: bool,
    pub completed_at: Option<String>,
    pub created_by: Option<String>,
    /// Rich-text (HTML) description.
    pub description: Option<String>,
    pub comments_count: Option<u64>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    /// Empty when the comments fetch failed; never absent.
    #[serde(default)]
    pub comments: Vec<EnrichedComment>,
    pub app_url: Option<String>,
    pub url: Option<String>,
    /// False when the detail fetch failed and the list summary was used.
    #[serde(default = "default_true")]
    pub detail_fetched: bool,
}

fn default_true() -> bool {
    true
}

/// Where a to-do sits inside its project.
#[derive(Debug, Clone)]
pub struct TaskPlacement {
    pub bucket_id: u64,
    pub list: String,
    pub group: Option<String>,
}

impl EnrichedTask {
    pub fn from_parts(
        source: Todo,
        comments: Vec<EnrichedComment>,
        placement: &TaskPlacement,
        detail_fetched: bool,
    ) -> Self {
        let title = source.title.or(source.content);
        let description = source
            .description
            .filter(|d| !d.is_empty())
            .or(source.description_html);

        Self {
            id: source.id,
            bucket_id: placement.bucket_id,
            list: placement.list.clone(),
            group: placement.group.clone(),
            title,
            assignees: source
                .assignees
                .into_iter()
                .filter_map(|p| p.name)
                .collect(),
            due_on: source.due_on,
            created_at: source.created_at,
            completed: source.completed,
            completed_at: source.completed_at,
            created_by: source.creator.and_then(|c| c.name),
            description,
            comments_count: source.comments_count,
            attachments: source.attachments,
            comments,
            app_url: source.app_url,
            url: source.url,
            detail_fetched,
        }
    }
}

/// Project name -> list (or `"list - group"`) label -> tasks, in discovery order.
pub type ExportTree = IndexMap<String, IndexMap<String, Vec<EnrichedTask>>>;
