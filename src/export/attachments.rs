//! Per-task attachment download through a logged-in session

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::html::{extract_attachment_refs, AttachmentRef};
use super::types::{DownloadRecord, DownloadSummary, ExportError};
use super::write_json;
use crate::auth::SessionProvider;
use crate::basecamp::{AttachmentMeta, EnrichedTask, ExportTree};

pub const ATTACHMENTS_DIR: &str = "attachments";
pub const MANIFEST_FILE: &str = "downloads.json";

/// Folder name for a task's files under the attachments directory.
pub fn task_folder(todo_id: u64) -> String {
    format!("todo_{}", todo_id)
}

fn meta_ref(meta: &AttachmentMeta) -> Option<AttachmentRef> {
    let url = meta.download_link()?;
    Some(AttachmentRef {
        url: url.to_string(),
        filename: meta.filename.clone().or_else(|| meta.name.clone()),
    })
}

/// Every file a task points at: its attachment metadata, files inline in the
/// description, then each comment's metadata and inline files. Each URL once.
pub fn collect_task_attachments(task: &EnrichedTask) -> Vec<AttachmentRef> {
    let mut refs: Vec<AttachmentRef> = task.attachments.iter().filter_map(meta_ref).collect();
    if let Some(description) = &task.description {
        refs.extend(extract_attachment_refs(description));
    }
    for comment in &task.comments {
        refs.extend(comment.attachments.iter().filter_map(meta_ref));
        if let Some(body) = &comment.content_html {
            refs.extend(extract_attachment_refs(body));
        }
    }

    let mut seen = HashSet::new();
    refs.retain(|r| seen.insert(r.url.clone()));
    refs
}

/// Pick a name not yet used in this task's folder: `name`, `name_1.ext`, ...
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    };
    let mut n = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

pub struct AttachmentDownloader<'a, S: SessionProvider + ?Sized> {
    session: &'a S,
    root: PathBuf,
}

impl<'a, S: SessionProvider + ?Sized> AttachmentDownloader<'a, S> {
    /// `root` is the attachments directory of a run.
    pub fn new(session: &'a S, root: impl Into<PathBuf>) -> Self {
        Self {
            session,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download one task's files into `todo_<id>/`. Failures are recorded,
    /// never raised.
    pub async fn download_task(&self, task: &EnrichedTask) -> Vec<DownloadRecord> {
        let refs = collect_task_attachments(task);
        if refs.is_empty() {
            return Vec::new();
        }

        let folder = task_folder(task.id);
        let mut taken = HashSet::new();
        let mut records = Vec::with_capacity(refs.len());

        for reference in refs {
            let name = unique_name(&reference.file_name(), &mut taken);
            let relative = format!("{}/{}", folder, name);
            let local_path = self.root.join(&folder).join(&name);

            let success = self.session.download_file(&reference.url, &local_path).await;
            if success {
                tracing::debug!("Saved {}", local_path.display());
            } else {
                tracing::warn!("Failed to download {} for todo {}", reference.url, task.id);
            }

            records.push(DownloadRecord {
                todo_id: task.id,
                url: reference.url,
                path: relative,
                success,
            });
        }

        records
    }

    /// Download every task's files in tree order and write the manifest.
    pub async fn download_all(&self, tree: &ExportTree) -> Result<DownloadSummary, ExportError> {
        std::fs::create_dir_all(&self.root)?;

        let mut records = Vec::new();
        for lists in tree.values() {
            for tasks in lists.values() {
                for task in tasks {
                    records.extend(self.download_task(task).await);
                }
            }
        }

        let manifest = self.root.join(MANIFEST_FILE);
        write_json(&manifest, &records)?;

        let summary = DownloadSummary {
            attempted: records.len(),
            succeeded: records.iter().filter(|r| r.success).count(),
            manifest: Some(manifest),
        };
        tracing::info!(
            "Downloaded {}/{} attachment(s) into {}",
            summary.succeeded,
            summary.attempted,
            self.root.display()
        );
        Ok(summary)
    }
}
