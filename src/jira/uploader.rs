//! Push exported attachments and completion state into Jira
//!
//! Issues are matched to todos by label: an imported issue carries its
//! Basecamp todo id as a label.

use indexmap::IndexSet;
use std::path::{Path, PathBuf};

use super::client::IssueTracker;
use super::types::{JiraError, JiraIssue, StatusSummary, UploadSummary};
use crate::export::task_folder;

const TODO_ID_COLUMN: &str = "Basecamp Todo ID";
const COMPLETED_COLUMN: &str = "Completed";

/// One CSV row as far as the uploader cares.
struct CsvTodo {
    id: String,
    completed: bool,
}

fn read_rows(csv_path: &Path) -> Result<Vec<CsvTodo>, JiraError> {
    let mut reader = csv::Reader::from_path(csv_path)?;
    let headers = reader.headers()?.clone();

    let id_index = headers
        .iter()
        .position(|h| h == TODO_ID_COLUMN)
        .ok_or_else(|| {
            JiraError::NotFound(format!(
                "column '{}' in {}",
                TODO_ID_COLUMN,
                csv_path.display()
            ))
        })?;
    let completed_index = headers.iter().position(|h| h == COMPLETED_COLUMN);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let id = record.get(id_index).unwrap_or_default().trim();
        if id.is_empty() {
            continue;
        }
        let completed = completed_index
            .and_then(|i| record.get(i))
            .map(is_truthy)
            .unwrap_or(false);
        rows.push(CsvTodo {
            id: id.to_string(),
            completed,
        });
    }
    Ok(rows)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Distinct todo ids in CSV order.
pub fn read_todo_ids(csv_path: &Path) -> Result<Vec<String>, JiraError> {
    let ids: IndexSet<String> = read_rows(csv_path)?.into_iter().map(|r| r.id).collect();
    Ok(ids.into_iter().collect())
}

/// Distinct todo ids whose `Completed` cell is true, 1 or yes.
pub fn read_completed_ids(csv_path: &Path) -> Result<Vec<String>, JiraError> {
    let ids: IndexSet<String> = read_rows(csv_path)?
        .into_iter()
        .filter(|r| r.completed)
        .map(|r| r.id)
        .collect();
    Ok(ids.into_iter().collect())
}

/// Regular files in `dir/todo_<id>/`, sorted by name. Missing folder -> empty;
/// anything there that cannot be listed as a directory is an error.
pub fn todo_files(attachments_dir: &Path, todo_id: &str) -> Result<Vec<PathBuf>, JiraError> {
    let folder = match todo_id.parse::<u64>() {
        Ok(id) => attachments_dir.join(task_folder(id)),
        Err(_) => attachments_dir.join(format!("todo_{}", todo_id)),
    };
    if !folder.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(&folder)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

pub struct JiraUploader<'a, J: IssueTracker + ?Sized> {
    tracker: &'a J,
}

impl<'a, J: IssueTracker + ?Sized> JiraUploader<'a, J> {
    pub fn new(tracker: &'a J) -> Self {
        Self { tracker }
    }

    /// First issue labelled with `todo_id`; warns when the label is shared.
    async fn issue_for(&self, todo_id: &str) -> Option<JiraIssue> {
        let issues = match self.tracker.search_issues_by_label(todo_id).await {
            Ok(issues) => issues,
            Err(e) => {
                tracing::error!("Search for label '{}' failed: {}", todo_id, e);
                return None;
            }
        };

        if issues.len() > 1 {
            let keys: Vec<&str> = issues.iter().map(|i| i.key.as_str()).collect();
            tracing::warn!(
                "Multiple issues labelled '{}': {:?}; using {}",
                todo_id,
                keys,
                keys[0]
            );
        }
        let issue = issues.into_iter().next();
        if issue.is_none() {
            tracing::warn!("No Jira issue labelled '{}'", todo_id);
        }
        issue
    }

    pub async fn upload_all_attachments(
        &self,
        csv_path: &Path,
        attachments_dir: &Path,
        dry_run: bool,
    ) -> Result<UploadSummary, JiraError> {
        self.tracker.test_connection().await?;

        let todo_ids = read_todo_ids(csv_path)?;
        if todo_ids.is_empty() {
            return Err(JiraError::NotFound(format!(
                "todo ids in {}",
                csv_path.display()
            )));
        }

        let mut summary = UploadSummary {
            todos: todo_ids.len(),
            ..UploadSummary::default()
        };

        for todo_id in &todo_ids {
            let Some(issue) = self.issue_for(todo_id).await else {
                continue;
            };

            let files = match todo_files(attachments_dir, todo_id) {
                Ok(files) => files,
                Err(e) => {
                    tracing::error!("Skipping attachments of todo {}: {}", todo_id, e);
                    continue;
                }
            };
            if dry_run {
                tracing::info!(
                    "DRY RUN: would upload {} file(s) from todo_{} to {}",
                    files.len(),
                    todo_id,
                    issue.key
                );
                continue;
            }

            for file in &files {
                match self.tracker.upload_attachment(&issue.key, file).await {
                    Ok(()) => summary.files_uploaded += 1,
                    Err(e) => {
                        tracing::error!(
                            "Failed to upload {} to {}: {}",
                            file.display(),
                            issue.key,
                            e
                        );
                        summary.files_failed += 1;
                    }
                }
            }
            summary.issues_processed += 1;
        }

        tracing::info!(
            "Processed {} issue(s), uploaded {} file(s), {} failed",
            summary.issues_processed,
            summary.files_uploaded,
            summary.files_failed
        );
        Ok(summary)
    }

    pub async fn update_completed(
        &self,
        csv_path: &Path,
        target_status: &str,
        dry_run: bool,
    ) -> Result<StatusSummary, JiraError> {
        self.tracker.test_connection().await?;

        let completed = read_completed_ids(csv_path)?;
        let mut summary = StatusSummary {
            completed_todos: completed.len(),
            ..StatusSummary::default()
        };
        if completed.is_empty() {
            tracing::info!("No completed todos in {}", csv_path.display());
            return Ok(summary);
        }

        for todo_id in &completed {
            let Some(issue) = self.issue_for(todo_id).await else {
                continue;
            };

            if dry_run {
                tracing::info!("DRY RUN: would move {} to '{}'", issue.key, target_status);
                continue;
            }

            match self.tracker.update_issue_status(&issue.key, target_status).await {
                Ok(()) => summary.updated += 1,
                Err(e) => {
                    tracing::error!("Failed to update {}: {}", issue.key, e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Updated {}/{} issue(s) to '{}'",
            summary.updated,
            summary.completed_todos,
            target_status
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::types::JiraUser;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTracker {
        issues: HashMap<String, Vec<&'static str>>,
        offline: bool,
        uploads: Mutex<Vec<(String, String)>>,
        transitions: Mutex<Vec<(String, String)>>,
    }

    impl FakeTracker {
        fn with_issue(mut self, label: &str, keys: Vec<&'static str>) -> Self {
            self.issues.insert(label.to_string(), keys);
            self
        }
    }

    #[async_trait]
    impl IssueTracker for FakeTracker {
        async fn test_connection(&self) -> Result<JiraUser, JiraError> {
            if self.offline {
                return Err(JiraError::Api {
                    status: 401,
                    body: "unauthorized".into(),
                });
            }
            Ok(JiraUser::default())
        }

        async fn search_issues_by_label(&self, label: &str) -> Result<Vec<JiraIssue>, JiraError> {
            Ok(self
                .issues
                .get(label)
                .map(|keys| {
                    keys.iter()
                        .map(|k| JiraIssue {
                            key: k.to_string(),
                            fields: None,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn update_issue_status(
            &self,
            issue_key: &str,
            status: &str,
        ) -> Result<(), JiraError> {
            if issue_key == "MIG-BAD" {
                return Err(JiraError::TransitionUnavailable {
                    issue: issue_key.into(),
                    status: status.into(),
                    available: vec![],
                });
            }
            self.transitions
                .lock()
                .unwrap()
                .push((issue_key.to_string(), status.to_string()));
            Ok(())
        }

        async fn upload_attachment(
            &self,
            issue_key: &str,
            file_path: &Path,
        ) -> Result<(), JiraError> {
            let name = file_path.file_name().unwrap().to_string_lossy().into_owned();
            self.uploads.lock().unwrap().push((issue_key.to_string(), name));
            Ok(())
        }
    }

    fn write_csv(dir: &Path, rows: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("todos_jira.csv");
        let mut writer = csv::Writer::from_path(&path).unwrap();
        writer
            .write_record(["Project", "Basecamp Todo ID", "Todo Title", "Completed"])
            .unwrap();
        for &(id, completed) in rows {
            writer.write_record(["P", id, "t", completed]).unwrap();
        }
        writer.flush().unwrap();
        path
    }

    #[test]
    fn test_read_ids_dedupes_and_skips_blank() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            &[("10", "true"), ("", "true"), ("11", "False"), ("10", "yes"), ("12", "1")],
        );
        assert_eq!(read_todo_ids(&csv).unwrap(), vec!["10", "11", "12"]);
        assert_eq!(read_completed_ids(&csv).unwrap(), vec!["10", "12"]);
    }

    #[test]
    fn test_missing_id_column_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "Project,Title\nP,t\n").unwrap();
        assert!(matches!(read_todo_ids(&path), Err(JiraError::NotFound(_))));
    }

    #[test]
    fn test_todo_files_sorted_and_missing_folder_empty() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("todo_10");
        std::fs::create_dir_all(folder.join("nested")).unwrap();
        std::fs::write(folder.join("b.png"), b"b").unwrap();
        std::fs::write(folder.join("a.pdf"), b"a").unwrap();

        let files = todo_files(dir.path(), "10").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.pdf", "b.png"]);
        assert!(todo_files(dir.path(), "99").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_all_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), &[("10", "false"), ("11", "false"), ("12", "false")]);
        let attachments = dir.path().join("attachments");
        std::fs::create_dir_all(attachments.join("todo_10")).unwrap();
        std::fs::write(attachments.join("todo_10/a.pdf"), b"a").unwrap();
        std::fs::write(attachments.join("todo_10/b.png"), b"b").unwrap();

        let tracker = FakeTracker::default()
            .with_issue("10", vec!["MIG-1", "MIG-9"])
            .with_issue("11", vec!["MIG-2"]);

        let summary = JiraUploader::new(&tracker)
            .upload_all_attachments(&csv, &attachments, false)
            .await
            .unwrap();

        assert_eq!(
            summary,
            UploadSummary {
                todos: 3,
                issues_processed: 2,
                files_uploaded: 2,
                files_failed: 0,
            }
        );
        let uploads = tracker.uploads.lock().unwrap().clone();
        assert_eq!(
            uploads,
            vec![
                ("MIG-1".to_string(), "a.pdf".to_string()),
                ("MIG-1".to_string(), "b.png".to_string())
            ]
        );
    }

    #[test]
    fn test_todo_files_rejects_non_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("todo_10"), b"not a folder").unwrap();
        assert!(matches!(todo_files(dir.path(), "10"), Err(JiraError::Io(_))));
    }

    #[tokio::test]
    async fn test_unreadable_folder_skips_only_that_todo() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), &[("10", "false"), ("11", "false")]);
        let attachments = dir.path().join("attachments");
        std::fs::create_dir_all(attachments.join("todo_11")).unwrap();
        std::fs::write(attachments.join("todo_10"), b"not a folder").unwrap();
        std::fs::write(attachments.join("todo_11/c.txt"), b"c").unwrap();

        let tracker = FakeTracker::default()
            .with_issue("10", vec!["MIG-1"])
            .with_issue("11", vec!["MIG-2"]);

        let summary = JiraUploader::new(&tracker)
            .upload_all_attachments(&csv, &attachments, false)
            .await
            .unwrap();

        assert_eq!(summary.issues_processed, 1);
        assert_eq!(summary.files_uploaded, 1);
        assert_eq!(
            tracker.uploads.lock().unwrap().clone(),
            vec![("MIG-2".to_string(), "c.txt".to_string())]
        );
    }

    #[tokio::test]
    async fn test_dry_run_uploads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), &[("10", "true")]);
        std::fs::create_dir_all(dir.path().join("todo_10")).unwrap();
        std::fs::write(dir.path().join("todo_10/a.pdf"), b"a").unwrap();

        let tracker = FakeTracker::default().with_issue("10", vec!["MIG-1"]);
        let uploader = JiraUploader::new(&tracker);

        let summary = uploader
            .upload_all_attachments(&csv, dir.path(), true)
            .await
            .unwrap();
        assert_eq!(summary.files_uploaded, 0);
        assert!(tracker.uploads.lock().unwrap().is_empty());

        let status = uploader.update_completed(&csv, "Done", true).await.unwrap();
        assert_eq!(status.updated, 0);
        assert!(tracker.transitions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_completed() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(
            dir.path(),
            &[("10", "true"), ("11", "false"), ("12", "True"), ("13", "1")],
        );
        let tracker = FakeTracker::default()
            .with_issue("10", vec!["MIG-1"])
            .with_issue("12", vec!["MIG-BAD"]);

        let summary = JiraUploader::new(&tracker)
            .update_completed(&csv, "Done", false)
            .await
            .unwrap();

        assert_eq!(
            summary,
            StatusSummary {
                completed_todos: 3,
                updated: 1,
                failed: 1,
            }
        );
        assert_eq!(
            tracker.transitions.lock().unwrap().clone(),
            vec![("MIG-1".to_string(), "Done".to_string())]
        );
    }

    #[tokio::test]
    async fn test_connection_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let csv = write_csv(dir.path(), &[("10", "true")]);
        let tracker = FakeTracker {
            offline: true,
            ..FakeTracker::default()
        };

        let result = JiraUploader::new(&tracker)
            .upload_all_attachments(&csv, dir.path(), false)
            .await;
        assert!(matches!(result, Err(JiraError::Api { status: 401, .. })));
    }
}
