//! Run directory, JSON snapshots, CSV and attachment artifacts
//!
//! A run lays out:
//!
//! ```text
//! results/run_YYYYmmdd_HHMMSS/
//!   projects_dump.json
//!   todos_deep.json
//!   todos_jira.csv
//!   attachments/todo_<id>/...
//!   attachments/downloads.json
//! ```
//!
//! A single to-do export writes `todo_<id>.json` and `todo_<id>_jira.csv`
//! into its own run directory instead of the project files.

mod attachments;
mod flatten;
mod html;
mod types;

pub use attachments::{
    collect_task_attachments, task_folder, AttachmentDownloader, ATTACHMENTS_DIR, MANIFEST_FILE,
};
pub use flatten::{flatten_tree, format_attachments, format_comments, write_csv, CSV_FILE};
pub use html::{extract_attachment_refs, html_to_text, sanitize_filename, AttachmentRef};
pub use types::{CsvRecord, DownloadRecord, DownloadSummary, ExportError, ExportSummary};

use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::basecamp::client::decode_records;
use crate::basecamp::{ApiTransport, Crawler, ExportTree, Project, TodoLink};

pub const DEFAULT_OUTPUT_ROOT: &str = "results";
pub const PROJECTS_FILE: &str = "projects_dump.json";
pub const TREE_FILE: &str = "todos_deep.json";

/// Pretty-printed JSON, written through a temp file then renamed into place.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExportError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a `todos_deep.json` snapshot.
pub fn read_tree(path: &Path) -> Result<ExportTree, ExportError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Timestamped output directory of one run.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    pub fn create(output_root: &Path) -> Result<Self, ExportError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = output_root.join(format!("run_{}", stamp));
        fs::create_dir_all(&path)?;
        tracing::info!("Run directory: {}", path.display());
        Ok(Self { path })
    }

    /// Use an existing directory as-is.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn projects_path(&self) -> PathBuf {
        self.path.join(PROJECTS_FILE)
    }

    pub fn tree_path(&self) -> PathBuf {
        self.path.join(TREE_FILE)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.path.join(CSV_FILE)
    }

    pub fn attachments_dir(&self) -> PathBuf {
        self.path.join(ATTACHMENTS_DIR)
    }

    pub fn todo_json_path(&self, todo_id: u64) -> PathBuf {
        self.path.join(format!("todo_{}.json", todo_id))
    }

    pub fn todo_csv_path(&self, todo_id: u64) -> PathBuf {
        self.path.join(format!("todo_{}_jira.csv", todo_id))
    }
}

/// Drives one export: project dump, crawl, snapshots, CSV.
pub struct Exporter<'a, T: ApiTransport + ?Sized> {
    crawler: Crawler<'a, T>,
    output_root: PathBuf,
}

impl<'a, T: ApiTransport + ?Sized> Exporter<'a, T> {
    pub fn new(crawler: Crawler<'a, T>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            crawler,
            output_root: output_root.into(),
        }
    }

    /// Returns the tree alongside the summary so attachments can be fetched
    /// without re-reading the snapshot.
    pub async fn run(&self) -> Result<(ExportSummary, ExportTree), ExportError> {
        // Created first so a failed fetch still leaves a run directory.
        let run = RunDirectory::create(&self.output_root)?;

        let records = self.crawler.fetch_projects().await?;
        write_json(&run.projects_path(), &records)?;
        let projects: Vec<Project> = decode_records(records, "project");

        let tree = self.crawler.crawl(&projects).await;
        write_json(&run.tree_path(), &tree)?;
        tracing::info!("Wrote {}", run.tree_path().display());

        let csv_rows = write_csv(&tree, &run.csv_path())?;
        let tasks: usize = tree
            .values()
            .flat_map(|lists| lists.values())
            .map(Vec::len)
            .sum();

        let summary = ExportSummary {
            run_dir: run.path().to_path_buf(),
            projects: projects.len(),
            tasks,
            csv_rows,
        };
        Ok((summary, tree))
    }

    /// Export the one to-do `link` points at. The JSON is a one-task tree, so
    /// it replays through [`read_tree`] like a full snapshot.
    pub async fn export_todo(
        &self,
        link: &TodoLink,
    ) -> Result<(RunDirectory, ExportTree), ExportError> {
        let run = RunDirectory::create(&self.output_root)?;

        let tree = self.crawler.fetch_todo(link.bucket_id, link.todo_id).await?;
        write_json(&run.todo_json_path(link.todo_id), &tree)?;
        write_csv(&tree, &run.todo_csv_path(link.todo_id))?;
        tracing::info!(
            "Exported to-do {} into {}",
            link.todo_id,
            run.path().display()
        );

        Ok((run, tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basecamp::client::testing::FakeTransport;
    use crate::basecamp::CrawlOptions;
    use serde_json::{json, Value};

    const API: &str = "https://3.basecampapi.com";
    const A: &str = "https://3.basecampapi.com/99/buckets/1";

    fn todo(id: u64, title: &str) -> Value {
        json!({
            "id": id,
            "title": title,
            "url": format!("{}/todos/{}.json", A, id),
            "comments_url": format!("{}/recordings/{}/comments.json", A, id),
            "app_url": format!("https://3.basecamp.com/99/buckets/1/todos/{}", id),
        })
    }

    fn comment(id: u64, text: &str) -> Value {
        json!({
            "id": id,
            "created_at": "2024-01-01T00:00:00Z",
            "content": format!("<div>{}</div>", text),
            "creator": {"name": "Ana", "email_address": "ana@example.com"}
        })
    }

    /// Project A: one list, three todos; two have comments over two pages.
    /// Project B: no todoset in its dock.
    fn fixture() -> FakeTransport {
        let transport = FakeTransport::new();
        transport
            .json(
                &format!("{}/99/projects.json", API),
                json!([
                    {"id": 1, "name": "A", "dock": [
                        {
                            "name": "todoset",
                            "enabled": true,
                            "url": format!("{}/todosets/2.json", A)
                        }
                    ]},
                    {"id": 5, "name": "B", "dock": [
                        {"name": "message_board", "enabled": true, "url": "https://x/mb.json"}
                    ]}
                ]),
            )
            .json(
                &format!("{}/todosets/2.json", A),
                json!({"id": 2, "todolists_url": format!("{}/todosets/2/todolists.json", A)}),
            )
            .json(
                &format!("{}/todosets/2/todolists.json", A),
                json!([{
                    "id": 3,
                    "title": "Launch",
                    "todos_url": format!("{}/todolists/3/todos.json", A)
                }]),
            )
            .json(
                &format!("{}/todolists/3/todos.json", A),
                json!([todo(10, "One"), todo(11, "Two"), todo(12, "Three")]),
            )
            .json(&format!("{}/todolists/3/groups.json", A), json!([]));

        for (id, title) in [(10, "One"), (11, "Two"), (12, "Three")] {
            transport.json(&format!("{}/todos/{}.json", A, id), todo(id, title));
        }
        for id in [10u64, 11] {
            let first = format!("{}/recordings/{}/comments.json", A, id);
            let second = format!("{}?page=2", first);
            let page_one = json!([comment(id * 10, "first"), comment(id * 10 + 1, "second")]);
            transport
                .page(&first, page_one, Some(&second))
                .json(&second, json!([comment(id * 10 + 2, "third")]));
        }
        transport.json(&format!("{}/recordings/12/comments.json", A), json!([]));
        transport
    }

    #[tokio::test]
    async fn test_end_to_end_export() {
        let dir = tempfile::tempdir().unwrap();
        let transport = fixture();
        let crawler = Crawler::new(&transport, API, "99", CrawlOptions::default());

        let (summary, tree) = Exporter::new(crawler, dir.path()).run().await.unwrap();

        assert_eq!(summary.projects, 2);
        assert_eq!(summary.tasks, 3);
        assert_eq!(summary.csv_rows, 3);
        assert!(summary.run_dir.starts_with(dir.path()));
        assert!(summary
            .run_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("run_"));

        let tasks = &tree["A"]["Launch"];
        assert_eq!(tasks[0].comments.len(), 3);
        assert_eq!(tasks[1].comments.len(), 3);
        assert!(tasks[2].comments.is_empty());

        let run = RunDirectory::at(&summary.run_dir);
        let snapshot: Value =
            serde_json::from_str(&fs::read_to_string(run.tree_path()).unwrap()).unwrap();
        assert_eq!(snapshot["B"], json!({}));
        assert_eq!(snapshot["A"]["Launch"].as_array().unwrap().len(), 3);

        let dump: Value =
            serde_json::from_str(&fs::read_to_string(run.projects_path()).unwrap()).unwrap();
        assert_eq!(dump.as_array().unwrap().len(), 2);

        let mut reader = csv::Reader::from_path(run.csv_path()).unwrap();
        let rows: Vec<CsvRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.project == "A"));
        assert!(rows[0]
            .comments
            .contains("Ana (ana@example.com) at 2024-01-01T00:00:00Z:\n> first"));
        assert!(rows[2].comments.is_empty());

        let replayed = read_tree(&run.tree_path()).unwrap();
        assert_eq!(replayed, tree);
    }

    #[tokio::test]
    async fn test_failed_project_fetch_leaves_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.status(&format!("{}/99/projects.json", API), 401);
        let crawler = Crawler::new(&transport, API, "99", CrawlOptions::default());

        let result = Exporter::new(crawler, dir.path()).run().await;
        assert!(matches!(result, Err(ExportError::Basecamp(_))));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_export_single_todo() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let mut detail = todo(10, "One");
        detail["bucket"] = json!({"id": 1, "name": "A"});
        detail["parent"] = json!({"id": 3, "title": "Launch"});
        transport
            .json(&format!("{}/todos/10.json", A), detail)
            .json(
                &format!("{}/recordings/10/comments.json", A),
                json!([comment(100, "looks good")]),
            );
        let crawler = Crawler::new(&transport, API, "99", CrawlOptions::default());
        let link = crate::basecamp::parse_todo_url("https://3.basecamp.com/99/buckets/1/todos/10")
            .unwrap();

        let (run, tree) = Exporter::new(crawler, dir.path())
            .export_todo(&link)
            .await
            .unwrap();

        assert_eq!(read_tree(&run.todo_json_path(10)).unwrap(), tree);
        let mut reader = csv::Reader::from_path(run.todo_csv_path(10)).unwrap();
        let rows: Vec<CsvRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].project, "A");
        assert_eq!(rows[0].list, "Launch");
        assert!(rows[0].comments.contains("looks good"));
        assert!(!run.tree_path().exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_single_todo_missing_detail() {
        let dir = tempfile::tempdir().unwrap();
        let transport = FakeTransport::new();
        let crawler = Crawler::new(&transport, API, "99", CrawlOptions::default());
        let link = TodoLink {
            account_id: None,
            bucket_id: 1,
            todo_id: 10,
        };

        let result = Exporter::new(crawler, dir.path()).export_todo(&link).await;
        assert!(matches!(result, Err(ExportError::Basecamp(_))));
    }

    #[test]
    fn test_write_json_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.json");
        write_json(&path, &json!({"a": 1})).unwrap();
        write_json(&path, &json!({"a": 2})).unwrap();
        let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["a"], 2);
        assert!(!dir.path().join("x.json.tmp").exists());
    }
}
