//! Export tree -> one CSV row per task

use std::collections::HashSet;
use std::path::Path;

use super::html::{extract_attachment_refs, html_to_text};
use super::types::{CsvRecord, ExportError};
use crate::basecamp::{EnrichedComment, EnrichedTask, ExportTree};

pub const CSV_FILE: &str = "todos_jira.csv";

pub fn flatten_tree(tree: &ExportTree) -> Vec<CsvRecord> {
    tree.iter()
        .flat_map(|(project, lists)| {
            lists.iter().flat_map(move |(label, tasks)| {
                tasks.iter().map(move |task| task_record(project, label, task))
            })
        })
        .collect()
}

fn task_record(project: &str, label: &str, task: &EnrichedTask) -> CsvRecord {
    CsvRecord {
        project: project.to_string(),
        list: if task.list.is_empty() {
            label.to_string()
        } else {
            task.list.clone()
        },
        group: task.group.clone().unwrap_or_default(),
        todo_id: task.id,
        title: task.title.clone().unwrap_or_default(),
        description: task.description.as_deref().map(html_to_text).unwrap_or_default(),
        assignees: task.assignees.join(", "),
        created_by: task.created_by.clone().unwrap_or_default(),
        due_date: task.due_on.clone().unwrap_or_default(),
        completed: task.completed,
        comments: format_comments(&task.comments),
        attachments: format_attachments(task),
        app_url: task.app_url.clone().unwrap_or_default(),
    }
}

/// `"{name} ({email}) at {created}:\n> {text}"` per comment with text,
/// separated by a blank line.
pub fn format_comments(comments: &[EnrichedComment]) -> String {
    comments
        .iter()
        .filter_map(|c| {
            let text = c.content_html.as_deref().map(html_to_text).unwrap_or_default();
            if text.is_empty() {
                return None;
            }
            Some(format!(
                "{} ({}) at {}:\n> {}",
                c.author.as_deref().unwrap_or("Unknown"),
                c.author_email.as_deref().unwrap_or(""),
                c.created_at.as_deref().unwrap_or(""),
                text
            ))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `"{name}: {url}"` for attachment metadata and inline files, one entry per URL.
pub fn format_attachments(task: &EnrichedTask) -> String {
    let mut seen = HashSet::new();
    let mut lines = Vec::new();

    for meta in &task.attachments {
        if let Some(url) = meta.link() {
            if seen.insert(url.to_string()) {
                lines.push(format!("{}: {}", meta.display_name(), url));
            }
        }
    }

    let inline = task
        .description
        .iter()
        .chain(task.comments.iter().filter_map(|c| c.content_html.as_ref()))
        .flat_map(|html| extract_attachment_refs(html));
    for reference in inline {
        if seen.insert(reference.url.clone()) {
            lines.push(format!("{}: {}", reference.file_name(), reference.url));
        }
    }

    lines.join(" | ")
}

/// Write the CSV with its header row. Returns the number of data rows.
pub fn write_csv(tree: &ExportTree, path: &Path) -> Result<usize, ExportError> {
    let records = flatten_tree(tree);
    let mut writer = csv::Writer::from_path(path)?;
    for record in &records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    tracing::info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basecamp::{AttachmentMeta, TaskPlacement, Todo};
    use indexmap::IndexMap;
    use serde_json::json;

    fn task(id: u64, comments: Vec<EnrichedComment>) -> EnrichedTask {
        let todo: Todo = serde_json::from_value(json!({
            "id": id,
            "title": format!("Task {}", id),
            "description": "<div>Do <em>the</em> thing</div>",
            "assignees": [{"name": "Ana"}, {"name": "Bo"}],
            "creator": {"name": "Cy"},
            "due_on": "2024-05-01",
            "completed": true,
            "app_url": format!("https://3.basecamp.com/1/buckets/2/todos/{}", id),
        }))
        .unwrap();
        let placement = TaskPlacement {
            bucket_id: 2,
            list: "Launch".into(),
            group: Some("Design".into()),
        };
        EnrichedTask::from_parts(todo, comments, &placement, true)
    }

    fn comment(id: u64, author: &str, html: &str) -> EnrichedComment {
        EnrichedComment {
            id,
            created_at: Some("2024-04-01T10:00:00Z".into()),
            updated_at: None,
            author: Some(author.into()),
            author_email: Some(format!("{}@example.com", author.to_lowercase())),
            content_html: Some(html.into()),
            attachments: vec![],
        }
    }

    #[test]
    fn test_flatten_record_fields() {
        let mut lists = IndexMap::new();
        lists.insert("Launch - Design".to_string(), vec![task(7, vec![])]);
        let mut tree = ExportTree::new();
        tree.insert("Website".to_string(), lists);
        tree.insert("Empty".to_string(), IndexMap::new());

        let records = flatten_tree(&tree);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.project, "Website");
        assert_eq!(r.list, "Launch");
        assert_eq!(r.group, "Design");
        assert_eq!(r.todo_id, 7);
        assert_eq!(r.description, "Do the thing");
        assert_eq!(r.assignees, "Ana, Bo");
        assert_eq!(r.created_by, "Cy");
        assert!(r.completed);
    }

    #[test]
    fn test_comment_blocks() {
        let comments = vec![
            comment(1, "Ana", "<p>First</p>"),
            comment(2, "Bo", "<p>  </p>"),
            comment(3, "Cy", "Second <b>one</b>"),
        ];
        assert_eq!(
            format_comments(&comments),
            "Ana (ana@example.com) at 2024-04-01T10:00:00Z:\n> First\n\n\
             Cy (cy@example.com) at 2024-04-01T10:00:00Z:\n> Second one"
        );
    }

    #[test]
    fn test_attachment_column_dedupes_urls() {
        let mut t = task(
            7,
            vec![comment(
                1,
                "Ana",
                r#"<bc-attachment filename="a.pdf" href="https://x/a.pdf"></bc-attachment>
                   <img src="https://x/b.png">"#,
            )],
        );
        t.attachments = vec![AttachmentMeta {
            filename: Some("a.pdf".into()),
            url: Some("https://x/a.pdf".into()),
            ..AttachmentMeta::default()
        }];

        assert_eq!(format_attachments(&t), "a.pdf: https://x/a.pdf | b.png: https://x/b.png");
    }

    #[test]
    fn test_write_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CSV_FILE);

        let mut lists = IndexMap::new();
        lists.insert("Launch".to_string(), vec![task(1, vec![]), task(2, vec![])]);
        let mut tree = ExportTree::new();
        tree.insert("Website".to_string(), lists);

        assert_eq!(write_csv(&tree, &path).unwrap(), 2);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec![
                "Project", "List", "Group", "Basecamp Todo ID", "Todo Title", "Description",
                "Assignees", "Created By", "Due Date", "Completed", "Comments", "Attachments",
                "App URL"
            ]
        );
        let rows: Vec<CsvRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows[1].todo_id, 2);
        assert_eq!(rows[1].title, "Task 2");
    }
}
