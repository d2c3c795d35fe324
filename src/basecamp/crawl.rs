//! Walks projects -> todoset -> todolists -> groups -> todos -> comments
//!
//! Every request is awaited in turn. Failures below the project level are
//! logged and isolated to the record that failed.

use indexmap::IndexMap;
use std::time::Duration;

use super::client::{
    decode_records, get_all_pages, get_json, get_with_retry, ApiTransport, RetryPolicy,
};
use super::types::{
    BasecampError, Comment, EnrichedComment, EnrichedTask, ExportTree, Project, TaskPlacement, Todo,
    TodoGroup, TodoList, Todoset,
};

/// Behaviour toggles for a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOptions {
    /// Split lists into `"list - group"` entries when groups exist.
    pub follow_groups: bool,
    /// Follow `Link rel="next"` on comment collections.
    pub paginate_comments: bool,
    /// Applied to per-task detail fetches.
    pub retry: RetryPolicy,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            follow_groups: true,
            paginate_comments: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl CrawlOptions {
    pub fn with_retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.retry = RetryPolicy {
            max_attempts,
            backoff_base,
        };
        self
    }
}

/// URL of the dock entry called `name`, if that tool is enabled.
pub fn find_enabled_integration<'a>(project: &'a Project, name: &str) -> Option<&'a str> {
    project
        .dock
        .iter()
        .find(|entry| entry.name == name && entry.enabled)
        .and_then(|entry| entry.url.as_deref())
        .filter(|url| !url.is_empty())
}

pub struct Crawler<'a, T: ApiTransport + ?Sized> {
    transport: &'a T,
    api_base: String,
    account_id: String,
    options: CrawlOptions,
}

impl<'a, T: ApiTransport + ?Sized> Crawler<'a, T> {
    pub fn new(transport: &'a T, api_base: &str, account_id: &str, options: CrawlOptions) -> Self {
        Self {
            transport,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_id: account_id.to_string(),
            options,
        }
    }

    fn bucket_url(&self, bucket_id: u64, path: &str) -> String {
        format!(
            "{}/{}/buckets/{}/{}",
            self.api_base, self.account_id, bucket_id, path
        )
    }

    /// Every project visible to the account, as raw records.
    pub async fn fetch_projects(&self) -> Result<Vec<serde_json::Value>, BasecampError> {
        let url = format!("{}/{}/projects.json", self.api_base, self.account_id);
        let records = get_all_pages(self.transport, &url, true).await?;
        tracing::info!("Fetched {} projects", records.len());
        Ok(records)
    }

    /// Build the export tree. Every project gets a key, even when it
    /// contributes no lists.
    pub async fn crawl(&self, projects: &[Project]) -> ExportTree {
        let mut tree = ExportTree::new();

        for (index, project) in projects.iter().enumerate() {
            tracing::info!(
                "[{}/{}] Crawling project {} ({})",
                index + 1,
                projects.len(),
                project.name,
                project.id
            );
            let lists = self.crawl_project(project).await;
            let entry = tree.entry(project.name.clone()).or_default();
            for (label, tasks) in lists {
                entry.entry(label).or_default().extend(tasks);
            }
        }

        tree
    }

    /// Lists of one project; empty when the project has no usable todoset.
    pub async fn crawl_project(&self, project: &Project) -> IndexMap<String, Vec<EnrichedTask>> {
        let mut lists = IndexMap::new();

        let Some(todoset_url) = find_enabled_integration(project, "todoset") else {
            tracing::info!("Project {} has no enabled todoset, skipping", project.name);
            return lists;
        };

        let todolists = match self.fetch_todolists(project.id, todoset_url).await {
            Ok(todolists) => todolists,
            Err(e) => {
                tracing::warn!("Skipping project {}: todolists unavailable: {}", project.name, e);
                return lists;
            }
        };
        tracing::debug!("Project {} has {} todolists", project.name, todolists.len());

        for list in &todolists {
            for (label, tasks) in self.crawl_list(project.id, list).await {
                lists.entry(label).or_insert_with(Vec::new).extend(tasks);
            }
        }

        lists
    }

    async fn fetch_todolists(
        &self,
        bucket_id: u64,
        todoset_url: &str,
    ) -> Result<Vec<TodoList>, BasecampError> {
        let todoset: Todoset = get_json(self.transport, todoset_url).await?;

        let url = match (todoset.todolists_url, todoset.id) {
            (Some(url), _) => url,
            (None, Some(id)) => {
                self.bucket_url(bucket_id, &format!("todosets/{}/todolists.json", id))
            }
            (None, None) => {
                return Err(BasecampError::Structure(format!(
                    "todoset at {} has neither todolists_url nor id",
                    todoset_url
                )))
            }
        };

        let records = get_all_pages(self.transport, &url, true).await?;
        Ok(decode_records(records, "todolist"))
    }

    /// Entries for one list: one per group when groups are followed and
    /// present, otherwise a single flat entry.
    async fn crawl_list(
        &self,
        bucket_id: u64,
        list: &TodoList,
    ) -> Vec<(String, Vec<EnrichedTask>)> {
        let label = list.label();

        if self.options.follow_groups {
            let groups = self.fetch_groups(bucket_id, list).await;
            if !groups.is_empty() {
                let mut entries = Vec::with_capacity(groups.len());
                for group in groups {
                    let group_name = group.label();
                    let Some(todos_url) = group.todos_url.as_deref() else {
                        continue;
                    };
                    let placement = TaskPlacement {
                        bucket_id,
                        list: label.clone(),
                        group: Some(group_name.clone()),
                    };
                    match self.crawl_tasks(todos_url, &placement).await {
                        Ok(tasks) => entries.push((format!("{} - {}", label, group_name), tasks)),
                        Err(e) => tracing::warn!(
                            "Skipping group {} of list {}: {}",
                            group_name,
                            label,
                            e
                        ),
                    }
                }
                return entries;
            }
        }

        let todos_url = list.todos_url.clone().unwrap_or_else(|| {
            self.bucket_url(bucket_id, &format!("todolists/{}/todos.json", list.id))
        });
        let placement = TaskPlacement {
            bucket_id,
            list: label.clone(),
            group: None,
        };

        match self.crawl_tasks(&todos_url, &placement).await {
            Ok(tasks) => vec![(label, tasks)],
            Err(e) => {
                tracing::warn!("Skipping list {}: {}", label, e);
                Vec::new()
            }
        }
    }

    /// Groups that expose their own todos URL. Any failure reads as "no groups".
    async fn fetch_groups(&self, bucket_id: u64, list: &TodoList) -> Vec<TodoGroup> {
        let url = list.groups_url.clone().unwrap_or_else(|| {
            self.bucket_url(bucket_id, &format!("todolists/{}/groups.json", list.id))
        });

        match get_all_pages(self.transport, &url, true).await {
            Ok(records) => decode_records::<TodoGroup>(records, "group")
                .into_iter()
                .filter(|g| g.todos_url.as_deref().is_some_and(|u| !u.is_empty()))
                .collect(),
            Err(e) => {
                tracing::debug!("No groups for list {}: {}", list.label(), e);
                Vec::new()
            }
        }
    }

    async fn crawl_tasks(
        &self,
        todos_url: &str,
        placement: &TaskPlacement,
    ) -> Result<Vec<EnrichedTask>, BasecampError> {
        let records = get_all_pages(self.transport, todos_url, true).await?;
        let todos: Vec<Todo> = decode_records(records, "todo");

        let mut tasks = Vec::with_capacity(todos.len());
        for todo in todos {
            tasks.push(self.enrich_task(todo, placement).await);
        }
        Ok(tasks)
    }

    async fn enrich_task(&self, summary: Todo, placement: &TaskPlacement) -> EnrichedTask {
        let detail = self.fetch_detail(placement.bucket_id, &summary).await;
        let (source, detail_fetched) = match detail {
            Some(detail) => (detail, true),
            None => {
                tracing::warn!("Using list summary for todo {}", summary.id);
                (summary, false)
            }
        };

        let comments = self.fetch_comments(placement.bucket_id, &source).await;
        EnrichedTask::from_parts(source, comments, placement, detail_fetched)
    }

    /// Full todo record, retried on transient failures. `None` when retries
    /// run out or the body does not decode.
    pub async fn fetch_detail(&self, bucket_id: u64, todo: &Todo) -> Option<Todo> {
        let url = todo
            .url
            .clone()
            .unwrap_or_else(|| self.bucket_url(bucket_id, &format!("todos/{}.json", todo.id)));

        self.fetch_detail_at(&url).await
    }

    async fn fetch_detail_at(&self, url: &str) -> Option<Todo> {
        let response = get_with_retry(self.transport, url, &self.options.retry).await?;
        match response.json::<Todo>() {
            Ok(detail) => Some(detail),
            Err(e) => {
                tracing::error!("Todo detail {} did not decode: {}", url, e);
                None
            }
        }
    }

    /// One to-do addressed by id, as a single-task tree keyed by its project
    /// and list names taken from the detail record.
    pub async fn fetch_todo(
        &self,
        bucket_id: u64,
        todo_id: u64,
    ) -> Result<ExportTree, BasecampError> {
        let url = self.bucket_url(bucket_id, &format!("todos/{}.json", todo_id));
        let Some(detail) = self.fetch_detail_at(&url).await else {
            return Err(BasecampError::Structure(format!(
                "to-do {} could not be fetched",
                url
            )));
        };

        let project = detail
            .bucket
            .as_ref()
            .and_then(|b| b.name.clone())
            .unwrap_or_else(|| format!("Project {}", bucket_id));
        let list = detail
            .parent
            .as_ref()
            .and_then(|p| p.title.clone())
            .unwrap_or_default();
        let placement = TaskPlacement {
            bucket_id,
            list: list.clone(),
            group: None,
        };

        let comments = self.fetch_comments(bucket_id, &detail).await;
        tracing::info!(
            "Fetched to-do {} with {} comment(s)",
            todo_id,
            comments.len()
        );
        let task = EnrichedTask::from_parts(detail, comments, &placement, true);

        let mut tree = ExportTree::new();
        tree.entry(project).or_default().insert(list, vec![task]);
        Ok(tree)
    }

    /// All comments on a todo, oldest page first. Empty on failure.
    pub async fn fetch_comments(&self, bucket_id: u64, todo: &Todo) -> Vec<EnrichedComment> {
        let primary = todo.comments_url.clone().unwrap_or_else(|| {
            self.bucket_url(bucket_id, &format!("recordings/{}/comments.json", todo.id))
        });
        let follow = self.options.paginate_comments;

        let records = match get_all_pages(self.transport, &primary, follow).await {
            Ok(records) => records,
            Err(e) if e.status() == Some(404) => {
                let fallback =
                    self.bucket_url(bucket_id, &format!("todos/{}/comments.json", todo.id));
                match get_all_pages(self.transport, &fallback, follow).await {
                    Ok(records) => records,
                    Err(e) => {
                        tracing::warn!("No comments for todo {}: {}", todo.id, e);
                        return Vec::new();
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Comments fetch failed for todo {}: {}", todo.id, e);
                return Vec::new();
            }
        };

        decode_records::<Comment>(records, "comment")
            .into_iter()
            .map(EnrichedComment::from)
            .collect()
    }
}
