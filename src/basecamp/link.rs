//! Basecamp to-do links pasted from the browser or the API

use reqwest::Url;

use super::types::BasecampError;

/// A to-do addressed by its URL, e.g.
/// `https://3.basecamp.com/4146522/buckets/1234/todos/5678`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoLink {
    /// Leading numeric path segment, when the URL carries one.
    pub account_id: Option<String>,
    pub bucket_id: u64,
    pub todo_id: u64,
}

/// Accepts web (`3.basecamp.com`) and API (`3.basecampapi.com`) URLs, with
/// either `buckets` or `projects` as the project segment. A `.json` suffix
/// and query or fragment parts are ignored.
pub fn parse_todo_url(input: &str) -> Result<TodoLink, BasecampError> {
    let invalid = || {
        BasecampError::InvalidUrl(format!(
            "{} (expected .../buckets/<project_id>/todos/<todo_id>)",
            input
        ))
    };

    let url = Url::parse(input.trim()).map_err(|_| invalid())?;
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let numeric = |seg: &str| seg.trim_end_matches(".json").parse::<u64>().ok();

    let (bucket_id, todo_id) = segments
        .windows(4)
        .find_map(|w| match w {
            [kind, bucket, "todos", todo] if *kind == "buckets" || *kind == "projects" => {
                Some((numeric(*bucket)?, numeric(*todo)?))
            }
            _ => None,
        })
        .ok_or_else(invalid)?;

    let account_id = segments
        .first()
        .filter(|seg| seg.chars().all(|c| c.is_ascii_digit()))
        .map(|seg| seg.to_string());

    Ok(TodoLink {
        account_id,
        bucket_id,
        todo_id,
    })
}
