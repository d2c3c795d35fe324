//! Jira Cloud REST v3 client

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use std::path::Path;
use std::time::Duration;

use super::auth::JiraSettings;
use super::types::{
    JiraError, JiraIssue, JiraUser, SearchResponse, Transition, TransitionsResponse,
};

const REQUEST_TIMEOUT_SECS: u64 = 30;
const SEARCH_MAX_RESULTS: u32 = 100;

/// Operations the uploader needs from the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn test_connection(&self) -> Result<JiraUser, JiraError>;
    async fn search_issues_by_label(&self, label: &str) -> Result<Vec<JiraIssue>, JiraError>;
    async fn update_issue_status(&self, issue_key: &str, status: &str) -> Result<(), JiraError>;
    async fn upload_attachment(&self, issue_key: &str, file_path: &Path) -> Result<(), JiraError>;
}

/// JQL matching issues of `project_key` labelled `label`.
pub fn label_jql(project_key: &str, label: &str) -> String {
    format!(
        "project = {} AND labels = \"{}\"",
        project_key,
        label.replace('\\', "\\\\").replace('"', "\\\"")
    )
}

/// Transition whose target status matches `status`, ignoring case.
pub fn find_transition<'a>(transitions: &'a [Transition], status: &str) -> Option<&'a Transition> {
    transitions
        .iter()
        .find(|t| t.to.name.eq_ignore_ascii_case(status))
}

pub struct JiraClient {
    http: Client,
    base_url: String,
    project_key: String,
}

impl JiraClient {
    pub fn new(settings: &JiraSettings) -> Result<Self, JiraError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&settings.auth().to_basic_auth())
            .map_err(|e| JiraError::Config(format!("invalid credentials header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.clone(),
            project_key: settings.project_key.clone(),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path)
    }

    async fn expect(response: Response, expected: StatusCode) -> Result<Response, JiraError> {
        let status = response.status();
        if status == expected {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(JiraError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn transitions(&self, issue_key: &str) -> Result<Vec<Transition>, JiraError> {
        let url = self.api(&format!("issue/{}/transitions", issue_key));
        let response = Self::expect(self.http.get(&url).send().await?, StatusCode::OK).await?;
        Ok(response.json::<TransitionsResponse>().await?.transitions)
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn test_connection(&self) -> Result<JiraUser, JiraError> {
        let response = self.http.get(self.api("myself")).send().await?;
        let user: JiraUser = Self::expect(response, StatusCode::OK).await?.json().await?;
        tracing::info!(
            "Connected to Jira as {}",
            user.display_name.as_deref().unwrap_or("Unknown")
        );
        Ok(user)
    }

    async fn search_issues_by_label(&self, label: &str) -> Result<Vec<JiraIssue>, JiraError> {
        let jql = label_jql(&self.project_key, label);
        let max_results = SEARCH_MAX_RESULTS.to_string();
        let response = self
            .http
            .get(self.api("search/jql"))
            .query(&[
                ("jql", jql.as_str()),
                ("fields", "key,summary,labels"),
                ("maxResults", max_results.as_str()),
            ])
            .send()
            .await?;

        let result: SearchResponse = Self::expect(response, StatusCode::OK).await?.json().await?;
        tracing::debug!("Found {} issues with label '{}'", result.issues.len(), label);
        Ok(result.issues)
    }

    async fn update_issue_status(&self, issue_key: &str, status: &str) -> Result<(), JiraError> {
        let transitions = self.transitions(issue_key).await?;
        let Some(transition) = find_transition(&transitions, status) else {
            return Err(JiraError::TransitionUnavailable {
                issue: issue_key.to_string(),
                status: status.to_string(),
                available: transitions.iter().map(|t| t.to.name.clone()).collect(),
            });
        };

        let url = self.api(&format!("issue/{}/transitions", issue_key));
        let body = serde_json::json!({ "transition": { "id": transition.id } });
        let response = self.http.post(&url).json(&body).send().await?;
        Self::expect(response, StatusCode::NO_CONTENT).await?;

        tracing::info!("Moved {} to '{}'", issue_key, status);
        Ok(())
    }

    async fn upload_attachment(&self, issue_key: &str, file_path: &Path) -> Result<(), JiraError> {
        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| JiraError::NotFound(file_path.display().to_string()))?;
        let bytes = tokio::fs::read(file_path).await?;

        let part = Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str("application/octet-stream")?;
        let form = Form::new().part("file", part);

        let url = self.api(&format!("issue/{}/attachments", issue_key));
        let response = self
            .http
            .post(&url)
            .header("X-Atlassian-Token", "no-check")
            .multipart(form)
            .send()
            .await?;

        let created: Vec<serde_json::Value> =
            Self::expect(response, StatusCode::OK).await?.json().await?;
        if created.is_empty() {
            return Err(JiraError::Api {
                status: 200,
                body: format!("empty upload response for {}", filename),
            });
        }

        tracing::info!("Uploaded {} to {}", filename, issue_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transitions() -> Vec<Transition> {
        serde_json::from_str(
            r#"[
                {"id": "21", "to": {"name": "In Progress"}},
                {"id": "31", "to": {"name": "Done"}}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_label_jql() {
        assert_eq!(label_jql("MIG", "123456"), r#"project = MIG AND labels = "123456""#);
        assert_eq!(label_jql("MIG", r#"a"b"#), r#"project = MIG AND labels = "a\"b""#);
    }

    #[test]
    fn test_find_transition_ignores_case() {
        let all = transitions();
        assert_eq!(find_transition(&all, "done").map(|t| t.id.as_str()), Some("31"));
        assert_eq!(find_transition(&all, "IN PROGRESS").map(|t| t.id.as_str()), Some("21"));
        assert!(find_transition(&all, "Closed").is_none());
    }

    #[test]
    fn test_client_builds_from_settings() {
        let settings = JiraSettings {
            base_url: "https://acme.atlassian.net".into(),
            email: "me@example.com".into(),
            api_token: "token".into(),
            project_key: "MIG".into(),
        };
        let client = JiraClient::new(&settings).unwrap();
        assert_eq!(
            client.api("myself"),
            "https://acme.atlassian.net/rest/api/3/myself"
        );
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_io_error() {
        let settings = JiraSettings {
            base_url: "http://127.0.0.1:9".into(),
            email: "me@example.com".into(),
            api_token: "token".into(),
            project_key: "MIG".into(),
        };
        let client = JiraClient::new(&settings).unwrap();
        let result = client
            .upload_attachment("MIG-1", Path::new("/definitely/not/here.txt"))
            .await;
        assert!(matches!(result, Err(JiraError::Io(_))));
    }
}
