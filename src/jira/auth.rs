//! Jira connection settings and Basic authentication

use super::types::JiraError;
use crate::config::{non_empty, Credentials};

/// Validated `jira` section of the config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraSettings {
    pub base_url: String,
    pub email: String,
    pub api_token: String,
    pub project_key: String,
}

impl JiraSettings {
    /// All four fields must be present and non-empty.
    pub fn from_credentials(credentials: &Credentials) -> Result<Self, JiraError> {
        let jira = credentials
            .jira
            .as_ref()
            .ok_or_else(|| JiraError::Config("no `jira` section in config.json".into()))?;

        let fields = [
            ("url", &jira.url),
            ("email", &jira.email),
            ("api_token", &jira.api_token),
            ("project_key", &jira.project_key),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| non_empty(value).is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(JiraError::Config(format!(
                "missing jira fields: {}",
                missing.join(", ")
            )));
        }

        let get = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();
        Ok(Self {
            base_url: get(&jira.url).trim_end_matches('/').to_string(),
            email: get(&jira.email),
            api_token: get(&jira.api_token),
            project_key: get(&jira.project_key),
        })
    }

    pub fn auth(&self) -> JiraAuth {
        JiraAuth::new(self.email.clone(), self.api_token.clone())
    }
}

pub struct JiraAuth {
    username: String,
    api_token: String,
}

impl JiraAuth {
    pub fn new(username: String, api_token: String) -> Self {
        Self {
            username,
            api_token,
        }
    }

    pub fn to_basic_auth(&self) -> String {
        use base64::Engine;
        let credentials = format!("{}:{}", self.username, self.api_token);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(credentials)
        )
    }
}
