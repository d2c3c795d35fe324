//! Cookie-session login against the Basecamp web sign-in form.
//!
//! Some attachment URLs reject the OAuth bearer token and only serve bytes to
//! a logged-in browser session. The sign-in form is undocumented, so the field
//! detection here is heuristic: anything unexpected is a clean `false`.

use async_trait::async_trait;
use reqwest::{Client, Url};
use scraper::{ElementRef, Html};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::token::APP_USER_AGENT;
use super::types::AuthError;
use crate::config::{non_empty, Credentials};

pub const SIGNIN_URL: &str = "https://launchpad.37signals.com/signin";
pub const WEB_BASE: &str = "https://3.basecamp.com";

const DOWNLOAD_CHUNK_SIZE: usize = 8192;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const EMAIL_KEYWORDS: [&str; 3] = ["email", "user", "login"];

/// Capability the exporter needs for protected binaries: log in once, then
/// fetch URLs into files. Swappable for a token-based implementation.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Establish a session for the account in `credentials`. Never errors.
    async fn login(&mut self, credentials: &Credentials) -> bool;

    /// Stream `url` into `local_path`, creating parent directories. Returns
    /// false without touching the network when not logged in.
    async fn download_file(&self, url: &str, local_path: &Path) -> bool;
}

/// Sign-in form extracted from the login page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub action: Url,
    pub hidden_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginFormError {
    /// No credential input; carries a summary of the inputs that were seen.
    EmailFieldMissing(Vec<String>),
    /// The credential input is not inside a `<form>`.
    FormMissing,
}

pub struct SessionAuthenticator {
    http: Client,
    signin_url: String,
    web_base: String,
    authenticated: bool,
}

impl SessionAuthenticator {
    pub fn new() -> Result<Self, AuthError> {
        let http = Client::builder()
            .cookie_store(true)
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            signin_url: SIGNIN_URL.to_string(),
            web_base: WEB_BASE.to_string(),
            authenticated: false,
        })
    }

    pub fn with_endpoints(
        mut self,
        signin_url: impl Into<String>,
        web_base: impl Into<String>,
    ) -> Self {
        self.signin_url = signin_url.into();
        self.web_base = web_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        account_id: &str,
    ) -> Result<bool, AuthError> {
        tracing::info!("Starting Basecamp session login");
        let page = self.http.get(&self.signin_url).send().await?.error_for_status()?;
        let page_url = page.url().clone();
        let html = page.text().await?;

        let form = match parse_login_form(&html, &page_url) {
            Ok(form) => form,
            Err(LoginFormError::EmailFieldMissing(inputs)) => {
                tracing::error!("Could not find email field on login page");
                for input in inputs {
                    tracing::debug!("  input: {}", input);
                }
                return Ok(false);
            }
            Err(LoginFormError::FormMissing) => {
                tracing::error!("Could not find login form");
                return Ok(false);
            }
        };

        let mut form_data = vec![
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ];
        for (name, value) in &form.hidden_fields {
            if name != "username" && name != "password" {
                tracing::debug!("Added hidden field: {}", name);
                form_data.push((name.clone(), value.clone()));
            }
        }

        tracing::debug!("Submitting credentials to: {}", form.action);
        let response = self.http.post(form.action).form(&form_data).send().await?;
        let final_url = response.url().to_string();
        tracing::debug!("Login response status {} at {}", response.status(), final_url);
        let body = response.text().await?;

        if !login_succeeded(&final_url, &body, account_id) {
            tracing::error!(
                "Login may have failed (final URL: {}, sign-in page shown: {})",
                final_url,
                body.to_lowercase().contains("sign_in")
            );
            return Ok(false);
        }

        let account_url = format!("{}/{}", self.web_base, account_id);
        let account_response = self.http.get(&account_url).send().await?;
        if account_response.status() != reqwest::StatusCode::OK {
            tracing::error!(
                "Could not access account {} ({})",
                account_id,
                account_response.status()
            );
            return Ok(false);
        }

        tracing::info!("Session bound to account {}", account_id);
        Ok(true)
    }

    async fn try_download(&self, url: &str, local_path: &Path) -> Result<u64, AuthError> {
        let mut response = self.http.get(url).send().await?.error_for_status()?;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = tokio::fs::File::create(local_path).await?;
        let mut writer = BufWriter::with_capacity(DOWNLOAD_CHUNK_SIZE, file);
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl SessionProvider for SessionAuthenticator {
    async fn login(&mut self, credentials: &Credentials) -> bool {
        self.authenticated = false;

        let (Some(username), Some(password)) = (
            non_empty(&credentials.username),
            non_empty(&credentials.password),
        ) else {
            tracing::error!("Missing username or password in config.json");
            return false;
        };
        let Some(account_id) = non_empty(&credentials.account_id) else {
            tracing::error!("Missing account_id in config.json");
            return false;
        };

        match self.try_login(username, password, account_id).await {
            Ok(ok) => {
                self.authenticated = ok;
                ok
            }
            Err(e) => {
                tracing::error!("Login failed: {}", e);
                false
            }
        }
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> bool {
        if !self.authenticated {
            tracing::error!("Not authenticated. Call login() first.");
            return false;
        }

        tracing::debug!("Downloading {} -> {}", url, local_path.display());
        match self.try_download(url, local_path).await {
            Ok(bytes) => {
                tracing::info!("Downloaded {} ({} bytes)", local_path.display(), bytes);
                true
            }
            Err(e) => {
                tracing::error!("Download failed for {}: {}", url, e);
                let _ = tokio::fs::remove_file(local_path).await;
                false
            }
        }
    }
}

/// Locate the credential input and its enclosing form on the sign-in page.
pub fn parse_login_form(html: &str, page_url: &Url) -> Result<LoginForm, LoginFormError> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let email_field = inputs(root)
        .find(|input| attr_lower(input, "type") == "email")
        .or_else(|| inputs(root).find(|input| attr_lower(input, "name").contains("email")))
        .or_else(|| {
            inputs(root).find(|input| {
                let kind = attr_lower(input, "type");
                (kind.is_empty() || kind == "text")
                    && ["name", "placeholder", "id"].iter().any(|attr| {
                        let value = attr_lower(input, attr);
                        EMAIL_KEYWORDS.iter().any(|k| value.contains(k))
                    })
            })
        });

    let Some(email_field) = email_field else {
        let seen = inputs(root)
            .map(|input| {
                format!(
                    "{} - {} - {}",
                    input.value().attr("type").unwrap_or("unknown"),
                    input.value().attr("name").unwrap_or("no-name"),
                    input.value().attr("placeholder").unwrap_or("no-placeholder"),
                )
            })
            .collect();
        return Err(LoginFormError::EmailFieldMissing(seen));
    };

    let form = email_field
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "form")
        .ok_or(LoginFormError::FormMissing)?;

    let hidden_fields = inputs(form)
        .filter(|input| attr_lower(input, "type") == "hidden")
        .filter_map(|input| {
            let name = input.value().attr("name").filter(|n| !n.is_empty())?;
            let value = input.value().attr("value").unwrap_or_default();
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    let action = form
        .value()
        .attr("action")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or("/signin");
    let action = page_url
        .join(action)
        .map_err(|_| LoginFormError::FormMissing)?;

    Ok(LoginForm {
        action,
        hidden_fields,
    })
}

/// Success heuristic for the page the form POST ends on.
pub fn login_succeeded(final_url: &str, body: &str, account_id: &str) -> bool {
    let markers = ["dashboard", "projects", "sign_out", account_id];
    let body = body.to_lowercase();
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .any(|m| final_url.contains(m) || body.contains(m))
}

/// `<input>` elements under `root`, in document order.
fn inputs<'a>(root: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    root.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "input")
}

fn attr_lower(element: &ElementRef, name: &str) -> String {
    element
        .value()
        .attr(name)
        .unwrap_or_default()
        .to_lowercase()
}
