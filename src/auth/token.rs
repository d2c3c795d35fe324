//! OAuth 2.0 authorization-code flow against the Basecamp launchpad

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpListener;

use super::oauth::{accept_callback, bind_callback_listener, CallbackStatus};
use super::types::{AuthError, AuthState, TokenResponse};
use crate::config::{non_empty, ConfigError, Credentials};

pub const LAUNCHPAD_BASE: &str = "https://launchpad.37signals.com";
pub const APP_USER_AGENT: &str = "basecamp-export (basecamp-export@users.noreply.github.com)";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// `Account-ID`: the account the bearer token is scoped to. Header names
/// must be lowercase for `HeaderName::from_static`.
pub const ACCOUNT_ID_HEADER: &str = "account-id";

pub struct TokenAuthenticator {
    http: Client,
    launchpad_base: String,
    state: AuthState,
    listener: Option<TcpListener>,
    callback_timeout_secs: Option<u64>,
}

/// Why a received callback did not end in stored tokens. Each variant maps to
/// its own reply for the waiting browser.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CallbackFailure {
    MissingCode,
    ExchangeFailed,
    NoAccessToken,
    AccountLookupFailed,
}

impl CallbackFailure {
    fn reply(&self) -> (CallbackStatus, &'static str) {
        match self {
            CallbackFailure::MissingCode => {
                (CallbackStatus::BadRequest, "Missing code in redirect URL.")
            }
            CallbackFailure::ExchangeFailed => {
                (CallbackStatus::ServerError, "Token exchange failed.")
            }
            CallbackFailure::NoAccessToken => {
                (CallbackStatus::ServerError, "No access token in response.")
            }
            CallbackFailure::AccountLookupFailed => (
                CallbackStatus::ServerError,
                "Token received, but failed to retrieve account ID.",
            ),
        }
    }
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(APP_USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            launchpad_base: LAUNCHPAD_BASE.to_string(),
            state: AuthState::Unauthenticated,
            listener: None,
            callback_timeout_secs: None,
        }
    }

    /// Point the authenticator at a different launchpad host.
    pub fn with_launchpad_base(mut self, base: impl Into<String>) -> Self {
        self.launchpad_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_callback_timeout(mut self, secs: u64) -> Self {
        self.callback_timeout_secs = Some(secs);
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Consent page URL for the `web_server` grant.
    pub fn authorization_url(&self, client_id: &str, redirect_uri: &str) -> String {
        format!(
            "{}/authorization/new?type=web_server&client_id={}&redirect_uri={}",
            self.launchpad_base,
            urlencoding::encode(client_id),
            urlencoding::encode(redirect_uri),
        )
    }

    /// Bind the redirect listener, then send the user to the consent page.
    pub async fn initiate_authorization(
        &mut self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<(), AuthError> {
        let listener = bind_callback_listener(redirect_uri)
            .await
            .map_err(|e| AuthError::OAuth(format!("Failed to start callback listener: {}", e)))?;
        self.listener = Some(listener);
        self.state = AuthState::AwaitingCallback;

        let auth_url = self.authorization_url(client_id, redirect_uri);
        tracing::info!(
            "Opening browser for authorization. If it doesn't open, visit: {}",
            auth_url
        );
        if let Err(e) = open::that(&auth_url) {
            tracing::warn!("Could not open browser: {}", e);
        }

        Ok(())
    }

    /// Wait for the single redirect, exchange its code and store the tokens and
    /// account id in `credentials`. Failures are reported to the browser and the
    /// log; the returned state says how it ended.
    pub async fn await_callback(&mut self, credentials: &mut Credentials) -> AuthState {
        let Some(listener) = self.listener.take() else {
            tracing::error!("await_callback called before initiate_authorization");
            self.state = AuthState::Failed;
            return self.state;
        };

        let pending = match accept_callback(listener, self.callback_timeout_secs).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!("OAuth callback failed: {}", e);
                self.state = AuthState::Failed;
                return self.state;
            }
        };

        let outcome = match pending.code.clone() {
            Some(code) => self.complete_authorization(&code, credentials).await,
            None => Err(CallbackFailure::MissingCode),
        };

        let (status, message) = match &outcome {
            Ok(()) => (
                CallbackStatus::Ok,
                "Authentication complete. You may close this window.",
            ),
            Err(failure) => failure.reply(),
        };
        if let Err(e) = pending.respond(status, message).await {
            tracing::warn!("Failed to reply to browser: {}", e);
        }

        self.state = match outcome {
            Ok(()) => {
                tracing::info!("Access token and account ID stored");
                AuthState::Authenticated
            }
            Err(failure) => {
                tracing::error!("Authorization failed: {}", message);
                tracing::debug!("Callback failure: {:?}", failure);
                AuthState::Failed
            }
        };
        self.state
    }

    async fn complete_authorization(
        &self,
        code: &str,
        credentials: &mut Credentials,
    ) -> Result<(), CallbackFailure> {
        let (client_id, client_secret) = credentials
            .client_credentials()
            .map_err(|_| CallbackFailure::ExchangeFailed)?;
        let redirect_uri = credentials.redirect_uri().to_string();

        let tokens = self
            .exchange_code(code, client_id, client_secret, &redirect_uri)
            .await
            .map_err(|e| {
                tracing::error!("[Token Exchange] {}", e);
                CallbackFailure::ExchangeFailed
            })?;

        let access_token = tokens
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(CallbackFailure::NoAccessToken)?;

        let account_id = self.fetch_account_id(&access_token).await.map_err(|e| {
            tracing::error!("[Account ID Fetch] {}", e);
            CallbackFailure::AccountLookupFailed
        })?;

        credentials.access_token = Some(access_token);
        if let Some(refresh_token) = tokens.refresh_token.filter(|t| !t.is_empty()) {
            credentials.refresh_token = Some(refresh_token);
        }
        credentials.account_id = Some(account_id);
        Ok(())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, AuthError> {
        let response = self
            .http
            .post(format!("{}/authorization/token", self.launchpad_base))
            .form(&[
                ("type", "web_server"),
                ("client_id", client_id),
                ("redirect_uri", redirect_uri),
                ("client_secret", client_secret),
                ("code", code),
            ])
            .send()
            .await?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::OAuth(format!(
                "Token exchange failed with status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    /// Id of the Basecamp account the token is authorized for. Prefers a
    /// Basecamp 3 (`bc3`) account when several products are listed.
    pub async fn fetch_account_id(&self, access_token: &str) -> Result<String, AuthError> {
        #[derive(Deserialize)]
        struct Account {
            id: serde_json::Value,
            #[serde(default)]
            product: Option<String>,
        }

        #[derive(Deserialize)]
        struct Authorization {
            #[serde(default)]
            accounts: Vec<Account>,
        }

        let response = self
            .http
            .get(format!("{}/authorization.json", self.launchpad_base))
            .bearer_auth(access_token)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AuthError::OAuth(format!(
                "Account lookup failed with status: {}",
                response.status()
            )));
        }

        let authorization: Authorization = response.json().await?;
        let account = authorization
            .accounts
            .iter()
            .find(|a| a.product.as_deref() == Some("bc3"))
            .or_else(|| authorization.accounts.first())
            .ok_or_else(|| AuthError::OAuth("No accounts in authorization".into()))?;

        match &account.id {
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Ok(s.clone()),
            other => Err(AuthError::OAuth(format!("Unexpected account id: {}", other))),
        }
    }

    /// Trade a refresh token for a new access token. Any network error or
    /// non-200 reply yields `None`; there is no retry.
    pub async fn refresh(
        &mut self,
        refresh_token: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Option<TokenResponse> {
        let result = self
            .http
            .post(format!("{}/authorization/token", self.launchpad_base))
            .form(&[
                ("type", "refresh"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("[Token Refresh] Request failed: {}", e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!("[Token Refresh] Failed: {} {}", status, body);
            return None;
        }

        match response.json::<TokenResponse>().await {
            Ok(tokens) => {
                self.state = AuthState::Authenticated;
                Some(tokens)
            }
            Err(e) => {
                tracing::error!("[Token Refresh] Unreadable response: {}", e);
                None
            }
        }
    }
}

/// Merge a refresh response into the stored credentials. The access token is
/// always replaced; the refresh token only when the provider rotated it.
/// Returns false (and changes nothing) when the response has no access token.
pub fn apply_refresh(credentials: &mut Credentials, tokens: TokenResponse) -> bool {
    let Some(access_token) = tokens.access_token.filter(|t| !t.is_empty()) else {
        return false;
    };

    credentials.access_token = Some(access_token);
    if let Some(refresh_token) = tokens.refresh_token.filter(|t| !t.is_empty()) {
        credentials.refresh_token = Some(refresh_token);
    }
    true
}

/// Headers for every Basecamp API call, built only from the stored record.
/// This never refreshes; run the refresh step first if the token may be stale.
pub fn auth_headers(credentials: &Credentials) -> Result<HeaderMap, AuthError> {
    let access_token = non_empty(&credentials.access_token)
        .ok_or_else(|| ConfigError::Missing("access_token (run `authorize`)".into()))?;
    let account_id = non_empty(&credentials.account_id)
        .ok_or_else(|| ConfigError::Missing("account_id (run `authorize`)".into()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", access_token))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(APP_USER_AGENT));
    headers.insert(ACCOUNT_ID_HEADER, HeaderValue::from_str(account_id)?);
    Ok(headers)
}
