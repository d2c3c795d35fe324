//! Basecamp 3 HTTP transport: Link-header pagination and bounded retry

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::sleep;

use super::types::BasecampError;
use crate::auth::auth_headers;
use crate::config::Credentials;

pub const API_BASE: &str = "https://3.basecampapi.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Statuses worth another attempt; 525 is Cloudflare's SSL handshake failure.
const TRANSIENT_STATUSES: [u16; 4] = [502, 503, 504, 525];

/// A fully read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Target of the `Link: <...>; rel="next"` header, if any.
    pub next_link: Option<String>,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, BasecampError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// The one operation the crawler needs from the network.
#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<ApiResponse, BasecampError>;
}

/// Bearer-token client for the Basecamp API.
pub struct BasecampClient {
    http: Client,
}

impl BasecampClient {
    pub fn new(headers: HeaderMap) -> Result<Self, BasecampError> {
        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http })
    }

    pub fn from_credentials(credentials: &Credentials) -> Result<Self, BasecampError> {
        Self::new(auth_headers(credentials)?)
    }
}

#[async_trait]
impl ApiTransport for BasecampClient {
    async fn get(&self, url: &str) -> Result<ApiResponse, BasecampError> {
        tracing::debug!("GET {}", url);
        let response = self.http.get(url).send().await?;

        let status = response.status().as_u16();
        let next_link = response
            .headers()
            .get_all(LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(parse_next_link);
        let body = response.text().await?;

        Ok(ApiResponse {
            status,
            next_link,
            body,
        })
    }
}

/// Find the `rel="next"` target in a Link header value.
pub fn parse_next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;

        let is_next = pieces.any(|param| {
            let param = param.trim();
            param
                .strip_prefix("rel=")
                .map(|rel| {
                    rel.trim_matches('"')
                        .split_whitespace()
                        .any(|r| r.eq_ignore_ascii_case("next"))
                })
                .unwrap_or(false)
        });

        (is_next && !url.is_empty()).then(|| url.to_string())
    })
}

/// Bounded exponential backoff for single-record fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the zero-based `attempt` failed: base * 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }
}

pub fn is_transient(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// GET with retry on transient statuses and transport errors. Any other
/// non-success fails at once. Returns `None` once attempts are exhausted.
pub async fn get_with_retry<T>(
    transport: &T,
    url: &str,
    policy: &RetryPolicy,
) -> Option<ApiResponse>
where
    T: ApiTransport + ?Sized,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 0..max_attempts {
        let retry_reason = match transport.get(url).await {
            Ok(response) if response.is_success() => return Some(response),
            Ok(response) if is_transient(response.status) => format!("HTTP {}", response.status),
            Ok(response) => {
                tracing::error!("GET {} failed with HTTP {}", url, response.status);
                return None;
            }
            Err(e) => e.to_string(),
        };

        if attempt + 1 < max_attempts {
            let delay = policy.delay_for(attempt);
            tracing::warn!(
                "{} for {}, retry {}/{} after {:?}",
                retry_reason,
                url,
                attempt + 1,
                max_attempts - 1,
                delay
            );
            sleep(delay).await;
        } else {
            tracing::error!(
                "Giving up on {} after {} attempts: {}",
                url,
                max_attempts,
                retry_reason
            );
        }
    }

    None
}

/// Single GET that must succeed and decode as `D`.
pub async fn get_json<T, D>(transport: &T, url: &str) -> Result<D, BasecampError>
where
    T: ApiTransport + ?Sized,
    D: DeserializeOwned,
{
    let response = transport.get(url).await?;
    if !response.is_success() {
        return Err(BasecampError::Status {
            status: response.status,
            url: url.to_string(),
        });
    }
    response.json()
}

/// GET a JSON array collection, following `rel="next"` links when `follow`
/// is set. Pages are concatenated in order.
pub async fn get_all_pages<T>(
    transport: &T,
    url: &str,
    follow: bool,
) -> Result<Vec<serde_json::Value>, BasecampError>
where
    T: ApiTransport + ?Sized,
{
    let mut items = Vec::new();
    let mut next = Some(url.to_string());
    let mut visited = HashSet::new();

    while let Some(page_url) = next.take() {
        if !visited.insert(page_url.clone()) {
            tracing::warn!("Pagination loop at {}; stopping", page_url);
            break;
        }
        let response = transport.get(&page_url).await?;
        if !response.is_success() {
            return Err(BasecampError::Status {
                status: response.status,
                url: page_url,
            });
        }

        let page: serde_json::Value = response.json()?;
        let serde_json::Value::Array(page_items) = page else {
            return Err(BasecampError::Structure(format!(
                "expected a JSON array from {}",
                page_url
            )));
        };
        items.extend(page_items);

        if follow {
            next = response.next_link;
        }
    }

    tracing::debug!(
        "Fetched {} items over {} page(s) from {}",
        items.len(),
        visited.len(),
        url
    );
    Ok(items)
}

/// Decode each element, logging and dropping the ones that do not fit `D`.
pub fn decode_records<D: DeserializeOwned>(items: Vec<serde_json::Value>, what: &str) -> Vec<D> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<D>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping malformed {} record: {}", what, e);
                None
            }
        })
        .collect()
}
