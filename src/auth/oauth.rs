//! Single-request OAuth redirect listener

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Default timeout for OAuth callback (5 minutes)
const OAUTH_TIMEOUT_SECS: u64 = 300;

#[derive(Error, Debug)]
pub enum OAuthCallbackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for OAuth callback")]
    Timeout,

    #[error("Invalid redirect URI: {0}")]
    InvalidRedirect(String),
}

/// Status line sent back to the browser that followed the redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Ok,
    BadRequest,
    ServerError,
}

impl CallbackStatus {
    fn status_line(self) -> &'static str {
        match self {
            CallbackStatus::Ok => "200 OK",
            CallbackStatus::BadRequest => "400 Bad Request",
            CallbackStatus::ServerError => "500 Internal Server Error",
        }
    }
}

/// One accepted redirect request whose browser is still waiting for a reply.
pub struct PendingCallback {
    socket: TcpStream,
    pub code: Option<String>,
}

impl PendingCallback {
    /// Reply to the browser and close the connection.
    pub async fn respond(mut self, status: CallbackStatus, message: &str) -> std::io::Result<()> {
        let response = build_response(status, message);
        self.socket.write_all(response.as_bytes()).await?;
        self.socket.shutdown().await
    }
}

/// Port the redirect URI points at; the listener binds loopback on it.
pub fn redirect_port(redirect_uri: &str) -> Result<u16, OAuthCallbackError> {
    let url = reqwest::Url::parse(redirect_uri)
        .map_err(|e| OAuthCallbackError::InvalidRedirect(format!("{}: {}", redirect_uri, e)))?;
    url.port_or_known_default()
        .ok_or_else(|| OAuthCallbackError::InvalidRedirect(redirect_uri.to_string()))
}

/// Bind the callback listener before the browser is opened so the redirect
/// cannot race the bind.
pub async fn bind_callback_listener(redirect_uri: &str) -> Result<TcpListener, OAuthCallbackError> {
    let port = redirect_port(redirect_uri)?;
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::debug!("OAuth callback listener bound on 127.0.0.1:{}", port);
    Ok(listener)
}

/// Accept exactly one request on an already-bound listener.
pub async fn accept_callback(
    listener: TcpListener,
    timeout_secs: Option<u64>,
) -> Result<PendingCallback, OAuthCallbackError> {
    let timeout_duration = Duration::from_secs(timeout_secs.unwrap_or(OAUTH_TIMEOUT_SECS));
    let accept_result = timeout(timeout_duration, listener.accept()).await;

    let (mut socket, _) = match accept_result {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(OAuthCallbackError::Io(e)),
        Err(_) => return Err(OAuthCallbackError::Timeout),
    };

    let mut buffer = [0u8; 4096];
    let bytes_read = socket.read(&mut buffer).await?;
    let request = String::from_utf8_lossy(&buffer[..bytes_read]);

    Ok(PendingCallback {
        code: parse_callback_code(&request),
        socket,
    })
}

/// Pull the `code` query parameter out of a raw `GET /path?query HTTP/1.1` request.
fn parse_callback_code(request: &str) -> Option<String> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let (_, query) = target.split_once('?')?;

    let params: HashMap<&str, &str> = query
        .split('&')
        .filter_map(|p| p.split_once('='))
        .collect();

    let code = params.get("code").filter(|c| !c.is_empty())?;
    urlencoding::decode(code).ok().map(|c| c.into_owned())
}

fn build_response(status: CallbackStatus, message: &str) -> String {
    format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n\
         {}",
        status.status_line(),
        message.len(),
        message
    )
}
