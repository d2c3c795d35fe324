//! Basecamp authentication
//!
//! Two independent authenticators: the OAuth bearer-token flow used for every
//! API call, and a cookie session used only to fetch attachment bytes that the
//! bearer token cannot reach.

mod oauth;
mod session;
mod token;
mod types;

#[cfg(test)]
mod testing;

pub use oauth::{redirect_port, OAuthCallbackError};
pub use session::{
    login_succeeded, parse_login_form, LoginForm, LoginFormError, SessionAuthenticator,
    SessionProvider, SIGNIN_URL, WEB_BASE,
};
pub use token::{
    apply_refresh, auth_headers, TokenAuthenticator, ACCOUNT_ID_HEADER, APP_USER_AGENT,
    LAUNCHPAD_BASE,
};
pub use types::{AuthError, AuthState, TokenResponse};
