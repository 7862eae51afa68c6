//! Per-virtual-user session bootstrap.
//!
//! Each virtual user owns one [`Session`]. The first iteration fetches the
//! entry point and caches the session token from its `Set-Cookie` header;
//! later iterations reuse it without touching the network. A response
//! without a usable token is not cached, so the next iteration tries again.

use tracing::debug;

use crate::error::SessionError;
use crate::target::CartTarget;

/// Default session cookie issued by the target
pub const DEFAULT_SESSION_COOKIE: &str = "jwt_token";

/// Find `name=<value>` among the `;`-separated segments of a cookie header.
///
/// Returns `None` when the pair is absent or its value is empty.
pub fn extract_cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|segment| segment.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

/// Session state owned by a single virtual user
#[derive(Debug, Default)]
pub struct Session {
    token: Option<String>,
    attempts: u32,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Bootstrap requests issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Return the cached token, bootstrapping it first if needed
    pub async fn ensure<T>(&mut self, target: &T, cookie_name: &str) -> Result<&str, SessionError>
    where
        T: CartTarget + ?Sized,
    {
        if self.token.is_none() {
            self.attempts += 1;
            let response = target.bootstrap().await?;

            let token = response
                .set_cookie
                .iter()
                .find_map(|header| extract_cookie_value(header, cookie_name))
                .ok_or_else(|| SessionError::MissingToken(cookie_name.to_string()))?;

            debug!(
                "Session established after {} attempt(s) (status {})",
                self.attempts, response.status
            );
            self.token = Some(token.to_string());
        }

        Ok(self.token.as_deref().unwrap_or_default())
    }
}
