use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for the hosted backend
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Public (anon) API key sent with every request
    pub api_key: String,
    /// Object storage bucket for photos
    pub bucket: String,
    /// Bearer token of the signed-in user, if any
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: String, api_key: String, bucket: String) -> Self {
        Self {
            base_url,
            api_key,
            bucket,
            access_token: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    pub user: TokenUser,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Authenticated session returned by sign-in
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub email: Option<String>,
    pub expires_in_secs: Option<i64>,
}

impl From<TokenResponse> for Session {
    fn from(token: TokenResponse) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            user_id: token.user.id,
            email: token.user.email,
            expires_in_secs: token.expires_in,
        }
    }
}

/// A stored object and the public URL it is reachable under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: String,
    pub file_url: String,
}
