use crate::models::{BackendConfig, PasswordGrant, Session, TokenResponse, UploadedFile};
use serde_json::Value;
use std::time::Duration;

/// Error type for backend operations
#[derive(Debug)]
pub enum BackendError {
    /// The server could not be reached at all
    Offline(String),
    TimeoutError,
    NetworkError(String),
    JsonError(String),
    Unauthorized(String),
    ServerError { status: u16, message: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Offline(msg) => write!(f, "Offline: {}", msg),
            BackendError::TimeoutError => write!(f, "Request timeout"),
            BackendError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            BackendError::JsonError(msg) => write!(f, "JSON error: {}", msg),
            BackendError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            BackendError::ServerError { status, message } => {
                write!(f, "Server error {}: {}", status, message)
            }
        }
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    pub fn is_offline(&self) -> bool {
        matches!(self, BackendError::Offline(_))
    }

    fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => BackendError::Unauthorized(message),
            _ => BackendError::ServerError { status, message },
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            BackendError::Offline(e.to_string())
        } else if e.is_timeout() {
            BackendError::TimeoutError
        } else if e.is_decode() {
            BackendError::JsonError(e.to_string())
        } else {
            BackendError::NetworkError(e.to_string())
        }
    }
}

/// REST client for tables, object storage and sign-in
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent("fieldsync/0.1.0")
            .build()
            .map_err(|e| BackendError::NetworkError(format!("Client build failed: {}", e)))?;

        Ok(Self { config, http })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn set_access_token(&mut self, token: Option<String>) {
        self.config.access_token = token;
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(bearer)
    }

    /// Password sign-in
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let url = self.endpoint("auth/v1/token");
        let response = self
            .http
            .post(&url)
            .query(&[("grant_type", "password")])
            .header("apikey", &self.config.api_key)
            .json(&PasswordGrant { email, password })
            .send()
            .await?;

        let response = check_status(response).await?;
        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| BackendError::JsonError(format!("Failed to parse token: {}", e)))?;

        log::info!("Signed in as {}", token.user.id);
        Ok(Session::from(token))
    }

    /// Lightweight reachability check
    pub async fn health(&self) -> Result<(), BackendError> {
        let response = self
            .http
            .get(self.endpoint("auth/v1/health"))
            .header("apikey", &self.config.api_key)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    /// Inserts a row and returns it as stored
    pub async fn insert(&self, table: &str, record: &Value) -> Result<Value, BackendError> {
        let request = self
            .http
            .post(self.endpoint(&format!("rest/v1/{}", table)))
            .header("Prefer", "return=representation")
            .json(record);

        let response = check_status(self.authorize(request).send().await?).await?;
        let rows = response.json::<Value>().await?;
        first_row(rows)
    }

    /// Patches the row with the given id
    pub async fn update(&self, table: &str, id: &str, patch: &Value) -> Result<Value, BackendError> {
        let request = self
            .http
            .patch(self.endpoint(&format!("rest/v1/{}", table)))
            .query(&[("id", eq_filter(id))])
            .header("Prefer", "return=representation")
            .json(patch);

        let response = check_status(self.authorize(request).send().await?).await?;
        let rows = response.json::<Value>().await?;
        first_row(rows)
    }

    /// Selects rows matching all equality conditions
    pub async fn select(
        &self,
        table: &str,
        conditions: &[(String, String)],
    ) -> Result<Vec<Value>, BackendError> {
        let mut query: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        query.extend(
            conditions
                .iter()
                .map(|(column, value)| (column.clone(), eq_filter(value))),
        );

        let request = self
            .http
            .get(self.endpoint(&format!("rest/v1/{}", table)))
            .query(&query);

        let response = check_status(self.authorize(request).send().await?).await?;
        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            other => Err(BackendError::JsonError(format!(
                "Expected array of rows, got {}",
                other
            ))),
        }
    }

    /// Uploads an object into the configured bucket
    pub async fn upload_object(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<UploadedFile, BackendError> {
        let url = self.endpoint(&format!("storage/v1/object/{}/{}", self.config.bucket, path));
        let request = self
            .http
            .post(&url)
            .header("Content-Type", content_type)
            .header("Cache-Control", "3600")
            .header("x-upsert", "false")
            .body(bytes);

        check_status(self.authorize(request).send().await?).await?;

        let file_url = self.public_url(path);
        log::info!("Uploaded object {}", path);
        Ok(UploadedFile {
            path: path.to_string(),
            file_url,
        })
    }

    pub fn public_url(&self, path: &str) -> String {
        self.endpoint(&format!(
            "storage/v1/object/public/{}/{}",
            self.config.bucket, path
        ))
    }
}

/// Unique object path below `folder`, keeping the file extension
pub fn object_path(folder: &str, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "jpg".to_string());
    format!(
        "{}/{}.{}",
        folder.trim_matches('/'),
        ulid::Ulid::new().to_string().to_ascii_lowercase(),
        ext
    )
}

fn eq_filter(value: &str) -> String {
    format!("eq.{}", value)
}

fn first_row(rows: Value) -> Result<Value, BackendError> {
    match rows {
        Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
        Value::Array(_) => Err(BackendError::ServerError {
            status: 404,
            message: "No row returned".to_string(),
        }),
        row @ Value::Object(_) => Ok(row),
        other => Err(BackendError::JsonError(format!("Unexpected response: {}", other))),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(BackendError::from_status(status.as_u16(), message))
}
