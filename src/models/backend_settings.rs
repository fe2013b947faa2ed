use backend_client::BackendConfig;
use serde::{Deserialize, Serialize};

/// Connection settings for the hosted backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    pub id: i64,
    pub base_url: String,
    pub api_key: String,
    pub bucket: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
    pub enabled: bool,
    /// Stable id of this device, generated once
    pub device_id: String,
    pub last_sync: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl BackendSettings {
    pub fn new(base_url: String, api_key: String, bucket: String) -> Self {
        Self {
            id: 0,
            base_url,
            api_key,
            bucket,
            email: None,
            access_token: None,
            enabled: true,
            device_id: uuid::Uuid::new_v4().to_string(),
            last_sync: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn to_backend_config(&self) -> BackendConfig {
        let mut config =
            BackendConfig::new(self.base_url.clone(), self.api_key.clone(), self.bucket.clone());
        config.access_token = self.access_token.clone();
        config
    }
}
