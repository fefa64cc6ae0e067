//! Registry credentials in the engine's auth header format

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};

/// Username/password for a push.
///
/// The header value is the URL-safe base64 encoding of the JSON object
/// `{"username": ..., "password": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl RegistryAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }

    /// Encode into the header value expected by the push call
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self).context("error marshaling username/password")?;
        Ok(URL_SAFE.encode(json))
    }

    /// Inverse of [`RegistryAuth::encode`]
    pub fn decode(header: &str) -> Result<Self> {
        let json = URL_SAFE
            .decode(header.trim())
            .context("registry auth header is not valid base64")?;
        serde_json::from_slice(&json).context("registry auth header is not a credentials object")
    }
}
