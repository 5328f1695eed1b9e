use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DecryptError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Encrypted column value as stored in the database: a JSON document with
/// the ciphertext and the RSA-wrapped AES key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedField {
    pub final_data: String,
    pub encrypted_aes_key: String,
}

impl EncryptedField {
    pub fn parse(blob: &str) -> Result<Self, DecryptError> {
        Ok(serde_json::from_str(blob)?)
    }
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    encrypted_data: &'a str,
    encrypted_aes_key: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    decrypted_data: Option<String>,
}

#[derive(Clone)]
pub struct DecryptClient {
    base_url: String,
    http: reqwest::Client,
}

impl DecryptClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DecryptError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Best effort; failures are only logged.
    pub async fn wake_up(&self) {
        match self.http.get(&self.base_url).send().await {
            Ok(response) => debug!(status = %response.status(), "decrypt service is awake"),
            Err(err) => warn!(error = %err, url = %self.base_url, "decrypt service wake-up failed"),
        }
    }

    pub async fn decrypt(&self, field: &EncryptedField) -> Result<String, DecryptError> {
        let response = self
            .http
            .post(format!("{}/decrypt", self.base_url))
            .json(&DecryptRequest {
                encrypted_data: &field.final_data,
                encrypted_aes_key: &field.encrypted_aes_key,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DecryptError::Status(response.status().as_u16()));
        }

        let body: DecryptResponse = response.json().await?;
        body.decrypted_data.ok_or(DecryptError::MissingPlaintext)
    }

    pub async fn decrypt_blob(&self, blob: &str) -> Result<String, DecryptError> {
        let field = EncryptedField::parse(blob)?;
        self.decrypt(&field).await
    }
}

/// Decrypts each distinct blob once.
pub struct DecryptCache<'c> {
    client: &'c DecryptClient,
    plaintexts: HashMap<String, String>,
}

impl<'c> DecryptCache<'c> {
    pub fn new(client: &'c DecryptClient) -> Self {
        Self {
            client,
            plaintexts: HashMap::new(),
        }
    }

    pub async fn get(&mut self, blob: &str) -> Result<String, DecryptError> {
        if let Some(plain) = self.plaintexts.get(blob) {
            return Ok(plain.clone());
        }
        let plain = self.client.decrypt_blob(blob).await?;
        self.plaintexts.insert(blob.to_string(), plain.clone());
        Ok(plain)
    }

    pub fn len(&self) -> usize {
        self.plaintexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintexts.is_empty()
    }
}
