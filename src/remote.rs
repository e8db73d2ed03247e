//! HTTP collaborators: hosted completion table and auth endpoint
//!
//! The hosted store speaks a PostgREST-style dialect:
//!
//! - `GET  {base}/rest/v1/{table}?learner_id=eq.{id}&unit_key=eq.{key}&limit=1`
//! - `POST {base}/rest/v1/{table}?on_conflict=learner_id,unit_key`
//!   with `Prefer: resolution=merge-duplicates,return=representation`
//! - `GET  {base}/auth/v1/user` with the learner's bearer token
//!
//! Transport failures and non-2xx statuses become `RemoteUnavailable`;
//! reqwest timeouts become `Timeout`.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::completion::{CompletionRecord, RemoteStore};
use crate::course::ContentUnitKey;
use crate::error::ProgressError;
use crate::identity::{AuthProvider, AuthUser, LearnerId};

/// Connection settings for the hosted service
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub table: String,
    pub timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: None,
            table: "lesson_completions".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

fn build_client(config: &RemoteConfig, bearer: Option<&str>) -> Result<Client, ProgressError> {
    let mut headers = header::HeaderMap::new();
    if let Some(ref api_key) = config.api_key {
        headers.insert(
            "apikey",
            header::HeaderValue::from_str(api_key)
                .map_err(|e| ProgressError::Config(format!("Invalid API key: {}", e)))?,
        );
    }
    if let Some(token) = bearer.or(config.api_key.as_deref()) {
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ProgressError::Config(format!("Invalid bearer token: {}", e)))?,
        );
    }

    Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()
        .map_err(|e| ProgressError::Config(format!("Failed to build HTTP client: {}", e)))
}

fn transport_err(e: reqwest::Error) -> ProgressError {
    if e.is_timeout() {
        ProgressError::Timeout(e.to_string())
    } else {
        ProgressError::RemoteUnavailable(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ProgressError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProgressError::RemoteUnavailable(format!("HTTP {}: {}", status, body)));
    }
    response.json().await.map_err(transport_err)
}

/// Completion table on a hosted service
pub struct HttpCompletionStore {
    config: RemoteConfig,
    client: Client,
}

impl HttpCompletionStore {
    pub fn new(config: RemoteConfig) -> Result<Self, ProgressError> {
        let client = build_client(&config, None)?;
        Ok(Self { config, client })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.table
        )
    }

    pub(crate) fn select_one_url(&self, learner_id: &LearnerId, unit_key: &ContentUnitKey) -> String {
        format!(
            "{}?learner_id=eq.{}&unit_key=eq.{}&limit=1",
            self.table_url(),
            urlencoding::encode(learner_id.as_str()),
            urlencoding::encode(unit_key.as_str())
        )
    }

    pub(crate) fn select_many_url(&self, learner_id: &LearnerId, unit_keys: &[ContentUnitKey]) -> String {
        let quoted: Vec<String> = unit_keys
            .iter()
            .map(|k| format!("\"{}\"", k.as_str().replace('"', "\\\"")))
            .collect();
        format!(
            "{}?learner_id=eq.{}&unit_key=in.({})",
            self.table_url(),
            urlencoding::encode(learner_id.as_str()),
            urlencoding::encode(&quoted.join(","))
        )
    }

    pub(crate) fn upsert_url(&self) -> String {
        format!("{}?on_conflict=learner_id,unit_key", self.table_url())
    }
}

#[async_trait]
impl RemoteStore for HttpCompletionStore {
    async fn select_one(
        &self,
        learner_id: &LearnerId,
        unit_key: &ContentUnitKey,
    ) -> Result<Option<CompletionRecord>, ProgressError> {
        let url = self.select_one_url(learner_id, unit_key);
        debug!(url = %url, "Selecting completion");

        let response = self.client.get(&url).send().await.map_err(transport_err)?;
        let rows: Vec<CompletionRecord> = read_json(response).await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert(&self, record: &CompletionRecord) -> Result<CompletionRecord, ProgressError> {
        let response = self
            .client
            .post(self.upsert_url())
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&[record])
            .send()
            .await
            .map_err(transport_err)?;

        let rows: Vec<CompletionRecord> = read_json(response).await?;
        // The table has no server-side monotone guard; completed rows are only
        // ever written with completed = true by this crate.
        Ok(rows.into_iter().next().unwrap_or_else(|| record.clone()))
    }

    async fn select_many(
        &self,
        learner_id: &LearnerId,
        unit_keys: &[ContentUnitKey],
    ) -> Result<Vec<CompletionRecord>, ProgressError> {
        if unit_keys.is_empty() {
            return Ok(vec![]);
        }
        let response = self
            .client
            .get(self.select_many_url(learner_id, unit_keys))
            .send()
            .await
            .map_err(transport_err)?;
        read_json(response).await
    }
}

/// Auth collaborator backed by the hosted service's user endpoint
pub struct HttpAuthProvider {
    base_url: String,
    client: Client,
}

impl HttpAuthProvider {
    /// `session_token` is the learner's access token, if they have one
    pub fn new(config: &RemoteConfig, session_token: Option<&str>) -> Result<Self, ProgressError> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client: build_client(config, session_token)?,
        })
    }

    fn user_url(&self) -> String {
        format!("{}/auth/v1/user", self.base_url)
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn current_user(&self) -> Result<Option<AuthUser>, ProgressError> {
        let response = self
            .client
            .get(self.user_url())
            .send()
            .await
            .map_err(transport_err)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            _ => read_json::<Option<AuthUser>>(response).await,
        }
    }
}
