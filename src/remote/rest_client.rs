//! Reqwest-backed PostgREST client.
//!
//! Owns transport details only: URL and header construction, timeouts and
//! mapping HTTP outcomes onto [`RemoteError`]. Rows are addressed as
//! `{base_url}/rest/v1/{table}?id=eq.{id}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde_json::Value;

use crate::remote::RemoteBackend;
use crate::shared::config::{AppConfig, ConfigError};
use crate::shared::error::RemoteError;
use crate::shared::mutation::{row_id_text, Payload};

const BODY_PREVIEW_LIMIT: usize = 256;

/// PostgREST backend adapter
#[derive(Debug, Clone)]
pub struct RestBackend {
    client: Client,
    rest_base: String,
    api_key: Option<String>,
    access_token: Option<String>,
}

impl RestBackend {
    /// Build an adapter using a reqwest client with an explicit request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error when the reqwest client cannot be constructed.
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            rest_base: format!("{}/rest/v1", base_url.as_str().trim_end_matches('/')),
            api_key: None,
            access_token: None,
        })
    }

    /// Build an adapter from the application configuration.
    ///
    /// # Errors
    ///
    /// Fails when no server URL is configured or it cannot be parsed.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let raw = config
            .server_url
            .as_deref()
            .ok_or(ConfigError::MissingValue("server_url"))?;
        let base_url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl(raw.to_string()))?;
        let mut backend =
            Self::new(base_url, config.request_timeout).map_err(|e| ConfigError::InvalidValue {
                key: "request_timeout",
                value: e.to_string(),
            })?;
        backend.api_key = config.api_key.clone();
        backend.access_token = config.access_token.clone();
        Ok(backend)
    }

    /// Send `apikey` with every request
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Authenticate requests as a signed-in user
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    fn table_url(&self, table: &str) -> Result<String, RemoteError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RemoteError::invalid_payload(format!("invalid table name {table:?}")));
        }
        Ok(format!("{}/{}", self.rest_base, table))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request
            .header(reqwest::header::ACCEPT, "application/json")
            .header("Prefer", "return=representation");
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key.as_str());
        }
        // The anon key doubles as bearer token when no user is signed in
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            request = request.bearer_auth(token);
        }
        request
    }

    /// Send a request, returning the body of a successful response
    async fn execute(
        &self,
        request: RequestBuilder,
        table: &str,
        row_id: Option<&Value>,
    ) -> Result<Vec<u8>, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_transport_error)?;
        if !status.is_success() {
            return Err(map_status_error(status, body.as_ref(), table, row_id));
        }
        Ok(body.to_vec())
    }
}

/// A filtered write answers with the affected rows; none means no match.
fn ensure_row_matched(body: &[u8], table: &str, id: &Value) -> Result<(), RemoteError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        // Server ignored `Prefer: return=representation`
        return Ok(());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(rows)) if rows.is_empty() => {
            Err(RemoteError::not_found(table, row_id_text(id)))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn insert(&self, table: &str, payload: &Payload) -> Result<(), RemoteError> {
        let url = self.table_url(table)?;
        self.execute(self.client.post(url).json(payload), table, None)
            .await?;
        tracing::debug!(table, "Remote insert applied");
        Ok(())
    }

    async fn update(&self, table: &str, id: &Value, payload: &Payload) -> Result<(), RemoteError> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .patch(url)
            .query(&[("id", format!("eq.{}", row_id_text(id)))])
            .json(payload);
        let body = self.execute(request, table, Some(id)).await?;
        ensure_row_matched(&body, table, id)?;
        tracing::debug!(table, row_id = %row_id_text(id), "Remote update applied");
        Ok(())
    }

    async fn delete(&self, table: &str, id: &Value) -> Result<(), RemoteError> {
        let url = self.table_url(table)?;
        let request = self
            .client
            .delete(url)
            .query(&[("id", format!("eq.{}", row_id_text(id)))]);
        let body = self.execute(request, table, Some(id)).await?;
        ensure_row_matched(&body, table, id)?;
        tracing::debug!(table, row_id = %row_id_text(id), "Remote delete applied");
        Ok(())
    }
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_builder() {
        RemoteError::invalid_payload(format!("invalid request: {error}"))
    } else if error.is_timeout() {
        RemoteError::transient(format!("request timed out: {error}"))
    } else {
        RemoteError::transient(error.to_string())
    }
}

fn map_status_error(
    status: StatusCode,
    body: &[u8],
    table: &str,
    row_id: Option<&Value>,
) -> RemoteError {
    let body_preview = body_preview(body);
    let message = if body_preview.is_empty() {
        format!("status {}", status.as_u16())
    } else {
        format!("status {}: {}", status.as_u16(), body_preview)
    };

    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::transient(message)
        }
        _ if status.is_server_error() => RemoteError::transient(message),
        StatusCode::NOT_FOUND => RemoteError::not_found(
            table,
            row_id.map(row_id_text).unwrap_or_else(|| "-".to_string()),
        ),
        StatusCode::CONFLICT => RemoteError::conflict(message),
        _ => RemoteError::rejected(status.as_u16(), message),
    }
}

fn body_preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    if trimmed.chars().count() <= BODY_PREVIEW_LIMIT {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    preview.push_str("...");
    preview
}
