//! `PostgREST`-style HTTP implementation of [`RemoteService`]

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Query, RemoteError, RemoteResult, RemoteService};
use crate::config::ClientConfig;
use crate::models::{RecordId, Table};
use crate::util::{base_url, log_snippet, non_blank};

/// REST client for a `/rest/v1/<table>` data service
#[derive(Clone)]
pub struct RestRemoteService {
    rest_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
    client: Client,
}

impl fmt::Debug for RestRemoteService {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestRemoteService")
            .field("rest_url", &self.rest_url)
            .field("anon_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl RestRemoteService {
    pub fn new(base_url: impl AsRef<str>, anon_key: impl Into<String>) -> RemoteResult<Self> {
        let rest_url = normalize_rest_url(base_url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "anon key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url,
            anon_key,
            access_token: Arc::new(RwLock::new(None)),
            client: Client::builder().build()?,
        })
    }

    /// Build a client from loaded configuration
    pub fn from_config(config: &ClientConfig) -> RemoteResult<Self> {
        Self::new(&config.remote_url, config.anon_key.clone())
    }

    /// Set (or clear) the bearer token of the signed-in user
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = non_blank(token.as_deref());
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.rest_url, table.name())
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.access_token.read().await.clone();
        let bearer = token.unwrap_or_else(|| self.anon_key.clone());
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self.authorized(request).await.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message: parse_api_error(status, &body),
        })
    }
}

#[async_trait]
impl RemoteService for RestRemoteService {
    async fn select(&self, table: Table, query: &Query) -> RemoteResult<Vec<Value>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&query.to_query_pairs());
        let response = self.send(request).await?;
        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            other => Err(RemoteError::InvalidPayload(format!(
                "expected an array of rows, got {}",
                log_snippet(&other.to_string())
            ))),
        }
    }

    async fn insert(&self, table: Table, record: Value) -> RemoteResult<Value> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&record);
        let response = self.send(request).await?;
        match response.json::<Value>().await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Object(map) => Ok(Value::Object(map)),
            _ => Err(RemoteError::InvalidPayload(
                "insert response did not include the stored row".to_string(),
            )),
        }
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> RemoteResult<()> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal");
        self.send(request).await?;
        Ok(())
    }

    async fn user_branch(&self, user_id: &str) -> RemoteResult<Option<RecordId>> {
        let query = Query::new()
            .eq("id", user_id)
            .select("branch_id")
            .limit(1);
        let request = self
            .client
            .get(format!("{}/{PROFILES_TABLE}", self.rest_url))
            .query(&query.to_query_pairs());
        let response = self.send(request).await?;
        let rows: Vec<ProfileRow> = response.json().await?;
        Ok(rows.into_iter().next().and_then(|row| row.branch_id))
    }
}

/// Backend table holding one row per user, keyed by the auth user id
const PROFILES_TABLE: &str = "profiles";

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    branch_id: Option<RecordId>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error).or(payload.details) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = log_snippet(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_rest_url(raw: &str) -> RemoteResult<String> {
    if raw.trim().is_empty() {
        return Err(RemoteError::InvalidPayload(
            "remote URL must not be empty".to_string(),
        ));
    }
    let url = base_url(raw).ok_or_else(|| {
        RemoteError::InvalidPayload("remote URL must include http:// or https://".to_string())
    })?;

    if url.ends_with("/rest/v1") {
        Ok(url)
    } else {
        Ok(format!("{url}/rest/v1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_rest_url_appends_rest_prefix_once() {
        assert_eq!(
            normalize_rest_url("https://project.example.co/").unwrap(),
            "https://project.example.co/rest/v1"
        );
        assert_eq!(
            normalize_rest_url("https://project.example.co/rest/v1/").unwrap(),
            "https://project.example.co/rest/v1"
        );
    }

    #[test]
    fn normalize_rest_url_rejects_invalid_values() {
        assert!(normalize_rest_url("  ").is_err());
        assert!(normalize_rest_url("project.example.co").is_err());
    }

    #[test]
    fn new_rejects_empty_anon_key() {
        assert!(RestRemoteService::new("https://project.example.co", " ").is_err());
    }

    #[test]
    fn table_url_uses_table_name() {
        let service = RestRemoteService::new("https://project.example.co", "anon").unwrap();
        assert_eq!(
            service.table_url(Table::RentalItems),
            "https://project.example.co/rest/v1/rental_items"
        );
    }

    #[test]
    fn debug_redacts_anon_key() {
        let service = RestRemoteService::new("https://project.example.co", "anon-secret").unwrap();
        let debug = format!("{service:?}");
        assert!(!debug.contains("anon-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::CONFLICT,
            r#"{"message":"duplicate key value","code":"23505"}"#,
        );
        assert_eq!(message, "duplicate key value (409)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }
}
