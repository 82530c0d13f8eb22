//! Remote store over a PostgREST-style HTTP data API.
//!
//! Endpoints used:
//! - GET    /rest/v1/notes?user_id=eq.{owner}&order=created_at.desc
//! - POST   /rest/v1/notes
//! - PATCH  /rest/v1/notes?id=eq.{id}&user_id=eq.{owner}
//! - DELETE /rest/v1/notes?id=eq.{id}&user_id=eq.{owner}
//! - DELETE /rest/v1/notes?user_id=eq.{owner}, then POST /rest/v1/rpc/delete_user
//!
//! Writes ask for `Prefer: return=representation` so an empty array tells us
//! the owner-scoped filter matched nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;

use crate::config::RemoteConfig;
use crate::error::{NoteError, NoteResult, RemoteError};
use crate::identity::IdentityProvider;
use crate::models::RemoteNote;
use crate::remote::{RemoteResult, RemoteStore};

/// Insert payload
#[derive(Debug, Serialize)]
struct InsertRow<'a> {
    user_id: &'a str,
    content: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Update payload
#[derive(Debug, Serialize)]
struct ContentPatch<'a> {
    content: &'a str,
    updated_at: DateTime<Utc>,
}

/// HTTP remote store client
pub struct HttpRemote {
    client: Client,
    base_url: String,
    api_key: String,
    identity: Arc<dyn IdentityProvider>,
}

impl HttpRemote {
    /// Create a client for the configured data API.
    pub fn new(config: &RemoteConfig, identity: Arc<dyn IdentityProvider>) -> NoteResult<Self> {
        if !config.is_configured() {
            return Err(NoteError::Config("remote.base_url is not set".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| NoteError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            identity,
        })
    }

    fn notes_url(&self) -> String {
        format!("{}/rest/v1/notes", self.base_url)
    }

    fn owner_url(&self, owner_id: &str) -> String {
        format!("{}?user_id=eq.{}", self.notes_url(), urlencoding::encode(owner_id))
    }

    fn scoped_url(&self, id: &str, owner_id: &str) -> String {
        format!(
            "{}?id=eq.{}&user_id=eq.{}",
            self.notes_url(),
            urlencoding::encode(id),
            urlencoding::encode(owner_id)
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        // Without a user token the anon key doubles as bearer; row-level
        // security then denies access and we surface Rejected.
        let token = self
            .identity
            .access_token()
            .unwrap_or_else(|| self.api_key.clone());

        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(status.as_u16(), body));
        }
        Ok(response)
    }

    async fn send_rows(&self, request: RequestBuilder) -> RemoteResult<Vec<RemoteNote>> {
        let response = self.send(request).await?;
        let status = response.status().as_u16();
        response
            .json::<Vec<RemoteNote>>()
            .await
            .map_err(|e| RemoteError::rejected(status, format!("malformed response: {}", e)))
    }
}

/// First row of a representation response, or NotFound when the filter
/// matched nothing.
fn single_row(rows: Vec<RemoteNote>) -> RemoteResult<RemoteNote> {
    rows.into_iter().next().ok_or(RemoteError::NotFound)
}

impl RemoteStore for HttpRemote {
    async fn insert(
        &self,
        owner_id: &str,
        content: &str,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<RemoteNote> {
        let body = InsertRow {
            user_id: owner_id,
            content,
            created_at,
            updated_at,
        };
        let request = self
            .request(Method::POST, &self.notes_url())
            .header("Prefer", "return=representation")
            .json(&body);

        let rows = self.send_rows(request).await?;
        single_row(rows).map_err(|_| RemoteError::rejected(200, "insert returned no row"))
    }

    async fn select_all(&self, owner_id: &str) -> RemoteResult<Vec<RemoteNote>> {
        let url = format!("{}&order=created_at.desc", self.owner_url(owner_id));
        self.send_rows(self.request(Method::GET, &url)).await
    }

    async fn exists(&self, owner_id: &str) -> RemoteResult<bool> {
        let url = format!("{}&select=*&limit=1", self.owner_url(owner_id));
        let rows = self.send_rows(self.request(Method::GET, &url)).await?;
        Ok(!rows.is_empty())
    }

    async fn update_content(
        &self,
        id: &str,
        owner_id: &str,
        content: &str,
        updated_at: DateTime<Utc>,
    ) -> RemoteResult<RemoteNote> {
        let request = self
            .request(Method::PATCH, &self.scoped_url(id, owner_id))
            .header("Prefer", "return=representation")
            .json(&ContentPatch {
                content,
                updated_at,
            });
        single_row(self.send_rows(request).await?)
    }

    async fn delete(&self, id: &str, owner_id: &str) -> RemoteResult<()> {
        let request = self
            .request(Method::DELETE, &self.scoped_url(id, owner_id))
            .header("Prefer", "return=representation");
        single_row(self.send_rows(request).await?).map(|_| ())
    }

    async fn erase_owner(&self, owner_id: &str) -> RemoteResult<()> {
        self.send(self.request(Method::DELETE, &self.owner_url(owner_id)))
            .await?;
        tracing::info!(owner = %owner_id, "Deleted remote notes, revoking identity");

        let rpc_url = format!("{}/rest/v1/rpc/delete_user", self.base_url);
        self.send(self.request(Method::POST, &rpc_url).json(&serde_json::json!({})))
            .await?;
        Ok(())
    }
}
