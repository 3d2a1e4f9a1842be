//! Remote sync client.
//!
//! Best-effort, retry-free reads and writes of the full user dataset.
//! Every failure is reported to the caller as a typed error; the
//! reconciliation tracker decides what to roll back. Pushes are full
//! replacements per provided field — the server treats an omitted field
//! as "keep the last known value", never as "clear".

use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use nosh_core::models::{DailyEntry, FoodItem, Goals, UserData};

use crate::error::{AuthError, SyncError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared slot for the bearer token. Written only by the session
/// manager, read by the remote client per request.
pub type TokenHandle = Arc<RwLock<Option<String>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
}

/// Successful register/login response.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

/// Partial dataset push. `None` fields are omitted from the payload.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_foods: Option<Vec<FoodItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_entries: Option<Vec<DailyEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<Goals>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

pub struct RemoteClient {
    base_url: String,
    client: reqwest::Client,
    token: TokenHandle,
}

impl RemoteClient {
    pub fn new(base_url: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nosh-client/{}", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: TokenHandle::default(),
        })
    }

    /// Handle to the credential slot, for the session manager to own.
    #[must_use]
    pub fn token_handle(&self) -> TokenHandle {
        Arc::clone(&self.token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn bearer(&self) -> Result<String, SyncError> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
            .ok_or_else(|| SyncError::AuthRejected("no active session".to_string()))
    }

    /// Extract the server's human-readable message; it is surfaced to
    /// the caller verbatim.
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.error,
            Err(_) if text.is_empty() => format!("request failed with status {status}"),
            Err(_) => text,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = Self::error_message(response).await;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(SyncError::AuthRejected(message))
        } else {
            Err(SyncError::Transient(message))
        }
    }

    /// Fetch the full user dataset.
    pub async fn fetch_user_data(&self) -> Result<UserData, SyncError> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.url("/api/data"))
            .bearer_auth(&token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    /// Push a full replacement of the provided collections.
    pub async fn push_user_data(&self, patch: &UserDataPatch) -> Result<(), SyncError> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url("/api/data"))
            .bearer_auth(&token)
            .json(patch)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Delete a single entry by id. Present per the store contract; the
    /// tracker's mutation path prefers a full push, which sidesteps
    /// temporary-id reconciliation entirely.
    pub async fn delete_entry(&self, id: i64) -> Result<(), SyncError> {
        let token = self.bearer()?;
        let response = self
            .client
            .delete(self.url(&format!("/api/entries/{id}")))
            .bearer_auth(&token)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Confirm server-side session validity. Covers revocation and
    /// secret rotation, which the client cannot detect from the token
    /// alone.
    pub async fn verify_session(&self) -> Result<User, SyncError> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.url("/api/auth/me"))
            .bearer_auth(&token)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    async fn auth_request(&self, path: &str, username: &str, password: &str)
    -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&Credentials { username, password })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let message = Self::error_message(response).await;
        Err(match status {
            StatusCode::UNAUTHORIZED => AuthError::InvalidCredentials,
            StatusCode::CONFLICT => AuthError::UsernameTaken,
            StatusCode::TOO_MANY_REQUESTS => AuthError::RateLimited,
            _ => AuthError::Transient(message),
        })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.auth_request("/api/auth/login", username, password).await
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<AuthSession, AuthError> {
        self.auth_request("/api/auth/register", username, password).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_omits_absent_fields() {
        let patch = UserDataPatch {
            goals: Some(Goals::default()),
            ..UserDataPatch::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();
        assert!(obj.contains_key("goals"));
        assert!(!obj.contains_key("customFoods"));
        assert!(!obj.contains_key("dailyEntries"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = RemoteClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.url("/api/data"), "http://localhost:3000/api/data");
    }

    #[test]
    fn test_bearer_without_session() {
        let client = RemoteClient::new("http://localhost:3000").unwrap();
        assert!(matches!(client.bearer(), Err(SyncError::AuthRejected(_))));
    }
}
