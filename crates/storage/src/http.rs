//! JSON-over-HTTP client for the remote progress/result API.

use std::env;
use std::time::Duration;

use assess_core::model::{AttemptResult, TestId, TestStatus};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::repository::{
    AttemptAdmin, ProgressStore, ProgressUpdate, ResultStore, StartSessionRequest, Storage,
    StorageError, SubmitResultRequest,
};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl HttpStoreConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Reads `ASSESS_API_URL`, `ASSESS_API_KEY` and `ASSESS_API_TIMEOUT_SECS`.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("ASSESS_API_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        let api_key = env::var("ASSESS_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let timeout = env::var("ASSESS_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS), Duration::from_secs);
        Some(Self {
            base_url,
            api_key,
            timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    config: HttpStoreConfig,
}

impl HttpStore {
    /// Build a client with the configured timeout applied to every call.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the HTTP client cannot be built.
    pub fn new(config: HttpStoreConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StorageError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(map_transport)?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(map_transport)
    }
}

fn map_transport(err: reqwest::Error) -> StorageError {
    if err.is_timeout() {
        StorageError::Timeout
    } else if err.is_decode() {
        StorageError::Serialization(err.to_string())
    } else {
        StorageError::Connection(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(StorageError::NotFound),
        StatusCode::CONFLICT => Err(StorageError::AttemptsExhausted),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(StorageError::Rejected {
                status: status.as_u16(),
                message,
            })
        }
    }
}

//
// ─── WIRE ENVELOPES ────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResultResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<AttemptResult>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTestQuery {
    pub username: String,
    pub test_id: TestId,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterTestRequest {
    pub test_id: TestId,
    pub max_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAttemptsRequest {
    pub username: String,
    pub test_id: TestId,
    pub extra: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantAttemptsResponse {
    pub max_attempts: u32,
}

fn user_test(username: &str, test_id: TestId) -> UserTestQuery {
    UserTestQuery {
        username: username.to_owned(),
        test_id,
    }
}

//
// ─── CONTRACT IMPLS ────────────────────────────────────────────────────────────
//

#[async_trait]
impl ProgressStore for HttpStore {
    async fn start_session(&self, request: &StartSessionRequest) -> Result<(), StorageError> {
        let url = self.config.url("sessions/start");
        let _: Ack = self.send(self.client.post(url).json(request)).await?;
        Ok(())
    }

    async fn get_status(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<TestStatus, StorageError> {
        let url = self.config.url(&format!("tests/{test_id}/status"));
        self.send(self.client.get(url).query(&[("username", username)]))
            .await
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> Result<bool, StorageError> {
        let url = self.config.url("progress");
        let ack: Ack = self.send(self.client.put(url).json(update)).await?;
        Ok(ack.success)
    }

    async fn clear_progress(&self, username: &str, test_id: TestId) -> Result<bool, StorageError> {
        let url = self.config.url("progress");
        let ack: Ack = self
            .send(self.client.delete(url).query(&user_test(username, test_id)))
            .await?;
        Ok(ack.success)
    }
}

#[async_trait]
impl ResultStore for HttpStore {
    async fn submit_result(
        &self,
        request: &SubmitResultRequest,
    ) -> Result<Option<AttemptResult>, StorageError> {
        let url = self.config.url("results");
        let response: SubmitResultResponse =
            self.send(self.client.post(url).json(request)).await?;
        if !response.success {
            return Err(StorageError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: "result store reported failure".into(),
            });
        }
        Ok(response.result)
    }

    async fn list_results(
        &self,
        username: &str,
        test_id: TestId,
    ) -> Result<Vec<AttemptResult>, StorageError> {
        let url = self.config.url("results");
        self.send(self.client.get(url).query(&user_test(username, test_id)))
            .await
    }
}

#[async_trait]
impl AttemptAdmin for HttpStore {
    async fn register_test(&self, test_id: TestId, max_attempts: u32) -> Result<(), StorageError> {
        let url = self.config.url("admin/tests");
        let body = RegisterTestRequest {
            test_id,
            max_attempts,
        };
        let _: Ack = self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn reset_attempts(&self, username: &str, test_id: TestId) -> Result<(), StorageError> {
        let url = self.config.url("admin/attempts/reset");
        let _: Ack = self
            .send(self.client.post(url).json(&user_test(username, test_id)))
            .await?;
        Ok(())
    }

    async fn grant_attempts(
        &self,
        username: &str,
        test_id: TestId,
        extra: u32,
    ) -> Result<u32, StorageError> {
        let url = self.config.url("admin/attempts/grant");
        let body = GrantAttemptsRequest {
            username: username.to_owned(),
            test_id,
            extra,
        };
        let response: GrantAttemptsResponse = self.send(self.client.post(url).json(&body)).await?;
        Ok(response.max_attempts)
    }
}

impl Storage {
    /// Build a `Storage` that talks to the remote API.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the HTTP client cannot be built.
    pub fn http(config: HttpStoreConfig) -> Result<Self, StorageError> {
        Ok(Self::from_repository(HttpStore::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let config = HttpStoreConfig::new("http://localhost:8080/api/");
        assert_eq!(config.url("progress"), "http://localhost:8080/api/progress");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transient_error() {
        let mut config = HttpStoreConfig::new("http://127.0.0.1:1");
        config.timeout = Duration::from_secs(2);
        let store = HttpStore::new(config).unwrap();
        let err = store.get_status("ada", TestId::new(1)).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error: {err:?}");
    }
}
