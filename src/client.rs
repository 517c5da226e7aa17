//! HTTP client the CLI subcommands use to drive a running daemon.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::alerting::{AckOutcome, Acknowledgement, AlertState};
use crate::monitor::models::{HistoryEntry, TargetPatch};
use crate::monitor::CheckNowSummary;
use crate::web::models::{AckRequest, CreateTargetRequest, HealthResponse, TargetView};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Could not reach the daemon at {url}: {source}")]
    Unreachable { url: String, source: reqwest::Error },
    #[error("Daemon returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response from daemon: {0}")]
    Decode(reqwest::Error),
}

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await.map_err(|source| ClientError::Unreachable {
            url: self.base_url.clone(),
            source,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = match response.json::<serde_json::Value>().await {
            Ok(body) => body
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| body.to_string()),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        self.execute(request)
            .await?
            .json::<T>()
            .await
            .map_err(ClientError::Decode)
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.json(self.client.get(self.url("/api/health"))).await
    }

    pub async fn list_targets(&self) -> Result<Vec<TargetView>, ClientError> {
        self.json(self.client.get(self.url("/api/targets"))).await
    }

    pub async fn create_target(
        &self,
        request: &CreateTargetRequest,
    ) -> Result<TargetView, ClientError> {
        self.json(self.client.post(self.url("/api/targets")).json(request))
            .await
    }

    pub async fn update_target(
        &self,
        id: i32,
        patch: &TargetPatch,
    ) -> Result<TargetView, ClientError> {
        self.json(
            self.client
                .put(self.url(&format!("/api/targets/{id}")))
                .json(patch),
        )
        .await
    }

    pub async fn delete_target(&self, id: i32) -> Result<(), ClientError> {
        let response = self
            .execute(self.client.delete(self.url(&format!("/api/targets/{id}"))))
            .await?;
        debug_assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    pub async fn history(&self, id: i32) -> Result<Vec<HistoryEntry>, ClientError> {
        self.json(
            self.client
                .get(self.url(&format!("/api/targets/{id}/history"))),
        )
        .await
    }

    pub async fn check_now(&self) -> Result<CheckNowSummary, ClientError> {
        self.json(self.client.post(self.url("/api/check-now"))).await
    }

    pub async fn alert_state(&self) -> Result<AlertState, ClientError> {
        self.json(self.client.get(self.url("/api/alert"))).await
    }

    pub async fn acknowledge(&self, kind: Acknowledgement) -> Result<AckOutcome, ClientError> {
        self.json(
            self.client
                .post(self.url("/api/alert/ack"))
                .json(&AckRequest { kind }),
        )
        .await
    }

    pub async fn test_alert(&self) -> Result<(), ClientError> {
        self.execute(self.client.post(self.url("/api/alert/test")))
            .await
            .map(|_| ())
    }
}
