//! REST client for the backend freeze endpoints.
//!
//! Responses are classified into [`StoreError`] at this boundary:
//! 401/403 are `Unauthorized`, 400/404/409/422 are `Validation`, anything
//! else non-2xx as well as transport failures and timeouts are `Unavailable`.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracepay_sync_sdk::{
    FreezeEndpoints, FreezeReceipt, FreezeRequest, FrozenItem, FrozenItemId, StoreError,
};
use tracing::{debug, instrument};

use crate::config::BackendConfig;

#[derive(thiserror::Error, Debug)]
pub enum RestClientError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Freeze endpoints over HTTP, authenticated with a bearer token.
pub struct RestFreezeClient {
    client: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

/// Error body returned by the backend.
#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

impl RestFreezeClient {
    /// # Errors
    ///
    /// Returns `RestClientError::Build` if the HTTP client cannot be created.
    pub fn new(config: &BackendConfig) -> Result<Self, RestClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: RwLock::new(None),
        })
    }

    /// Sets the bearer token sent with every request.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    pub fn clear_token(&self) {
        *self.token.write() = None;
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map_or_else(|_| format!("HTTP {status}"), |b| b.detail);
        debug!(%status, %detail, "backend rejected request");
        Err(classify_status(status, detail))
    }

    async fn json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::codec(format!("unexpected response body: {e}")))
    }
}

fn transport_error(e: &reqwest::Error) -> StoreError {
    if e.is_timeout() {
        StoreError::unavailable(format!("request timed out: {e}"))
    } else {
        StoreError::unavailable(format!("request failed: {e}"))
    }
}

fn classify_status(status: StatusCode, detail: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::unauthorized(detail),
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => StoreError::validation(detail),
        _ => StoreError::unavailable(detail),
    }
}

#[async_trait]
impl FreezeEndpoints for RestFreezeClient {
    #[instrument(
        skip_all,
        fields(leak_id = ?request.leak_id, transaction_id = ?request.transaction_id)
    )]
    async fn freeze(&self, request: &FreezeRequest) -> Result<FreezeReceipt, StoreError> {
        let response = self
            .send(self.client.post(self.url("mobile/freeze")).json(request))
            .await?;
        Self::json(response).await
    }

    #[instrument(skip_all, fields(%frozen_item_id))]
    async fn unfreeze(&self, frozen_item_id: FrozenItemId) -> Result<(), StoreError> {
        self.send(
            self.client
                .post(self.url(&format!("mobile/unfreeze/{frozen_item_id}"))),
        )
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn list_frozen(&self) -> Result<Vec<FrozenItem>, StoreError> {
        let response = self.send(self.client.get(self.url("mobile/frozen"))).await?;
        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn client_for(server: &MockServer) -> RestFreezeClient {
        RestFreezeClient::new(&BackendConfig {
            base_url: server.base_url(),
            request_timeout: Duration::from_secs(2),
            freeze_reason: "test".to_owned(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn freeze_posts_request_and_returns_item_id() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/mobile/freeze")
                .header("authorization", "Bearer token-123")
                .json_body(json!({
                    "leak_id": "leak-7",
                    "transaction_id": null,
                    "consent_id": null,
                    "reason": "User pressed Freeze in mobile app"
                }));
            then.status(201).json_body(json!({
                "status": "frozen",
                "message": "Leak frozen",
                "frozen_item_id": 42
            }));
        });

        let client = client_for(&server);
        client.set_token("token-123");
        let receipt = client
            .freeze(&FreezeRequest::leak(
                "leak-7",
                "User pressed Freeze in mobile app",
            ))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(receipt.frozen_item_id, Some(FrozenItemId(42)));
        assert_eq!(receipt.status, "frozen");
    }

    #[tokio::test]
    async fn unauthorized_maps_to_unauthorized() {
        let server = MockServer::start_async().await;
        let _m = server.mock(|when, then| {
            when.method(Method::POST).path("/mobile/freeze");
            then.status(401).json_body(json!({"detail": "Not authenticated"}));
        });

        let err = client_for(&server)
            .freeze(&FreezeRequest::leak("leak-7", "test"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::unauthorized("Not authenticated"));
    }

    #[tokio::test]
    async fn missing_item_maps_to_validation() {
        let server = MockServer::start_async().await;
        let _m = server.mock(|when, then| {
            when.method(Method::POST).path("/mobile/unfreeze/99");
            then.status(404).json_body(json!({"detail": "Frozen item not found"}));
        });

        let err = client_for(&server)
            .unfreeze(FrozenItemId(99))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::validation("Frozen item not found"));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start_async().await;
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/mobile/frozen");
            then.status(503).body("maintenance");
        });

        let err = client_for(&server).list_frozen().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err, StoreError::unavailable("HTTP 503 Service Unavailable"));
    }

    #[tokio::test]
    async fn list_frozen_decodes_items() {
        let server = MockServer::start_async().await;
        let _m = server.mock(|when, then| {
            when.method(Method::GET).path("/mobile/frozen");
            then.status(200).json_body(json!([{
                "id": 5,
                "leak_id": "leak-1",
                "transaction_id": null,
                "consent_id": null,
                "reason": "User pressed Freeze in mobile app",
                "frozen_at": "2025-11-02T09:15:00Z",
                "status": "frozen"
            }]));
        });

        let items = client_for(&server).list_frozen().await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, FrozenItemId(5));
        assert_eq!(items[0].leak_id.as_deref(), Some("leak-1"));
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        let client = RestFreezeClient::new(&BackendConfig {
            base_url: "http://127.0.0.1:9".to_owned(),
            request_timeout: Duration::from_secs(2),
            freeze_reason: "test".to_owned(),
        })
        .unwrap();

        let err = client.list_frozen().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn cleared_token_is_not_sent() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(Method::GET)
                .path("/mobile/frozen")
                .header_missing("authorization");
            then.status(200).json_body(json!([]));
        });

        let client = client_for(&server);
        client.set_token("stale");
        client.clear_token();
        assert!(client.list_frozen().await.unwrap().is_empty());
        mock.assert_async().await;
    }
}
