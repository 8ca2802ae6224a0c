//! Client for the optional audit backend
//!
//! Authorization fails open: an unreachable or misbehaving backend never
//! blocks a vote. Receipt logging is fire-and-forget.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use votemesh_core::{AuditConfig, VotemeshError, VotemeshResult};

/// Receipt type tag understood by the backend
pub const VOTE_RECEIPT: &str = "vote";

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    allowed: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct AuditClient {
    api_base: Option<String>,
    client: Client,
}

impl AuditClient {
    pub fn new(config: &AuditConfig) -> VotemeshResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| VotemeshError::NetworkError(e.to_string()))?;
        Ok(Self {
            api_base: config
                .api_base
                .as_ref()
                .map(|base| base.trim_end_matches('/').to_string()),
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.api_base.is_some()
    }

    /// Ask whether this device may vote on a poll
    pub async fn authorize_vote(&self, poll_id: &str, device_id: &str) -> bool {
        let Some(base) = &self.api_base else {
            return true;
        };
        let url = format!("{}/api/vote-authorize", base);
        let body = json!({ "pollId": poll_id, "deviceId": device_id });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Vote authorization unavailable, allowing: {}", e);
                return true;
            }
        };
        if !response.status().is_success() {
            warn!("Vote authorization returned {}, allowing", response.status());
            return true;
        }

        match response.json::<AuthorizeResponse>().await {
            Ok(AuthorizeResponse {
                allowed: Some(allowed),
                reason,
            }) => {
                if !allowed {
                    debug!(
                        "Vote on {} refused: {}",
                        poll_id,
                        reason.as_deref().unwrap_or("no reason given")
                    );
                }
                allowed
            }
            Ok(_) => true,
            Err(e) => {
                warn!("Unexpected authorization response, allowing: {}", e);
                true
            }
        }
    }

    /// Record a receipt with the backend. Failures are only logged.
    pub async fn log_receipt<T: Serialize>(&self, kind: &str, payload: &T) {
        let Some(base) = &self.api_base else {
            return;
        };
        let url = format!("{}/api/receipts", base);
        let body = json!({ "type": kind, "payload": payload });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Receipt logged with audit backend");
            }
            Ok(response) => warn!("Audit backend rejected receipt: {}", response.status()),
            Err(e) => warn!("Failed to log receipt (non-fatal): {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    async fn backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(api_base: Option<String>) -> AuditClient {
        AuditClient::new(&AuditConfig {
            api_base,
            timeout_ms: 2000,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_disabled_and_unreachable_allow() {
        assert!(client(None).authorize_vote("poll", "device").await);

        let vacant = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", vacant.local_addr().unwrap());
        drop(vacant);

        let audit = client(Some(url));
        assert!(audit.is_enabled());
        assert!(audit.authorize_vote("poll", "device").await);
        audit.log_receipt(VOTE_RECEIPT, &json!({"blockIndex": 1})).await;
    }

    #[tokio::test]
    async fn test_backend_can_refuse() {
        let router = Router::new().route(
            "/api/vote-authorize",
            post(|Json(body): Json<Value>| async move {
                let allowed = body["deviceId"] != "banned";
                Json(json!({ "allowed": allowed, "reason": "device banned" }))
            }),
        );
        let audit = client(Some(backend(router).await));

        assert!(audit.authorize_vote("poll", "device").await);
        assert!(!audit.authorize_vote("poll", "banned").await);
    }

    #[tokio::test]
    async fn test_server_errors_allow() {
        let router = Router::new()
            .route(
                "/api/vote-authorize",
                post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route("/api/receipts", post(|| async { StatusCode::BAD_GATEWAY }));
        let audit = client(Some(backend(router).await));

        assert!(audit.authorize_vote("poll", "device").await);
        audit.log_receipt(VOTE_RECEIPT, &json!({})).await;
    }

    #[tokio::test]
    async fn test_missing_allowed_field_allows() {
        let router = Router::new().route(
            "/api/vote-authorize",
            post(|| async { Json(json!({ "status": "maybe" })) }),
        );
        let audit = client(Some(backend(router).await));
        assert!(audit.authorize_vote("poll", "device").await);
    }
}
