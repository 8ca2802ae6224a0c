//! HTTP API for VOTEMESH node

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use votemesh_core::{Hash, VotemeshError};
use votemesh_ledger::{Poll, Receipt};
use votemesh_p2p::{ConnectionStatus, LinkState};

use crate::runtime::NodeRuntime;

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Node status response
#[derive(Serialize)]
pub struct NodeStatusResponse {
    pub peer_id: String,
    pub device_id: String,
    pub chain_length: usize,
    pub head_hash: Option<String>,
    pub relay: ConnectionStatus,
    pub link_state: LinkState,
    pub queued_messages: usize,
    pub known_peer_addresses: usize,
}

/// Vote submission
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub poll_id: String,
    pub choice: String,
}

/// Poll creation
#[derive(Deserialize)]
pub struct PollRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub options: Vec<String>,
}

#[derive(Deserialize)]
pub struct DowngradeQuery {
    pub hash: String,
    pub index: u64,
}

#[derive(Serialize)]
pub struct ValidationResponse {
    pub valid: bool,
    pub fault: Option<String>,
}

#[derive(Serialize)]
pub struct DowngradeResponse {
    pub downgrade: bool,
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let enable_cors = state.config().api.enable_cors;

    let router = Router::new()
        // Health
        .route("/health", get(health))
        .route("/status", get(status))
        // Chain
        .route("/chain", get(get_chain))
        .route("/chain/validate", get(validate_chain))
        .route("/chain/downgrade", get(check_downgrade))
        // Votes
        .route("/votes", post(submit_vote))
        .route("/receipts", get(get_receipts))
        .route("/receipts/verify", post(verify_receipt))
        // Polls
        .route("/polls", get(get_polls).post(create_poll))
        .route("/polls/:id/results", get(get_results))
        .with_state(state);

    if enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Status code for a failed operation
fn error_status(error: &VotemeshError) -> StatusCode {
    match error {
        VotemeshError::InvalidVote(_) => StatusCode::BAD_REQUEST,
        VotemeshError::VoteNotAuthorized(_) => StatusCode::FORBIDDEN,
        VotemeshError::PollNotFound(_) | VotemeshError::RecordNotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node status
async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    let ledger = runtime.ledger();
    let status = NodeStatusResponse {
        peer_id: runtime.peer_id().to_string(),
        device_id: runtime.device_id().to_string(),
        chain_length: ledger.len(),
        head_hash: ledger.head().map(|b| b.current_hash.to_hex()),
        relay: runtime.relay_status(),
        link_state: runtime.relay_state(),
        queued_messages: runtime.queued_messages(),
        known_peer_addresses: runtime.known_peer_addresses(),
    };

    Json(ApiResponse::ok(status))
}

async fn get_chain(State(runtime): State<ApiState>) -> impl IntoResponse {
    Json(ApiResponse::ok(runtime.ledger().snapshot()))
}

async fn validate_chain(State(runtime): State<ApiState>) -> impl IntoResponse {
    let response = match runtime.ledger().audit() {
        Ok(()) => ValidationResponse {
            valid: true,
            fault: None,
        },
        Err(fault) => ValidationResponse {
            valid: false,
            fault: Some(fault.to_string()),
        },
    };
    Json(ApiResponse::ok(response))
}

async fn check_downgrade(
    State(runtime): State<ApiState>,
    Query(query): Query<DowngradeQuery>,
) -> impl IntoResponse {
    match Hash::from_hex(&query.hash) {
        Ok(hash) => {
            let downgrade = runtime.ledger().detect_downgrade(&hash, query.index);
            (
                StatusCode::OK,
                Json(ApiResponse::ok(DowngradeResponse { downgrade })),
            )
        }
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<DowngradeResponse>::err("Invalid hash")),
        ),
    }
}

/// Submit vote
async fn submit_vote(
    State(runtime): State<ApiState>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    match runtime.submit_vote(&req.poll_id, &req.choice).await {
        Ok(receipt) => (StatusCode::CREATED, Json(ApiResponse::ok(receipt))),
        Err(e) => {
            warn!("Vote on {} rejected: {}", req.poll_id, e);
            (error_status(&e), Json(ApiResponse::<Receipt>::err(e)))
        }
    }
}

async fn get_receipts(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.receipts().await {
        Ok(receipts) => (StatusCode::OK, Json(ApiResponse::ok(receipts))),
        Err(e) => (error_status(&e), Json(ApiResponse::<Vec<Receipt>>::err(e))),
    }
}

/// Check a receipt against the current chain
async fn verify_receipt(
    State(runtime): State<ApiState>,
    Json(receipt): Json<Receipt>,
) -> impl IntoResponse {
    let response = match receipt.verify(&runtime.ledger().snapshot()) {
        Ok(()) => ValidationResponse {
            valid: true,
            fault: None,
        },
        Err(e) => ValidationResponse {
            valid: false,
            fault: Some(e.to_string()),
        },
    };
    Json(ApiResponse::ok(response))
}

async fn get_polls(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.polls().await {
        Ok(polls) => (StatusCode::OK, Json(ApiResponse::ok(polls))),
        Err(e) => (error_status(&e), Json(ApiResponse::<Vec<Poll>>::err(e))),
    }
}

/// Create poll
async fn create_poll(
    State(runtime): State<ApiState>,
    Json(req): Json<PollRequest>,
) -> impl IntoResponse {
    let poll = Poll::new(req.title, req.description, req.options);
    match runtime.create_poll(poll).await {
        Ok(poll) => (StatusCode::CREATED, Json(ApiResponse::ok(poll))),
        Err(e) => (error_status(&e), Json(ApiResponse::<Poll>::err(e))),
    }
}

async fn get_results(
    State(runtime): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match runtime.poll_results(&id).await {
        Ok(results) => (StatusCode::OK, Json(ApiResponse::ok(results))),
        Err(e) => (
            error_status(&e),
            Json(ApiResponse::<votemesh_ledger::PollResults>::err(e)),
        ),
    }
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use votemesh_core::{NodeConfig, StoreBackend};
    use votemesh_crypto::keys::KeyPair;

    async fn test_router() -> Router {
        let mut config = NodeConfig::default();
        config.store.backend = StoreBackend::Memory;
        let runtime = NodeRuntime::new(config, KeyPair::generate()).await.unwrap();
        create_router(Arc::new(runtime))
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let router = test_router().await;

        let (status, body) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = call(&router, "GET", "/status", None).await;
        assert_eq!(body["data"]["chain_length"], 1);
        assert_eq!(body["data"]["relay"]["connected"], false);
        assert_eq!(body["data"]["link_state"], "idle");
    }

    #[tokio::test]
    async fn test_poll_vote_receipt_flow() {
        let router = test_router().await;

        let (status, body) = call(
            &router,
            "POST",
            "/polls",
            Some(json!({"title": "Lunch", "options": ["pizza", "sushi"]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let poll_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &router,
            "POST",
            "/votes",
            Some(json!({"pollId": poll_id, "choice": "sushi"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let receipt = body["data"].clone();
        assert_eq!(receipt["blockIndex"], 1);

        let (status, _) = call(
            &router,
            "POST",
            "/votes",
            Some(json!({"pollId": poll_id, "choice": "tacos"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = call(&router, "GET", "/chain", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (_, body) = call(&router, "GET", "/chain/validate", None).await;
        assert_eq!(body["data"]["valid"], true);

        let (_, body) = call(&router, "GET", "/receipts", None).await;
        assert_eq!(body["data"][0], receipt);

        let (_, body) = call(&router, "POST", "/receipts/verify", Some(receipt.clone())).await;
        assert_eq!(body["data"]["valid"], true);

        let mut forged = receipt;
        forged["blockIndex"] = json!(0);
        let (_, body) = call(&router, "POST", "/receipts/verify", Some(forged)).await;
        assert_eq!(body["data"]["valid"], false);

        let uri = format!("/polls/{}/results", poll_id);
        let (_, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(body["data"]["totalVotes"], 1);

        let (_, body) = call(&router, "GET", "/polls", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_responses() {
        let router = test_router().await;

        let (status, body) = call(&router, "GET", "/polls/missing/results", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&router, "GET", "/chain/downgrade?hash=zz&index=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &router,
            "POST",
            "/polls",
            Some(json!({"title": "Empty", "options": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_downgrade_check() {
        let router = test_router().await;
        let (_, body) = call(&router, "GET", "/chain", None).await;
        let genesis_hash = body["data"][0]["currentHash"].as_str().unwrap().to_string();

        let uri = format!("/chain/downgrade?hash={}&index=0", genesis_hash);
        let (_, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(body["data"]["downgrade"], false);

        let forged = "ab".repeat(32);
        let uri = format!("/chain/downgrade?hash={}&index=0", forged);
        let (_, body) = call(&router, "GET", &uri, None).await;
        assert_eq!(body["data"]["downgrade"], true);
    }
}
