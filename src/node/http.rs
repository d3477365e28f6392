//! HTTP admin API
//!
//! - `GET /health`: liveness and role
//! - `GET /admin/status`: ledger counters, peers, current leader
//! - `POST /ops`: submit an operation (leader only)
//! - `PUT /admin/peers`: replace the peer list at runtime

use crate::app::{Application, OpType, Operation};
use crate::election::LeaderElection;
use crate::p2p::P2pTransport;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct NodeState {
    pub node_id: String,
    pub app: Arc<Application>,
    pub transport: Arc<P2pTransport>,
    pub election: Arc<LeaderElection>,
}

pub fn create_router(state: NodeState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .route("/admin/peers", axum::routing::put(update_peers))
        .route("/ops", axum::routing::post(submit_op))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<NodeState>) -> impl IntoResponse {
    let is_leader = state.app.is_leader().await;
    let role = if is_leader { "Leader" } else { "Follower" };
    Json(json!({
        "status": "healthy",
        "node_id": state.node_id,
        "role": role,
        "is_leader": is_leader,
        "version": crate::VERSION,
    }))
}

async fn admin_status(State(state): State<NodeState>) -> impl IntoResponse {
    let snapshot = state.app.snapshot().await;
    let peers = state.transport.hosts().await;
    let leader = match state.election.current_leader().await {
        Ok(leader) => leader,
        Err(e) => {
            tracing::debug!("leader lookup failed: {}", e);
            None
        }
    };

    let role = if snapshot.is_leader {
        "Leader"
    } else {
        "Follower"
    };

    Json(json!({
        "node_id": state.node_id,
        "role": role,
        "is_leader": snapshot.is_leader,
        "leader": leader,
        "peers": peers,
        "in_flight": snapshot.in_flight.len(),
        "acked": snapshot.acked.len(),
        "confirmed": snapshot.confirmed.len(),
        "batch_counter": snapshot.batch_counter,
        "publish_pending": snapshot.publish_pending,
        "waiting_batches": snapshot.waiting_batches,
        "missing": snapshot.missing,
        "acks_received": snapshot.acks_received,
    }))
}

#[derive(Debug, Deserialize)]
struct SubmitOpRequest {
    #[serde(default = "default_op_type")]
    op_type: OpType,
    value: String,
}

fn default_op_type() -> OpType {
    OpType::PrintTimestamp
}

async fn submit_op(
    State(state): State<NodeState>,
    Json(req): Json<SubmitOpRequest>,
) -> impl IntoResponse {
    match state.app.add_op(Operation::new(req.op_type, req.value)).await {
        Ok(Some(id)) => (StatusCode::ACCEPTED, Json(json!({ "id": id }))),
        Ok(None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "not leader" })),
        ),
        Err(e) => (e.to_http_status(), Json(json!({ "error": e.to_string() }))),
    }
}

#[derive(Debug, Deserialize)]
struct UpdatePeersRequest {
    hosts: Vec<String>,
}

async fn update_peers(
    State(state): State<NodeState>,
    Json(req): Json<UpdatePeersRequest>,
) -> impl IntoResponse {
    let diff = state.transport.update_hosts(&req.hosts).await;
    Json(json!({
        "added": diff.added,
        "removed": diff.removed,
        "peers": state.transport.hosts().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AppConfig, P2pConfig};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state() -> NodeState {
        let store = Arc::new(MemoryStore::new());
        let (transport, _channels) = P2pTransport::new(&P2pConfig {
            advertise_addr: Some("maroon-0:8080".into()),
            ..Default::default()
        });
        let app = Arc::new(Application::new(
            store.clone(),
            transport.clone(),
            AppConfig::default(),
        ));
        let election = Arc::new(LeaderElection::new(
            store,
            "/maroon/leader",
            "maroon-0",
            10,
        ));
        NodeState {
            node_id: "maroon-0".into(),
            app,
            transport,
            election,
        }
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn submit(value: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ops")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "value": value }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let router = create_router(state());
        let resp = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["role"], "Follower");
        assert_eq!(json["is_leader"], false);
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_submit_requires_leader() {
        let state = state();
        let router = create_router(state.clone());

        let resp = router.clone().oneshot(submit("1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.app.handle_leadership(true).await;
        let resp = router.oneshot(submit("1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        let expected = Operation::new(OpType::PrintTimestamp, "1").hash().unwrap();
        assert_eq!(json["id"], expected);
        assert_eq!(state.app.snapshot().await.in_flight, vec![expected]);
    }

    #[tokio::test]
    async fn test_update_peers_and_status() {
        let router = create_router(state());

        let resp = router
            .clone()
            .oneshot(
                Request::put("/admin/peers")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({ "hosts": ["maroon-1:8080", "maroon-2:8080"] }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["added"].as_array().unwrap().len(), 2);

        let resp = router
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["peers"], json!(["maroon-1:8080", "maroon-2:8080"]));
        assert_eq!(json["batch_counter"], 0);
        assert_eq!(json["leader"], Value::Null);
    }
}
