//! Peer gRPC service (inbound side)
//!
//! Both calls are advisory: the `accepted` flag tells the caller whether
//! the message reached the local dispatcher, nothing more.

use crate::p2p::InboundMessage;
use crate::proto::p2p_service_server::{P2pService, P2pServiceServer};
use crate::proto::*;
use tokio::sync::mpsc;
use tonic::{Request, Response, Status};

pub struct P2pGrpcService {
    inbound: mpsc::Sender<InboundMessage>,
}

impl P2pGrpcService {
    pub fn new(inbound: mpsc::Sender<InboundMessage>) -> Self {
        Self { inbound }
    }

    /// Converts this service into a gRPC server instance.
    pub fn into_server(self) -> P2pServiceServer<Self> {
        P2pServiceServer::new(self)
    }

    async fn forward(&self, message: InboundMessage) -> bool {
        match self.inbound.send(message).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(target: "network", "inbound dispatcher is gone, dropping message");
                false
            }
        }
    }
}

#[tonic::async_trait]
impl P2pService for P2pGrpcService {
    async fn add_tx(&self, req: Request<AddTxRequest>) -> Result<Response<AddTxResponse>, Status> {
        let req = req.into_inner();
        if req.id.is_empty() {
            tracing::debug!(target: "network", from = %req.from_node, "ignoring AddTx without id");
            return Ok(Response::new(AddTxResponse { accepted: false }));
        }
        tracing::debug!(target: "network", from = %req.from_node, id = %req.id, "got AddTx");

        let accepted = self
            .forward(InboundMessage::AddTx {
                from_node: req.from_node,
                id: req.id,
                payload: req.payload,
            })
            .await;
        Ok(Response::new(AddTxResponse { accepted }))
    }

    async fn ack_batch(
        &self,
        req: Request<AckBatchRequest>,
    ) -> Result<Response<AckBatchResponse>, Status> {
        let req = req.into_inner();
        if req.hash.is_empty() {
            tracing::debug!(target: "network", from = %req.from_node, "ignoring AckBatch without hash");
            return Ok(Response::new(AckBatchResponse { accepted: false }));
        }
        tracing::debug!(target: "network", from = %req.from_node, "got AckBatch");

        let accepted = self
            .forward(InboundMessage::AckBatch {
                from_node: req.from_node,
                hash: req.hash,
            })
            .await;
        Ok(Response::new(AckBatchResponse { accepted }))
    }
}
