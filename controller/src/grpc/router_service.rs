//! `RouterService` (§4.7): the rendezvous point for the two peers Dial handed matching
//! stream-JWTs. Authentication here is the stream token, not the OIDC/internal JWT the other two
//! services use — the router has no notion of clients or exporters, only stream ids.

use std::pin::Pin;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use controller_proto::router_service_server::RouterService;
use controller_proto::StreamFrame;

use super::AppState;

fn stream_id_from_token(state: &AppState, request: &Request<Streaming<StreamFrame>>) -> Result<String, Status> {
    let header = request
        .metadata()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Status::unauthenticated("missing authorization header"))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| Status::unauthenticated("expected a Bearer token"))?;
    state.stream_tokens.verify(token).map_err(|e| Status::unauthenticated(e.to_string()))
}

pub struct RouterServiceImpl {
    state: AppState,
}

impl RouterServiceImpl {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[tonic::async_trait]
impl RouterService for RouterServiceImpl {
    type StreamStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, Status>> + Send + 'static>>;

    async fn stream(&self, request: Request<Streaming<StreamFrame>>) -> Result<Response<Self::StreamStream>, Status> {
        let stream_id = stream_id_from_token(&self.state, &request)?;
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(64);

        // Whichever peer arrives first just parks in the registry; `join` spawns the splice
        // once the second one shows up. Either way the response stream is handed back right
        // away so frames flow as soon as the forwarder starts writing into `tx`.
        let _handle = self.state.peer_registry.join(&stream_id, inbound, tx);

        let outbound: Self::StreamStream = Box::pin(ReceiverStream::new(rx));
        Ok(Response::new(outbound))
    }
}
