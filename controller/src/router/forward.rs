//! Router duplex forwarder (§4.7): pairs two peers that present the same stream id and splices
//! their frames until either side closes or errors; cancellation tears both copy loops down
//! together.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::{Status, Streaming};

use controller_proto::StreamFrame;

pub type FrameSender = mpsc::Sender<Result<StreamFrame, Status>>;

struct WaitingPeer {
    inbound: Streaming<StreamFrame>,
    outbound: FrameSender,
    cancel: CancellationToken,
}

/// Returned to whichever peer is first to arrive for a stream id: there's nothing to do yet
/// except wait to be either cancelled or consumed when the second peer shows up and the
/// forwarder is spawned.
pub struct StreamHandle {
    cancel: CancellationToken,
}

impl StreamHandle {
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Pending-peer table keyed by stream id (§4.7: "when the second peer arrives, call Forward").
#[derive(Default)]
pub struct PeerRegistry {
    waiting: DashMap<String, WaitingPeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join `stream_id`. If a peer is already waiting under this id, pairs the two and spawns
    /// the forwarder immediately, returning `None` since that peer's handler should now just
    /// drive its own stream. Otherwise stores `self` as the waiting peer and returns a handle
    /// the caller can await so its gRPC handler doesn't return before forwarding starts.
    pub fn join(&self, stream_id: &str, inbound: Streaming<StreamFrame>, outbound: FrameSender) -> Option<StreamHandle> {
        match self.waiting.entry(stream_id.to_string()) {
            Entry::Occupied(entry) => {
                let other = entry.remove();
                tokio::spawn(forward(inbound, outbound, other.inbound, other.outbound, other.cancel.clone()));
                None
            }
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(WaitingPeer { inbound, outbound, cancel: cancel.clone() });
                Some(StreamHandle { cancel })
            }
        }
    }
}

/// Splices `a`'s inbound frames to `b`'s outbound sender and vice versa; returns (closing both
/// directions) on the first EOF or error from either side, or on cancellation.
async fn forward(
    a_in: Streaming<StreamFrame>,
    a_out: FrameSender,
    b_in: Streaming<StreamFrame>,
    b_out: FrameSender,
    cancel: CancellationToken,
) {
    let cancel_a = cancel.clone();
    let cancel_b = cancel.clone();
    tokio::select! {
        _ = copy_loop(a_in, b_out, cancel_a) => {}
        _ = copy_loop(b_in, a_out, cancel_b) => {}
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}

async fn copy_loop(mut inbound: Streaming<StreamFrame>, outbound: FrameSender, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            frame = inbound.message() => {
                match frame {
                    Ok(Some(frame)) => {
                        if outbound.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                    _ => return,
                }
            }
        }
    }
}
