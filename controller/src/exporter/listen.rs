//! The in-memory Listen map (§4.6, §5): `exporter-uid → {cancel, stream}` with single-writer
//! semantics via `DashMap`'s occupied/vacant entry API, giving atomic load-or-store register
//! semantics without a separate mutex.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use controller_proto::ListenResponse;

#[derive(Debug, thiserror::Error)]
#[error("a Listen stream is already open for exporter {0}")]
pub struct AlreadyListening(pub String);

struct Session {
    token: uuid::Uuid,
    cancel: CancellationToken,
    sender: mpsc::Sender<Result<ListenResponse, tonic::Status>>,
}

/// Process-wide singleton map from exporter uid to its open Listen session. The only
/// process-local mutable state the controller keeps outside the `ObjectStore` (§5).
#[derive(Default)]
pub struct ListenRegistry {
    sessions: DashMap<String, Session>,
}

/// Handle returned to the caller that just won registration; used to push notifications and
/// to deregister cleanly on stream end.
pub struct ListenHandle {
    uid: String,
    token: uuid::Uuid,
}

impl ListenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically register a new Listen session for `uid`. Second concurrent caller loses
    /// with [`AlreadyListening`] (§5 ordering guarantee: "second loses").
    pub fn register(
        &self,
        uid: &str,
        sender: mpsc::Sender<Result<ListenResponse, tonic::Status>>,
    ) -> Result<(ListenHandle, CancellationToken), AlreadyListening> {
        match self.sessions.entry(uid.to_string()) {
            Entry::Occupied(_) => Err(AlreadyListening(uid.to_string())),
            Entry::Vacant(slot) => {
                let token = uuid::Uuid::new_v4();
                let cancel = CancellationToken::new();
                slot.insert(Session {
                    token,
                    cancel: cancel.clone(),
                    sender,
                });
                Ok((ListenHandle { uid: uid.to_string(), token }, cancel))
            }
        }
    }

    /// Remove the session, but only if it's still the one identified by `handle` — a later
    /// connect may already have replaced it (stale close from a superseded stream).
    pub fn unregister(&self, handle: &ListenHandle) {
        if let Entry::Occupied(entry) = self.sessions.entry(handle.uid.clone()) {
            if entry.get().token == handle.token {
                entry.remove();
            }
        }
    }

    pub fn is_listening(&self, uid: &str) -> bool {
        self.sessions.contains_key(uid)
    }

    /// Push a frame to the exporter's open Listen stream, used by Dial (§4.7). Returns
    /// `false` if no session is currently registered (the handler maps this to Unavailable).
    pub async fn push(&self, uid: &str, msg: ListenResponse) -> bool {
        let sender = match self.sessions.get(uid) {
            Some(session) => session.sender.clone(),
            None => return false,
        };
        sender.send(Ok(msg)).await.is_ok()
    }

    pub fn cancel(&self, uid: &str) {
        if let Some(session) = self.sessions.get(uid) {
            session.cancel.cancel();
        }
    }
}
