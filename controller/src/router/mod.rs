//! Router (§4.7): stream-JWT issuance kept separate from the controller's own signing key, and
//! the duplex forwarder that splices two peers presenting the same stream id.

mod forward;
mod token;

pub use forward::{FrameSender, PeerRegistry, StreamHandle};
pub use token::{StreamTokenError, StreamTokenIssuer};
