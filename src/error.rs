//! Error taxonomy for the wire protocol and control plane (§7).

use thiserror::Error;

/// Errors raised while decoding or dispatching a single framed message.
///
/// These never propagate out of a connection's read loop — the loop logs
/// and drops the connection (or ignores the frame) and keeps the listener
/// running, matching the "no errors are retried automatically" rule.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    #[error("malformed message: {0}")]
    BadFormat(#[from] serde_json::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
