//! Error taxonomy for the crate, following the teacher's `RustADBError`
//! shape (a flat `thiserror` enum) but expanded with the transport/auth/
//! stream/SYNC/supervisor variants this crate's larger surface needs.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustADBError>;

/// The five buyer-facing categories a UI layer should map every error into.
/// See spec §7: "The user sees a single human-readable message per visible
/// error, classified into one of five user categories."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserErrorCategory {
    Connection,
    Authorization,
    Command,
    Deploy,
    Network,
}

#[derive(Error, Debug)]
pub enum RustADBError {
    // --- Transport: transient, retryable ---
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("connection lost")]
    ConnectionLost,
    #[error("socket closed")]
    SocketClosed,
    #[error("read timed out")]
    ReadTimeout,

    // --- Protocol: fatal for the current connection ---
    #[error("bad magic value in message header")]
    BadMagic,
    #[error("checksum mismatch")]
    Checksum,
    #[error("oversized payload ({0} bytes)")]
    OversizedPayload(usize),
    #[error("unexpected command received")]
    UnexpectedCommand,
    #[error("wrong response received {0}, expected {1}")]
    WrongResponseReceived(String, String),

    // --- Auth ---
    #[error("authentication failed after exhausting all AUTH rounds")]
    AuthFailed,
    #[error("key material is corrupted and cannot be parsed: {0}")]
    KeyCorrupted(String),

    // --- Stream ---
    #[error("failed to open stream")]
    OpenFailed,
    #[error("stream closed")]
    StreamClosed,
    #[error("timed out waiting for OKAY (write not ready)")]
    WriteNotReady,

    // --- SYNC ---
    #[error("peer reported SYNC failure: {0}")]
    SyncFail(String),
    #[error("transfer incomplete: sent {sent} of {total} bytes")]
    TransferIncomplete { sent: u64, total: u64 },
    #[error("no DONE acknowledgement received from peer")]
    NoDoneAck,

    // --- Supervisor ---
    #[error("circuit breaker open, rejecting command")]
    CircuitOpen,
    #[error("reconnect attempt timed out")]
    ReconnectTimeout,

    // --- Generic / ambient ---
    #[error("request failed: {0}")]
    ADBRequestFailed(String),
    #[error("conversion error")]
    ConversionError,
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    #[error(transparent)]
    Utf8Error(#[from] std::string::FromUtf8Error),
    #[error("rsa error: {0}")]
    RsaError(String),
}

impl RustADBError {
    /// Classifies this error into one of the five user-facing categories a
    /// UI layer should surface (spec §7).
    pub fn user_category(&self) -> UserErrorCategory {
        use RustADBError::*;
        match self {
            ConnectTimeout | ConnectionLost | SocketClosed | ReadTimeout => {
                UserErrorCategory::Network
            }
            BadMagic | Checksum | OversizedPayload(_) | UnexpectedCommand
            | WrongResponseReceived(..) => UserErrorCategory::Connection,
            AuthFailed | KeyCorrupted(_) => UserErrorCategory::Authorization,
            OpenFailed | StreamClosed | WriteNotReady => UserErrorCategory::Command,
            SyncFail(_) | TransferIncomplete { .. } | NoDoneAck => UserErrorCategory::Deploy,
            CircuitOpen | ReconnectTimeout => UserErrorCategory::Network,
            ADBRequestFailed(_) | ConversionError | IOError(_) | Utf8Error(_) | RsaError(_) => {
                UserErrorCategory::Command
            }
        }
    }

    /// True for errors the Supervisor should treat as "transport lost,
    /// reconnect" rather than a per-command failure to surface directly.
    pub fn is_transport_lost(&self) -> bool {
        matches!(
            self,
            RustADBError::ConnectionLost | RustADBError::SocketClosed | RustADBError::StreamClosed
        )
    }
}
