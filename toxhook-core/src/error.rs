//! Error taxonomy shared by the router, sessions and the transfer table.

use crate::event::{EventKind, FileControl, FileId, FriendId};
use crate::session::SessionStatus;

/// Coarse classification of [`Error`], for callers that only care about the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    OutOfOrderChunk,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    HandlerFailure,
    OutOfMemory,
    QueueFull,
    Engine,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("{control:?} is not legal from {from:?}")]
    InvalidTransition {
        from: SessionStatus,
        control: FileControl,
    },
    #[error("chunk at offset {got} but session expects {expected}")]
    OutOfOrderChunk { expected: u64, got: u64 },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no transfer for friend {friend} file {file}")]
    NotFound { friend: FriendId, file: FileId },
    #[error("transfer for friend {friend} file {file} already exists")]
    AlreadyExists { friend: FriendId, file: FileId },
    #[error("handler {subscription} for {kind:?} failed: {source:#}")]
    HandlerFailure {
        kind: EventKind,
        subscription: u64,
        source: anyhow::Error,
    },
    #[error("out of memory copying {0} byte payload")]
    OutOfMemory(usize),
    #[error("queue full (capacity {0})")]
    QueueFull(usize),
    #[error("engine rejected call: {0}")]
    Engine(#[from] GatewayError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidState(_) | Error::InvalidTransition { .. } => ErrorKind::InvalidState,
            Error::OutOfOrderChunk { .. } => ErrorKind::OutOfOrderChunk,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::HandlerFailure { .. } => ErrorKind::HandlerFailure,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::QueueFull(_) => ErrorKind::QueueFull,
            Error::Engine(_) => ErrorKind::Engine,
        }
    }

    /// Errors caused by the transport delivering something the session cannot accept.
    pub(crate) fn is_transport_violation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OutOfOrderChunk | ErrorKind::InvalidArgument
        )
    }
}

/// Error returned by an [`EngineGateway`](crate::gateway::EngineGateway) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("friend {0} not found")]
    FriendNotFound(FriendId),
    #[error("friend {0} is not connected")]
    FriendNotConnected(FriendId),
    #[error("file {file} of friend {friend} not found")]
    FileNotFound { friend: FriendId, file: FileId },
    #[error("engine send queue full")]
    SendQueueFull,
    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
