//! Event dispatch and file-transfer session layer for Tox engine callbacks.
//! Host-driven: the host feeds raw callbacks in, drains the router, and implements the
//! engine gateway. No I/O happens here.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod ffi;
pub mod gateway;
pub mod router;
pub mod session;
pub mod table;
pub mod trace;
pub mod trampoline;

pub use command::{Command, CommandSender};
pub use config::Config;
pub use error::{Error, ErrorKind, GatewayError, Result};
pub use event::{
    Connection, Event, EventKind, FileControl, FileId, FileKind, FriendId, MessageType,
    PublicKey, UserStatus, MAX_MESSAGE_LENGTH, PUBLIC_KEY_SIZE, STREAM_FILE_SIZE,
};
pub use gateway::EngineGateway;
pub use router::{DiagnosticsSink, Drained, EventRouter, Subscription, Subscriptions, TracingSink};
pub use session::{ChunkRange, Direction, FileTransferSession, SessionStatus};
pub use table::TransferTable;
pub use trace::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, TraceReader, TraceWriter};
pub use trampoline::{RawInvocation, Trampoline};
