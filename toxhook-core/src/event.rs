//! Typed engine events and the enumerations they carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Size of a Tox long-term public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Longest message the engine accepts in one `send_message` call.
pub const MAX_MESSAGE_LENGTH: usize = 1372;

/// File size the engine reports for transfers of unknown length (streams).
pub const STREAM_FILE_SIZE: u64 = u64::MAX;

/// Friend number, stable while the friend relationship exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FriendId(pub u32);

/// Per-friend file number assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub u32);

impl fmt::Display for FriendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Long-term public key of a peer sending a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}

/// Declares a C-like enum together with its native numeric codes.
macro_rules! native_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn from_raw(code: u32) -> Result<Self, Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    other => Err(Error::InvalidArgument(format!(
                        "unknown {} code {}",
                        stringify!($name),
                        other
                    ))),
                }
            }

            pub fn as_raw(self) -> u32 {
                match self {
                    $($name::$variant => $code),+
                }
            }
        }
    };
}

native_enum!(
    /// Network connection state of this node or of a friend.
    Connection { None = 0, Tcp = 1, Udp = 2 }
);

native_enum!(
    /// User-selected presence.
    UserStatus { None = 0, Away = 1, Busy = 2 }
);

native_enum!(
    MessageType { Normal = 0, Action = 1 }
);

native_enum!(
    /// File transfer control issued by either side.
    FileControl { Resume = 0, Pause = 1, Cancel = 2 }
);

native_enum!(
    FileKind { Data = 0, Avatar = 1 }
);

impl Connection {
    pub fn is_online(self) -> bool {
        self != Connection::None
    }
}

/// Discriminant of [`Event`], used as the dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    SelfConnectionStatus,
    FriendName,
    FriendStatusMessage,
    FriendStatus,
    FriendConnectionStatus,
    FriendTyping,
    FriendReadReceipt,
    FriendRequest,
    FriendMessage,
    FileRecvControl,
    FileChunkRequest,
    FileRecv,
    FileRecvChunk,
    FriendLossyPacket,
    FriendLosslessPacket,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::SelfConnectionStatus,
        EventKind::FriendName,
        EventKind::FriendStatusMessage,
        EventKind::FriendStatus,
        EventKind::FriendConnectionStatus,
        EventKind::FriendTyping,
        EventKind::FriendReadReceipt,
        EventKind::FriendRequest,
        EventKind::FriendMessage,
        EventKind::FileRecvControl,
        EventKind::FileChunkRequest,
        EventKind::FileRecv,
        EventKind::FileRecvChunk,
        EventKind::FriendLossyPacket,
        EventKind::FriendLosslessPacket,
    ];

    pub fn is_file_transfer(self) -> bool {
        matches!(
            self,
            EventKind::FileRecvControl
                | EventKind::FileChunkRequest
                | EventKind::FileRecv
                | EventKind::FileRecvChunk
        )
    }
}

/// One decoded engine callback. Byte payloads are owned copies of the engine's buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SelfConnectionStatus {
        status: Connection,
    },
    FriendName {
        friend: FriendId,
        name: Vec<u8>,
    },
    FriendStatusMessage {
        friend: FriendId,
        message: Vec<u8>,
    },
    FriendStatus {
        friend: FriendId,
        status: UserStatus,
    },
    FriendConnectionStatus {
        friend: FriendId,
        status: Connection,
    },
    FriendTyping {
        friend: FriendId,
        typing: bool,
    },
    FriendReadReceipt {
        friend: FriendId,
        message_id: u32,
    },
    FriendRequest {
        public_key: PublicKey,
        message: Vec<u8>,
    },
    FriendMessage {
        friend: FriendId,
        kind: MessageType,
        message: Vec<u8>,
    },
    FileRecvControl {
        friend: FriendId,
        file: FileId,
        control: FileControl,
    },
    /// The engine is ready for `length` bytes starting at `position`. Length 0 means the
    /// engine considers the transfer finished.
    FileChunkRequest {
        friend: FriendId,
        file: FileId,
        position: u64,
        length: u64,
    },
    FileRecv {
        friend: FriendId,
        file: FileId,
        kind: FileKind,
        file_size: u64,
        filename: Vec<u8>,
    },
    FileRecvChunk {
        friend: FriendId,
        file: FileId,
        position: u64,
        data: Vec<u8>,
    },
    FriendLossyPacket {
        friend: FriendId,
        data: Vec<u8>,
    },
    FriendLosslessPacket {
        friend: FriendId,
        data: Vec<u8>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SelfConnectionStatus { .. } => EventKind::SelfConnectionStatus,
            Event::FriendName { .. } => EventKind::FriendName,
            Event::FriendStatusMessage { .. } => EventKind::FriendStatusMessage,
            Event::FriendStatus { .. } => EventKind::FriendStatus,
            Event::FriendConnectionStatus { .. } => EventKind::FriendConnectionStatus,
            Event::FriendTyping { .. } => EventKind::FriendTyping,
            Event::FriendReadReceipt { .. } => EventKind::FriendReadReceipt,
            Event::FriendRequest { .. } => EventKind::FriendRequest,
            Event::FriendMessage { .. } => EventKind::FriendMessage,
            Event::FileRecvControl { .. } => EventKind::FileRecvControl,
            Event::FileChunkRequest { .. } => EventKind::FileChunkRequest,
            Event::FileRecv { .. } => EventKind::FileRecv,
            Event::FileRecvChunk { .. } => EventKind::FileRecvChunk,
            Event::FriendLossyPacket { .. } => EventKind::FriendLossyPacket,
            Event::FriendLosslessPacket { .. } => EventKind::FriendLosslessPacket,
        }
    }

    /// Friend the event concerns; `None` for events not tied to a friend number.
    pub fn friend(&self) -> Option<FriendId> {
        match self {
            Event::SelfConnectionStatus { .. } | Event::FriendRequest { .. } => None,
            Event::FriendName { friend, .. }
            | Event::FriendStatusMessage { friend, .. }
            | Event::FriendStatus { friend, .. }
            | Event::FriendConnectionStatus { friend, .. }
            | Event::FriendTyping { friend, .. }
            | Event::FriendReadReceipt { friend, .. }
            | Event::FriendMessage { friend, .. }
            | Event::FileRecvControl { friend, .. }
            | Event::FileChunkRequest { friend, .. }
            | Event::FileRecv { friend, .. }
            | Event::FileRecvChunk { friend, .. }
            | Event::FriendLossyPacket { friend, .. }
            | Event::FriendLosslessPacket { friend, .. } => Some(*friend),
        }
    }

    /// Transfer key for file-transfer events.
    pub fn transfer(&self) -> Option<(FriendId, FileId)> {
        match self {
            Event::FileRecvControl { friend, file, .. }
            | Event::FileChunkRequest { friend, file, .. }
            | Event::FileRecv { friend, file, .. }
            | Event::FileRecvChunk { friend, file, .. } => Some((*friend, *file)),
            _ => None,
        }
    }
}
