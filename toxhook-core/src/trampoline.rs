//! Trampoline: turn one raw engine callback into a typed [`Event`] and queue it for dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{
    Connection, Event, FileControl, FileId, FileKind, FriendId, MessageType, PublicKey,
    UserStatus, PUBLIC_KEY_SIZE,
};

/// One callback invocation exactly as the engine delivers it: numeric codes and borrowed
/// buffers that are only valid for the duration of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawInvocation<'a> {
    SelfConnectionStatus {
        connection: u32,
    },
    FriendName {
        friend: u32,
        name: &'a [u8],
    },
    FriendStatusMessage {
        friend: u32,
        message: &'a [u8],
    },
    FriendStatus {
        friend: u32,
        status: u32,
    },
    FriendConnectionStatus {
        friend: u32,
        connection: u32,
    },
    FriendTyping {
        friend: u32,
        typing: bool,
    },
    FriendReadReceipt {
        friend: u32,
        message_id: u32,
    },
    FriendRequest {
        public_key: &'a [u8],
        message: &'a [u8],
    },
    FriendMessage {
        friend: u32,
        kind: u32,
        message: &'a [u8],
    },
    FileRecvControl {
        friend: u32,
        file: u32,
        control: u32,
    },
    FileChunkRequest {
        friend: u32,
        file: u32,
        position: u64,
        length: u64,
    },
    FileRecv {
        friend: u32,
        file: u32,
        kind: u32,
        file_size: u64,
        filename: &'a [u8],
    },
    FileRecvChunk {
        friend: u32,
        file: u32,
        position: u64,
        data: &'a [u8],
    },
    FriendLossyPacket {
        friend: u32,
        data: &'a [u8],
    },
    FriendLosslessPacket {
        friend: u32,
        data: &'a [u8],
    },
}

/// Copy an engine buffer. Allocation failure surfaces as `OutOfMemory` instead of aborting.
fn copy_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.try_reserve_exact(bytes.len())
        .map_err(|_| Error::OutOfMemory(bytes.len()))?;
    out.extend_from_slice(bytes);
    Ok(out)
}

fn public_key(bytes: &[u8]) -> Result<PublicKey> {
    let key: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
        Error::InvalidArgument(format!(
            "public key must be {} bytes, got {}",
            PUBLIC_KEY_SIZE,
            bytes.len()
        ))
    })?;
    Ok(PublicKey(key))
}

/// Decode a raw invocation. Never touches the engine; byte payloads are copied.
pub fn decode(raw: RawInvocation<'_>) -> Result<Event> {
    use RawInvocation as R;
    Ok(match raw {
        R::SelfConnectionStatus { connection } => Event::SelfConnectionStatus {
            status: Connection::from_raw(connection)?,
        },
        R::FriendName { friend, name } => Event::FriendName {
            friend: FriendId(friend),
            name: copy_bytes(name)?,
        },
        R::FriendStatusMessage { friend, message } => Event::FriendStatusMessage {
            friend: FriendId(friend),
            message: copy_bytes(message)?,
        },
        R::FriendStatus { friend, status } => Event::FriendStatus {
            friend: FriendId(friend),
            status: UserStatus::from_raw(status)?,
        },
        R::FriendConnectionStatus { friend, connection } => Event::FriendConnectionStatus {
            friend: FriendId(friend),
            status: Connection::from_raw(connection)?,
        },
        R::FriendTyping { friend, typing } => Event::FriendTyping {
            friend: FriendId(friend),
            typing,
        },
        R::FriendReadReceipt { friend, message_id } => Event::FriendReadReceipt {
            friend: FriendId(friend),
            message_id,
        },
        R::FriendRequest {
            public_key: key,
            message,
        } => Event::FriendRequest {
            public_key: public_key(key)?,
            message: copy_bytes(message)?,
        },
        R::FriendMessage {
            friend,
            kind,
            message,
        } => Event::FriendMessage {
            friend: FriendId(friend),
            kind: MessageType::from_raw(kind)?,
            message: copy_bytes(message)?,
        },
        R::FileRecvControl {
            friend,
            file,
            control,
        } => Event::FileRecvControl {
            friend: FriendId(friend),
            file: FileId(file),
            control: FileControl::from_raw(control)?,
        },
        R::FileChunkRequest {
            friend,
            file,
            position,
            length,
        } => Event::FileChunkRequest {
            friend: FriendId(friend),
            file: FileId(file),
            position,
            length,
        },
        R::FileRecv {
            friend,
            file,
            kind,
            file_size,
            filename,
        } => Event::FileRecv {
            friend: FriendId(friend),
            file: FileId(file),
            kind: FileKind::from_raw(kind)?,
            file_size,
            filename: copy_bytes(filename)?,
        },
        R::FileRecvChunk {
            friend,
            file,
            position,
            data,
        } => Event::FileRecvChunk {
            friend: FriendId(friend),
            file: FileId(file),
            position,
            data: copy_bytes(data)?,
        },
        R::FriendLossyPacket { friend, data } => Event::FriendLossyPacket {
            friend: FriendId(friend),
            data: copy_bytes(data)?,
        },
        R::FriendLosslessPacket { friend, data } => Event::FriendLosslessPacket {
            friend: FriendId(friend),
            data: copy_bytes(data)?,
        },
    })
}

/// Failures from callers that cannot return an error, held for the router's next drain.
/// At most one queue's worth is kept; the rest are only counted.
#[derive(Debug, Default)]
pub(crate) struct Parked {
    errors: Vec<Error>,
    discarded: usize,
}

impl Parked {
    /// Empty the store, returning the kept errors and how many were discarded.
    pub(crate) fn take(&mut self) -> (Vec<Error>, usize) {
        (
            std::mem::take(&mut self.errors),
            std::mem::take(&mut self.discarded),
        )
    }
}

/// Producer side of the router's event queue. Cheap to clone and `Send`, so an engine that
/// calls back from several threads can share it; the router stays the single consumer.
#[derive(Clone)]
pub struct Trampoline {
    tx: SyncSender<Event>,
    capacity: usize,
    parked: Arc<Mutex<Parked>>,
    running: Arc<AtomicBool>,
}

impl Trampoline {
    pub(crate) fn new(
        tx: SyncSender<Event>,
        capacity: usize,
        parked: Arc<Mutex<Parked>>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            capacity,
            parked,
            running,
        }
    }

    /// Decode and enqueue. Fails with `QueueFull` instead of blocking when the router lags,
    /// and with `InvalidState` once the router has stopped.
    pub fn invoke(&self, raw: RawInvocation<'_>) -> Result<()> {
        self.ensure_running()?;
        let event = decode(raw)?;
        self.push(event)
    }

    /// Enqueue an already decoded event.
    pub fn push(&self, event: Event) -> Result<()> {
        self.ensure_running()?;
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(self.capacity)),
            Err(TrySendError::Disconnected(_)) => Err(Error::InvalidState("router dropped")),
        }
    }

    /// Like [`invoke`](Self::invoke) for callers that cannot return an error (C hooks).
    /// The failure is logged and handed to the router on its next drain. Callbacks after the
    /// router stopped are dropped quietly.
    pub fn invoke_or_park(&self, raw: RawInvocation<'_>) {
        if !self.is_running() {
            tracing::trace!("router stopped, dropping engine callback");
            return;
        }
        if let Err(e) = self.invoke(raw) {
            let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
            if parked.errors.len() < self.capacity {
                tracing::error!("dropping engine callback: {e}");
                parked.errors.push(e);
            } else {
                parked.discarded += 1;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::InvalidState("router stopped"))
        }
    }
}
