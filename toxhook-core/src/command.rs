//! Engine commands issued off the dispatch thread. They are queued here and applied by the
//! router on its next drain, so session state is only ever touched on the dispatch context.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};

use crate::error::{Error, Result};
use crate::event::{FileControl, FileId, FileKind, FriendId, MessageType, PublicKey};

#[derive(Debug)]
pub enum Command {
    Control {
        friend: FriendId,
        file: FileId,
        control: FileControl,
    },
    Offer {
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: Vec<u8>,
        reply: Option<Sender<Result<FileId>>>,
    },
    /// Bytes for the oldest range the engine requested on a sending transfer.
    Supply {
        friend: FriendId,
        file: FileId,
        position: u64,
        data: Vec<u8>,
    },
    AddFriend {
        public_key: PublicKey,
    },
    SendMessage {
        friend: FriendId,
        kind: MessageType,
        message: Vec<u8>,
    },
}

/// Cloneable, `Send` handle for queueing [`Command`]s.
#[derive(Clone)]
pub struct CommandSender {
    tx: SyncSender<Command>,
    capacity: usize,
}

impl CommandSender {
    pub(crate) fn new(tx: SyncSender<Command>, capacity: usize) -> Self {
        Self { tx, capacity }
    }

    pub fn send(&self, command: Command) -> Result<()> {
        match self.tx.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(self.capacity)),
            Err(TrySendError::Disconnected(_)) => Err(Error::InvalidState("router dropped")),
        }
    }

    /// Accept an offered incoming file (a Resume control).
    pub fn accept(&self, friend: FriendId, file: FileId) -> Result<()> {
        self.control(friend, file, FileControl::Resume)
    }

    pub fn pause(&self, friend: FriendId, file: FileId) -> Result<()> {
        self.control(friend, file, FileControl::Pause)
    }

    pub fn resume(&self, friend: FriendId, file: FileId) -> Result<()> {
        self.control(friend, file, FileControl::Resume)
    }

    pub fn cancel(&self, friend: FriendId, file: FileId) -> Result<()> {
        self.control(friend, file, FileControl::Cancel)
    }

    pub fn control(&self, friend: FriendId, file: FileId, control: FileControl) -> Result<()> {
        self.send(Command::Control {
            friend,
            file,
            control,
        })
    }

    /// Offer a file. The engine's file number arrives on the returned receiver once the
    /// router has applied the command.
    pub fn offer(
        &self,
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: Vec<u8>,
    ) -> Result<Receiver<Result<FileId>>> {
        let (reply, rx) = mpsc::channel();
        self.send(Command::Offer {
            friend,
            kind,
            size,
            filename,
            reply: Some(reply),
        })?;
        Ok(rx)
    }

    /// Accept a friend request.
    pub fn add_friend_norequest(&self, public_key: PublicKey) -> Result<()> {
        self.send(Command::AddFriend { public_key })
    }

    pub fn send_message(&self, friend: FriendId, kind: MessageType, message: Vec<u8>) -> Result<()> {
        self.send(Command::SendMessage {
            friend,
            kind,
            message,
        })
    }

    pub fn enqueue_outgoing_bytes(
        &self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        self.send(Command::Supply {
            friend,
            file,
            position,
            data,
        })
    }
}
