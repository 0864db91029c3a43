//! Transfer table: the sole owner of every [`FileTransferSession`], keyed by (friend, file).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::event::{FileId, FriendId};
use crate::session::{Direction, FileTransferSession};

struct Entry {
    session: FileTransferSession,
    /// Set once a terminal session has been observed: sweeps left before removal.
    retention: Option<u32>,
}

#[derive(Default)]
pub struct TransferTable {
    sessions: HashMap<(FriendId, FileId), Entry>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session in the Offered state. Fails if the key is taken.
    pub fn create(
        &mut self,
        friend: FriendId,
        file: FileId,
        direction: Direction,
        total_size: Option<u64>,
    ) -> Result<&mut FileTransferSession> {
        use std::collections::hash_map::Entry as MapEntry;
        match self.sessions.entry((friend, file)) {
            MapEntry::Occupied(_) => Err(Error::AlreadyExists { friend, file }),
            MapEntry::Vacant(v) => {
                let entry = v.insert(Entry {
                    session: FileTransferSession::new(friend, file, direction, total_size),
                    retention: None,
                });
                Ok(&mut entry.session)
            }
        }
    }

    pub fn get(&self, friend: FriendId, file: FileId) -> Result<&FileTransferSession> {
        self.sessions
            .get(&(friend, file))
            .map(|e| &e.session)
            .ok_or(Error::NotFound { friend, file })
    }

    pub fn get_mut(&mut self, friend: FriendId, file: FileId) -> Result<&mut FileTransferSession> {
        self.sessions
            .get_mut(&(friend, file))
            .map(|e| &mut e.session)
            .ok_or(Error::NotFound { friend, file })
    }

    /// Idempotent: removing a missing key is not an error.
    pub fn remove(&mut self, friend: FriendId, file: FileId) -> Option<FileTransferSession> {
        self.sessions.remove(&(friend, file)).map(|e| e.session)
    }

    pub fn contains(&self, friend: FriendId, file: FileId) -> bool {
        self.sessions.contains_key(&(friend, file))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// File ids of every session with `friend`, ascending.
    pub fn sessions_of(&self, friend: FriendId) -> Vec<FileId> {
        let mut files: Vec<FileId> = self
            .sessions
            .keys()
            .filter(|(f, _)| *f == friend)
            .map(|(_, file)| *file)
            .collect();
        files.sort();
        files
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTransferSession> {
        self.sessions.values().map(|e| &e.session)
    }

    /// Record that the application has seen a terminal session. It stays in the table for
    /// `retention` more sweeps so events racing the termination can still be matched.
    /// No-op for live or unknown sessions, and for sessions already marked.
    pub fn mark_observed(&mut self, friend: FriendId, file: FileId, retention: u32) {
        if let Some(entry) = self.sessions.get_mut(&(friend, file)) {
            if entry.session.status().is_terminal() && entry.retention.is_none() {
                entry.retention = Some(retention);
            }
        }
    }

    /// Drop observed terminal sessions whose retention ran out. Returns the removed keys.
    pub fn sweep(&mut self) -> Vec<(FriendId, FileId)> {
        let mut removed = Vec::new();
        self.sessions.retain(|key, entry| match entry.retention {
            Some(0) => {
                removed.push(*key);
                false
            }
            Some(ref mut n) => {
                *n -= 1;
                true
            }
            None => true,
        });
        removed.sort();
        removed
    }
}
