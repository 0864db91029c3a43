//! Per-transfer state machine: status transitions and the acknowledged chunk offset.
//!
//! Offsets only move forward. A receiving session accepts chunks strictly in order, and a
//! sending session hands out contiguous ranges as the engine requests them. Every failing
//! call leaves the session untouched.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{FileControl, FileId, FriendId, STREAM_FILE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Sending,
    Receiving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Offered,
    Accepted,
    InProgress,
    Paused,
    Cancelled,
    Completed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Cancelled | SessionStatus::Completed)
    }
}

/// Contiguous byte range `[offset, offset + length)` of a transfer. The end never overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChunkRange {
    offset: u64,
    length: u64,
}

impl ChunkRange {
    /// `None` if `offset + length` does not fit in a u64.
    pub fn new(offset: u64, length: u64) -> Option<Self> {
        offset.checked_add(length)?;
        Some(Self { offset, length })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Map the engine's file size to an optional total; `u64::MAX` marks a stream.
pub fn total_from_file_size(file_size: u64) -> Option<u64> {
    if file_size == STREAM_FILE_SIZE {
        None
    } else {
        Some(file_size)
    }
}

#[derive(Debug, Clone)]
pub struct FileTransferSession {
    friend: FriendId,
    file: FileId,
    direction: Direction,
    total_size: Option<u64>,
    acknowledged: u64,
    status: SessionStatus,
    /// Ranges the engine requested that the application has not supplied yet (sending only).
    outstanding: VecDeque<ChunkRange>,
}

impl FileTransferSession {
    pub fn new(
        friend: FriendId,
        file: FileId,
        direction: Direction,
        total_size: Option<u64>,
    ) -> Self {
        Self {
            friend,
            file,
            direction,
            total_size,
            acknowledged: 0,
            status: SessionStatus::Offered,
            outstanding: VecDeque::new(),
        }
    }

    pub fn friend(&self) -> FriendId {
        self.friend
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// `None` for streams of unknown length.
    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn acknowledged_offset(&self) -> u64 {
        self.acknowledged
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Bytes left before the total size; `None` for streams.
    pub fn remaining(&self) -> Option<u64> {
        self.total_size.map(|t| t - self.acknowledged)
    }

    /// Oldest requested range still waiting for application bytes.
    pub fn next_outstanding(&self) -> Option<ChunkRange> {
        self.outstanding.front().copied()
    }

    /// Apply a Resume, Pause or Cancel issued by either side. Returns the new status.
    pub fn on_control(&mut self, control: FileControl) -> Result<SessionStatus> {
        use SessionStatus::*;
        let next = match (self.status, control) {
            (from, _) if from.is_terminal() => {
                return Err(Error::InvalidTransition { from, control })
            }
            (_, FileControl::Cancel) => Cancelled,
            (Offered, FileControl::Resume) => Accepted,
            (Paused, FileControl::Resume) => InProgress,
            (InProgress, FileControl::Pause) => Paused,
            (from, control) => return Err(Error::InvalidTransition { from, control }),
        };
        if next == Cancelled {
            self.outstanding.clear();
        }
        self.status = next;
        Ok(next)
    }

    /// Engine asks for the next `length` bytes at `offset` (sending only). Returns the range the
    /// application must supply. A zero length at the end of the file completes the transfer.
    pub fn on_chunk_request(&mut self, offset: u64, length: u64) -> Result<ChunkRange> {
        self.expect_direction(Direction::Sending)?;
        self.expect_live()?;
        if self.status == SessionStatus::Paused {
            return Err(Error::InvalidState("chunk requested while transfer is paused"));
        }
        if offset != self.acknowledged {
            return Err(Error::OutOfOrderChunk {
                expected: self.acknowledged,
                got: offset,
            });
        }
        let range = self.checked_range(offset, length)?;
        if range.is_empty() {
            self.finish_at(offset)?;
            self.outstanding.clear();
            return Ok(range);
        }
        self.acknowledged = range.end();
        self.outstanding.push_back(range);
        self.mark_started();
        Ok(range)
    }

    /// Chunk delivered by the engine (receiving only). Returns the new status; a zero-length
    /// chunk at the end of the file completes the transfer.
    pub fn on_chunk_received(&mut self, offset: u64, data: &[u8]) -> Result<SessionStatus> {
        self.expect_direction(Direction::Receiving)?;
        self.expect_live()?;
        if offset != self.acknowledged {
            return Err(Error::OutOfOrderChunk {
                expected: self.acknowledged,
                got: offset,
            });
        }
        let range = self.checked_range(offset, data.len() as u64)?;
        if range.is_empty() {
            self.finish_at(offset)?;
            return Ok(self.status);
        }
        self.acknowledged = range.end();
        // In-flight data may still land after a pause; the session stays paused.
        self.mark_started();
        Ok(self.status)
    }

    /// Application supplies bytes for the oldest outstanding request (sending only).
    pub fn supply_chunk(&mut self, offset: u64, length: u64) -> Result<ChunkRange> {
        self.expect_direction(Direction::Sending)?;
        self.expect_live()?;
        let front = self
            .outstanding
            .front()
            .copied()
            .ok_or(Error::InvalidState("no chunk has been requested"))?;
        if front.offset != offset || front.length != length {
            return Err(Error::InvalidArgument(format!(
                "supplied {}+{} but engine requested {}+{}",
                offset, length, front.offset, front.length
            )));
        }
        self.outstanding.pop_front();
        Ok(front)
    }

    fn expect_direction(&self, direction: Direction) -> Result<()> {
        if self.direction != direction {
            return Err(Error::InvalidState(match direction {
                Direction::Sending => "operation applies to sending transfers only",
                Direction::Receiving => "operation applies to receiving transfers only",
            }));
        }
        Ok(())
    }

    fn expect_live(&self) -> Result<()> {
        match self.status {
            SessionStatus::Completed => Err(Error::InvalidState("transfer already completed")),
            SessionStatus::Cancelled => Err(Error::InvalidState("transfer already cancelled")),
            _ => Ok(()),
        }
    }

    fn checked_range(&self, offset: u64, length: u64) -> Result<ChunkRange> {
        let range = ChunkRange::new(offset, length).ok_or_else(|| {
            Error::InvalidArgument(format!("offset {offset} + length {length} overflows"))
        })?;
        let end = range.end();
        if let Some(total) = self.total_size {
            if end > total {
                return Err(Error::InvalidArgument(format!(
                    "range {offset}..{end} exceeds file size {total}"
                )));
            }
        }
        Ok(range)
    }

    fn finish_at(&mut self, offset: u64) -> Result<()> {
        if let Some(total) = self.total_size {
            if offset != total {
                return Err(Error::InvalidArgument(format!(
                    "end of transfer at {offset} before file size {total}"
                )));
            }
        }
        self.status = SessionStatus::Completed;
        Ok(())
    }

    fn mark_started(&mut self) {
        if matches!(self.status, SessionStatus::Offered | SessionStatus::Accepted) {
            self.status = SessionStatus::InProgress;
        }
    }
}
