//! Gateway for trace replay: there is no live engine, so outbound calls are logged and
//! friend presence is learned from the replayed connection events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use toxhook_core::{
    Connection, EngineGateway, FileControl, FileId, FileKind, FriendId, GatewayError, MessageType,
    PublicKey,
};

/// Last known connection per friend, shared with the presence handler.
#[derive(Clone, Default)]
pub struct Presence(Arc<Mutex<HashMap<FriendId, Connection>>>);

impl Presence {
    pub fn set(&self, friend: FriendId, status: Connection) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(friend, status);
    }

    pub fn get(&self, friend: FriendId) -> Connection {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&friend)
            .copied()
            .unwrap_or(Connection::None)
    }
}

pub struct LoggingGateway {
    presence: Presence,
    next_file: HashMap<FriendId, u32>,
    /// Friends added during the run; the friend number is the index.
    friends: Vec<PublicKey>,
    messages_sent: u32,
}

impl LoggingGateway {
    pub fn new(presence: Presence) -> Self {
        Self {
            presence,
            next_file: HashMap::new(),
            friends: Vec::new(),
            messages_sent: 0,
        }
    }

    pub fn friends(&self) -> &[PublicKey] {
        &self.friends
    }

    pub fn messages_sent(&self) -> u32 {
        self.messages_sent
    }

    fn ensure_online(&self, friend: FriendId) -> Result<(), GatewayError> {
        if self.presence.get(friend).is_online() {
            Ok(())
        } else {
            Err(GatewayError::FriendNotConnected(friend))
        }
    }
}

impl EngineGateway for LoggingGateway {
    fn connection_status(&self, friend: FriendId) -> Result<Connection, GatewayError> {
        Ok(self.presence.get(friend))
    }

    fn send_chunk(
        &mut self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: &[u8],
    ) -> Result<(), GatewayError> {
        self.ensure_online(friend)?;
        tracing::info!(%friend, %file, position, len = data.len(), "send chunk");
        Ok(())
    }

    fn request_control(
        &mut self,
        friend: FriendId,
        file: FileId,
        control: FileControl,
    ) -> Result<(), GatewayError> {
        tracing::info!(%friend, %file, ?control, "file control");
        Ok(())
    }

    fn send_file(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: &[u8],
    ) -> Result<FileId, GatewayError> {
        self.ensure_online(friend)?;
        let next = self.next_file.entry(friend).or_insert(0);
        let file = FileId(*next);
        *next += 1;
        tracing::info!(
            %friend,
            %file,
            ?kind,
            ?size,
            name = %String::from_utf8_lossy(filename),
            "send file"
        );
        Ok(file)
    }

    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, GatewayError> {
        if let Some(n) = self.friends.iter().position(|k| k == public_key) {
            return Ok(FriendId(n as u32));
        }
        let friend = FriendId(self.friends.len() as u32);
        self.friends.push(*public_key);
        tracing::info!(%friend, key = %public_key, "friend added");
        Ok(friend)
    }

    fn send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<u32, GatewayError> {
        self.ensure_online(friend)?;
        let id = self.messages_sent;
        self.messages_sent += 1;
        tracing::info!(%friend, ?kind, id, "send message: {}", String::from_utf8_lossy(message));
        Ok(id)
    }
}
