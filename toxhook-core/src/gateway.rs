//! Capabilities the router needs from the messaging engine. Implemented by the host on top
//! of the real engine bindings; the core never opens connections itself.

use crate::error::GatewayError;
use crate::event::{Connection, FileControl, FileId, FileKind, FriendId, MessageType, PublicKey};

pub trait EngineGateway {
    fn connection_status(&self, friend: FriendId) -> Result<Connection, GatewayError>;

    /// Hand one chunk to the engine. Delivery is reported later through events.
    fn send_chunk(
        &mut self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: &[u8],
    ) -> Result<(), GatewayError>;

    fn request_control(
        &mut self,
        friend: FriendId,
        file: FileId,
        control: FileControl,
    ) -> Result<(), GatewayError>;

    /// Offer a file to a friend. `size` is `None` for streams. Returns the engine's file number.
    fn send_file(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: &[u8],
    ) -> Result<FileId, GatewayError>;

    /// Add a friend without sending a request, as when accepting one. Returns the friend number.
    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, GatewayError>;

    /// Queue a message for a friend. Returns the id later echoed by a read receipt.
    fn send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<u32, GatewayError>;
}

impl<G: EngineGateway + ?Sized> EngineGateway for Box<G> {
    fn connection_status(&self, friend: FriendId) -> Result<Connection, GatewayError> {
        (**self).connection_status(friend)
    }

    fn send_chunk(
        &mut self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: &[u8],
    ) -> Result<(), GatewayError> {
        (**self).send_chunk(friend, file, position, data)
    }

    fn request_control(
        &mut self,
        friend: FriendId,
        file: FileId,
        control: FileControl,
    ) -> Result<(), GatewayError> {
        (**self).request_control(friend, file, control)
    }

    fn send_file(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: &[u8],
    ) -> Result<FileId, GatewayError> {
        (**self).send_file(friend, kind, size, filename)
    }

    fn friend_add_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId, GatewayError> {
        (**self).friend_add_norequest(public_key)
    }

    fn send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<u32, GatewayError> {
        (**self).send_message(friend, kind, message)
    }
}
