//! Event router: per-kind subscriber table, in-order dispatch, and the transfer bookkeeping
//! that runs before file-transfer events reach the application.
//!
//! The router is the single consumer of the trampoline's queue. All dispatch, draining and
//! session mutation must happen on one thread (the dispatch context); other threads use
//! [`Subscriptions`] to (un)subscribe and [`CommandSender`] to control transfers.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command::{Command, CommandSender};
use crate::config::Config;
use crate::error::{Error, ErrorKind, Result};
use crate::event::{
    Connection, Event, EventKind, FileControl, FileId, FileKind, FriendId, MessageType, PublicKey,
    MAX_MESSAGE_LENGTH,
};
use crate::gateway::EngineGateway;
use crate::session::{self, Direction, FileTransferSession, SessionStatus};
use crate::table::TransferTable;
use crate::trampoline::{Parked, Trampoline};

type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;
type SharedHandler = Arc<Mutex<Handler>>;

/// Handle returned by `subscribe`; pass it to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

struct SubscriberTable {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, SharedHandler)>>,
}

/// Shared, thread-safe view of the subscriber table.
#[derive(Clone)]
pub struct Subscriptions {
    inner: Arc<Mutex<SubscriberTable>>,
    /// Shared with the trampoline so callbacks stop queueing once the router stops.
    running: Arc<AtomicBool>,
}

impl Subscriptions {
    fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SubscriberTable {
                next_id: 1,
                by_kind: HashMap::new(),
            })),
            running,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubscriberTable> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `kind`. `context` is owned by the subscription and handed to
    /// the handler on every call. Handlers of one kind run in registration order.
    pub fn subscribe<C, F>(&self, kind: EventKind, context: C, mut handler: F) -> Result<Subscription>
    where
        C: Send + 'static,
        F: FnMut(&mut C, &Event) -> anyhow::Result<()> + Send + 'static,
    {
        let mut context = context;
        let handler: Handler = Box::new(move |event| handler(&mut context, event));
        let mut table = self.lock();
        if !self.is_running() {
            return Err(Error::InvalidState("router stopped"));
        }
        let id = table.next_id;
        table.next_id += 1;
        table
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(Mutex::new(handler))));
        Ok(Subscription { id, kind })
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut table = self.lock();
        let Some(handlers) = table.by_kind.get_mut(&subscription.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        before != handlers.len()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().by_kind.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Handlers for `kind` at this moment. The table lock is released before any handler
    /// runs, so handlers may (un)subscribe.
    fn snapshot(&self, kind: EventKind) -> Vec<(u64, SharedHandler)> {
        self.lock().by_kind.get(&kind).cloned().unwrap_or_default()
    }
}

/// Receives failures that are handled locally instead of being returned.
pub trait DiagnosticsSink: Send {
    fn report(&self, error: &Error);
}

/// Default sink: logs through `tracing`.
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn report(&self, error: &Error) {
        match error.kind() {
            ErrorKind::HandlerFailure => tracing::warn!("{error}"),
            _ => tracing::debug!("ignored: {error}"),
        }
    }
}

/// Result of one [`EventRouter::drain_pending`] pass.
#[derive(Debug, Default)]
pub struct Drained {
    pub events: usize,
    pub commands: usize,
    /// Every error raised while draining, in the order it happened.
    pub errors: Vec<Error>,
}

enum Update {
    /// Session state changed (or the event is not about a transfer). Carries the key if the
    /// event finished a transfer.
    Applied(Option<(FriendId, FileId)>),
    /// The event names a transfer that already finished; state is left alone.
    Late(Error),
}

pub struct EventRouter<G> {
    gateway: G,
    config: Config,
    subscriptions: Subscriptions,
    trampoline: Trampoline,
    events: Receiver<Event>,
    parked: Arc<Mutex<Parked>>,
    command_sender: CommandSender,
    commands: Receiver<Command>,
    table: TransferTable,
    sink: Box<dyn DiagnosticsSink>,
}

impl<G: EngineGateway> EventRouter<G> {
    pub fn new(gateway: G, config: Config) -> Self {
        let event_capacity = config.event_queue_capacity.max(1);
        let command_capacity = config.command_queue_capacity.max(1);
        let (event_tx, events) = mpsc::sync_channel(event_capacity);
        let (command_tx, commands) = mpsc::sync_channel(command_capacity);
        let parked = Arc::new(Mutex::new(Parked::default()));
        let running = Arc::new(AtomicBool::new(true));
        Self {
            gateway,
            config,
            subscriptions: Subscriptions::new(running.clone()),
            trampoline: Trampoline::new(event_tx, event_capacity, parked.clone(), running),
            events,
            parked,
            command_sender: CommandSender::new(command_tx, command_capacity),
            commands,
            table: TransferTable::new(),
            sink: Box::new(TracingSink),
        }
    }

    pub fn with_sink(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Producer handle to register with the engine.
    pub fn trampoline(&self) -> Trampoline {
        self.trampoline.clone()
    }

    pub fn commands(&self) -> CommandSender {
        self.command_sender.clone()
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions.clone()
    }

    pub fn subscribe<C, F>(&self, kind: EventKind, context: C, handler: F) -> Result<Subscription>
    where
        C: Send + 'static,
        F: FnMut(&mut C, &Event) -> anyhow::Result<()> + Send + 'static,
    {
        self.subscriptions.subscribe(kind, context, handler)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        self.subscriptions.unsubscribe(subscription)
    }

    pub fn is_running(&self) -> bool {
        self.subscriptions.is_running()
    }

    /// After this, dispatch and drain do nothing, subscribe fails and the trampoline drops
    /// callbacks instead of queueing them.
    pub fn stop(&mut self) {
        self.subscriptions.stop();
        tracing::debug!("router stopped with {} transfers in table", self.table.len());
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn transfers(&self) -> &TransferTable {
        &self.table
    }

    pub fn session(&self, friend: FriendId, file: FileId) -> Result<&FileTransferSession> {
        self.table.get(friend, file)
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut G {
        &mut self.gateway
    }

    /// Deliver one event: update transfer state, then run the handlers for its kind.
    /// Handlers see every event. A rejected transfer update is returned after delivery, and a
    /// transport violation also cancels the transfer.
    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let kind = event.kind();
        tracing::debug!(?kind, "dispatch");
        let update = self.apply_transfer_update(&event);
        self.deliver(kind, &event);
        match update {
            Ok(Update::Applied(finished)) => {
                if let Some((friend, file)) = finished {
                    self.table
                        .mark_observed(friend, file, self.config.terminal_retention_drains);
                }
            }
            Ok(Update::Late(e)) => self.sink.report(&e),
            Err(e) => {
                if e.is_transport_violation() {
                    if let Some((friend, file)) = event.transfer() {
                        self.terminate(friend, file, &e);
                    }
                }
                return Err(e);
            }
        }
        if let Event::FriendConnectionStatus {
            friend,
            status: Connection::None,
        } = event
        {
            if self.config.cancel_on_friend_offline {
                self.drop_transfers_of(friend);
            }
        }
        Ok(())
    }

    /// Process queued commands and events in FIFO order. Handles at most one queue's worth
    /// of events, which covers everything enqueued before the call.
    pub fn drain_pending(&mut self) -> Drained {
        let mut drained = Drained::default();
        if !self.is_running() {
            return drained;
        }
        drained.errors.append(&mut self.take_parked());
        let budget = self.config.event_queue_capacity.max(1);
        loop {
            while let Ok(command) = self.commands.try_recv() {
                drained.commands += 1;
                if let Err(e) = self.apply_command(command) {
                    drained.errors.push(e);
                }
            }
            if drained.events >= budget {
                break;
            }
            let Ok(event) = self.events.try_recv() else {
                break;
            };
            drained.events += 1;
            if let Err(e) = self.dispatch(event) {
                drained.errors.push(e);
            }
        }
        for (friend, file) in self.table.sweep() {
            tracing::debug!(%friend, %file, "transfer released");
        }
        drained
    }

    /// Accept an offered file.
    pub fn accept(&mut self, friend: FriendId, file: FileId) -> Result<SessionStatus> {
        self.control(friend, file, FileControl::Resume)
    }

    pub fn pause(&mut self, friend: FriendId, file: FileId) -> Result<SessionStatus> {
        self.control(friend, file, FileControl::Pause)
    }

    pub fn resume(&mut self, friend: FriendId, file: FileId) -> Result<SessionStatus> {
        self.control(friend, file, FileControl::Resume)
    }

    pub fn cancel(&mut self, friend: FriendId, file: FileId) -> Result<SessionStatus> {
        self.control(friend, file, FileControl::Cancel)
    }

    /// Issue a local control: validated against the session, sent to the engine, then applied.
    pub fn control(
        &mut self,
        friend: FriendId,
        file: FileId,
        control: FileControl,
    ) -> Result<SessionStatus> {
        self.ensure_running()?;
        let session = self.table.get_mut(friend, file)?;
        let mut next = session.clone();
        let status = next.on_control(control)?;
        self.gateway.request_control(friend, file, control)?;
        *session = next;
        if status.is_terminal() {
            self.table
                .mark_observed(friend, file, self.config.terminal_retention_drains);
        }
        Ok(status)
    }

    /// Offer a file to an online friend and track it as a sending transfer.
    pub fn offer_file(
        &mut self,
        friend: FriendId,
        kind: FileKind,
        size: Option<u64>,
        filename: &[u8],
    ) -> Result<FileId> {
        self.ensure_running()?;
        if !self.gateway.connection_status(friend)?.is_online() {
            return Err(Error::InvalidState("friend is offline"));
        }
        let file = self.gateway.send_file(friend, kind, size, filename)?;
        self.release_finished(friend, file);
        if let Err(e) = self.table.create(friend, file, Direction::Sending, size) {
            // The engine now has an offer nobody tracks; withdraw it.
            if let Err(ge) = self
                .gateway
                .request_control(friend, file, FileControl::Cancel)
            {
                self.sink.report(&Error::Engine(ge));
            }
            return Err(e);
        }
        tracing::debug!(%friend, %file, ?size, "offered file");
        Ok(file)
    }

    /// Accept a friend request from `public_key`.
    pub fn add_friend_norequest(&mut self, public_key: &PublicKey) -> Result<FriendId> {
        self.ensure_running()?;
        let friend = self.gateway.friend_add_norequest(public_key)?;
        tracing::debug!(%friend, key = %public_key, "friend added");
        Ok(friend)
    }

    /// Send a message to a friend. Returns the message id.
    pub fn send_message(
        &mut self,
        friend: FriendId,
        kind: MessageType,
        message: &[u8],
    ) -> Result<u32> {
        self.ensure_running()?;
        if message.is_empty() || message.len() > MAX_MESSAGE_LENGTH {
            return Err(Error::InvalidArgument(format!(
                "message length {} outside 1..={MAX_MESSAGE_LENGTH}",
                message.len()
            )));
        }
        Ok(self.gateway.send_message(friend, kind, message)?)
    }

    /// Send the bytes for the oldest range the engine requested.
    pub fn supply_chunk(
        &mut self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: &[u8],
    ) -> Result<()> {
        self.ensure_running()?;
        let session = self.table.get_mut(friend, file)?;
        let mut next = session.clone();
        next.supply_chunk(position, data.len() as u64)?;
        self.gateway.send_chunk(friend, file, position, data)?;
        *session = next;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::InvalidState("router stopped"))
        }
    }

    fn take_parked(&self) -> Vec<Error> {
        let (errors, discarded) = self
            .parked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if discarded > 0 {
            tracing::warn!(discarded, "further engine callback failures were not kept");
        }
        errors
    }

    fn apply_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Control {
                friend,
                file,
                control,
            } => self.control(friend, file, control).map(|_| ()),
            Command::Offer {
                friend,
                kind,
                size,
                filename,
                reply,
            } => {
                let result = self.offer_file(friend, kind, size, &filename);
                match reply {
                    // Nobody is listening for the reply: surface the outcome here instead.
                    Some(reply) => match reply.send(result) {
                        Ok(()) => Ok(()),
                        Err(mpsc::SendError(result)) => result.map(|_| ()),
                    },
                    None => result.map(|_| ()),
                }
            }
            Command::Supply {
                friend,
                file,
                position,
                data,
            } => self.supply_chunk(friend, file, position, &data),
            Command::AddFriend { public_key } => {
                self.add_friend_norequest(&public_key).map(|_| ())
            }
            Command::SendMessage {
                friend,
                kind,
                message,
            } => self.send_message(friend, kind, &message).map(|_| ()),
        }
    }

    fn apply_transfer_update(&mut self, event: &Event) -> Result<Update> {
        match *event {
            Event::FileRecv {
                friend,
                file,
                file_size,
                ..
            } => {
                self.release_finished(friend, file);
                self.table.create(
                    friend,
                    file,
                    Direction::Receiving,
                    session::total_from_file_size(file_size),
                )?;
                Ok(Update::Applied(None))
            }
            Event::FileRecvControl {
                friend,
                file,
                control,
            } => {
                let session = self.table.get_mut(friend, file)?;
                if session.status().is_terminal() {
                    return Ok(Update::Late(Error::InvalidTransition {
                        from: session.status(),
                        control,
                    }));
                }
                let status = session.on_control(control)?;
                Ok(Update::Applied(status.is_terminal().then_some((friend, file))))
            }
            Event::FileChunkRequest {
                friend,
                file,
                position,
                length,
            } => {
                let session = self.table.get_mut(friend, file)?;
                if session.status().is_terminal() {
                    return Ok(Update::Late(Error::InvalidState(
                        "chunk request for a finished transfer",
                    )));
                }
                session.on_chunk_request(position, length)?;
                let finished = session.status().is_terminal();
                Ok(Update::Applied(finished.then_some((friend, file))))
            }
            Event::FileRecvChunk {
                friend,
                file,
                position,
                ref data,
            } => {
                let session = self.table.get_mut(friend, file)?;
                if session.status().is_terminal() {
                    return Ok(Update::Late(Error::InvalidState(
                        "chunk for a finished transfer",
                    )));
                }
                let status = session.on_chunk_received(position, data)?;
                Ok(Update::Applied(status.is_terminal().then_some((friend, file))))
            }
            _ => Ok(Update::Applied(None)),
        }
    }

    fn deliver(&self, kind: EventKind, event: &Event) {
        for (id, shared) in self.subscriptions.snapshot(kind) {
            let mut guard = shared.lock().unwrap_or_else(PoisonError::into_inner);
            let handler: &mut Handler = &mut guard;
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(payload) => Some(anyhow::anyhow!(
                    "handler panicked: {}",
                    panic_message(payload.as_ref())
                )),
            };
            if let Some(source) = failure {
                self.sink.report(&Error::HandlerFailure {
                    kind,
                    subscription: id,
                    source,
                });
            }
        }
    }

    /// A transport violation ends the transfer: cancel locally and tell the engine.
    fn terminate(&mut self, friend: FriendId, file: FileId, cause: &Error) {
        let Ok(session) = self.table.get_mut(friend, file) else {
            return;
        };
        if session.status().is_terminal() {
            return;
        }
        tracing::warn!(%friend, %file, "terminating transfer: {cause}");
        let _ = session.on_control(FileControl::Cancel);
        if let Err(e) = self
            .gateway
            .request_control(friend, file, FileControl::Cancel)
        {
            self.sink.report(&Error::Engine(e));
        }
        self.announce_cancel(friend, file);
    }

    /// The engine drops every transfer with a friend that went offline.
    fn drop_transfers_of(&mut self, friend: FriendId) {
        for file in self.table.sessions_of(friend) {
            let Ok(session) = self.table.get_mut(friend, file) else {
                continue;
            };
            if session.status().is_terminal() {
                continue;
            }
            let _ = session.on_control(FileControl::Cancel);
            tracing::debug!(%friend, %file, "friend offline, transfer cancelled");
            self.announce_cancel(friend, file);
        }
    }

    /// Show handlers a cancellation the router made on its own, as a Cancel control, so the
    /// application observes the terminal state before the session can be released.
    fn announce_cancel(&mut self, friend: FriendId, file: FileId) {
        let event = Event::FileRecvControl {
            friend,
            file,
            control: FileControl::Cancel,
        };
        self.deliver(EventKind::FileRecvControl, &event);
        self.table
            .mark_observed(friend, file, self.config.terminal_retention_drains);
    }

    /// File numbers are reused by the engine: a finished transfer still retained under the
    /// same key gives way to the new one.
    fn release_finished(&mut self, friend: FriendId, file: FileId) {
        if let Ok(existing) = self.table.get(friend, file) {
            if existing.status().is_terminal() {
                self.table.remove(friend, file);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
