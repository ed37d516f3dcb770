//! Per-peer state: identity, bound sink, pending outbound queue, and the
//! deadline timer that evicts the client while it stays unbound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use rendezvous_proto::signal::ServerMessage;
use tokio::task::AbortHandle;

use crate::error::RelayError;
use crate::sink::{Sink, SinkId};

/// Default maximum number of messages a client may hold for its peer.
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 1024;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// One signaling endpoint within a room.
///
/// Not synchronized on its own: every access goes through the owning
/// [`crate::table::RoomTable`] lock.
#[derive(Debug)]
pub struct Client {
    id: String,
    /// Distinguishes this record from a later client created under the same id.
    generation: u64,
    sink: Option<Sink>,
    /// Messages sent by this client while its peer was absent.
    queue: VecDeque<String>,
    max_queued: usize,
    timer: Option<AbortHandle>,
}

impl Client {
    /// Creates an unbound client with an optional armed eviction timer.
    #[must_use]
    pub fn new(id: &str, max_queued: usize, timer: Option<AbortHandle>) -> Self {
        Self {
            id: id.to_string(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            sink: None,
            queue: VecDeque::new(),
            max_queued,
            timer,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the eviction timer, cancelling the previous one.
    pub fn set_timer(&mut self, timer: Option<AbortHandle>) {
        if let Some(old) = std::mem::replace(&mut self.timer, timer) {
            old.abort();
        }
    }

    /// Binds `sink` to this client and cancels any pending eviction.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyRegistered`] if a sink is already bound;
    /// the existing binding is left untouched.
    pub fn register(&mut self, sink: Sink) -> Result<(), RelayError> {
        if self.sink.is_some() {
            tracing::info!(client_id = %self.id, "not registering, client already has a connection");
            return Err(RelayError::AlreadyRegistered);
        }
        self.set_timer(None);
        self.sink = Some(sink);
        Ok(())
    }

    /// Closes and unbinds the sink, if any.
    pub fn deregister(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.close();
        }
    }

    #[must_use]
    pub const fn registered(&self) -> bool {
        self.sink.is_some()
    }

    /// Id of the bound sink, if any.
    #[must_use]
    pub fn sink_id(&self) -> Option<SinkId> {
        self.sink.as_ref().map(Sink::id)
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Appends `msg` to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::QueueFull`] once the queue holds the maximum
    /// number of messages.
    pub fn enqueue(&mut self, msg: String) -> Result<(), RelayError> {
        if self.queue.len() >= self.max_queued {
            return Err(RelayError::QueueFull);
        }
        self.queue.push_back(msg);
        Ok(())
    }

    /// Delivers every queued message, oldest first, to `other`'s sink.
    ///
    /// If the sink refuses a message, that message and everything after it
    /// stay queued in order.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTarget`] if `other` is this client or has
    /// no bound sink, and [`RelayError::Delivery`] if the sink refuses.
    pub fn send_queued(&mut self, other: &Self) -> Result<(), RelayError> {
        let sink = match &other.sink {
            Some(sink) if other.id != self.id => sink,
            _ => return Err(RelayError::InvalidTarget),
        };
        if self.queue.is_empty() {
            return Ok(());
        }
        let count = self.queue.len();
        while let Some(msg) = self.queue.pop_front() {
            if let Err(e) = sink.deliver(ServerMessage::Relay(msg)) {
                let reason = e.to_string();
                if let ServerMessage::Relay(msg) = e.into_inner() {
                    self.queue.push_front(msg);
                }
                tracing::warn!(
                    from = %self.id,
                    to = %other.id,
                    remaining = self.queue.len(),
                    error = %reason,
                    "queue flush interrupted"
                );
                return Err(RelayError::Delivery(reason));
            }
        }
        tracing::debug!(from = %self.id, to = %other.id, count, "sent queued messages");
        Ok(())
    }

    /// Relays `msg` to `other` if it is bound, otherwise queues it here.
    ///
    /// Messages still queued for a bound peer are flushed first. If the
    /// backlog cannot be fully flushed, or the sink refuses `msg`, the message
    /// is queued behind the backlog, so the peer always receives messages in
    /// the order they were sent.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidTarget`] on a self-send and
    /// [`RelayError::QueueFull`] if the message had to be queued but the queue
    /// is at capacity.
    pub fn send(&mut self, other: &Self, msg: String) -> Result<(), RelayError> {
        if other.id == self.id {
            return Err(RelayError::InvalidTarget);
        }
        let Some(sink) = &other.sink else {
            return self.enqueue(msg);
        };
        if self.send_queued(other).is_err() {
            return self.enqueue(msg);
        }
        match sink.deliver(ServerMessage::Relay(msg)) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    from = %self.id,
                    to = %other.id,
                    error = %e,
                    "relay failed, queuing message"
                );
                match e.into_inner() {
                    ServerMessage::Relay(msg) => self.enqueue(msg),
                    ServerMessage::Error(_) => Ok(()),
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.set_timer(None);
    }
}
