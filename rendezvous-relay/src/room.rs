//! A rendezvous point for at most two clients.
//!
//! The room decides whether a message is relayed immediately or held on the
//! sender's queue, and flushes held messages to a client as soon as it
//! registers.

use std::sync::{Arc, Weak};

use crate::bye::ByeNotifier;
use crate::client::{Client, DEFAULT_MAX_QUEUED_MESSAGES};
use crate::error::RelayError;
use crate::sink::Sink;
use crate::table::Shared;

/// Maximum number of distinct clients in a room.
pub const MAX_ROOM_CAPACITY: usize = 2;

/// Point-in-time view of one client, for status and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSnapshot {
    pub id: String,
    pub registered: bool,
    pub queued: usize,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: String,
    pub clients: Vec<ClientSnapshot>,
}

/// Clients sharing a room id.
///
/// A room created by a [`crate::table::RoomTable`] arms an eviction timer for
/// every new client; a detached room does not.
pub struct Room {
    id: String,
    /// At most [`MAX_ROOM_CAPACITY`] clients with distinct ids.
    clients: Vec<Client>,
    max_queued: usize,
    table: Option<Weak<Shared>>,
    notifier: Option<Arc<dyn ByeNotifier>>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("clients", &self.clients)
            .finish_non_exhaustive()
    }
}

impl Room {
    /// Creates a room outside any table: no eviction timers, no bye
    /// notifications.
    #[must_use]
    pub fn detached(id: &str) -> Self {
        Self::new(id, DEFAULT_MAX_QUEUED_MESSAGES, None, None)
    }

    pub(crate) fn new(
        id: &str,
        max_queued: usize,
        table: Option<Weak<Shared>>,
        notifier: Option<Arc<dyn ByeNotifier>>,
    ) -> Self {
        Self {
            id: id.to_string(),
            clients: Vec::with_capacity(MAX_ROOM_CAPACITY),
            max_queued,
            table,
            notifier,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn position(&self, client_id: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.id() == client_id)
    }

    /// Returns the client with `client_id`, if present.
    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id() == client_id)
    }

    pub(crate) fn get_mut(&mut self, client_id: &str) -> Option<&mut Client> {
        self.clients.iter_mut().find(|c| c.id() == client_id)
    }

    /// Returns the index of the client with `client_id`, creating it if the
    /// room has space.
    fn client_index(&mut self, client_id: &str) -> Result<usize, RelayError> {
        if let Some(idx) = self.position(client_id) {
            return Ok(idx);
        }
        if self.clients.len() >= MAX_ROOM_CAPACITY {
            tracing::info!(room_id = %self.id, client_id = %client_id, "room is full, not adding client");
            return Err(RelayError::RoomFull);
        }

        let mut client = Client::new(client_id, self.max_queued, None);
        if let Some(shared) = self.table.as_ref().and_then(Weak::upgrade) {
            let timer = Shared::arm_removal(&shared, &self.id, client_id, client.generation());
            client.set_timer(timer);
        }
        self.clients.push(client);
        tracing::info!(room_id = %self.id, client_id = %client_id, "added client to room");
        Ok(self.clients.len() - 1)
    }

    /// Returns the client with `client_id`, creating it if the room holds
    /// fewer than two clients.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomFull`] if the client is new and the room is
    /// full.
    pub fn client(&mut self, client_id: &str) -> Result<&mut Client, RelayError> {
        let idx = self.client_index(client_id)?;
        Ok(&mut self.clients[idx])
    }

    /// Binds `sink` to the client and flushes every other client's queue to it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomFull`] or [`RelayError::AlreadyRegistered`].
    pub fn register(&mut self, client_id: &str, sink: Sink) -> Result<(), RelayError> {
        let idx = self.client_index(client_id)?;
        self.clients[idx].register(sink)?;
        tracing::info!(room_id = %self.id, client_id = %client_id, "client registered in room");

        for other_idx in (0..self.clients.len()).filter(|&i| i != idx) {
            let (other, registered) = pair_mut(&mut self.clients, other_idx, idx);
            if let Err(e) = other.send_queued(registered) {
                tracing::warn!(
                    room_id = %self.id,
                    from = %other.id(),
                    to = %client_id,
                    error = %e,
                    "failed to flush queued messages"
                );
            }
        }
        Ok(())
    }

    /// Routes `msg` from `src_id` to the other client, or queues it on the
    /// source while the source is alone in the room. Pending queues in either
    /// direction are flushed first so delivery order is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomFull`], [`RelayError::QueueFull`], or
    /// [`RelayError::CorruptedRoom`] if the room holds an impossible number of
    /// clients.
    pub fn send(&mut self, src_id: &str, msg: String) -> Result<(), RelayError> {
        let src = self.client_index(src_id)?;
        match self.clients.len() {
            1 => self.clients[src].enqueue(msg),
            MAX_ROOM_CAPACITY => {
                let dst = 1 - src;
                // Resume a flush towards the sender that its registration
                // could not finish.
                if self.clients[src].registered() {
                    let (peer, sender) = pair_mut(&mut self.clients, dst, src);
                    if let Err(e) = peer.send_queued(sender) {
                        tracing::debug!(
                            room_id = %self.id,
                            from = %peer.id(),
                            to = %src_id,
                            error = %e,
                            "queued messages still pending"
                        );
                    }
                }
                let (src, dst) = pair_mut(&mut self.clients, src, dst);
                src.send(dst, msg)
            }
            clients => Err(RelayError::CorruptedRoom {
                room_id: self.id.clone(),
                clients,
            }),
        }
    }

    /// Closes the client's connection, drops it and its queue, and notifies
    /// the room server. No-op for unknown ids.
    pub fn remove(&mut self, client_id: &str) {
        let Some(idx) = self.position(client_id) else {
            return;
        };
        let mut client = self.clients.remove(idx);
        client.deregister();
        drop(client);
        tracing::info!(room_id = %self.id, client_id = %client_id, "removed client from room");

        if let Some(notifier) = &self.notifier {
            notifier.notify_bye(&self.id, client_id);
        }
    }

    /// Returns `true` if the room holds no clients.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Number of clients with a bound connection.
    #[must_use]
    pub fn open_connection_count(&self) -> usize {
        self.clients.iter().filter(|c| c.registered()).count()
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            clients: self
                .clients
                .iter()
                .map(|c| ClientSnapshot {
                    id: c.id().to_string(),
                    registered: c.registered(),
                    queued: c.queue_len(),
                })
                .collect(),
        }
    }
}

/// Borrows two distinct clients: the first mutably, the second shared.
fn pair_mut(clients: &mut [Client], a: usize, b: usize) -> (&mut Client, &Client) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = clients.split_at_mut(b);
        (&mut left[a], &right[0])
    } else {
        let (left, right) = clients.split_at_mut(a);
        (&mut right[0], &left[b])
    }
}
