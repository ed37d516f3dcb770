//! Thread-safe directory of rooms.
//!
//! One [`parking_lot::Mutex`] guards the room map and, transitively, every
//! room, client, and queue reachable from it. Rooms are created on first use
//! and dropped as soon as their last client leaves.
//!
//! A client whose connection drops is kept for `register_timeout` so that a
//! peer roaming between networks can reconnect and resume; after that the
//! eviction timer removes it unless it registered again. Timers carry the
//! client's generation and re-check it under the lock, so a stale timer can
//! never evict a newer client that reused the same id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::bye::ByeNotifier;
use crate::client::DEFAULT_MAX_QUEUED_MESSAGES;
use crate::error::RelayError;
use crate::room::{Room, RoomSnapshot};
use crate::sink::{Sink, SinkId};

/// Default grace period before an unbound client is evicted.
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables applied to every room of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// How long an unbound client is kept before eviction.
    pub register_timeout: Duration,
    /// Maximum messages a client may hold for its absent peer.
    pub max_queued: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            max_queued: DEFAULT_MAX_QUEUED_MESSAGES,
        }
    }
}

pub(crate) struct Shared {
    rooms: Mutex<HashMap<String, Room>>,
    config: TableConfig,
    notifier: Arc<dyn ByeNotifier>,
}

impl Shared {
    /// Spawns a timer that evicts the given client generation after the
    /// register timeout unless it is bound by then.
    ///
    /// Returns `None` outside a Tokio runtime.
    pub(crate) fn arm_removal(
        shared: &Arc<Self>,
        room_id: &str,
        client_id: &str,
        generation: u64,
    ) -> Option<AbortHandle> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let table = Arc::downgrade(shared);
        let timeout = shared.config.register_timeout;
        let room_id = room_id.to_string();
        let client_id = client_id.to_string();
        let task = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = table.upgrade() {
                RoomTable { shared }.remove_if_unregistered(&room_id, &client_id, generation);
            }
        });
        Some(task.abort_handle())
    }
}

/// Shared handle to the room directory. Clones refer to the same table.
#[derive(Clone)]
pub struct RoomTable {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RoomTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomTable")
            .field("config", &self.shared.config)
            .field("rooms", &self.shared.rooms.lock().len())
            .finish_non_exhaustive()
    }
}

impl RoomTable {
    #[must_use]
    pub fn new(config: TableConfig, notifier: Arc<dyn ByeNotifier>) -> Self {
        Self {
            shared: Arc::new(Shared {
                rooms: Mutex::new(HashMap::new()),
                config,
                notifier,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> TableConfig {
        self.shared.config
    }

    /// Returns the room for `room_id`, creating an empty one if absent.
    /// Callers must leave it non-empty or remove it again.
    fn get_or_create_room<'a>(
        &self,
        rooms: &'a mut HashMap<String, Room>,
        room_id: &str,
    ) -> &'a mut Room {
        rooms.entry(room_id.to_string()).or_insert_with(|| {
            tracing::info!(room_id = %room_id, "created room");
            Room::new(
                room_id,
                self.shared.config.max_queued,
                Some(Arc::downgrade(&self.shared)),
                Some(Arc::clone(&self.shared.notifier)),
            )
        })
    }

    /// Binds `sink` to the client, creating room and client as needed, and
    /// flushes the peer's queued messages to it.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomFull`] or [`RelayError::AlreadyRegistered`].
    pub fn register(&self, room_id: &str, client_id: &str, sink: Sink) -> Result<(), RelayError> {
        let mut rooms = self.shared.rooms.lock();
        let room = self.get_or_create_room(&mut rooms, room_id);
        room.register(client_id, sink)
    }

    /// Routes `msg` from `client_id` to its peer, creating room and client as
    /// needed so a message can be queued before either side connects.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::RoomFull`], [`RelayError::QueueFull`], or
    /// [`RelayError::CorruptedRoom`].
    pub fn send(&self, room_id: &str, client_id: &str, msg: String) -> Result<(), RelayError> {
        let mut rooms = self.shared.rooms.lock();
        let room = self.get_or_create_room(&mut rooms, room_id);
        room.send(client_id, msg)
    }

    /// Unbinds the client's connection but keeps the client and its queue
    /// until the register timeout expires.
    pub fn deregister(&self, room_id: &str, client_id: &str) {
        self.deregister_matching(room_id, client_id, None);
    }

    /// Like [`RoomTable::deregister`], but only if the client is still bound
    /// to `sink`. A connection that closes after its client was replaced
    /// leaves the newer binding alone.
    pub fn deregister_sink(&self, room_id: &str, client_id: &str, sink: SinkId) {
        self.deregister_matching(room_id, client_id, Some(sink));
    }

    fn deregister_matching(&self, room_id: &str, client_id: &str, expected: Option<SinkId>) {
        let mut rooms = self.shared.rooms.lock();
        let Some(client) = rooms
            .get_mut(room_id)
            .and_then(|room| room.get_mut(client_id))
        else {
            return;
        };
        if !client.registered() || expected.is_some_and(|id| client.sink_id() != Some(id)) {
            return;
        }

        client.deregister();
        let timer = Shared::arm_removal(&self.shared, room_id, client_id, client.generation());
        client.set_timer(timer);
        tracing::info!(room_id = %room_id, client_id = %client_id, "deregistered client");
    }

    /// Removes the client if the record with `generation` is still in place
    /// and still unbound. Runs when an eviction timer fires.
    pub fn remove_if_unregistered(&self, room_id: &str, client_id: &str, generation: u64) {
        let mut rooms = self.shared.rooms.lock();
        let evict = rooms
            .get(room_id)
            .and_then(|room| room.get(client_id))
            .is_some_and(|c| c.generation() == generation && !c.registered());
        if evict {
            tracing::info!(room_id = %room_id, client_id = %client_id, "removing client due to timeout");
            Self::remove_locked(&mut rooms, room_id, client_id);
        }
    }

    /// Removes the client immediately, closing its connection. Removing the
    /// last client removes the room.
    pub fn remove(&self, room_id: &str, client_id: &str) {
        let mut rooms = self.shared.rooms.lock();
        Self::remove_locked(&mut rooms, room_id, client_id);
    }

    fn remove_locked(rooms: &mut HashMap<String, Room>, room_id: &str, client_id: &str) {
        let Some(room) = rooms.get_mut(room_id) else {
            return;
        };
        room.remove(client_id);
        if room.is_empty() {
            rooms.remove(room_id);
            tracing::info!(room_id = %room_id, "removed room");
        }
    }

    /// Number of clients with a bound connection across all rooms.
    #[must_use]
    pub fn open_connection_count(&self) -> usize {
        let rooms = self.shared.rooms.lock();
        rooms.values().map(Room::open_connection_count).sum()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.shared.rooms.lock().len()
    }

    #[must_use]
    pub fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.shared.rooms.lock().get(room_id).map(Room::snapshot)
    }
}
