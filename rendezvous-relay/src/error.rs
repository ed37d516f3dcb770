//! Error taxonomy of the room/client registry.

/// Errors returned by [`crate::table::RoomTable`], [`crate::room::Room`],
/// and [`crate::client::Client`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The client already has a bound sink.
    #[error("Duplicated registration")]
    AlreadyRegistered,
    /// The room already holds two distinct clients.
    #[error("Max room capacity reached")]
    RoomFull,
    /// The client's outbound queue is at capacity.
    #[error("Too many messages queued for the client")]
    QueueFull,
    /// Self-send, or a flush towards a client with no bound sink.
    #[error("Invalid client")]
    InvalidTarget,
    /// A room held an unexpected number of clients while routing.
    #[error("Corrupted room {room_id}: {clients} clients")]
    CorruptedRoom {
        /// Room that violated its invariant.
        room_id: String,
        /// Number of clients found.
        clients: usize,
    },
    /// The bound sink refused a message during a queue flush.
    #[error("delivery failed: {0}")]
    Delivery(String),
}

impl RelayError {
    /// Returns `true` for faults internal to the relay that must not be
    /// reported to a remote peer.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::CorruptedRoom { .. })
    }
}
