//! Bound transport handles.
//!
//! A [`Sink`] is the relay-side handle of one peer connection. Writing to it
//! never blocks: frames go into a bounded channel that a per-connection
//! writer task drains onto the socket, so delivering a message while the
//! room table lock is held costs one `try_send`. Closing a sink tells the
//! writer to flush what is already buffered, send a close frame, and stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rendezvous_proto::signal::ServerMessage;
use tokio::sync::{Notify, mpsc};

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one connection's sink, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Reasons a frame could not be handed to a connection's writer.
///
/// Both variants give the frame back so the caller can keep it.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The connection was closed or its writer is gone.
    #[error("connection closed")]
    Closed(ServerMessage),
    /// The connection's outbound buffer is full.
    #[error("outbound buffer full")]
    Full(ServerMessage),
}

impl DeliveryError {
    /// Returns the frame that was not delivered.
    #[must_use]
    pub fn into_inner(self) -> ServerMessage {
        match self {
            Self::Closed(msg) | Self::Full(msg) => msg,
        }
    }
}

struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

/// Sending half of a peer connection. Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct Sink {
    id: SinkId,
    frames: mpsc::Sender<ServerMessage>,
    close: Arc<CloseSignal>,
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Receiving half of a peer connection, drained by its writer task.
pub struct SinkReceiver {
    frames: mpsc::Receiver<ServerMessage>,
    close: Arc<CloseSignal>,
}

/// Creates a connected sink pair whose buffer holds `capacity` frames.
#[must_use]
pub fn channel(capacity: usize) -> (Sink, SinkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let close = Arc::new(CloseSignal {
        closed: AtomicBool::new(false),
        notify: Notify::new(),
    });
    let sink = Sink {
        id: SinkId(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed)),
        frames: tx,
        close: Arc::clone(&close),
    };
    (sink, SinkReceiver { frames: rx, close })
}

impl Sink {
    /// Identity shared by all clones of this sink.
    #[must_use]
    pub const fn id(&self) -> SinkId {
        self.id
    }

    /// Hands a frame to the connection's writer without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] if the sink is closed or its buffer is full.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed(msg));
        }
        self.frames.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(msg) => DeliveryError::Full(msg),
            mpsc::error::TrySendError::Closed(msg) => DeliveryError::Closed(msg),
        })
    }

    /// Asks the writer to flush buffered frames and close the connection.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if !self.close.closed.swap(true, Ordering::AcqRel) {
            self.close.notify.notify_one();
        }
    }

    /// Returns `true` once [`Sink::close`] was called on any clone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.closed.load(Ordering::Acquire)
    }
}

impl SinkReceiver {
    /// Waits for the next frame.
    ///
    /// Returns `None` once the sink is closed and every frame buffered before
    /// the close has been returned, or when every sender is dropped.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        if self.close.closed.load(Ordering::Acquire) {
            return self.frames.try_recv().ok();
        }
        tokio::select! {
            biased;
            frame = self.frames.recv() => frame,
            () = self.close.notify.notified() => self.frames.try_recv().ok(),
        }
    }

    /// Returns the next buffered frame, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        self.frames.try_recv().ok()
    }

    /// Returns `true` once the sending side asked for the connection to close.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.closed.load(Ordering::Acquire)
    }
}
