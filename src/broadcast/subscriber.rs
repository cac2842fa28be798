/// Per-viewer outbound mailbox and forced-disconnect signal
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

/// Identifies one subscription for the lifetime of a broadcast server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(crate) u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Why the server asked a subscriber's connection to close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The outbound queue was full when a message was published.
    TooSlow,
    /// The broadcast server is shutting down.
    ServerShutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the viewer
    pub fn close_code(self) -> u16 {
        match self {
            CloseReason::TooSlow => 1008,
            CloseReason::ServerShutdown => 1001,
        }
    }

    /// Whether messages queued before the close are still delivered.
    pub fn drains_queue(self) -> bool {
        matches!(self, CloseReason::ServerShutdown)
    }

    pub fn description(self) -> &'static str {
        match self {
            CloseReason::TooSlow => "connection too slow to keep up with messages",
            CloseReason::ServerShutdown => "broadcast is shutting down",
        }
    }
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the message was dropped for this subscriber.
    Full,
    /// The serving task is gone.
    Closed,
}

/// Server-side end: lives in the subscriber map
#[derive(Debug)]
pub struct SubscriberHandle {
    queue: mpsc::Sender<Arc<str>>,
    close: Option<oneshot::Sender<CloseReason>>,
}

impl SubscriberHandle {
    /// Never waits: a full queue reports [`Delivery::Full`] instead.
    pub fn try_enqueue(&self, msg: Arc<str>) -> Delivery {
        match self.queue.try_send(msg) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Signals the serving task to close the connection. Only the first
    /// reason is delivered; returns whether this call sent it.
    pub fn kick(&mut self, reason: CloseReason) -> bool {
        match self.close.take() {
            Some(close) => close.send(reason).is_ok(),
            None => false,
        }
    }

    pub fn is_kicked(&self) -> bool {
        self.close.is_none()
    }
}

/// Serving-task end: owned exclusively by the connection task
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    queue: mpsc::Receiver<Arc<str>>,
    close: oneshot::Receiver<CloseReason>,
    closed: Option<CloseReason>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next outbound message or a close request, whichever
    /// comes first. After a shutdown request the messages already queued are
    /// still handed out before the close; a slow subscriber is cut off at once.
    pub async fn next(&mut self) -> Outbound {
        let reason = match self.closed {
            Some(reason) => reason,
            None => {
                let reason = tokio::select! {
                    biased;
                    reason = &mut self.close => reason.unwrap_or(CloseReason::ServerShutdown),
                    msg = self.queue.recv() => match msg {
                        Some(msg) => return Outbound::Message(msg),
                        None => CloseReason::ServerShutdown,
                    },
                };
                self.closed = Some(reason);
                reason
            }
        };

        if reason.drains_queue() {
            if let Ok(msg) = self.queue.try_recv() {
                return Outbound::Message(msg);
            }
        }
        Outbound::Close(reason)
    }

    /// Pops a queued message without waiting.
    pub fn try_next(&mut self) -> Option<Arc<str>> {
        self.queue.try_recv().ok()
    }
}

/// What a serving task should do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Message(Arc<str>),
    Close(CloseReason),
}

/// Creates both ends of a subscription with a queue of `capacity` messages.
pub fn channel(id: SubscriberId, capacity: usize) -> (SubscriberHandle, Subscriber) {
    let (queue_tx, queue_rx) = mpsc::channel(capacity.max(1));
    let (close_tx, close_rx) = oneshot::channel();
    (
        SubscriberHandle {
            queue: queue_tx,
            close: Some(close_tx),
        },
        Subscriber {
            id,
            queue: queue_rx,
            close: close_rx,
            closed: None,
        },
    )
}
