//! Live broadcast of a running match.
//!
//! One HTTP listener serves the viewer page, a `POST /start` confirmation
//! that opens the start gate, and a `/subscribe` WebSocket endpoint. Every
//! subscriber gets a bounded queue; publishing never waits on a viewer, and a
//! viewer whose queue is full is disconnected instead.

pub mod assets;
pub mod message;
pub mod subscriber;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use shakmaty::{Chess, Move};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BroadcastSettings;
use crate::error::BroadcastError;
use message::BroadcastMessage;
use subscriber::{CloseReason, Delivery, Outbound, Subscriber, SubscriberHandle, SubscriberId};

/// Lifecycle of a broadcast server; never goes backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    ShuttingDown,
    Closed,
}

struct BroadcastState {
    lifecycle: ServerState,
    position: Chess,
    subscribers: HashMap<SubscriberId, SubscriberHandle>,
    next_id: u64,
}

/// State shared between the server handle and the connection tasks
struct Shared {
    state: Mutex<BroadcastState>,
    gate: watch::Sender<bool>,
    queue_capacity: usize,
    write_timeout: Duration,
}

impl Shared {
    /// Registers a new subscriber whose queue already holds a snapshot of
    /// the current position. Once the server stops listening the subscriber
    /// is closed straight away.
    fn subscribe(self: &Arc<Self>) -> Subscription {
        let mut state = self.state.lock();
        let id = SubscriberId(state.next_id);
        state.next_id += 1;

        let (mut handle, subscriber) = subscriber::channel(id, self.queue_capacity);
        let subscription = Subscription {
            subscriber,
            _registration: Registration {
                shared: Arc::clone(self),
                id,
            },
        };
        if state.lifecycle != ServerState::Listening {
            handle.kick(CloseReason::ServerShutdown);
            return subscription;
        }

        match BroadcastMessage::snapshot(&state.position).encode() {
            Ok(snapshot) => {
                handle.try_enqueue(Arc::from(snapshot));
            }
            Err(e) => warn!(viewer = %id, error = %e, "failed to encode snapshot"),
        }
        state.subscribers.insert(id, handle);
        subscription
    }

    fn unsubscribe(&self, id: SubscriberId) {
        self.state.lock().subscribers.remove(&id);
    }

    /// First caller wins.
    fn open_gate(&self) -> bool {
        self.gate.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }
}

/// Removes the subscriber from the map however it ends
struct Registration {
    shared: Arc<Shared>,
    id: SubscriberId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.shared.unsubscribe(self.id);
    }
}

/// A registered subscriber. Dropping it leaves the subscriber map.
pub struct Subscription {
    subscriber: Subscriber,
    _registration: Registration,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    pub async fn next(&mut self) -> Outbound {
        self.subscriber.next().await
    }

    pub fn try_next(&mut self) -> Option<Arc<str>> {
        self.subscriber.try_next()
    }
}

/// Receives the error of a listener that stopped on its own
#[derive(Debug)]
pub struct ServeErrors {
    rx: Option<oneshot::Receiver<BroadcastError>>,
}

impl ServeErrors {
    pub(crate) fn new(rx: oneshot::Receiver<BroadcastError>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Waits for the listener to fail. Never completes if it stops cleanly.
    pub async fn failed(&mut self) -> BroadcastError {
        if let Some(rx) = self.rx.as_mut() {
            let received = rx.await;
            self.rx = None;
            if let Ok(err) = received {
                return err;
            }
        }
        std::future::pending().await
    }

    /// Returns the serve failure, if one happened since the last call.
    pub fn try_take(&mut self) -> Option<BroadcastError> {
        let rx = self.rx.as_mut()?;
        match rx.try_recv() {
            Ok(err) => {
                self.rx = None;
                Some(err)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.rx = None;
                None
            }
        }
    }
}

/// Handle on a running broadcast server.
///
/// Only the match runner calls [`BroadcastServer::publish`] and
/// [`BroadcastServer::reset`]: the current position has a single writer.
/// Concurrent publishers would have to be serialized by the caller.
pub struct BroadcastServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    stop: CancellationToken,
    serve_task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl BroadcastServer {
    /// Binds the listener and starts serving in the background.
    pub async fn start(settings: &BroadcastSettings) -> Result<(Self, ServeErrors), BroadcastError> {
        let (gate, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(BroadcastState {
                lifecycle: ServerState::Created,
                position: Chess::default(),
                subscribers: HashMap::new(),
                next_id: 1,
            }),
            gate,
            queue_capacity: settings.queue_capacity,
            write_timeout: settings.write_timeout,
        });

        let bind_error = |source| BroadcastError::Bind {
            addr: settings.addr,
            source,
        };
        let listener = TcpListener::bind(settings.addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        let stop = CancellationToken::new();
        let (error_tx, error_rx) = oneshot::channel();
        let app = router(Arc::clone(&shared));
        let shutdown = stop.clone().cancelled_owned();
        let serve_task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "broadcast server stopped serving");
                let _ = error_tx.send(BroadcastError::Serve(e.to_string()));
            }
        });

        shared.state.lock().lifecycle = ServerState::Listening;
        info!(addr = %local_addr, "broadcast server listening");

        Ok((
            Self {
                shared,
                local_addr,
                stop,
                serve_task: Some(serve_task),
                shutdown_timeout: settings.shutdown_timeout,
            },
            ServeErrors::new(error_rx),
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.lock().lifecycle
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Waits until a viewer presses start, or `cancel` fires. Fails when the
    /// listener dies first, since nobody could press start any more.
    pub async fn await_start(
        &self,
        cancel: &CancellationToken,
        errors: &mut ServeErrors,
    ) -> Result<(), BroadcastError> {
        if self.state() != ServerState::Listening {
            return Ok(());
        }
        info!("live view on http://localhost:{}", self.local_addr.port());
        info!("press start to continue");

        let mut gate = self.shared.gate.subscribe();
        tokio::select! {
            _ = gate.wait_for(|open| *open) => debug!("start gate opened"),
            _ = cancel.cancelled() => debug!("cancelled while waiting for start"),
            err = errors.failed() => return Err(err),
        }
        Ok(())
    }

    /// Opens the start gate. Returns `true` only for the call that opened it.
    pub fn open_start_gate(&self) -> bool {
        self.shared.open_gate()
    }

    /// Replaces the position and resynchronises every current subscriber
    /// with a fresh snapshot; later subscribers get it as their first message.
    pub fn reset(&self, position: &Chess) -> Result<(), BroadcastError> {
        let encoded: Arc<str> = Arc::from(BroadcastMessage::snapshot(position).encode()?);

        let mut state = self.shared.state.lock();
        state.position = position.clone();
        if state.lifecycle == ServerState::Listening {
            fan_out(&mut state.subscribers, &encoded);
        }
        Ok(())
    }

    /// Registers a subscriber directly, without a WebSocket.
    pub fn subscribe(&self) -> Subscription {
        self.shared.subscribe()
    }

    /// Records `position` (reached by playing `mv`) and fans the move out to
    /// every subscriber without waiting on any of them.
    pub fn publish(&self, mv: &Move, position: &Chess) -> Result<(), BroadcastError> {
        let encoded: Arc<str> = Arc::from(BroadcastMessage::for_move(mv, position).encode()?);

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if state.lifecycle != ServerState::Listening {
            return Err(BroadcastError::Closed);
        }
        state.position = position.clone();
        fan_out(&mut state.subscribers, &encoded);
        Ok(())
    }

    /// Closes every subscription, stops accepting connections and waits for
    /// the listener to drain. Calling it again is a no-op.
    pub async fn shutdown(&mut self) -> Result<(), BroadcastError> {
        {
            let mut state = self.shared.state.lock();
            if matches!(state.lifecycle, ServerState::ShuttingDown | ServerState::Closed) {
                return Ok(());
            }
            state.lifecycle = ServerState::ShuttingDown;
            for handle in state.subscribers.values_mut() {
                handle.kick(CloseReason::ServerShutdown);
            }
        }
        self.stop.cancel();

        let result = match self.serve_task.take() {
            None => Ok(()),
            Some(mut task) => match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(BroadcastError::Task(e.to_string())),
                Err(_) => {
                    task.abort();
                    Err(BroadcastError::ShutdownTimeout(self.shutdown_timeout))
                }
            },
        };

        self.shared.state.lock().lifecycle = ServerState::Closed;
        info!("broadcast server closed");
        result
    }
}

impl Drop for BroadcastServer {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Enqueues `encoded` for every subscriber without waiting. Full queues get
/// their subscriber kicked, closed ones are dropped from the map.
fn fan_out(subscribers: &mut HashMap<SubscriberId, SubscriberHandle>, encoded: &Arc<str>) {
    subscribers.retain(|id, handle| {
        if handle.is_kicked() {
            return true;
        }
        match handle.try_enqueue(Arc::clone(encoded)) {
            Delivery::Queued => true,
            Delivery::Full => {
                warn!(viewer = %id, "viewer cannot keep up, disconnecting");
                handle.kick(CloseReason::TooSlow);
                true
            }
            Delivery::Closed => {
                debug!(viewer = %id, "viewer already gone");
                false
            }
        }
    });
}

fn router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route("/", get(assets::serve))
        .route("/start", post(start))
        .route("/subscribe", get(subscribe))
        .fallback(assets::serve)
        .with_state(shared)
}

async fn start(State(shared): State<Arc<Shared>>) -> StatusCode {
    if shared.open_gate() {
        info!("start confirmed by viewer");
    } else {
        debug!("start gate already open");
    }
    StatusCode::ACCEPTED
}

async fn subscribe(ws: WebSocketUpgrade, State(shared): State<Arc<Shared>>) -> Response {
    ws.on_upgrade(move |socket| serve_subscriber(socket, shared))
}

/// Forwards a subscriber's queue to its WebSocket until either side closes.
async fn serve_subscriber(socket: WebSocket, shared: Arc<Shared>) {
    let mut subscriber = shared.subscribe();
    let id = subscriber.id();
    let write_timeout = shared.write_timeout;
    info!(viewer = %id, "viewer subscribed");

    let (mut sink, mut inbound) = socket.split();
    let ended: Result<Option<CloseReason>, String> = loop {
        tokio::select! {
            outbound = subscriber.next() => match outbound {
                Outbound::Message(text) => {
                    let write = sink.send(Message::Text(text.to_string().into()));
                    match tokio::time::timeout(write_timeout, write).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(format!("write failed: {e}")),
                        Err(_) => break Err(format!("write stalled for {write_timeout:?}")),
                    }
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: reason.close_code(),
                        reason: reason.description().into(),
                    };
                    let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(Some(frame)))).await;
                    break Ok(Some(reason));
                }
            },
            incoming = inbound.next() => match incoming {
                None | Some(Ok(Message::Close(_))) => break Ok(None),
                Some(Err(e)) => break Err(e.to_string()),
                // viewers have nothing to say
                Some(Ok(_)) => {}
            },
        }
    };

    match ended {
        Ok(Some(reason)) => info!(viewer = %id, reason = reason.description(), "viewer disconnected by server"),
        Ok(None) => info!(viewer = %id, "viewer left"),
        Err(e) => warn!(viewer = %id, error = %e, "viewer connection failed"),
    }
}
