use crate::error::{Result, RussoundError};
use crate::path::{parse_path, PathSegment};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// State update delivered to callbacks and receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// A system variable changed
    System,

    /// A source variable changed
    Source(u32),

    /// A zone variable changed
    Zone { controller_id: u32, zone_id: u32 },

    /// Full state is available; sent to a callback registered while watching
    Snapshot,

    /// The client entered or left the watching state
    Connection(bool),
}

impl StateUpdate {
    /// Classify a watched branch path
    pub(crate) fn for_branch(branch: &str) -> Self {
        let segments = parse_path(branch);
        match segments.as_slice() {
            [PathSegment {
                key,
                index: Some(source_id),
            }, ..]
                if key == "S" =>
            {
                StateUpdate::Source(*source_id)
            }
            [c, z, ..] if c.key == "C" && z.key == "Z" => match (c.index, z.index) {
                (Some(controller_id), Some(zone_id)) => StateUpdate::Zone {
                    controller_id,
                    zone_id,
                },
                _ => StateUpdate::System,
            },
            _ => StateUpdate::System,
        }
    }
}

/// Token returned when registering a callback, used to unregister it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(Uuid);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Callbacks keyed by the handle returned at registration
pub(crate) struct CallbackRegistry<T> {
    callbacks: Mutex<Vec<(CallbackHandle, Callback<T>)>>,
}

impl<T> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, callback: Callback<T>) -> CallbackHandle {
        let handle = CallbackHandle(Uuid::new_v4());
        self.callbacks.lock().push((handle, callback));
        handle
    }

    pub fn unregister(&self, handle: CallbackHandle) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        callbacks.len() != before
    }

    pub fn clear(&self) {
        self.callbacks.lock().clear();
    }

    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> =
            self.callbacks.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback(value);
        }
    }
}

/// Client-level fan-out of state and connection changes
///
/// State updates are only delivered while enabled, i.e. once discovery has
/// finished and until the connection drops.
pub(crate) struct Fanout {
    enabled: AtomicBool,
    state: CallbackRegistry<StateUpdate>,
    connection: CallbackRegistry<bool>,
    tx: broadcast::Sender<StateUpdate>,
}

impl Fanout {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self {
            enabled: AtomicBool::new(false),
            state: CallbackRegistry::new(),
            connection: CallbackRegistry::new(),
            tx,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Returns the previous value
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::SeqCst)
    }

    pub fn register_state(&self, callback: Callback<StateUpdate>) -> CallbackHandle {
        let handle = self.state.register(callback.clone());
        if self.is_enabled() {
            callback(&StateUpdate::Snapshot);
        }
        handle
    }

    pub fn unregister_state(&self, handle: CallbackHandle) -> bool {
        self.state.unregister(handle)
    }

    pub fn clear_state(&self) {
        self.state.clear();
    }

    pub fn register_connection(&self, callback: Callback<bool>) -> CallbackHandle {
        self.connection.register(callback)
    }

    pub fn unregister_connection(&self, handle: CallbackHandle) -> bool {
        self.connection.unregister(handle)
    }

    pub fn state_changed(&self, update: StateUpdate) {
        if !self.is_enabled() {
            return;
        }
        self.state.notify(&update);
        let _ = self.tx.send(update);
    }

    pub fn connection_changed(&self, connected: bool) {
        self.connection.notify(&connected);
        let _ = self.tx.send(StateUpdate::Connection(connected));
    }

    pub fn receiver(&self) -> StateReceiver {
        StateReceiver::new(self.tx.subscribe())
    }
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    /// Create a new state receiver
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with [`RussoundError::ConnectionClosed`] once the client is gone.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => RussoundError::ConnectionClosed,
            broadcast::error::RecvError::Lagged(n) => RussoundError::Lagged(n),
        })
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is available.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        match self.rx.try_recv() {
            Ok(update) => Ok(Some(update)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(RussoundError::ConnectionClosed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(RussoundError::Lagged(n)),
        }
    }
}
