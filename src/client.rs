use crate::config::{ClientConfig, DEFAULT_PORT};
use crate::connection::{ConnectionState, Connector, TcpConnector};
use crate::error::{Result, RussoundError};
use crate::features::{self, FeatureFlag};
use crate::models::{Controller, Source, ZoneControl};
use crate::multiplexer::Multiplexer;
use crate::path::source_path;
use crate::protocol::{parse_line, Command, MessageKind, WireMessage};
use crate::store::{StateStore, WatchCallback};
use crate::subscription::{CallbackHandle, Fanout, StateReceiver, StateUpdate};
use crate::supervisor::{self, SupervisorHandle};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Shared state behind every [`RussoundClient`] clone and the supervisor task
pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) mux: Multiplexer,
    pub(crate) store: StateStore,
    pub(crate) fanout: Arc<Fanout>,
    pub(crate) transport_state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) rio_version: RwLock<Option<String>>,
    pub(crate) controllers: RwLock<BTreeMap<u32, Controller>>,
    pub(crate) sources: RwLock<BTreeSet<u32>>,
    /// Outcome of the first connection of the current supervisor
    pub(crate) connect_result: watch::Sender<Option<Result<()>>>,
    supervisor: Mutex<Option<SupervisorHandle>>,
}

impl Inner {
    /// Send a command through the multiplexer and wait for its reply
    pub(crate) async fn request(&self, command: Command) -> Result<Option<String>> {
        let text = command.to_string();
        tracing::debug!("Sending command '{}' to Russound client", text);
        match timeout(self.config.request_timeout, self.mux.request(text)).await {
            Ok(reply) => reply,
            Err(_) => Err(RussoundError::Timeout),
        }
    }

    pub(crate) async fn get_variable(&self, path: &str, key: &str) -> Result<Option<String>> {
        self.request(Command::get(path, key)).await
    }

    /// Watch `path` and run `callback` on each of its notifications
    ///
    /// The callback is registered only once the device accepted the watch.
    pub(crate) async fn subscribe(&self, path: &str, callback: WatchCallback) -> Result<()> {
        self.request(Command::watch(path, true)).await?;
        self.store.watch(path, callback);
        Ok(())
    }

    /// Route one raw line to the pending request or the state store
    pub(crate) fn handle_line(&self, raw: &[u8]) {
        let Some(msg) = parse_line(raw) else {
            return;
        };
        tracing::debug!("recv ({:?})", msg);
        if msg.kind == MessageKind::Notification {
            self.store.apply_notification(&msg);
        } else {
            self.mux.handle_message(&msg);
        }
    }

    pub(crate) fn rio_version(&self) -> Option<String> {
        self.rio_version.read().clone()
    }

    /// Whether `flag` is available on the connected device
    pub(crate) fn supports(&self, flag: FeatureFlag) -> bool {
        self.rio_version
            .read()
            .as_deref()
            .is_some_and(|version| features::is_feature_supported(version, flag))
    }
}

/// Client for a Russound RIO controller
///
/// A single client multiplexes command/reply traffic, unsolicited state
/// notifications, keep-alive probes and reconnects over one stream. Clones
/// share the same connection.
///
/// # Example
///
/// ```no_run
/// use russound_rio::RussoundClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RussoundClient::tcp("192.168.1.50", 9621);
///     client.connect().await?;
///
///     for zone in client.zones() {
///         println!("{}: {:?}", zone.path(), zone.state()?.name);
///     }
///
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct RussoundClient {
    inner: Arc<Inner>,
}

impl RussoundClient {
    /// Create a client that opens streams through `connector`
    pub fn new(connector: impl Connector) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    /// Create a client with custom timeouts and discovery bounds
    pub fn with_config(connector: impl Connector, config: ClientConfig) -> Self {
        let (transport_state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                connector: Arc::new(connector),
                mux: Multiplexer::new(),
                store: StateStore::new(),
                fanout: Arc::new(Fanout::new()),
                transport_state: Arc::new(transport_state),
                rio_version: RwLock::new(None),
                controllers: RwLock::new(BTreeMap::new()),
                sources: RwLock::new(BTreeSet::new()),
                connect_result: watch::channel(None).0,
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Create a client for a controller reachable over TCP
    ///
    /// The standard RIO port is [`DEFAULT_PORT`].
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(TcpConnector::new(host, port))
    }

    /// Create a client for a controller on the standard RIO port
    pub fn tcp_default_port(host: impl Into<String>) -> Self {
        Self::tcp(host, DEFAULT_PORT)
    }

    /// Timeouts and discovery bounds this client was built with
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Connect, run discovery and start watching
    ///
    /// Resolves once the first connection has finished discovery. If that
    /// first attempt fails the error is returned and nothing is retried;
    /// connections that drop later are re-established in the background.
    /// Callers arriving while an attempt is running share its outcome.
    pub async fn connect(&self) -> Result<()> {
        let mut outcome = {
            let mut supervisor = self.inner.supervisor.lock();
            if supervisor.as_ref().is_some_and(|s| !s.is_finished()) {
                tracing::debug!("Already connected or connecting");
            } else {
                *supervisor = Some(supervisor::spawn(self.inner.clone()));
            }
            self.inner.connect_result.subscribe()
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(result) => match &*result {
                Some(Err(e)) => Err(e.duplicate()),
                _ => Ok(()),
            },
            Err(_) => Err(RussoundError::ConnectionClosed),
        };
        result
    }

    /// Close the connection and stop reconnecting
    ///
    /// Pending requests fail with [`RussoundError::ConnectionClosed`], as
    /// does a `connect` still waiting for its first connection.
    pub async fn disconnect(&self) {
        let handle = self.inner.supervisor.lock().take();
        if let Some(handle) = handle {
            handle.stop(Duration::from_millis(500)).await;
        }
        self.inner.mux.detach();
        self.inner.connect_result.send_if_modified(|outcome| {
            if outcome.is_some() {
                return false;
            }
            *outcome = Some(Err(RussoundError::ConnectionClosed));
            true
        });
    }

    /// Whether the transport is currently connected
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Current transport state
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.transport_state.borrow()
    }

    /// Watch transport state transitions
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport_state.subscribe()
    }

    /// Send a raw or typed command and wait for its reply
    ///
    /// Replies are matched to commands purely by order, so commands from
    /// concurrent callers queue and go out one at a time.
    pub async fn request(&self, command: impl Into<Command>) -> Result<Option<String>> {
        self.inner.request(command.into()).await
    }

    /// Fetch a variable from the device with `GET`
    pub async fn get_variable(&self, path: &str, key: &str) -> Result<Option<String>> {
        self.inner.get_variable(path, key).await
    }

    /// Set a variable on the device with `SET`
    pub async fn set_variable(&self, path: &str, key: &str, value: &str) -> Result<Option<String>> {
        self.request(Command::set(path, key, value)).await
    }

    /// Send an `EVENT` to a device path
    pub async fn send_event<I, A>(&self, path: &str, name: &str, args: I) -> Result<Option<String>>
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.request(Command::event(path, name, args)).await
    }

    /// Watch `path` and call `callback` for each notification on it
    ///
    /// Nothing is registered if the device rejects the watch.
    pub async fn subscribe<F>(&self, path: &str, callback: F) -> Result<()>
    where
        F: Fn(&WireMessage) + Send + Sync + 'static,
    {
        self.inner.subscribe(path, Arc::new(callback)).await
    }

    /// Stop watching `path`
    ///
    /// The callback is removed and the cached subtree pruned even when the
    /// device fails the `WATCH ... OFF` command.
    pub async fn unsubscribe(&self, path: &str) -> Result<()> {
        let result = self.request(Command::watch(path, false)).await;
        self.inner.store.unwatch(path);
        self.inner.store.prune(path);
        result.map(|_| ())
    }

    /// Whether a watch callback is registered for `path`
    pub fn is_subscribed(&self, path: &str) -> bool {
        self.inner.store.is_watched(path)
    }

    /// Paths with a registered watch callback
    pub fn subscribed_paths(&self) -> Vec<String> {
        self.inner.store.watched_paths()
    }

    /// Call `callback` whenever watched state changes
    pub fn register_state_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&StateUpdate) + Send + Sync + 'static,
    {
        self.inner.fanout.register_state(Arc::new(callback))
    }

    /// Remove a state callback; `false` if the handle was unknown
    pub fn unregister_state_callback(&self, handle: CallbackHandle) -> bool {
        self.inner.fanout.unregister_state(handle)
    }

    /// Remove every state callback
    pub fn clear_state_callbacks(&self) {
        self.inner.fanout.clear_state();
    }

    /// Call `callback` with `true` once watching starts and `false` when it stops
    pub fn register_connection_callback<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        self.inner.fanout.register_connection(Arc::new(callback))
    }

    /// Remove a connection callback; `false` if the handle was unknown
    pub fn unregister_connection_callback(&self, handle: CallbackHandle) -> bool {
        self.inner.fanout.unregister_connection(handle)
    }

    /// Receive state updates as a stream
    pub fn subscribe_state(&self) -> StateReceiver {
        self.inner.fanout.receiver()
    }

    /// Cached subtree for `path`
    pub fn get_cached(&self, path: &str) -> Option<Value> {
        self.inner.store.get_cached(path)
    }

    /// Cached variable, or `default` when it is absent or empty
    pub fn get_cached_variable(&self, path: &str, key: &str, default: &str) -> String {
        self.inner.store.get_cached_variable(path, key, default)
    }

    /// Cached variable, failing with [`RussoundError::UncachedVariable`] when
    /// the device never pushed it
    pub fn get_cached_variable_strict(&self, path: &str, key: &str) -> Result<Option<String>> {
        self.inner.store.get_cached_variable_strict(path, key)
    }

    /// Copy of the whole cached state tree
    pub fn state(&self) -> Value {
        self.inner.store.snapshot()
    }

    /// RIO API version negotiated on the last connection
    pub fn rio_version(&self) -> Option<String> {
        self.inner.rio_version()
    }

    /// Features available on the connected device
    pub fn supported_features(&self) -> Vec<FeatureFlag> {
        self.rio_version()
            .map(|version| features::supported_features(&version))
            .unwrap_or_default()
    }

    /// Whether `flag` is available on the connected device
    pub fn is_feature_supported(&self, flag: FeatureFlag) -> bool {
        self.inner.supports(flag)
    }

    /// Fail with [`RussoundError::UnsupportedFeature`] unless `flag` is available
    pub fn ensure_feature_supported(&self, flag: FeatureFlag) -> Result<()> {
        let version = self.rio_version().unwrap_or_default();
        features::ensure_feature_supported(&version, flag)
    }

    /// Controllers found during discovery
    pub fn controllers(&self) -> BTreeMap<u32, Controller> {
        self.inner.controllers.read().clone()
    }

    /// Controller found during discovery under `controller_id`
    pub fn controller(&self, controller_id: u32) -> Option<Controller> {
        self.inner.controllers.read().get(&controller_id).cloned()
    }

    /// Cached state of every source found during discovery
    pub fn sources(&self) -> Result<BTreeMap<u32, Source>> {
        let ids: Vec<u32> = self.inner.sources.read().iter().copied().collect();
        let mut sources = BTreeMap::new();
        for source_id in ids {
            if let Some(source) = self.source(source_id)? {
                sources.insert(source_id, source);
            }
        }
        Ok(sources)
    }

    /// Cached state of one source
    pub fn source(&self, source_id: u32) -> Result<Option<Source>> {
        self.get_cached(&source_path(source_id))
            .map(|tree| Source::from_tree(&tree))
            .transpose()
    }

    /// Control surfaces for every zone found during discovery
    pub fn zones(&self) -> Vec<ZoneControl> {
        self.inner
            .controllers
            .read()
            .values()
            .flat_map(|controller| {
                controller
                    .zones
                    .iter()
                    .map(move |zone_id| (controller.controller_id, *zone_id))
            })
            .map(|(controller_id, zone_id)| ZoneControl::new(self.clone(), controller_id, zone_id))
            .collect()
    }

    /// Control surface for one zone
    pub fn zone(&self, controller_id: u32, zone_id: u32) -> ZoneControl {
        ZoneControl::new(self.clone(), controller_id, zone_id)
    }
}
