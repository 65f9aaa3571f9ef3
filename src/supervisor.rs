//! Connection lifecycle: discovery, keep-alive and reconnect with backoff

use crate::client::Inner;
use crate::config::{MINIMUM_API_SUPPORT, SYSTEM_KEY};
use crate::connection::{Connection, TransportEvent};
use crate::error::{Result, RussoundError};
use crate::features::{is_feature_supported, is_fw_version_higher, FeatureFlag};
use crate::models::Controller;
use crate::path::{controller_path, is_daisy_chain_capable, max_zones_for_model, source_path, zone_path};
use crate::protocol::{Command, WireMessage};
use crate::store::WatchCallback;
use crate::subscription::StateUpdate;
use futures_util::future::join_all;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Running supervisor task
pub(crate) struct SupervisorHandle {
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the task to stop, aborting it if it does not within `grace`
    pub async fn stop(self, grace: Duration) {
        let _ = self.stop_tx.send(());
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!("Supervisor did not stop in time, aborting");
            task.abort();
        }
    }
}

/// Start supervising
///
/// The outcome of the first connection is published on
/// `Inner::connect_result`.
pub(crate) fn spawn(inner: Arc<Inner>) -> SupervisorHandle {
    inner.connect_result.send_replace(None);
    let (stop_tx, _) = broadcast::channel(1);
    let stop_rx = stop_tx.subscribe();
    let task = tokio::spawn(run(inner, stop_rx));
    SupervisorHandle { stop_tx, task }
}

/// Reconnect delay: doubles per failed attempt up to `max`
#[derive(Debug, Clone)]
struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait now; the following call returns double that, capped
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Publish the first connection outcome unless one is already set
fn publish_first_result(inner: &Inner, result: Result<()>) {
    inner.connect_result.send_if_modified(|outcome| {
        if outcome.is_some() {
            return false;
        }
        *outcome = Some(result);
        true
    });
}

async fn run(inner: Arc<Inner>, mut stop_rx: broadcast::Receiver<()>) {
    let mut backoff = Backoff::new(
        inner.config.reconnect_base_delay,
        inner.config.reconnect_max_delay,
    );
    let mut first_pending = true;

    loop {
        let mut established = false;
        let outcome = tokio::select! {
            _ = stop_rx.recv() => None,
            result = run_session(&inner, &mut first_pending, &mut established) => Some(result),
        };

        teardown(&inner);

        let Some(result) = outcome else {
            tracing::info!("Disconnected from Russound device");
            publish_first_result(&inner, Err(RussoundError::ConnectionClosed));
            break;
        };
        let error = match result {
            Ok(()) => RussoundError::ConnectionClosed,
            Err(e) => e,
        };

        if first_pending {
            tracing::error!("Failed to connect to Russound device: {}", error);
            tracing::debug!("Failed to connect to device on initial pass, skipping reconnect.");
            publish_first_result(&inner, Err(error));
            break;
        }
        if matches!(error, RussoundError::UnsupportedVersion { .. }) {
            tracing::error!("{}", error);
            break;
        }

        tracing::warn!("Connection to Russound device lost: {}", error);
        if established {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        tracing::debug!("Attempting reconnection to Russound device in {:?}", delay);
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!("Reconnect cancelled");
                break;
            }
            _ = sleep(delay) => {}
        }
    }
}

/// Fail pending requests and announce the loss of the watching state
fn teardown(inner: &Inner) {
    inner.mux.detach();
    if inner.fanout.set_enabled(false) {
        inner.fanout.connection_changed(false);
    }
}

/// One connection from open to loss
///
/// Only returns once the connection is gone or could not be set up.
async fn run_session(
    inner: &Arc<Inner>,
    first_pending: &mut bool,
    established: &mut bool,
) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut connection = Connection::open(
        inner.connector.as_ref(),
        inner.config.connect_timeout,
        events_tx,
        inner.transport_state.clone(),
    )
    .await?;
    inner.mux.attach(connection.sink());

    let result = tokio::select! {
        result = consume(inner, &mut events_rx) => result,
        result = async {
            discover(inner).await?;

            inner.fanout.set_enabled(true);
            inner.fanout.connection_changed(true);
            *established = true;
            if std::mem::take(&mut *first_pending) {
                publish_first_result(inner, Ok(()));
            }

            keep_alive(inner).await
        } => result,
    };

    connection.close();
    result
}

/// Feed received lines to the client until the stream closes
async fn consume(inner: &Inner, events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Line(raw) => inner.handle_line(&raw),
            TransportEvent::Closed => break,
        }
    }
    Err(RussoundError::ConnectionClosed)
}

/// Probe the device with `VERSION` until a probe fails
async fn keep_alive(inner: &Inner) -> Result<()> {
    let period = inner.config.keep_alive_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tracing::debug!("Sending keep alive to device");
        if let Err(e) = inner.request(Command::Version).await {
            match &e {
                RussoundError::Timeout => {
                    tracing::warn!("Keep alive request to the Russound device timed out")
                }
                other => tracing::warn!("Keep alive request failed: {}", other),
            }
            tracing::debug!("Ending keep alive task to attempt reconnection");
            return Err(e);
        }
    }
}

/// Treat a command error as "not there" and pass anything else on
fn absent_on_command_error<T>(result: Result<Option<T>>) -> Result<Option<T>> {
    match result {
        Err(e) if e.is_command_error() => Ok(None),
        other => other,
    }
}

/// Version check, controller/source/zone enumeration and watches
async fn discover(inner: &Arc<Inner>) -> Result<()> {
    let version = inner.request(Command::Version).await?.unwrap_or_default();
    if !is_fw_version_higher(&version, MINIMUM_API_SUPPORT) {
        return Err(RussoundError::UnsupportedVersion {
            version,
            minimum: MINIMUM_API_SUPPORT.to_string(),
        });
    }
    tracing::info!("Connected (Russound RIO v{})", version);
    *inner.rio_version.write() = Some(version.clone());

    let mut controllers = BTreeMap::new();
    let primary = load_controller(inner, 1)
        .await?
        .ok_or(RussoundError::NoPrimaryController)?;
    let daisy_chain = is_daisy_chain_capable(&primary.controller_type);
    controllers.insert(1, primary);

    // Only search for daisy-chained controllers if the primary supports RNET
    if daisy_chain {
        for controller_id in 2..=inner.config.max_controllers {
            if let Some(controller) = load_controller(inner, controller_id).await? {
                controllers.insert(controller_id, controller);
            }
        }
    }

    let mut watches: Vec<String> = vec![SYSTEM_KEY.to_string()];

    let mut sources = BTreeSet::new();
    for source_id in 1..inner.config.max_sources {
        let path = source_path(source_id);
        match inner.get_variable(&path, "name").await {
            Ok(Some(name)) if !name.is_empty() => {
                sources.insert(source_id);
                watches.push(path);
            }
            Ok(_) => {}
            Err(e) if e.is_command_error() => break,
            Err(e) => return Err(e),
        }
    }

    for (controller_id, controller) in controllers.iter_mut() {
        for zone_id in 1..=max_zones_for_model(&controller.controller_type) {
            let path = zone_path(*controller_id, zone_id);
            match inner.get_variable(&path, "name").await {
                Ok(Some(name)) if !name.is_empty() => {
                    controller.zones.insert(zone_id);
                    watches.push(path);
                }
                Ok(_) => {}
                Err(e) if e.is_command_error() => break,
                Err(e) => return Err(e),
            }
        }
    }

    tracing::debug!(
        "Found {} controller(s), {} source(s)",
        controllers.len(),
        sources.len()
    );
    *inner.controllers.write() = controllers.clone();
    *inner.sources.write() = sources.clone();

    // Watches queue behind each other in the multiplexer
    let results = join_all(
        watches
            .iter()
            .map(|path| inner.subscribe(path, fanout_callback(inner, path))),
    )
    .await;
    for (path, result) in watches.iter().zip(results) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_command_error() => {
                tracing::warn!("Device refused to watch {}: {}", path, e);
            }
            Err(e) => return Err(e),
        }
    }

    if is_feature_supported(&version, FeatureFlag::SupportZoneSourceExclusion) {
        tracing::debug!("Zone source exclusion is supported. Fetching excluded sources.");
        load_zone_source_exclusion(inner, &controllers, &sources).await?;
    }

    Ok(())
}

/// Watch callback forwarding notifications to the client-level fan-out
fn fanout_callback(inner: &Inner, path: &str) -> WatchCallback {
    let fanout = inner.fanout.clone();
    let update = StateUpdate::for_branch(path);
    Arc::new(move |_msg: &WireMessage| fanout.state_changed(update.clone()))
}

async fn load_controller(inner: &Inner, controller_id: u32) -> Result<Option<Controller>> {
    let path = controller_path(controller_id);
    let controller_type = match absent_on_command_error(inner.get_variable(&path, "type").await)? {
        Some(controller_type) if !controller_type.is_empty() => controller_type,
        _ => return Ok(None),
    };

    let mac_address = absent_on_command_error(inner.get_variable(&path, "macAddress").await)?;

    let firmware_version = if inner.supports(FeatureFlag::PropertyFirmwareVersion) {
        absent_on_command_error(inner.get_variable(&path, "firmwareVersion").await)?
    } else {
        None
    };

    tracing::debug!("Found controller {} ({})", controller_id, controller_type);
    Ok(Some(Controller {
        controller_id,
        controller_type,
        mac_address,
        firmware_version,
        zones: BTreeSet::new(),
    }))
}

/// Record which sources each zone may select
async fn load_zone_source_exclusion(
    inner: &Inner,
    controllers: &BTreeMap<u32, Controller>,
    sources: &BTreeSet<u32>,
) -> Result<()> {
    for (controller_id, controller) in controllers {
        for zone_id in &controller.zones {
            let zone = zone_path(*controller_id, *zone_id);
            let mut enabled_sources = Vec::new();
            for source_id in sources {
                let path = format!("{}.{}", zone, source_path(*source_id));
                let enabled = absent_on_command_error(inner.get_variable(&path, "enabled").await)?;
                if enabled.as_deref() == Some("TRUE") {
                    enabled_sources.push(*source_id);
                }
            }
            inner
                .store
                .insert_local(&zone, "enabled_sources", json!(enabled_sources));
        }
    }
    Ok(())
}
