//! Rust client for the Russound RIO control protocol
//!
//! RIO is a line-oriented text protocol spoken by Russound multi-zone audio
//! controllers over TCP (port 9621) or RS-232. This library provides an async
//! API that:
//!
//! - Correlates `GET`/`SET`/`WATCH`/`EVENT` commands with their replies
//! - Mirrors pushed state for the system, sources and zones
//! - Enumerates daisy-chained controllers, sources and zones on connect
//! - Keeps the connection alive and reconnects with exponential backoff
//! - Gates version-dependent features on the negotiated API version
//!
//! # Quick Start
//!
//! ```no_run
//! use russound_rio::{RussoundClient, StateUpdate};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RussoundClient::tcp("192.168.1.50", 9621);
//!     client.connect().await?;
//!
//!     // Control a zone
//!     let zone = client.zone(1, 1);
//!     zone.zone_on().await?;
//!     zone.set_volume(25).await?;
//!
//!     // Follow state updates
//!     let mut updates = client.subscribe_state();
//!     while let Ok(update) = updates.recv().await {
//!         if let StateUpdate::Zone { controller_id, zone_id } = update {
//!             let state = client.zone(controller_id, zone_id).state()?;
//!             println!("Zone {} volume {:?}", zone_id, state.volume);
//!             break;
//!         }
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Client**: public façade shared by all clones
//! - **Supervisor**: discovery, keep-alive and reconnect loop
//! - **Multiplexer**: one command in flight, replies matched by order
//! - **Connection**: stream ownership, read and write loops
//! - **Store**: state tree fed by notifications, per-path watchers
//! - **Protocol**: line parsing and command formatting

mod client;
mod config;
mod connection;
mod error;
mod features;
mod models;
mod multiplexer;
pub mod path;
mod protocol;
mod store;
mod subscription;
mod supervisor;

// Public exports
pub use client::RussoundClient;
pub use config::{
    ClientConfig, DEFAULT_PORT, EMPTY_VALUE_PLACEHOLDER, MAX_SYSTEM_FAVORITES,
    MINIMUM_API_SUPPORT, SYSTEM_KEY,
};
pub use connection::{BoxedStream, ConnectionState, Connector, RioStream, TcpConnector};
pub use error::{Result, RussoundError};
pub use features::{
    ensure_feature_supported, is_feature_supported, is_fw_version_higher, supported_features,
    FeatureFlag, FLAGS_BY_VERSION,
};
pub use models::{Controller, Source, Zone, ZoneControl};
pub use protocol::{parse_line, Command, MessageKind, WireMessage};
pub use store::WatchCallback;
pub use subscription::{CallbackHandle, StateReceiver, StateUpdate};
