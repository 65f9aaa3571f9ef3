use crate::client::RussoundClient;
use crate::error::Result;
use crate::features::FeatureFlag;
use crate::path::{controller_path, source_path, zone_path};
use crate::protocol::Command;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::str::FromStr;

/// Parse a numeric variable; values that do not parse are treated as absent
fn number_from_string<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.trim().parse().ok()))
}

/// `ON`/`TRUE` are true, anything else (including absent) is false
fn bool_from_string<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(matches!(
        value.as_deref().map(str::to_ascii_uppercase).as_deref(),
        Some("ON") | Some("TRUE")
    ))
}

/// Zone state as pushed by the controller
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Zone {
    pub name: Option<String>,
    #[serde(deserialize_with = "number_from_string")]
    pub volume: Option<u8>,
    #[serde(deserialize_with = "number_from_string")]
    pub bass: Option<i8>,
    #[serde(deserialize_with = "number_from_string")]
    pub treble: Option<i8>,
    #[serde(deserialize_with = "number_from_string")]
    pub balance: Option<i8>,
    #[serde(deserialize_with = "bool_from_string")]
    pub loudness: bool,
    #[serde(deserialize_with = "number_from_string")]
    pub turn_on_volume: Option<u8>,
    #[serde(deserialize_with = "bool_from_string")]
    pub do_not_disturb: bool,
    /// `ON`, `OFF` or `MASTER`
    pub party_mode: Option<String>,
    #[serde(deserialize_with = "bool_from_string")]
    pub status: bool,
    #[serde(rename = "mute", deserialize_with = "bool_from_string")]
    pub is_mute: bool,
    #[serde(deserialize_with = "bool_from_string")]
    pub shared_source: bool,
    pub last_error: Option<String>,
    pub page: Option<String>,
    #[serde(deserialize_with = "number_from_string")]
    pub sleep_time_default: Option<u32>,
    #[serde(deserialize_with = "number_from_string")]
    pub sleep_time_remaining: Option<u32>,
    #[serde(deserialize_with = "bool_from_string")]
    pub enabled: bool,
    #[serde(deserialize_with = "number_from_string")]
    pub current_source: Option<u32>,
    /// Sources this zone may select; filled in by the client, not the device
    #[serde(rename = "enabled_sources")]
    pub enabled_sources: Vec<u32>,
}

impl Zone {
    /// Decode a cached zone subtree
    pub fn from_tree(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// Source state as pushed by the controller
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Source {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub source_type: Option<String>,
    pub channel: Option<String>,
    #[serde(rename = "coverArtURL")]
    pub cover_art_url: Option<String>,
    pub channel_name: Option<String>,
    pub genre: Option<String>,
    pub artist_name: Option<String>,
    pub album_name: Option<String>,
    pub playlist_name: Option<String>,
    pub song_name: Option<String>,
    pub program_service_name: Option<String>,
    pub radio_text: Option<String>,
    pub shuffle_mode: Option<String>,
    pub repeat_mode: Option<String>,
    pub mode: Option<String>,
    pub play_status: Option<String>,
    pub sample_rate: Option<String>,
    pub bit_rate: Option<String>,
    pub bit_depth: Option<String>,
    #[serde(deserialize_with = "number_from_string")]
    pub play_time: Option<u32>,
    #[serde(deserialize_with = "number_from_string")]
    pub track_time: Option<u32>,
}

impl Source {
    /// Decode a cached source subtree
    pub fn from_tree(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A controller found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub controller_id: u32,
    /// Model string, e.g. `MCA-88`
    pub controller_type: String,
    pub mac_address: Option<String>,
    /// Only queried when the API version exposes it
    pub firmware_version: Option<String>,
    pub zones: BTreeSet<u32>,
}

impl Controller {
    /// Device path, e.g. `C[1]`
    pub fn path(&self) -> String {
        controller_path(self.controller_id)
    }
}

/// Control surface for one zone
///
/// Holds the zone's address and a client handle; state reads come from the
/// client's cache and commands go through its request queue.
#[derive(Clone)]
pub struct ZoneControl {
    client: RussoundClient,
    controller_id: u32,
    zone_id: u32,
    path: String,
}

impl ZoneControl {
    pub(crate) fn new(client: RussoundClient, controller_id: u32, zone_id: u32) -> Self {
        Self {
            client,
            controller_id,
            zone_id,
            path: zone_path(controller_id, zone_id),
        }
    }

    /// Controller the zone belongs to
    pub fn controller_id(&self) -> u32 {
        self.controller_id
    }

    /// Zone number on its controller
    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    /// Device path, e.g. `C[1].Z[2]`
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Cached zone state; empty until the controller has pushed it
    pub fn state(&self) -> Result<Zone> {
        match self.client.get_cached(&self.path) {
            Some(tree) => Zone::from_tree(&tree),
            None => Ok(Zone::default()),
        }
    }

    /// Cached state of the source this zone is playing
    pub fn current_source(&self) -> Result<Option<Source>> {
        match self.state()?.current_source {
            Some(source_id) => self.client.source(source_id),
            None => Ok(None),
        }
    }

    /// Send an event to this zone
    pub async fn send_event<I, A>(&self, name: &str, args: I) -> Result<Option<String>>
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.client
            .request(Command::event(self.path.as_str(), name, args))
            .await
    }

    async fn key_press(&self, key: &str) -> Result<Option<String>> {
        self.send_event("KeyPress", [key]).await
    }

    /// Mute the zone; needs API 1.09.00
    pub async fn mute(&self) -> Result<Option<String>> {
        self.client
            .ensure_feature_supported(FeatureFlag::CommandsZoneMuteOffOn)?;
        self.send_event("ZoneMuteOn", Vec::<String>::new()).await
    }

    /// Unmute the zone; needs API 1.09.00
    pub async fn unmute(&self) -> Result<Option<String>> {
        self.client
            .ensure_feature_supported(FeatureFlag::CommandsZoneMuteOffOn)?;
        self.send_event("ZoneMuteOff", Vec::<String>::new()).await
    }

    /// Set the volume, 0 to 50
    pub async fn set_volume(&self, volume: u8) -> Result<Option<String>> {
        self.send_event("KeyPress", ["Volume".to_string(), volume.to_string()])
            .await
    }

    /// Raise the volume one step
    pub async fn volume_up(&self) -> Result<Option<String>> {
        self.key_press("VolumeUp").await
    }

    /// Lower the volume one step
    pub async fn volume_down(&self) -> Result<Option<String>> {
        self.key_press("VolumeDown").await
    }

    /// Previous track on the current source
    pub async fn previous(&self) -> Result<Option<String>> {
        self.key_press("Previous").await
    }

    /// Next track on the current source
    pub async fn next(&self) -> Result<Option<String>> {
        self.key_press("Next").await
    }

    /// Stop playback
    pub async fn stop(&self) -> Result<Option<String>> {
        self.key_press("Stop").await
    }

    /// Pause playback
    pub async fn pause(&self) -> Result<Option<String>> {
        self.key_press("Pause").await
    }

    /// Resume playback
    pub async fn play(&self) -> Result<Option<String>> {
        self.key_press("Play").await
    }

    /// Turn the zone on
    pub async fn zone_on(&self) -> Result<Option<String>> {
        self.send_event("ZoneOn", Vec::<String>::new()).await
    }

    /// Turn the zone off
    pub async fn zone_off(&self) -> Result<Option<String>> {
        self.send_event("ZoneOff", Vec::<String>::new()).await
    }

    /// Switch the zone to `source_id`
    pub async fn select_source(&self, source_id: u32) -> Result<Option<String>> {
        self.send_event("SelectSource", [source_id]).await
    }

    /// Path of a source as seen from this zone, e.g. `C[1].Z[2].S[3]`
    pub fn source_path(&self, source_id: u32) -> String {
        format!("{}.{}", self.path, source_path(source_id))
    }
}

impl std::fmt::Debug for ZoneControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZoneControl")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zone_from_tree() {
        let tree = json!({
            "name": "Kitchen",
            "volume": "30",
            "bass": "-3",
            "mute": "ON",
            "status": "OFF",
            "turnOnVolume": "20",
            "currentSource": "2",
            "partyMode": "MASTER",
            "lastError": null,
            "enabled_sources": [1, 2],
            "S": { "1": { "enabled": "TRUE" } }
        });
        let zone = Zone::from_tree(&tree).unwrap();

        assert_eq!(zone.name.as_deref(), Some("Kitchen"));
        assert_eq!(zone.volume, Some(30));
        assert_eq!(zone.bass, Some(-3));
        assert!(zone.is_mute);
        assert!(!zone.status);
        assert_eq!(zone.turn_on_volume, Some(20));
        assert_eq!(zone.current_source, Some(2));
        assert_eq!(zone.party_mode.as_deref(), Some("MASTER"));
        assert_eq!(zone.last_error, None);
        assert_eq!(zone.enabled_sources, vec![1, 2]);
    }

    #[test]
    fn test_zone_tolerates_bad_numbers() {
        let zone = Zone::from_tree(&json!({ "volume": "loud" })).unwrap();
        assert_eq!(zone.volume, None);
        assert_eq!(Zone::from_tree(&json!({})).unwrap(), Zone::default());
    }

    #[test]
    fn test_source_from_tree() {
        let tree = json!({
            "name": "Streamer",
            "type": "Media Server",
            "coverArtURL": "http://example.invalid/art.jpg",
            "songName": "Track",
            "artistName": null,
            "playTime": "42"
        });
        let source = Source::from_tree(&tree).unwrap();

        assert_eq!(source.name.as_deref(), Some("Streamer"));
        assert_eq!(source.source_type.as_deref(), Some("Media Server"));
        assert_eq!(
            source.cover_art_url.as_deref(),
            Some("http://example.invalid/art.jpg")
        );
        assert_eq!(source.song_name.as_deref(), Some("Track"));
        assert_eq!(source.artist_name, None);
        assert_eq!(source.play_time, Some(42));
    }
}
