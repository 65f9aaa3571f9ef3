//! RIO API versions and the features they unlock

use crate::error::{Result, RussoundError};
use regex_lite::Regex;
use std::fmt;
use std::sync::LazyLock;

static FW_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{2})\.(\d{2})$").expect("firmware pattern is valid")
});

/// Capabilities of the RIO API that depend on the negotiated version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureFlag {
    SupportPowerMgmt,
    SupportZoneParameters,
    SupportSourceParameters,
    SupportControllerParameters,
    SupportSystemParameters,
    SupportDms31Mm,
    EventKeyCode,
    PropertyIpAddress,
    SupportShuffle,
    CommandMmClose,
    SupportPageZone,
    SupportRepeat,
    PropertyCtrlType,
    PropertySysLang,
    NotificationSysLang,
    SupportMmLongList,
    TemplatesMmScreen,
    PropertySleepTimeRemaining,
    SupportPresetsBanks,
    SupportFavorites,
    SupportZoneSourceExclusion,
    SupportForms,
    SupportMediaRating,
    SupportHiddenAttribute,
    SupportSystemFavoriteRename,
    CommandsZoneMuteOffOn,
    SupportWatchFavorites,
    SupportSystem,
    SupportDeviceGrouping,
    SupportAlarm,
    NotificationAlarmZoneWatch,
    PropertyFirmwareVersion,
    SupportMbxDisplayItems,
    PropertyPlayStatus,
    PropertyAvailableControls,
    PropertySampleRate,
    PropertyBitRate,
    PropertyBitDepth,
    PropertyPlayTime,
    PropertyTrackTime,
    PropertySetSeekTime,
    SupportMmContextMenu,
    PropertySleepTimeDefault,
    PropertySupportSleepTime,
    EventReboot,
    SupportSystemFavoriteSource,
    AttributeUserLogin,
}

use FeatureFlag::*;

/// Features introduced by each API version, oldest first
pub static FLAGS_BY_VERSION: &[(&str, &[FeatureFlag])] = &[
    ("1.01.00", &[SupportPowerMgmt]),
    (
        "1.02.00",
        &[
            SupportZoneParameters,
            SupportSourceParameters,
            SupportControllerParameters,
            SupportSystemParameters,
        ],
    ),
    ("1.03.00", &[SupportDms31Mm, EventKeyCode, PropertyIpAddress]),
    ("1.04.00", &[SupportShuffle, CommandMmClose, SupportPageZone]),
    ("1.05.00", &[SupportRepeat, PropertyCtrlType, PropertySysLang]),
    (
        "1.06.00",
        &[NotificationSysLang, SupportMmLongList, TemplatesMmScreen],
    ),
    (
        "1.07.00",
        &[
            PropertySleepTimeRemaining,
            SupportPresetsBanks,
            SupportFavorites,
            SupportZoneSourceExclusion,
            SupportForms,
            SupportMediaRating,
            SupportHiddenAttribute,
        ],
    ),
    ("1.08.00", &[SupportSystemFavoriteRename]),
    ("1.09.00", &[CommandsZoneMuteOffOn]),
    ("1.11.00", &[SupportWatchFavorites]),
    (
        "1.12.00",
        &[SupportSystem, SupportDeviceGrouping, SupportAlarm],
    ),
    ("1.12.01", &[NotificationAlarmZoneWatch]),
    ("1.12.02", &[PropertyFirmwareVersion]),
    (
        "1.14.00",
        &[
            SupportMbxDisplayItems,
            PropertyPlayStatus,
            PropertyAvailableControls,
            PropertySampleRate,
            PropertyBitRate,
            PropertyBitDepth,
            PropertyPlayTime,
            PropertyTrackTime,
            PropertySetSeekTime,
            SupportMmContextMenu,
        ],
    ),
    (
        "1.14.01",
        &[PropertySleepTimeDefault, PropertySupportSleepTime],
    ),
    ("1.15.00", &[EventReboot, SupportSystemFavoriteSource]),
    ("1.15.02", &[AttributeUserLogin]),
];

impl FeatureFlag {
    /// API version that introduced this feature
    pub fn min_version(self) -> &'static str {
        FLAGS_BY_VERSION
            .iter()
            .find(|(_, flags)| flags.contains(&self))
            .map(|(version, _)| *version)
            .expect("every feature flag appears in the version table")
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn parse_version(version: &str) -> Option<(u32, u32, u32)> {
    let caps = FW_PATTERN.captures(version)?;
    Some((
        caps[1].parse().ok()?,
        caps[2].parse().ok()?,
        caps[3].parse().ok()?,
    ))
}

/// Whether `fw_a` is greater than or equal to `fw_b`
///
/// Versions are `major.minor.patch` with a one or two digit major and two
/// digit minor and patch. Malformed versions never compare as higher.
pub fn is_fw_version_higher(fw_a: &str, fw_b: &str) -> bool {
    match (parse_version(fw_a), parse_version(fw_b)) {
        (Some(a), Some(b)) => a >= b,
        _ => false,
    }
}

/// Whether `flag` is available on a device speaking `api_version`
pub fn is_feature_supported(api_version: &str, flag: FeatureFlag) -> bool {
    is_fw_version_higher(api_version, flag.min_version())
}

/// Fail with [`RussoundError::UnsupportedFeature`] unless `flag` is available
pub fn ensure_feature_supported(api_version: &str, flag: FeatureFlag) -> Result<()> {
    if is_feature_supported(api_version, flag) {
        Ok(())
    } else {
        Err(RussoundError::UnsupportedFeature {
            feature: flag.to_string(),
            version: api_version.to_string(),
        })
    }
}

/// All features available on a device speaking `api_version`
pub fn supported_features(api_version: &str) -> Vec<FeatureFlag> {
    FLAGS_BY_VERSION
        .iter()
        .filter(|(version, _)| is_fw_version_higher(api_version, version))
        .flat_map(|(_, flags)| flags.iter().copied())
        .collect()
}
