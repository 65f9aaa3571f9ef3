use thiserror::Error;

/// Result type for Russound operations
pub type Result<T> = std::result::Result<T, RussoundError>;

/// Errors that can occur when talking to a Russound controller
#[derive(Error, Debug)]
pub enum RussoundError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection went away while the request was queued or in flight
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request issued while no connection is established
    #[error("Not connected")]
    NotConnected,

    /// Request timed out waiting for a reply
    #[error("Request timeout")]
    Timeout,

    /// Device answered the command with an `E` line
    #[error("Command error: {0}")]
    Command(String),

    /// Device speaks an API version older than the client supports
    #[error("Russound RIO API v{version} is not supported, the minimum supported version is v{minimum}")]
    UnsupportedVersion {
        /// Version reported by the device
        version: String,
        /// Minimum version this client accepts
        minimum: String,
    },

    /// Feature is gated behind a newer API version than the device reports
    #[error("Russound feature {feature} not supported in api v{version}")]
    UnsupportedFeature {
        /// Name of the feature flag
        feature: String,
        /// Version reported by the device
        version: String,
    },

    /// Variable has not been pushed by the device yet
    #[error("Variable {key} is not cached for {path}")]
    UncachedVariable {
        /// Device path that was looked up
        path: String,
        /// Variable name that was looked up
        key: String,
    },

    /// Controller 1 did not answer during discovery
    #[error("No primary controller found")]
    NoPrimaryController,

    /// State receiver fell behind and missed updates
    #[error("Lagged by {0} messages")]
    Lagged(u64),

    /// Cached state could not be decoded into a typed view
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RussoundError {
    /// Whether the device itself rejected the command
    pub fn is_command_error(&self) -> bool {
        matches!(self, RussoundError::Command(_))
    }

    /// Copy of this error for handing one outcome to several waiters
    ///
    /// Wrapped I/O and JSON errors keep their kind and message but lose
    /// their source chain.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            RussoundError::Io(e) => RussoundError::Io(std::io::Error::new(e.kind(), e.to_string())),
            RussoundError::ConnectionClosed => RussoundError::ConnectionClosed,
            RussoundError::NotConnected => RussoundError::NotConnected,
            RussoundError::Timeout => RussoundError::Timeout,
            RussoundError::Command(payload) => RussoundError::Command(payload.clone()),
            RussoundError::UnsupportedVersion { version, minimum } => {
                RussoundError::UnsupportedVersion {
                    version: version.clone(),
                    minimum: minimum.clone(),
                }
            }
            RussoundError::UnsupportedFeature { feature, version } => {
                RussoundError::UnsupportedFeature {
                    feature: feature.clone(),
                    version: version.clone(),
                }
            }
            RussoundError::UncachedVariable { path, key } => RussoundError::UncachedVariable {
                path: path.clone(),
                key: key.clone(),
            },
            RussoundError::NoPrimaryController => RussoundError::NoPrimaryController,
            RussoundError::Lagged(n) => RussoundError::Lagged(*n),
            RussoundError::Json(e) => {
                RussoundError::Json(<serde_json::Error as serde::de::Error>::custom(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keeps_variant_and_message() {
        let io = RussoundError::Io(std::io::ErrorKind::ConnectionRefused.into());
        match io.duplicate() {
            RussoundError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionRefused),
            other => panic!("unexpected error {:?}", other),
        }

        let version = RussoundError::UnsupportedVersion {
            version: "1.02.00".to_string(),
            minimum: "1.05.00".to_string(),
        };
        assert_eq!(version.duplicate().to_string(), version.to_string());
        assert!(RussoundError::Command("x".into()).duplicate().is_command_error());
    }
}
