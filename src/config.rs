use std::time::Duration;

/// Default RIO TCP port
pub const DEFAULT_PORT: u16 = 9621;

/// Oldest RIO API version the client will talk to
pub const MINIMUM_API_SUPPORT: &str = "1.05.00";

/// Branch path of the system-wide variables
pub const SYSTEM_KEY: &str = "System";

/// Number of system favorite slots, `System.favorite[1]` through `[32]`
pub const MAX_SYSTEM_FAVORITES: u32 = 32;

/// Value the device reports for "no data"
pub const EMPTY_VALUE_PLACEHOLDER: &str = "------";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_MAX_CONTROLLERS: u32 = 6;
const DEFAULT_MAX_SOURCES: u32 = 17;

/// Tunables for a [`RussoundClient`](crate::RussoundClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time allowed for the stream to open
    pub connect_timeout: Duration,
    /// Time allowed for each request to be answered
    pub request_timeout: Duration,
    /// Period of the keep-alive `VERSION` probe
    pub keep_alive_interval: Duration,
    /// First reconnect delay, doubled on every failed attempt
    pub reconnect_base_delay: Duration,
    /// Upper bound for the reconnect delay
    pub reconnect_max_delay: Duration,
    /// Highest controller id probed on an RNET daisy chain
    pub max_controllers: u32,
    /// Source ids are probed in `1..max_sources`
    pub max_sources: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_TIMEOUT,
            request_timeout: DEFAULT_TIMEOUT,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            max_controllers: DEFAULT_MAX_CONTROLLERS,
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }
}

impl ClientConfig {
    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the keep-alive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the reconnect backoff bounds
    pub fn with_reconnect_delay(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max.max(base);
        self
    }

    /// Set how many daisy-chained controllers are probed
    pub fn with_max_controllers(mut self, max_controllers: u32) -> Self {
        self.max_controllers = max_controllers;
        self
    }

    /// Set the exclusive upper bound for source ids
    pub fn with_max_sources(mut self, max_sources: u32) -> Self {
        self.max_sources = max_sources;
        self
    }
}
