//! Connection configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known name of the producer's shared-memory object.
pub const DEFAULT_MEMORY_MAP_NAME: &str = "Local\\IRSDKMemMapFileName";
/// Well-known name of the producer's data-ready event.
pub const DEFAULT_DATA_READY_EVENT_NAME: &str = "Local\\IRSDKDataValidEvent";
/// Header version this crate understands.
pub const DEFAULT_EXPECTED_VERSION: i32 = 2;

/// Settings for a [`Connection`](super::Connection).
///
/// ```rust
/// use std::time::Duration;
/// use simlink::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_idle_timeout(Duration::from_secs(5))
///     .with_connect_poll_interval(Duration::from_millis(100));
/// assert_eq!(options.expected_version, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Name of the shared-memory object to map.
    pub memory_map_name: String,
    /// Name of the auto-reset event the producer signals after each write.
    pub data_ready_event_name: String,
    /// How long the worker tolerates silence before treating the producer as
    /// gone. Can be changed on a live connection.
    pub idle_timeout: Duration,
    /// Pause between attempts to find the producer while opening.
    pub connect_poll_interval: Duration,
    /// Required header version.
    pub expected_version: i32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            memory_map_name: DEFAULT_MEMORY_MAP_NAME.to_string(),
            data_ready_event_name: DEFAULT_DATA_READY_EVENT_NAME.to_string(),
            idle_timeout: Duration::from_secs(30),
            connect_poll_interval: Duration::from_millis(250),
            expected_version: DEFAULT_EXPECTED_VERSION,
        }
    }
}

impl ConnectionOptions {
    pub fn with_memory_map_name(mut self, name: impl Into<String>) -> Self {
        self.memory_map_name = name.into();
        self
    }

    pub fn with_data_ready_event_name(mut self, name: impl Into<String>) -> Self {
        self.data_ready_event_name = name.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_connect_poll_interval(mut self, interval: Duration) -> Self {
        self.connect_poll_interval = interval;
        self
    }

    pub fn with_expected_version(mut self, version: i32) -> Self {
        self.expected_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_sdk_names() {
        let options = ConnectionOptions::default();
        assert_eq!(options.memory_map_name, "Local\\IRSDKMemMapFileName");
        assert_eq!(options.data_ready_event_name, "Local\\IRSDKDataValidEvent");
        assert_eq!(options.idle_timeout, Duration::from_secs(30));
        assert_eq!(options.connect_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn builder_overrides_fields() {
        let options = ConnectionOptions::default()
            .with_memory_map_name("Local\\Test")
            .with_data_ready_event_name("Local\\TestEvent")
            .with_expected_version(3);
        assert_eq!(options.memory_map_name, "Local\\Test");
        assert_eq!(options.data_ready_event_name, "Local\\TestEvent");
        assert_eq!(options.expected_version, 3);
    }
}
