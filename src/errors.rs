use std::time::Duration;

/// Failures while reading the watched signal.
///
/// None of these are fatal to the watcher. They are counted, and the worst
/// case remedy is a page reload.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{url}' answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed payload: {message}")]
    Payload { message: String },

    #[error("signal read timed out after {0:?}")]
    Timeout(Duration),

    #[error("page host error: {0}")]
    Host(#[from] HostError),

    #[error("storage error: {message}")]
    Storage { message: String },
}

impl WatchError {
    /// Stable code used in structured log events.
    pub fn error_code(&self) -> &'static str {
        match self {
            WatchError::Request { .. } => "REQUEST_FAILED",
            WatchError::Status { .. } => "BAD_STATUS",
            WatchError::Payload { .. } => "MALFORMED_PAYLOAD",
            WatchError::Timeout(_) => "READ_TIMEOUT",
            WatchError::Host(_) => "HOST_ERROR",
            WatchError::Storage { .. } => "STORAGE_ERROR",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found at '{path}'")]
    NotFound { path: String },

    #[error("Failed to parse config file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("IO error reading config: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Failures talking to the page through the native-messaging bridge.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("page bridge disconnected")]
    Disconnected,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("invalid message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("bridge IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display() {
        let error = WatchError::Status {
            url: "http://venue.local/api/count".to_string(),
            status: 503,
        };
        assert_eq!(
            error.to_string(),
            "'http://venue.local/api/count' answered with status 503"
        );
        assert_eq!(error.error_code(), "BAD_STATUS");
    }

    #[test]
    fn test_host_error_converts_into_watch_error() {
        let error: WatchError = HostError::Disconnected.into();
        assert_eq!(error.error_code(), "HOST_ERROR");
        assert_eq!(error.to_string(), "page host error: page bridge disconnected");
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::Invalid {
            message: "interval_ms must be greater than zero".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration: interval_ms must be greater than zero"
        );
    }
}
