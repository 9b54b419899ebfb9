use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::host::ElementSelector;
use crate::signal::source::compile_pattern;
use crate::signal::{CompareMode, ParserKind, ResponseFormat};

pub const DEFAULT_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_MAX_FAILURES: u32 = 3;
pub const DEFAULT_RESUME_DELAY_MS: u64 = 1000; // settle time after the page becomes visible
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

/// What to do when the signal is absent or unparseable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingSignalPolicy {
    /// Count it like any other failed read.
    #[default]
    CountFailure,
    /// Reload at once if a baseline exists; the page structure changed.
    Reload,
}

/// Watcher configuration. Immutable once the watcher is attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Page element, or HTML pattern for remote `html` responses.
    #[serde(default)]
    pub selector: ElementSelector,

    #[serde(default)]
    pub parser: ParserKind,

    #[serde(default)]
    pub compare: CompareMode,

    /// Reload every interval without looking at the signal.
    #[serde(default)]
    pub force_reload: bool,

    /// When set, the signal is fetched from here instead of the page.
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default)]
    pub response_format: ResponseFormat,

    /// Field tried before the recognized ones.
    #[serde(default)]
    pub response_field: Option<String>,

    /// Hard reload after this long without a successful poll.
    #[serde(default)]
    pub fallback_ms: Option<u64>,

    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    #[serde(default)]
    pub missing_signal: MissingSignalPolicy,

    #[serde(default)]
    pub show_manual_control: bool,

    #[serde(default = "default_manual_control_label")]
    pub manual_control_label: String,

    #[serde(default = "default_value_key")]
    pub value_key: String,

    #[serde(default = "default_scroll_key")]
    pub scroll_key: String,

    #[serde(default = "default_resume_delay_ms")]
    pub resume_delay_ms: u64,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Persist slots to this file instead of process memory.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

pub fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

pub fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

pub fn default_manual_control_label() -> String {
    "Refresh".to_string()
}

pub fn default_value_key() -> String {
    "active_count".to_string()
}

pub fn default_scroll_key() -> String {
    "scroll_position".to_string()
}

pub fn default_resume_delay_ms() -> u64 {
    DEFAULT_RESUME_DELAY_MS
}

pub fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT_MS
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            selector: ElementSelector::default(),
            parser: ParserKind::default(),
            compare: CompareMode::default(),
            force_reload: false,
            remote_url: None,
            response_format: ResponseFormat::default(),
            response_field: None,
            fallback_ms: None,
            max_failures: default_max_failures(),
            missing_signal: MissingSignalPolicy::default(),
            show_manual_control: false,
            manual_control_label: default_manual_control_label(),
            value_key: default_value_key(),
            scroll_key: default_scroll_key(),
            resume_delay_ms: default_resume_delay_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            state_file: None,
        }
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fallback(&self) -> Option<Duration> {
        self.fallback_ms.map(Duration::from_millis)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.resume_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_ms == 0 {
            return Err(invalid("interval_ms must be greater than zero"));
        }
        if self.max_failures == 0 {
            return Err(invalid("max_failures must be greater than zero"));
        }
        if self.fallback_ms == Some(0) {
            return Err(invalid("fallback_ms must be greater than zero when set"));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(invalid("fetch_timeout_ms must be greater than zero"));
        }
        if self.value_key.trim().is_empty() || self.scroll_key.trim().is_empty() {
            return Err(invalid("storage keys must not be empty"));
        }
        if self.value_key == self.scroll_key {
            return Err(invalid("value_key and scroll_key must differ"));
        }
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(&format!("remote_url '{}' must be http(s)", url)));
            }
            if self.response_format == ResponseFormat::Html
                && !matches!(self.selector, ElementSelector::Pattern { .. })
            {
                return Err(invalid("response_format = \"html\" needs a pattern selector"));
            }
        }
        if let ElementSelector::Pattern { regex } = &self.selector {
            compile_pattern(regex)?;
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}
