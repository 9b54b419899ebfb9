//! Loading watcher configuration from TOML.
//!
//! Precedence, lowest first: built-in defaults, the `--config` file, then
//! command-line flags (applied by the binary).

use std::fs;
use std::path::Path;

use crate::config::WatchConfig;
use crate::errors::ConfigError;

pub fn from_toml_str(content: &str, origin: &str) -> Result<WatchConfig, ConfigError> {
    let config: WatchConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Load and validate a config file. A missing file is an error here, since
/// the caller asked for it by name.
pub fn load_config_file(path: &Path) -> Result<WatchConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound {
                path: path.display().to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };
    from_toml_str(&content, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MissingSignalPolicy;
    use crate::host::ElementSelector;
    use crate::signal::CompareMode;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = from_toml_str(
            r##"
interval_ms = 2000
compare = "any_change"
missing_signal = "reload"

[selector]
kind = "text"
css = "#pending"
"##,
            "inline",
        )
        .unwrap();

        assert_eq!(config.interval_ms, 2000);
        assert_eq!(config.compare, CompareMode::AnyChange);
        assert_eq!(config.missing_signal, MissingSignalPolicy::Reload);
        assert_eq!(
            config.selector,
            ElementSelector::Text {
                css: "#pending".to_string()
            }
        );
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.value_key, "active_count");
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = from_toml_str("interval_ms = \"soon\"", "board.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == "board.toml"));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let err = from_toml_str("max_failures = 0", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = load_config_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kitchen.toml");
        fs::write(
            &path,
            "remote_url = \"http://127.0.0.1:8000/ice/api/active-count/\"\nfallback_ms = 300000\n",
        )
        .unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(
            config.remote_url.as_deref(),
            Some("http://127.0.0.1:8000/ice/api/active-count/")
        );
        assert_eq!(config.fallback_ms, Some(300_000));
    }
}
