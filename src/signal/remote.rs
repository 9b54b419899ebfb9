use regex::Regex;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::errors::{ConfigError, WatchError};
use crate::host::ElementSelector;
use crate::signal::source::{SignalSource, apply_pattern, compile_pattern};

/// Response fields that carry the signal, in lookup order.
pub const RECOGNIZED_FIELDS: [&str; 5] =
    ["active_count", "count", "pending_orders", "pending", "value"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    /// Refetch a page and match a text pattern against its body.
    Html,
}

/// Polls an HTTP endpoint for the signal.
pub struct RemoteSource {
    client: reqwest::Client,
    url: String,
    format: ResponseFormat,
    field: Option<String>,
    pattern: Option<Regex>,
}

impl RemoteSource {
    pub fn new(
        url: &str,
        format: ResponseFormat,
        field: Option<String>,
        selector: &ElementSelector,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let pattern = match (format, selector) {
            (ResponseFormat::Html, ElementSelector::Pattern { regex }) => {
                Some(compile_pattern(regex)?)
            }
            (ResponseFormat::Html, _) => {
                return Err(ConfigError::Invalid {
                    message: "html responses need a pattern selector".to_string(),
                });
            }
            (ResponseFormat::Json, _) => None,
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            format,
            field,
            pattern,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SignalSource for RemoteSource {
    async fn read(&self) -> Result<Option<String>, WatchError> {
        let response = self
            .client
            .get(&self.url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|source| WatchError::Request {
                url: self.url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        match self.format {
            ResponseFormat::Json => {
                let body: Value = response.json().await.map_err(|e| WatchError::Payload {
                    message: e.to_string(),
                })?;
                let raw = extract_field(&body, self.field.as_deref());
                debug!(event = "signal.remote_read_completed", url = %self.url, raw = ?raw);
                Ok(raw)
            }
            ResponseFormat::Html => {
                let text = response
                    .text()
                    .await
                    .map_err(|source| WatchError::Request {
                        url: self.url.clone(),
                        source,
                    })?;
                Ok(self
                    .pattern
                    .as_ref()
                    .and_then(|regex| apply_pattern(regex, &text)))
            }
        }
    }
}

/// Pull the signal out of a JSON payload.
///
/// `preferred` is tried before the recognized fields. Each name is looked
/// up at the top level, then under `data`.
pub fn extract_field(body: &Value, preferred: Option<&str>) -> Option<String> {
    if let Some(raw) = scalar(body) {
        return Some(raw);
    }

    let nested = body.get("data");
    preferred
        .into_iter()
        .chain(RECOGNIZED_FIELDS)
        .find_map(|name| {
            body.get(name)
                .and_then(scalar)
                .or_else(|| nested.and_then(|data| data.get(name)).and_then(scalar))
        })
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answer exactly one HTTP request, returning the request head.
    async fn serve_once(status: &str, content_type: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            content_type,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&request).to_lowercase()
        });

        (format!("http://{}/api/active-count", addr), handle)
    }

    fn json_source(url: &str, field: Option<&str>) -> RemoteSource {
        RemoteSource::new(
            url,
            ResponseFormat::Json,
            field.map(str::to_string),
            &ElementSelector::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_field_priority() {
        let body = json!({ "count": 2, "active_count": 7 });
        assert_eq!(extract_field(&body, None), Some("7".to_string()));
        assert_eq!(extract_field(&body, Some("count")), Some("2".to_string()));
    }

    #[test]
    fn test_extract_field_nested_data() {
        let body = json!({
            "status": "healthy",
            "data": { "total_orders": 40, "pending_orders": 3 }
        });
        assert_eq!(extract_field(&body, None), Some("3".to_string()));
        assert_eq!(
            extract_field(&body, Some("total_orders")),
            Some("40".to_string())
        );
    }

    #[test]
    fn test_extract_field_missing_or_unusable() {
        assert_eq!(extract_field(&json!({ "status": "ok" }), None), None);
        assert_eq!(extract_field(&json!({ "count": [1, 2] }), None), None);
        assert_eq!(extract_field(&json!(12), None), Some("12".to_string()));
    }

    #[test]
    fn test_html_format_requires_pattern() {
        let result = RemoteSource::new(
            "http://localhost/board",
            ResponseFormat::Html,
            None,
            &ElementSelector::default(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_remote_read_sends_no_cache_headers() {
        let (url, server) = serve_once("200 OK", "application/json", r#"{"active_count": 5}"#).await;
        let source = json_source(&url, None);

        assert_eq!(source.read().await.unwrap(), Some("5".to_string()));

        let request = server.await.unwrap();
        assert!(request.starts_with("get /api/active-count"));
        assert!(request.contains("cache-control: no-cache"));
        assert!(request.contains("x-requested-with: xmlhttprequest"));
    }

    #[tokio::test]
    async fn test_remote_non_success_status_is_error() {
        let (url, _server) = serve_once(
            "503 Service Unavailable",
            "application/json",
            r#"{"status": "unhealthy"}"#,
        )
        .await;
        let source = json_source(&url, None);

        let err = source.read().await.unwrap_err();
        assert!(matches!(err, WatchError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_remote_malformed_json_is_payload_error() {
        let (url, _server) = serve_once("200 OK", "application/json", "<html>oops</html>").await;
        let source = json_source(&url, None);

        let err = source.read().await.unwrap_err();
        assert_eq!(err.error_code(), "MALFORMED_PAYLOAD");
    }

    #[tokio::test]
    async fn test_remote_html_pattern() {
        let (url, _server) = serve_once(
            "200 OK",
            "text/html",
            "<p data-active-count>Pending orders: 11</p>",
        )
        .await;
        let source = RemoteSource::new(
            &url,
            ResponseFormat::Html,
            None,
            &ElementSelector::Pattern {
                regex: r"Pending orders:\s*(\d+)".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(source.read().await.unwrap(), Some("11".to_string()));
    }
}
