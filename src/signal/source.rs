use regex::Regex;
use std::future::Future;
use std::sync::Arc;

use crate::errors::{ConfigError, WatchError};
use crate::host::{ElementSelector, PageHost};
use crate::signal::remote::RemoteSource;

/// Produces the raw signal text for one poll cycle.
pub trait SignalSource: Send + Sync {
    /// `Ok(None)` means the read worked but the signal was not there.
    fn read(&self) -> impl Future<Output = Result<Option<String>, WatchError>> + Send;
}

pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::Invalid {
        message: format!("invalid signal pattern '{}': {}", pattern, e),
    })
}

/// First capture group of `regex` in `text`, or the whole match.
pub(crate) fn apply_pattern(regex: &Regex, text: &str) -> Option<String> {
    let captures = regex.captures(text)?;
    captures
        .get(1)
        .or_else(|| captures.get(0))
        .map(|m| m.as_str().to_string())
}

/// Reads the signal from the currently loaded page.
pub struct PageSource<H> {
    host: Arc<H>,
    selector: ElementSelector,
    pattern: Option<Regex>,
}

impl<H: PageHost> PageSource<H> {
    pub fn new(host: Arc<H>, selector: ElementSelector) -> Result<Self, ConfigError> {
        let pattern = match &selector {
            ElementSelector::Pattern { regex } => Some(compile_pattern(regex)?),
            _ => None,
        };
        Ok(Self {
            host,
            selector,
            pattern,
        })
    }
}

impl<H: PageHost> SignalSource for PageSource<H> {
    async fn read(&self) -> Result<Option<String>, WatchError> {
        match &self.pattern {
            Some(regex) => {
                let body = ElementSelector::Text {
                    css: "body".to_string(),
                };
                let text = self.host.query(&body).await?;
                Ok(text.and_then(|t| apply_pattern(regex, &t)))
            }
            None => Ok(self.host.query(&self.selector).await?),
        }
    }
}

/// The source picked by configuration: page DOM unless a remote URL is set.
pub enum ConfiguredSource<H> {
    Page(PageSource<H>),
    Remote(RemoteSource),
}

impl<H: PageHost> SignalSource for ConfiguredSource<H> {
    async fn read(&self) -> Result<Option<String>, WatchError> {
        match self {
            ConfiguredSource::Page(source) => source.read().await,
            ConfiguredSource::Remote(source) => source.read().await,
        }
    }
}
