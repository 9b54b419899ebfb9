use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bridge::native_host::{BridgeEvent, BridgeReceiver, NativeHost};
use crate::config::WatchConfig;
use crate::errors::ConfigError;
use crate::signal::{ConfiguredSource, PageSource, RemoteSource};
use crate::storage::SessionStore;
use crate::watcher::{WatchExit, Watcher};

/// Build the signal source the config asks for.
pub fn build_source<H>(config: &WatchConfig, host: Arc<H>) -> Result<ConfiguredSource<H>, ConfigError>
where
    H: crate::host::PageHost,
{
    match &config.remote_url {
        Some(url) => Ok(ConfiguredSource::Remote(RemoteSource::new(
            url,
            config.response_format,
            config.response_field.clone(),
            &config.selector,
            config.fetch_timeout(),
        )?)),
        None => Ok(ConfiguredSource::Page(PageSource::new(
            host,
            config.selector.clone(),
        )?)),
    }
}

/// Attach a watcher to every page view until the page bridge closes.
///
/// Each `loaded` message is a new page view with a fresh watcher. A load that
/// arrives while a watcher is running (the viewer navigated on their own)
/// stops that watcher and starts the next one.
pub async fn serve(
    config: WatchConfig,
    host: Arc<NativeHost>,
    mut inbound: BridgeReceiver,
    store: Arc<dyn SessionStore>,
) -> Result<(), ConfigError> {
    config.validate()?;
    let mut next_load: Option<String> = None;
    let mut views = 0u64;

    loop {
        let url = match next_load.take() {
            Some(url) => url,
            None => match wait_for_load(&mut inbound).await {
                Some(url) => url,
                None => break,
            },
        };

        views += 1;
        info!(event = "bridge.page_loaded", url = %url, view = views);
        host.reset_page();

        let source = build_source(&config, host.clone())?;
        let watcher = Watcher::attach(config.clone(), source, host.clone(), store.clone()).await?;

        let (page_tx, page_rx) = mpsc::unbounded_channel();
        let run = watcher.run(page_rx);
        tokio::pin!(run);

        let mut closed = false;
        let exit = loop {
            tokio::select! {
                exit = &mut run => break exit,
                message = inbound.recv(), if !closed => match message {
                    Some(BridgeEvent::Page(event)) => {
                        // run only drops its receiver after returning
                        let _ = page_tx.send(event);
                    }
                    Some(BridgeEvent::Loaded { url }) => {
                        next_load = Some(url);
                        watcher.stop();
                    }
                    None => {
                        closed = true;
                        watcher.stop();
                    }
                },
            }
        };

        info!(event = "bridge.page_view_ended", view = views, exit = ?exit);
        if closed {
            break;
        }
        if exit == WatchExit::Stopped && next_load.is_none() {
            break;
        }
    }

    info!(event = "bridge.serve_completed", views = views);
    Ok(())
}

async fn wait_for_load(inbound: &mut BridgeReceiver) -> Option<String> {
    while let Some(event) = inbound.recv().await {
        match event {
            BridgeEvent::Loaded { url } => return Some(url),
            BridgeEvent::Page(event) => {
                debug!(event = "bridge.event_before_load", page_event = ?event);
            }
        }
    }
    None
}
