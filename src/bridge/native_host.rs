use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::HostError;
use crate::host::{ElementSelector, PageEvent, PageHost};
use crate::native_messaging::{HostCommand, PageMessage, read_message, write_command};

/// What the session loop needs to hear about from the page.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Loaded { url: String },
    Page(PageEvent),
}

pub type CommandSender = mpsc::UnboundedSender<HostCommand>;
pub type CommandReceiver = mpsc::UnboundedReceiver<HostCommand>;
pub type BridgeSender = mpsc::UnboundedSender<BridgeEvent>;
pub type BridgeReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

pub fn create_command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

pub fn create_bridge_channel() -> (BridgeSender, BridgeReceiver) {
    mpsc::unbounded_channel()
}

/// The browser page, reached through the extension's native messaging port.
pub struct NativeHost {
    commands: CommandSender,
    pending: PendingQueries,
    next_id: AtomicU64,
    scroll: Mutex<f64>,
}

impl NativeHost {
    pub fn new(commands: CommandSender) -> Self {
        Self {
            commands,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            scroll: Mutex::new(0.0),
        }
    }

    /// Forget everything tied to the previous page view.
    pub fn reset_page(&self) {
        lock(&self.pending).clear();
        *lock(&self.scroll) = 0.0;
    }

    /// Route one inbound message. Query results and scroll reports are
    /// absorbed here; everything else is handed back to the session loop.
    pub fn dispatch(&self, message: PageMessage) -> Option<BridgeEvent> {
        match message {
            PageMessage::Loaded { url } => Some(BridgeEvent::Loaded { url }),
            PageMessage::Visibility { visible } => {
                Some(BridgeEvent::Page(PageEvent::Visibility(visible)))
            }
            PageMessage::ManualRefresh => Some(BridgeEvent::Page(PageEvent::ManualRefresh)),
            PageMessage::Scroll { offset } => {
                *lock(&self.scroll) = offset;
                None
            }
            PageMessage::QueryResult { id, value } => {
                match lock(&self.pending).remove(&id) {
                    Some(reply) => {
                        // the asker may have timed out already
                        let _ = reply.send(value);
                    }
                    None => debug!(event = "bridge.query_result_orphaned", id = id),
                }
                None
            }
        }
    }

    fn send(&self, command: HostCommand) -> Result<(), HostError> {
        self.commands
            .send(command)
            .map_err(|_| HostError::Disconnected)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type PendingQueries = Mutex<HashMap<u64, oneshot::Sender<Option<String>>>>;

/// Drops the reply slot when the asker goes away, answered or not.
struct PendingQuery<'a> {
    pending: &'a PendingQueries,
    id: u64,
}

impl Drop for PendingQuery<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

impl PageHost for NativeHost {
    async fn query(&self, selector: &ElementSelector) -> Result<Option<String>, HostError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(id, reply_tx);
        let _slot = PendingQuery {
            pending: &self.pending,
            id,
        };

        self.send(HostCommand::Query {
            id,
            selector: selector.clone(),
        })?;

        reply_rx.await.map_err(|_| HostError::Disconnected)
    }

    fn scroll_offset(&self) -> f64 {
        *lock(&self.scroll)
    }

    fn scroll_to(&self, offset: f64) {
        *lock(&self.scroll) = offset;
        if let Err(e) = self.send(HostCommand::ScrollTo { offset }) {
            warn!(event = "bridge.scroll_send_failed", error = %e);
        }
    }

    fn reload(&self) {
        if let Err(e) = self.send(HostCommand::Reload) {
            warn!(event = "bridge.reload_send_failed", error = %e);
        }
    }

    fn show_manual_control(&self, label: &str) {
        if let Err(e) = self.send(HostCommand::ShowManualControl {
            label: label.to_string(),
        }) {
            warn!(event = "bridge.control_send_failed", error = %e);
        }
    }
}

/// Pump inbound frames into `host` until the stream ends.
///
/// Dropping `events` on return tells the session loop the page is gone.
pub fn spawn_reader<R>(mut reader: R, host: Arc<NativeHost>, events: BridgeSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(message)) => {
                    debug!(event = "bridge.message_received", message = ?message);
                    if let Some(event) = host.dispatch(message) {
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {
                    info!(event = "bridge.input_closed");
                    break;
                }
                Err(HostError::Codec(e)) => {
                    warn!(event = "bridge.message_invalid", error = %e);
                }
                Err(e) => {
                    error!(event = "bridge.read_failed", error = %e);
                    break;
                }
            }
        }
    })
}

/// Write queued commands to the page until every sender is gone.
pub fn spawn_writer<W>(mut writer: W, mut commands: CommandReceiver) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if let Err(e) = write_command(&mut writer, &command).await {
                error!(event = "bridge.write_failed", error = %e);
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    #[tokio::test]
    async fn test_query_round_trip() {
        let (tx, mut rx) = create_command_channel();
        let host = Arc::new(NativeHost::new(tx));

        let asker = {
            let host = host.clone();
            tokio::spawn(async move { host.query(&ElementSelector::default()).await })
        };

        let Some(HostCommand::Query { id, .. }) = rx.recv().await else {
            panic!("expected a query command");
        };
        assert_eq!(
            host.dispatch(PageMessage::QueryResult {
                id,
                value: Some("4".to_string())
            }),
            None
        );

        assert_eq!(asker.await.unwrap().unwrap(), Some("4".to_string()));
    }

    #[tokio::test]
    async fn test_query_fails_when_bridge_gone() {
        let (tx, rx) = create_command_channel();
        drop(rx);
        let host = NativeHost::new(tx);

        let err = host.query(&ElementSelector::default()).await.unwrap_err();
        assert!(matches!(err, HostError::Disconnected));
    }

    #[tokio::test]
    async fn test_reset_page_fails_outstanding_queries() {
        let (tx, mut rx) = create_command_channel();
        let host = Arc::new(NativeHost::new(tx));

        let asker = {
            let host = host.clone();
            tokio::spawn(async move { host.query(&ElementSelector::default()).await })
        };
        rx.recv().await.unwrap();
        host.reset_page();

        assert!(matches!(
            asker.await.unwrap(),
            Err(HostError::Disconnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_query_releases_its_slot() {
        let (tx, mut rx) = create_command_channel();
        let host = NativeHost::new(tx);

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            host.query(&ElementSelector::default()),
        )
        .await;

        assert!(result.is_err());
        assert!(matches!(rx.recv().await, Some(HostCommand::Query { .. })));
        assert!(lock(&host.pending).is_empty());
    }

    #[test]
    fn test_scroll_reports_are_tracked() {
        let (tx, _rx) = create_command_channel();
        let host = NativeHost::new(tx);

        assert_eq!(host.dispatch(PageMessage::Scroll { offset: 220.5 }), None);
        assert_eq!(host.scroll_offset(), 220.5);
        assert_eq!(
            host.dispatch(PageMessage::Visibility { visible: false }),
            Some(BridgeEvent::Page(PageEvent::Visibility(false)))
        );
    }

    #[tokio::test]
    async fn test_reader_forwards_events_and_closes() {
        let (tx, _rx) = create_command_channel();
        let host = Arc::new(NativeHost::new(tx));
        let (events_tx, mut events_rx) = create_bridge_channel();

        let mut input = Vec::new();
        for json in [
            r#"{"type":"loaded","url":"http://venue.local/food/kitchen/"}"#,
            r#"{"type":"bogus"}"#,
            r#"{"type":"scroll","offset":40}"#,
            r#"{"type":"manual_refresh"}"#,
        ] {
            input.extend((json.len() as u32).to_ne_bytes());
            input.extend(json.as_bytes());
        }

        spawn_reader(std::io::Cursor::new(input), host.clone(), events_tx)
            .await
            .unwrap();

        assert_eq!(
            events_rx.recv().await,
            Some(BridgeEvent::Loaded {
                url: "http://venue.local/food/kitchen/".to_string()
            })
        );
        assert_eq!(
            events_rx.recv().await,
            Some(BridgeEvent::Page(PageEvent::ManualRefresh))
        );
        assert_eq!(events_rx.recv().await, None);
        assert_eq!(host.scroll_offset(), 40.0);
    }

    #[tokio::test]
    async fn test_writer_frames_commands() {
        let (tx, rx) = create_command_channel();
        let (client, mut server) = duplex(4096);
        let writer = spawn_writer(client, rx);

        tx.send(HostCommand::Reload).unwrap();
        drop(tx);
        writer.await.unwrap();

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();
        assert_eq!(&bytes[4..], br#"{"type":"reload"}"#);
    }
}
