use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::HostError;
use crate::host::ElementSelector;

/// Browsers cap host-bound messages at 1 MiB.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Messages sent by the page script through the browser extension.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageMessage {
    Loaded { url: String },
    Visibility { visible: bool },
    Scroll { offset: f64 },
    QueryResult { id: u64, value: Option<String> },
    ManualRefresh,
}

/// Commands sent back to the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    Query { id: u64, selector: ElementSelector },
    ScrollTo { offset: f64 },
    Reload,
    ShowManualControl { label: String },
}

/// Read one message using the native messaging framing: a 4-byte length in
/// native byte order followed by that many bytes of JSON.
///
/// Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<PageMessage>, HostError>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];

    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None); // No more messages
        }
        Err(e) => return Err(e.into()),
    }

    let length = u32::from_ne_bytes(length_bytes) as usize;
    if length > MAX_FRAME_LEN {
        return Err(HostError::FrameTooLarge {
            len: length,
            max: MAX_FRAME_LEN,
        });
    }

    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).await?;

    Ok(Some(serde_json::from_slice(&buffer)?))
}

/// Write one command with the same framing.
pub async fn write_command<W>(writer: &mut W, command: &HostCommand) -> Result<(), HostError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(command)?;
    let length = u32::try_from(json.len()).map_err(|_| HostError::FrameTooLarge {
        len: json.len(),
        max: MAX_FRAME_LEN,
    })?;

    writer.write_all(&length.to_ne_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}
