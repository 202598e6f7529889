//! Sun-RPC record marking (RFC 1057 §10): each message is split into one or
//! more fragments, each prefixed by a 4-byte header whose high bit marks
//! the last fragment and whose low 31 bits give the fragment's byte length.
//!
//! Real clients split large WRITEs across multiple fragments, so this
//! reader reassembles across fragments instead of requiring a single one.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Fragments are written at this size; only the final fragment of a
/// message carries the last-fragment bit.
const WRITE_FRAGMENT_SIZE: usize = 1024 * 1024;

const LAST_FRAGMENT_BIT: u32 = 1 << 31;

/// Reads one reassembled RPC message from `reader`. Returns `Ok(None)` if
/// the stream hit EOF cleanly before any fragment header was read (the
/// normal way a client closes a connection); any other EOF mid-fragment is
/// an `Error::Io`.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_total_len: usize,
) -> Result<Option<Vec<u8>>> {
    let mut message = Vec::new();
    loop {
        let mut header_buf = [0u8; 4];
        match reader.read_exact(&mut header_buf).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof && message.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(Error::Io(e)),
        }
        let header = u32::from_be_bytes(header_buf);
        let last = header & LAST_FRAGMENT_BIT != 0;
        let len = (header & !LAST_FRAGMENT_BIT) as usize;

        if message.len() + len > max_total_len {
            return Err(Error::xdr(format!(
                "reassembled message would exceed {max_total_len} bytes"
            )));
        }

        let start = message.len();
        message.resize(start + len, 0);
        reader.read_exact(&mut message[start..]).await?;

        if last {
            return Ok(Some(message));
        }
    }
}

/// Writes `message` as one or more record-marked fragments.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &[u8]) -> Result<()> {
    if message.is_empty() {
        let header = LAST_FRAGMENT_BIT;
        writer.write_all(&header.to_be_bytes()).await?;
        return Ok(());
    }

    let mut offset = 0;
    while offset < message.len() {
        let remaining = message.len() - offset;
        let chunk_len = remaining.min(WRITE_FRAGMENT_SIZE);
        let last = chunk_len == remaining;
        let mut header = chunk_len as u32;
        if last {
            header |= LAST_FRAGMENT_BIT;
        }
        writer.write_all(&header.to_be_bytes()).await?;
        writer.write_all(&message[offset..offset + chunk_len]).await?;
        offset += chunk_len;
    }
    writer.flush().await?;
    Ok(())
}
