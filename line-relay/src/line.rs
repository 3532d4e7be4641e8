use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Line that asks the relay to close the sending client's connection.
pub const STOP_COMMAND: &str = "STOP";

/// Longest accepted line in bytes, `\n` terminator included.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// A single inbound line after trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// The client asked to disconnect.
    Stop,
    /// Any other line, relayed to every client.
    Text(&'a str),
}

impl<'a> Inbound<'a> {
    /// Interprets a raw line as received from the socket. Surrounding whitespace,
    /// including the `\r\n` terminator, is not part of the payload.
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if trimmed == STOP_COMMAND {
            Inbound::Stop
        } else {
            Inbound::Text(trimmed)
        }
    }
}

/// Reads the next complete line into `buf`, up to [`MAX_LINE_LEN`] bytes.
///
/// Returns `Ok(false)` once the peer has closed its side. A trailing fragment
/// without a `\n` terminator is discarded together with the EOF that follows it.
pub async fn read_line<R>(reader: &mut R, buf: &mut String) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    read_bounded_line(reader, buf, MAX_LINE_LEN).await
}

/// Like [`read_line`] with an explicit limit. A line longer than `limit` is an
/// `InvalidData` error.
pub async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut String,
    limit: usize,
) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let bytes = reader.take(limit as u64).read_line(buf).await?;
    if buf.ends_with('\n') {
        return Ok(true);
    }
    if bytes == limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {limit} bytes"),
        ));
    }
    Ok(false)
}

/// Writes `line` followed by a single `\n` and flushes so peers see it promptly.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
