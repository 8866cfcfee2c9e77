//! Newline-delimited JSON frame codec over any async byte stream.
//!
//! Each frame is a single JSON object terminated by `\n`. Blank lines
//! between frames are ignored.

use std::io;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum allowed frame length, terminator included (16 MiB).
const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Serializes `msg` into a `\n`-terminated JSON frame.
pub fn encode(msg: &impl Serialize) -> io::Result<Vec<u8>> {
    let mut frame =
        serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if frame.len() >= MAX_FRAME {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "frame exceeds 16 MiB limit",
        ));
    }
    frame.push(b'\n');
    Ok(frame)
}

/// Parses one frame, with or without its line terminator.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> io::Result<T> {
    let body = frame.trim_ascii_end();
    serde_json::from_slice(body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes `msg` as one frame to `w`.
///
/// The caller decides when to flush.
pub async fn send<W: AsyncWrite + Unpin>(w: &mut W, msg: &impl Serialize) -> io::Result<()> {
    let frame = encode(msg)?;
    w.write_all(&frame).await
}

/// Reads the next non-blank frame from `r` without decoding it.
///
/// Returns `UnexpectedEof` at end of stream. An oversized line is
/// `InvalidData`; the stream is left mid-line and should be dropped.
pub async fn read_frame<R: AsyncBufRead + Unpin>(r: &mut R) -> io::Result<Vec<u8>> {
    let limit = u64::try_from(MAX_FRAME).unwrap_or(u64::MAX);
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = (&mut *r).take(limit).read_until(b'\n', &mut line).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if n == MAX_FRAME && line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds 16 MiB limit",
            ));
        }
        if !line.trim_ascii().is_empty() {
            return Ok(line);
        }
    }
}

/// Reads and decodes the next frame from `r`.
pub async fn recv<T: DeserializeOwned, R: AsyncBufRead + Unpin>(r: &mut R) -> io::Result<T> {
    let frame = read_frame(r).await?;
    decode(&frame)
}
