//! NDJSON framing: one JSON document per `\n`-terminated line.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame exceeds {max} bytes")]
    TooLarge { max: usize },
}

pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_len(inner, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_len(inner: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            max_len,
        }
    }

    /// Next raw line without its terminator; `None` on a clean end of stream.
    ///
    /// A frame over the limit leaves the stream mid-line, so callers should
    /// drop the connection after [`FrameError::TooLarge`].
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut buf = Vec::new();
        let limit = self.max_len as u64 + 1;
        let n = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        if buf.len() > self.max_len {
            return Err(FrameError::TooLarge { max: self.max_len });
        }
        Ok(Some(buf))
    }

    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, FrameError> {
        match self.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_slice(&line)?)),
            None => Ok(None),
        }
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> Result<(), FrameError> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RequestEnvelope, ResponseEnvelope};

    #[tokio::test]
    async fn frames_round_trip_over_a_pipe() {
        let (client, server) = tokio::io::duplex(1024);
        let (server_r, _server_w) = tokio::io::split(server);
        let (_client_r, client_w) = tokio::io::split(client);

        let mut writer = FrameWriter::new(client_w);
        let req = RequestEnvelope::new(1, "get", &serde_json::json!({ "session": 4 })).unwrap();
        writer.write_frame(&req).await.unwrap();
        writer
            .write_frame(&ResponseEnvelope::success(2, &serde_json::json!({})))
            .await
            .unwrap();
        writer.shutdown().await.unwrap();

        let mut reader = FrameReader::new(server_r);
        let got: RequestEnvelope = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(got, req);
        let resp: ResponseEnvelope = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(resp.id, 2);
        assert!(reader.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversize_frame_is_rejected() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_r, _server_w) = tokio::io::split(server);
        let (_client_r, mut client_w) = tokio::io::split(client);
        client_w.write_all(&[b'x'; 64]).await.unwrap();
        client_w.write_all(b"\n").await.unwrap();

        let mut reader = FrameReader::with_max_len(server_r, 16);
        assert!(matches!(
            reader.next_line().await,
            Err(FrameError::TooLarge { max: 16 })
        ));
    }

    #[tokio::test]
    async fn frame_at_the_limit_is_accepted() {
        let (client, server) = tokio::io::duplex(4096);
        let (server_r, _server_w) = tokio::io::split(server);
        let (_client_r, mut client_w) = tokio::io::split(client);
        client_w.write_all(&[b'y'; 16]).await.unwrap();
        client_w.write_all(b"\n").await.unwrap();

        let mut reader = FrameReader::with_max_len(server_r, 16);
        assert_eq!(reader.next_line().await.unwrap(), Some(vec![b'y'; 16]));
    }
}
