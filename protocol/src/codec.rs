//! Line-delimited JSON framing.

use std::io;

use ratewire_common::RatewireError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Largest accepted frame, excluding the newline.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A complete frame was not valid JSON for the expected message.
    /// The frame has been consumed; the stream can keep being read.
    #[error("Malformed frame: {0}")]
    Decode(serde_json::Error),

    /// Message could not be serialized.
    #[error("Failed to encode frame: {0}")]
    Encode(serde_json::Error),

    /// Peer sent a line longer than [`MAX_FRAME_LEN`].
    #[error("Frame exceeds {MAX_FRAME_LEN} bytes")]
    FrameTooLarge,
}

impl ProtocolError {
    /// Whether reading can continue after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::Decode(_))
    }
}

impl From<ProtocolError> for RatewireError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => RatewireError::Io(e),
            other => RatewireError::Protocol(other.to_string()),
        }
    }
}

/// Reads frames from a byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            line: String::new(),
        }
    }

    /// Read the next frame, or `None` once the peer has closed its side.
    ///
    /// Blank lines are skipped. Not cancel safe: dropping the future part
    /// way through a frame loses the bytes read so far.
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        loop {
            self.line.clear();
            let read = (&mut self.inner)
                .take(MAX_FRAME_LEN as u64 + 1)
                .read_line(&mut self.line)
                .await?;

            if read == 0 {
                return Ok(None);
            }
            if read > MAX_FRAME_LEN && !self.line.ends_with('\n') {
                return Err(ProtocolError::FrameTooLarge);
            }

            let frame = self.line.trim();
            if frame.is_empty() {
                continue;
            }

            return serde_json::from_str(frame)
                .map(Some)
                .map_err(ProtocolError::Decode);
        }
    }
}

/// Writes frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write one frame and flush it.
    pub async fn write_frame<T: Serialize>(&mut self, frame: &T) -> Result<(), ProtocolError> {
        let mut bytes = serde_json::to_vec(frame).map_err(ProtocolError::Encode)?;
        bytes.push(b'\n');

        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ClientMessage, ServerMessage};
    use ratewire_common::Currency;

    #[tokio::test]
    async fn test_frames_cross_a_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer
            .write_frame(&ClientMessage::subscribe(Currency::Eur, Currency::Gbp))
            .await
            .unwrap();
        writer
            .write_frame(&ClientMessage::get_rate(1, Currency::Usd, Currency::Usd))
            .await
            .unwrap();
        drop(writer);

        let first: Option<ClientMessage> = reader.read_frame().await.unwrap();
        assert_eq!(first, Some(ClientMessage::subscribe(Currency::Eur, Currency::Gbp)));
        let second: Option<ClientMessage> = reader.read_frame().await.unwrap();
        assert!(matches!(second, Some(ClientMessage::GetRate { request_id: 1, .. })));
        let end: Option<ClientMessage> = reader.read_frame().await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_recoverable() {
        let input: &[u8] = b"not json\n\n{\"type\":\"subscribe\",\"base\":\"EUR\",\"destination\":\"USD\"}";
        let mut reader = FrameReader::new(input);

        let err = reader.read_frame::<ClientMessage>().await.unwrap_err();
        assert!(err.is_recoverable());

        // Last frame has no trailing newline.
        let frame: Option<ClientMessage> = reader.read_frame().await.unwrap();
        assert_eq!(frame, Some(ClientMessage::subscribe(Currency::Eur, Currency::Usd)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let input = vec![b'x'; MAX_FRAME_LEN + 10];
        let mut reader = FrameReader::new(input.as_slice());

        let err = reader.read_frame::<ServerMessage>().await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge));
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn test_write_after_peer_closed_fails() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut writer = FrameWriter::new(client);

        let result = writer
            .write_frame(&ClientMessage::subscribe(Currency::Eur, Currency::Gbp))
            .await;
        tokio_test::assert_err!(result);
    }
}
