//! Line-delimited JSON transport over a loopback TCP stream.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::wire::{HandshakeMessage, MAX_FRAME_BYTES};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge,
    #[error("connection closed mid-frame")]
    Truncated,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One handshake connection. Owns both halves of the stream; dropping it
/// closes the socket.
pub struct LineTransport {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl LineTransport {
    pub fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            line: String::new(),
        }
    }

    pub async fn send(&mut self, msg: &HandshakeMessage) -> Result<(), TransportError> {
        let line = serde_json::to_string(msg)
            .map_err(|err| TransportError::Malformed(err.to_string()))?
            + "\n";
        if line.len() > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge);
        }
        self.send_raw(&line).await
    }

    /// Write bytes without framing checks.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next message, or `None` once the peer has closed the connection.
    /// Blank lines are skipped.
    pub async fn receive(&mut self) -> Result<Option<HandshakeMessage>, TransportError> {
        loop {
            self.line.clear();
            let read = match (&mut self.reader)
                .take(MAX_FRAME_BYTES as u64)
                .read_line(&mut self.line)
                .await
            {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    return Err(TransportError::Malformed(err.to_string()))
                }
                Err(err) => return Err(err.into()),
            };

            if read == 0 {
                return Ok(None);
            }
            if !self.line.ends_with('\n') {
                if read >= MAX_FRAME_BYTES {
                    return Err(TransportError::FrameTooLarge);
                }
                return Err(TransportError::Truncated);
            }

            let raw = self.line.trim();
            if raw.is_empty() {
                continue;
            }
            return serde_json::from_str(raw)
                .map(Some)
                .map_err(|err| TransportError::Malformed(err.to_string()));
        }
    }

    /// Flush and shut down the write half, then drop the connection.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
