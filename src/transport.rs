//! The abstract byte-stream the protocol clients and the orchestrator
//! operate on, plus the native TCP backing.
//!
//! Protocol clients never see a `TcpStream` directly: they only know
//! `read_exact` / `read_until_crlf` / `write_all` / `close`, so the same
//! client code runs identically against a real socket or against the
//! scripted double in [`crate::testing`].

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Errors surfaced by a [`Transport`]. Never formats credentials; there
/// are none to format here in the first place, but protocol-client errors
/// built on top of this one must preserve that property too.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect to {address}:{port}: {source}")]
    Connect {
        address: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("protocol framing error: {0}")]
    Protocol(String),
}

/// A bidirectional byte stream opened to a single host:port.
///
/// Reads and writes are strictly ordered; the engine never performs
/// concurrent reads on the same stream. There is no framing above raw
/// bytes — callers frame their own protocol messages.
#[async_trait]
pub trait Transport: Send {
    /// Reads exactly `n` bytes, or fails if the peer closes first.
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError>;

    /// Reads bytes up to and including the first `\r\n`. Fails with
    /// `TransportError::Protocol` if `max_bytes` is exceeded without
    /// finding the delimiter.
    async fn read_until_crlf(&mut self, max_bytes: usize) -> Result<Vec<u8>, TransportError>;

    /// Writes all bytes or fails.
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Idempotent: safe to call more than once, and safe on a half-open
    /// stream.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Native TCP backing for [`Transport`].
pub struct TcpTransport {
    stream: TcpStream,
    closed: bool,
}

impl TcpTransport {
    /// Opens a TCP connection to `address:port`. `address` may be an IPv4
    /// literal, an IPv6 literal, or a DNS name — resolution is delegated to
    /// `tokio`'s `ToSocketAddrs`.
    pub async fn open(address: &str, port: u16) -> Result<TcpTransport, TransportError> {
        let stream =
            TcpStream::connect((address, port))
                .await
                .map_err(|source| TransportError::Connect {
                    address: address.to_string(),
                    port,
                    source,
                })?;
        Ok(TcpTransport {
            stream,
            closed: false,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.stream
            .read_exact(&mut buf)
            .await
            .map_err(TransportError::Read)?;
        Ok(buf)
    }

    async fn read_until_crlf(&mut self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut line = Vec::new();
        loop {
            if line.len() >= max_bytes {
                return Err(TransportError::Protocol(format!(
                    "line exceeded {max_bytes} bytes without a CRLF terminator"
                )));
            }
            let mut byte = [0u8; 1];
            let n = self
                .stream
                .read(&mut byte)
                .await
                .map_err(TransportError::Read)?;
            if n == 0 {
                return Err(TransportError::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the stream before sending a CRLF",
                )));
            }
            line.push(byte[0]);
            if line.ends_with(b"\r\n") {
                return Ok(line);
            }
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream
            .write_all(bytes)
            .await
            .map_err(TransportError::Write)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // A shutdown on an already-broken socket can legitimately fail;
        // either way the resource is released on drop.
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

/// Opens the first hop of a chain. Exists so the orchestrator can be
/// driven against [`crate::testing::ScriptedTransport`] in tests without
/// touching a real socket; production code always uses [`TcpConnector`].
#[async_trait]
pub(crate) trait Connector: Send + Sync {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Transport>, TransportError>;
}

pub(crate) struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Transport>, TransportError> {
        TcpTransport::open(address, port)
            .await
            .map(|t| Box::new(t) as Box<dyn Transport>)
    }
}
