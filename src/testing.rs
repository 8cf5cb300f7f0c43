//! An in-process [`Transport`] double that lets protocol-client and
//! orchestrator tests exercise exact wire bytes without a real socket.
//!
//! A single `ScriptedTransport` stands in for the one continuous
//! connection the engine re-uses across every hop, so a multi-hop test
//! script is just the concatenation of what every hop in sequence would
//! have written to the wire.

use crate::transport::{Connector, Transport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

struct ScriptedState {
    /// Bytes the scripted peer will hand back, in read order.
    to_read: VecDeque<u8>,
    /// Every byte this side has written, in write order.
    written: Vec<u8>,
    closed: bool,
}

/// A cloneable handle onto one scripted stream. Clones share state, so a
/// test can keep a handle after moving a `Box<dyn Transport>` copy into an
/// `Engine`.
#[derive(Clone)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedTransport {
    /// `script` is the exact byte sequence the peer will reply with, in
    /// order, regardless of how the reads are chunked by the client under
    /// test.
    pub fn new(script: Vec<u8>) -> Self {
        ScriptedTransport {
            state: Arc::new(Mutex::new(ScriptedState {
                to_read: VecDeque::from(script),
                written: Vec::new(),
                closed: false,
            })),
        }
    }

    pub async fn written(&self) -> Vec<u8> {
        self.state.lock().await.written.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().await;
        if state.to_read.len() < n {
            return Err(TransportError::Read(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "scripted transport ran out of bytes",
            )));
        }
        Ok((0..n).map(|_| state.to_read.pop_front().unwrap()).collect())
    }

    async fn read_until_crlf(&mut self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().await;
        let mut line = Vec::new();
        loop {
            if line.len() >= max_bytes {
                return Err(TransportError::Protocol(format!(
                    "line exceeded {max_bytes} bytes without a CRLF terminator"
                )));
            }
            let byte = state.to_read.pop_front().ok_or_else(|| {
                TransportError::Read(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "scripted transport ran out of bytes before a CRLF",
                ))
            })?;
            line.push(byte);
            if line.ends_with(b"\r\n") {
                return Ok(line);
            }
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

/// A [`Connector`] that hands back one pre-built [`ScriptedTransport`],
/// regardless of the address/port it's asked to open — the engine-level
/// integration tests only ever open one simulated connection per chain.
pub(crate) struct ScriptedConnector {
    transport: Mutex<Option<ScriptedTransport>>,
}

impl ScriptedConnector {
    pub fn new(transport: ScriptedTransport) -> Self {
        ScriptedConnector {
            transport: Mutex::new(Some(transport)),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, _address: &str, _port: u16) -> Result<Box<dyn Transport>, TransportError> {
        let transport = self
            .transport
            .lock()
            .await
            .take()
            .expect("ScriptedConnector::open called more than once");
        Ok(Box::new(transport))
    }
}

/// A [`Connector`] whose `open` always fails, for exercising hop-1
/// retry/backoff behavior.
pub(crate) struct FailingConnector;

#[async_trait]
impl Connector for FailingConnector {
    async fn open(&self, address: &str, port: u16) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::Connect {
            address: address.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "scripted failure"),
        })
    }
}

/// A [`Transport`] whose peer never replies: every read sleeps for a fixed
/// delay before producing any bytes. Used to exercise the orchestrator's
/// per-step/total deadline races (spec.md S6) without an actually-hanging
/// test — the outer `tokio::time::timeout` always fires first and drops
/// this future mid-sleep.
pub(crate) struct StallingTransport {
    delay: std::time::Duration,
}

impl StallingTransport {
    pub fn new(delay: std::time::Duration) -> Self {
        StallingTransport { delay }
    }
}

#[async_trait]
impl Transport for StallingTransport {
    async fn read_exact(&mut self, _n: usize) -> Result<Vec<u8>, TransportError> {
        tokio::time::sleep(self.delay).await;
        Err(TransportError::Read(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "stalling transport never replies",
        )))
    }

    async fn read_until_crlf(&mut self, _max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        tokio::time::sleep(self.delay).await;
        Err(TransportError::Read(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "stalling transport never replies",
        )))
    }

    async fn write_all(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// A [`Connector`] that hands back a fresh [`StallingTransport`] on open.
pub(crate) struct StallingConnector {
    delay: std::time::Duration,
}

impl StallingConnector {
    pub fn new(delay: std::time::Duration) -> Self {
        StallingConnector { delay }
    }
}

#[async_trait]
impl Connector for StallingConnector {
    async fn open(&self, _address: &str, _port: u16) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(StallingTransport::new(self.delay)))
    }
}
