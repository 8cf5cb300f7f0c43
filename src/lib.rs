//! # proxy-chain
//!
//! An asynchronous engine for tunneling a single TCP connection through an
//! ordered chain of SOCKS4/SOCKS4a, SOCKS5, and HTTP CONNECT proxies,
//! negotiating each hop over one re-used transport connection.

pub mod address;
pub mod chain;
pub mod clients;
pub mod descriptor;
pub mod general;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{ChainError, Engine, TunnelHandle};
pub use descriptor::{ChainDescriptor, ConfigError, Credentials, ProxyDescriptor, ProxyKind};
pub use general::{ConnectionReport, EngineConfig, EngineStats, StepKind, StepOutcome, StepRecord};
pub use transport::{Transport, TransportError};
