//! The chain descriptor data model: the hop-by-hop proxy list a caller
//! hands to [`crate::chain::Engine::build_chain`], and its on-the-wire /
//! on-disk `serde` shape.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which protocol a hop speaks. `Http` also covers the source's `"https"`
/// spelling — the distinction only matters to an outer TLS caller, not to
/// this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    Socks5,
    Socks4,
    Http,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyKind::Socks5 => "socks5",
            ProxyKind::Socks4 => "socks4",
            ProxyKind::Http => "http",
        })
    }
}

impl Serialize for ProxyKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProxyKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "socks5" => Ok(ProxyKind::Socks5),
            "socks4" => Ok(ProxyKind::Socks4),
            "http" | "https" => Ok(ProxyKind::Http),
            other => Err(serde::de::Error::custom(format!(
                "unknown proxy kind `{other}`, expected one of socks5, socks4, http, https"
            ))),
        }
    }
}

/// Credentials carried by a SOCKS5 (RFC 1929) or HTTP (Basic) hop.
/// SOCKS4's user-ID is carried directly on [`ProxyDescriptor::username`]
/// instead, since SOCKS4 has no password field.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

/// One hop in a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub address: String,
    pub port: u16,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyDescriptor {
    pub fn new(address: impl Into<String>, port: u16, kind: ProxyKind) -> Self {
        ProxyDescriptor {
            address: address.into(),
            port,
            kind,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Credentials for SOCKS5 sub-negotiation or HTTP Basic auth. `None`
    /// unless at least one of `username`/`password` is set. Not meaningful
    /// for SOCKS4 hops, which read `username` directly as the user-ID.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.username.is_none() && self.password.is_none() {
            return None;
        }
        Some(Credentials {
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        Ok(())
    }
}

/// An ordered list of hops plus display metadata. Index 0 is the first hop
/// reached directly; the last hop is the one that connects to the ultimate
/// target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDescriptor {
    pub id: String,
    pub name: String,
    pub proxies: Vec<ProxyDescriptor>,
}

impl ChainDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        ChainDescriptor {
            id: id.into(),
            name: name.into(),
            proxies: Vec::new(),
        }
    }

    pub fn with_proxies(mut self, proxies: Vec<ProxyDescriptor>) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyChainId);
        }
        if self.proxies.is_empty() {
            return Err(ConfigError::EmptyChain);
        }
        for proxy in &self.proxies {
            proxy.validate()?;
        }
        Ok(())
    }

    /// Parses a chain descriptor from its on-the-wire JSON shape.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|source| ConfigError::Malformed(source.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|source| ConfigError::Malformed(source.to_string()))
    }
}

/// An invalid descriptor: bad port, empty address, unknown kind, empty
/// chain.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("chain id must not be empty")]
    EmptyChainId,
    #[error("chain must contain at least one proxy hop")]
    EmptyChain,
    #[error("proxy address must not be empty")]
    EmptyAddress,
    #[error("proxy port {0} is out of the valid 1..=65535 range")]
    InvalidPort(u16),
    #[error("target host must not be empty")]
    EmptyTargetHost,
    #[error("target port {0} is out of the valid 1..=65535 range")]
    InvalidTargetPort(u16),
    #[error("malformed chain descriptor: {0}")]
    Malformed(String),
}
