//! One protocol client per hop kind, plus the dispatch that picks the
//! right one.
//!
//! Chains are built from a closed, serializable
//! [`crate::descriptor::ProxyKind`], so there is no need for open
//! polymorphism here: `negotiate_hop` below is a plain match over the
//! three known kinds, not a trait object per protocol.

pub mod http;
pub mod socks4;
pub mod socks5;

use crate::descriptor::ProxyDescriptor;
use crate::descriptor::ProxyKind;
use crate::transport::Transport;

/// The underlying cause of a failed hop, regardless of which protocol
/// client produced it. [`crate::chain::Engine::build_chain`] wraps this in
/// a [`crate::chain::ChainError::Step`] that names the failing hop index.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Connect(#[from] crate::transport::TransportError),
    #[error(transparent)]
    Socks5(#[from] socks5::Socks5Error),
    #[error(transparent)]
    Socks4(#[from] socks4::Socks4Error),
    #[error(transparent)]
    Http(#[from] http::HttpConnectError),
}

/// What a successful hop reported back, if anything. Only SOCKS4/SOCKS5
/// echo a bound address; HTTP CONNECT does not.
#[derive(Debug, Clone, Default)]
pub struct HopOutcome {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

/// Negotiates one hop: asks `hop`, already reached over `transport`, to
/// CONNECT onward to `target_host:target_port`. Dispatches on
/// [`ProxyDescriptor::kind`] — a closed match, not a trait object.
pub(crate) async fn negotiate_hop(
    transport: &mut dyn Transport,
    hop: &ProxyDescriptor,
    target_host: &str,
    target_port: u16,
) -> Result<HopOutcome, StepError> {
    match hop.kind {
        ProxyKind::Socks5 => {
            let bound = socks5::negotiate(
                transport,
                target_host,
                target_port,
                hop.credentials().as_ref(),
            )
            .await?;
            Ok(HopOutcome {
                bind_address: Some(bound.address),
                bind_port: Some(bound.port),
            })
        }
        ProxyKind::Socks4 => {
            let bound = socks4::negotiate(
                transport,
                target_host,
                target_port,
                hop.username.as_deref(),
            )
            .await?;
            Ok(HopOutcome {
                bind_address: Some(bound.address),
                bind_port: Some(bound.port),
            })
        }
        ProxyKind::Http => {
            http::negotiate(
                transport,
                target_host,
                target_port,
                hop.credentials().as_ref(),
            )
            .await?;
            Ok(HopOutcome::default())
        }
    }
}
