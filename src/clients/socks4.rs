//! SOCKS4 and SOCKS4a client.
//!
//! Builds the `[VN, CD, DSTPORT, DSTIP, USERID, NUL]` request with
//! `byteorder::BigEndian`, in one `negotiate` function that takes an
//! optional user-ID and falls back to SOCKS4a's hostname-after-NUL
//! extension whenever the target isn't an IPv4 literal.

use crate::address::{classify_address, parse_ipv4_octets, AddressKind};
use crate::transport::{Transport, TransportError};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

const VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
/// SOCKS4a's signal IP: DSTIP octets must be `0.0.0.x` with `x != 0`.
const SOCKS4A_SIGNAL_PREFIX: [u8; 3] = [0, 0, 0];

#[derive(Debug, thiserror::Error)]
pub enum Socks4Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("SOCKS4 target must be an IPv4 literal or a domain name (SOCKS4a); IPv6 is not supported: {0}")]
    AddressTypeUnsupported(String),
    #[error("malformed SOCKS4 response: {0}")]
    Protocol(String),
    #[error("SOCKS4 CONNECT rejected: {0}")]
    NegotiationRejected(Socks4Reply),
}

/// The `CD` byte of a SOCKS4 reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socks4Reply(pub u8);

impl fmt::Display for Socks4Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let human = match self.0 {
            0x5A => "request granted",
            0x5B => "request rejected or failed",
            0x5C => "request failed: client is not running identd",
            0x5D => "request failed: client's identd could not confirm the user ID",
            _ => return write!(f, "unknown reply code 0x{:02x}", self.0),
        };
        write!(f, "{human} (0x{:02x})", self.0)
    }
}

/// The bound address/port a proxy echoes back after a successful CONNECT.
#[derive(Debug, Clone)]
pub struct BoundAddress {
    pub address: String,
    pub port: u16,
}

/// Runs the SOCKS4/SOCKS4a handshake over `transport`, asking it to CONNECT
/// to `target_host:target_port`. `user_id`, when present, is sent in the
/// `USERID` field (empty string if absent). IPv4-literal targets use plain
/// SOCKS4 framing; anything else is sent as a SOCKS4a hostname.
pub async fn negotiate(
    transport: &mut dyn Transport,
    target_host: &str,
    target_port: u16,
    user_id: Option<&str>,
) -> Result<BoundAddress, Socks4Error> {
    if classify_address(target_host) == AddressKind::Ipv6 {
        return Err(Socks4Error::AddressTypeUnsupported(target_host.to_string()));
    }

    let mut request = Vec::with_capacity(16);
    request.push(VERSION);
    request.push(CMD_CONNECT);

    let mut port_buf = [0u8; 2];
    BigEndian::write_u16(&mut port_buf, target_port);
    request.extend_from_slice(&port_buf);

    let use_socks4a = classify_address(target_host) == AddressKind::Domain;
    if use_socks4a {
        request.extend_from_slice(&SOCKS4A_SIGNAL_PREFIX);
        request.push(0x01);
    } else {
        let octets = parse_ipv4_octets(target_host)
            .ok_or_else(|| Socks4Error::AddressTypeUnsupported(target_host.to_string()))?;
        request.extend_from_slice(&octets);
    }

    request.extend_from_slice(user_id.unwrap_or("").as_bytes());
    request.push(0x00);

    if use_socks4a {
        request.extend_from_slice(target_host.as_bytes());
        request.push(0x00);
    }

    transport.write_all(&request).await?;

    let reply = transport.read_exact(8).await?;
    if reply[0] != 0x00 {
        return Err(Socks4Error::Protocol(format!(
            "reply carried VN 0x{:02x}, expected 0x00",
            reply[0]
        )));
    }
    if reply[1] != 0x5A {
        return Err(Socks4Error::NegotiationRejected(Socks4Reply(reply[1])));
    }

    let port = BigEndian::read_u16(&reply[2..4]);
    let address = format!("{}.{}.{}.{}", reply[4], reply[5], reply[6], reply[7]);
    Ok(BoundAddress { address, port })
}
