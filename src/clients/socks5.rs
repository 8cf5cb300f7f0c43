//! SOCKS5 client (RFC 1928 greeting/CONNECT, RFC 1929 username/password
//! sub-negotiation).
//!
//! Builds the greeting/CONNECT buffers with `byteorder::BigEndian` and
//! dispatches a single `negotiate` function on whether the server's
//! greeting reply actually asked for credentials. Destination framing is
//! handled by `encode_destination` below, driven by the shared
//! [`crate::address::classify_address`] rather than requiring the caller
//! to pick an address-type variant up front.

use crate::address::{classify_address, parse_ipv4_octets, parse_ipv6_octets, AddressKind};
use crate::descriptor::Credentials;
use crate::transport::{Transport, TransportError};
use byteorder::{BigEndian, ByteOrder};
use std::fmt;

const VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Errors that can occur negotiating a SOCKS5 CONNECT.
#[derive(Debug, thiserror::Error)]
pub enum Socks5Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("SOCKS5 server requires authentication but no credentials were provided")]
    AuthRequiredButNotProvided,
    #[error("SOCKS5 server offered no acceptable authentication method")]
    NoAcceptableMethods,
    #[error("SOCKS5 server selected an unexpected authentication method 0x{0:02x}")]
    UnexpectedAuthMethod(u8),
    #[error("SOCKS5 username/password authentication failed")]
    AuthFailed,
    #[error("SOCKS5 username or password is empty or exceeds 255 bytes once UTF-8 encoded")]
    InvalidCredentialLength,
    #[error("target domain name exceeds 255 bytes once UTF-8 encoded")]
    DomainNameTooLong,
    #[error("target address type is not supported by SOCKS5: {0}")]
    AddressTypeUnsupported(String),
    #[error("malformed SOCKS5 response: {0}")]
    Protocol(String),
    #[error("SOCKS5 CONNECT rejected: {0}")]
    NegotiationRejected(Socks5Reply),
}

/// The `REP` byte of a SOCKS5 reply, with the human-readable mapping from
/// RFC 1928 §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Socks5Reply(pub u8);

impl fmt::Display for Socks5Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let human = match self.0 {
            0x01 => "general SOCKS server failure",
            0x02 => "connection not allowed by ruleset",
            0x03 => "network unreachable",
            0x04 => "host unreachable",
            0x05 => "connection refused",
            0x06 => "TTL expired",
            0x07 => "command not supported",
            0x08 => "address type not supported",
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

/// Runs the full SOCKS5 handshake over `transport`, asking it to CONNECT
/// to `target_host:target_port`. `credentials`, when present, are offered
/// during the greeting and used for RFC 1929 sub-negotiation if the server
/// selects it.
pub async fn negotiate(
    transport: &mut dyn Transport,
    target_host: &str,
    target_port: u16,
    credentials: Option<&Credentials>,
) -> Result<BoundAddress, Socks5Error> {
    greet(transport, credentials).await?;
    connect(transport, target_host, target_port).await
}

async fn greet(
    transport: &mut dyn Transport,
    credentials: Option<&Credentials>,
) -> Result<(), Socks5Error> {
    let mut methods = vec![METHOD_NO_AUTH];
    if credentials.is_some() {
        methods.push(METHOD_USER_PASS);
    }

    let mut greeting = Vec::with_capacity(2 + methods.len());
    greeting.push(VERSION);
    greeting.push(methods.len() as u8);
    greeting.extend_from_slice(&methods);
    transport.write_all(&greeting).await?;

    let reply = transport.read_exact(2).await?;
    if reply[0] != VERSION {
        return Err(Socks5Error::Protocol(format!(
            "greeting reply carried version 0x{:02x}, expected 0x05",
            reply[0]
        )));
    }

    match reply[1] {
        METHOD_NO_AUTH => Ok(()),
        METHOD_USER_PASS => match credentials {
            Some(creds) => sub_negotiate(transport, creds).await,
            None => Err(Socks5Error::AuthRequiredButNotProvided),
        },
        METHOD_NO_ACCEPTABLE => Err(Socks5Error::NoAcceptableMethods),
        other => Err(Socks5Error::UnexpectedAuthMethod(other)),
    }
}

async fn sub_negotiate(
    transport: &mut dyn Transport,
    creds: &Credentials,
) -> Result<(), Socks5Error> {
    let username = creds.username.as_bytes();
    let password = creds.password.as_deref().unwrap_or("");
    let password = password.as_bytes();

    if username.is_empty() || username.len() > 255 || password.is_empty() || password.len() > 255
    {
        return Err(Socks5Error::InvalidCredentialLength);
    }

    let mut buf = Vec::with_capacity(3 + username.len() + password.len());
    buf.push(0x01);
    buf.push(username.len() as u8);
    buf.extend_from_slice(username);
    buf.push(password.len() as u8);
    buf.extend_from_slice(password);
    transport.write_all(&buf).await?;

    let reply = transport.read_exact(2).await?;
    if reply[0] != 0x01 {
        return Err(Socks5Error::Protocol(format!(
            "sub-negotiation reply carried version 0x{:02x}, expected 0x01",
            reply[0]
        )));
    }
    if reply[1] != 0x00 {
        return Err(Socks5Error::AuthFailed);
    }
    Ok(())
}

async fn connect(
    transport: &mut dyn Transport,
    target_host: &str,
    target_port: u16,
) -> Result<BoundAddress, Socks5Error> {
    let mut request = vec![VERSION, CMD_CONNECT, 0x00];
    encode_destination(&mut request, target_host, target_port)?;
    transport.write_all(&request).await?;

    let header = transport.read_exact(4).await?;
    if header[0] != VERSION {
        return Err(Socks5Error::Protocol(format!(
            "CONNECT reply carried version 0x{:02x}, expected 0x05",
            header[0]
        )));
    }
    if header[2] != 0x00 {
        return Err(Socks5Error::Protocol(
            "CONNECT reply reserved byte was not 0x00".into(),
        ));
    }
    if header[1] != 0x00 {
        return Err(Socks5Error::NegotiationRejected(Socks5Reply(header[1])));
    }

    read_bound_address(transport, header[3]).await
}

fn encode_destination(
    buf: &mut Vec<u8>,
    target_host: &str,
    target_port: u16,
) -> Result<(), Socks5Error> {
    match classify_address(target_host) {
        AddressKind::Ipv4 => {
            let octets = parse_ipv4_octets(target_host)
                .ok_or_else(|| Socks5Error::AddressTypeUnsupported(target_host.to_string()))?;
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&octets);
        }
        AddressKind::Ipv6 => {
            let octets = parse_ipv6_octets(target_host)
                .ok_or_else(|| Socks5Error::AddressTypeUnsupported(target_host.to_string()))?;
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&octets);
        }
        AddressKind::Domain => {
            let name = target_host.as_bytes();
            if name.is_empty() || name.len() > 255 {
                return Err(Socks5Error::DomainNameTooLong);
            }
            buf.push(ATYP_DOMAIN);
            buf.push(name.len() as u8);
            buf.extend_from_slice(name);
        }
    }
    let mut port_buf = [0u8; 2];
    BigEndian::write_u16(&mut port_buf, target_port);
    buf.extend_from_slice(&port_buf);
    Ok(())
}

async fn read_bound_address(
    transport: &mut dyn Transport,
    atyp: u8,
) -> Result<BoundAddress, Socks5Error> {
    let address = match atyp {
        ATYP_IPV4 => {
            let octets = transport.read_exact(4).await?;
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
        }
        ATYP_DOMAIN => {
            let len = transport.read_exact(1).await?[0] as usize;
            let name = transport.read_exact(len).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        ATYP_IPV6 => {
            let octets = transport.read_exact(16).await?;
            let addr = std::net::Ipv6Addr::new(
                BigEndian::read_u16(&octets[0..2]),
                BigEndian::read_u16(&octets[2..4]),
                BigEndian::read_u16(&octets[4..6]),
                BigEndian::read_u16(&octets[6..8]),
                BigEndian::read_u16(&octets[8..10]),
                BigEndian::read_u16(&octets[10..12]),
                BigEndian::read_u16(&octets[12..14]),
                BigEndian::read_u16(&octets[14..16]),
            );
            addr.to_string()
        }
        other => {
            return Err(Socks5Error::Protocol(format!(
                "CONNECT reply carried unknown address type 0x{other:02x}"
            )))
        }
    };

    let port_bytes = transport.read_exact(2).await?;
    let port = BigEndian::read_u16(&port_bytes);
    Ok(BoundAddress { address, port })
}
