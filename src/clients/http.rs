//! HTTP/1.1 CONNECT client (RFC 7230/7231), as used by a plain HTTP or
//! HTTPS forward proxy acting as a tunnel hop.
//!
//! Builds the request line plus headers as one buffer, writes it, then
//! reads the status line and headers back with
//! [`crate::transport::Transport::read_until_crlf`]. Status codes are
//! classified into a typed error per family below.

use crate::descriptor::Credentials;
use crate::transport::{Transport, TransportError};
use base64::{engine::general_purpose::STANDARD, Engine as _};

const MAX_STATUS_LINE_BYTES: usize = 8 * 1024;
const MAX_HEADER_BYTES: usize = 8 * 1024;
const MAX_HEADER_COUNT: usize = 256;
const USER_AGENT: &str = "proxy-chain/0.1";

#[derive(Debug, thiserror::Error)]
pub enum HttpConnectError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed HTTP response: {0}")]
    Protocol(String),
    #[error("malformed HTTP status line: {0}")]
    MalformedStatusLine(String),
    #[error("proxy requires authentication (HTTP {0})")]
    ProxyAuthRequired(u16),
    #[error("proxy refused the request as forbidden")]
    Forbidden,
    #[error("proxy could not resolve the target host")]
    HostNotFound,
    #[error("proxy does not allow the CONNECT method")]
    MethodNotAllowed,
    #[error("proxy timed out reaching the target")]
    Timeout,
    #[error("proxy reported a bad gateway")]
    BadGateway,
    #[error("proxy is temporarily unavailable")]
    Unavailable,
    #[error("proxy reported an internal error")]
    ProxyInternalError,
    #[error("proxy rejected the CONNECT with HTTP {0}")]
    HttpError(u16),
}

/// Runs an HTTP CONNECT handshake over `transport`, tunneling to
/// `target_host:target_port`. `credentials`, when present, are sent as a
/// `Proxy-Authorization: Basic` header. Any response bytes following the
/// blank line that terminates the header block are left unread on the
/// stream: a CONNECT success response carries no body, and the caller
/// owns every byte that follows.
pub async fn negotiate(
    transport: &mut dyn Transport,
    target_host: &str,
    target_port: u16,
    credentials: Option<&Credentials>,
) -> Result<(), HttpConnectError> {
    let authority = format!("{target_host}:{target_port}");
    let mut request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nUser-Agent: {USER_AGENT}\r\n"
    );

    if let Some(creds) = credentials {
        let password = creds.password.as_deref().unwrap_or("");
        let token = STANDARD.encode(format!("{}:{}", creds.username, password));
        request.push_str("Proxy-Authorization: Basic ");
        request.push_str(&token);
        request.push_str("\r\n");
    }
    request.push_str("Proxy-Connection: Keep-Alive\r\nConnection: Keep-Alive\r\n\r\n");

    transport.write_all(request.as_bytes()).await?;

    let status_line = transport.read_until_crlf(MAX_STATUS_LINE_BYTES).await?;
    let status_line = std::str::from_utf8(&status_line)
        .map_err(|_| HttpConnectError::Protocol("status line was not valid UTF-8".into()))?
        .trim_end();
    let status = parse_status_code(status_line)?;

    let mut header_count = 0;
    loop {
        let line = transport.read_until_crlf(MAX_HEADER_BYTES).await?;
        if line == b"\r\n" {
            break;
        }
        header_count += 1;
        if header_count > MAX_HEADER_COUNT {
            return Err(HttpConnectError::Protocol(
                "too many response headers".into(),
            ));
        }
    }

    classify_status(status)
}

/// Requires the shape `HTTP/1.[01] <3-digit> <reason>`; anything else is a
/// `MalformedStatusLine`, per RFC 7230 §3.1.2 as tightened by this client.
fn parse_status_code(status_line: &str) -> Result<u16, HttpConnectError> {
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HttpConnectError::MalformedStatusLine(status_line.to_string()))?;
    if version != "HTTP/1.0" && version != "HTTP/1.1" {
        return Err(HttpConnectError::MalformedStatusLine(status_line.to_string()));
    }
    let code = parts
        .next()
        .ok_or_else(|| HttpConnectError::MalformedStatusLine(status_line.to_string()))?;
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HttpConnectError::MalformedStatusLine(status_line.to_string()));
    }
    if parts.next().is_none() {
        return Err(HttpConnectError::MalformedStatusLine(status_line.to_string()));
    }
    code.parse::<u16>()
        .map_err(|_| HttpConnectError::MalformedStatusLine(status_line.to_string()))
}

fn classify_status(status: u16) -> Result<(), HttpConnectError> {
    match status {
        200 => Ok(()),
        401 | 407 => Err(HttpConnectError::ProxyAuthRequired(status)),
        403 => Err(HttpConnectError::Forbidden),
        404 => Err(HttpConnectError::HostNotFound),
        405 => Err(HttpConnectError::MethodNotAllowed),
        408 | 504 => Err(HttpConnectError::Timeout),
        500 => Err(HttpConnectError::ProxyInternalError),
        502 => Err(HttpConnectError::BadGateway),
        503 => Err(HttpConnectError::Unavailable),
        other => Err(HttpConnectError::HttpError(other)),
    }
}
