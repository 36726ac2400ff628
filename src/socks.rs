//! SOCKS Client
//!
//! Upstream tunneling through a SOCKS4, SOCKS4a or SOCKS5 proxy. The wire
//! builders and parsers are plain functions over byte slices; `socks_connect`
//! drives a full handshake over any async stream and leaves it ready to
//! carry the tunneled connection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

#[derive(Debug, Error)]
pub enum SocksError {
    #[error("unexpected SOCKS version byte {0:#04x}")]
    InvalidVersion(u8),
    #[error("no acceptable authentication method")]
    NoAcceptableAuth,
    #[error("authentication rejected by proxy")]
    AuthRejected,
    #[error("proxy refused connect: {0:?}")]
    ConnectRefused(SocksReply),
    #[error("malformed SOCKS response")]
    MalformedResponse,
    #[error("username or password exceeds 255 bytes")]
    CredentialTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocksVersion {
    V4,
    /// SOCKS4 with hostname support.
    V4a,
    V5,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocksAuth {
    NoAuth,
    UserPass { username: String, password: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocksAddress {
    IpV4(Ipv4Addr),
    IpV6(Ipv6Addr),
    Domain(String),
}

impl SocksAddress {
    /// Prefer a literal IP when the host parses as one.
    pub fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => SocksAddress::IpV4(ip),
            Ok(IpAddr::V6(ip)) => SocksAddress::IpV6(ip),
            Err(_) => SocksAddress::Domain(host.to_string()),
        }
    }
}

/// SOCKS5 reply codes, plus the SOCKS4 granted/rejected pair mapped onto
/// the same set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksReply {
    Succeeded,
    GeneralFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddressTypeNotSupported,
    Other(u8),
}

impl SocksReply {
    fn from_v5(code: u8) -> Self {
        match code {
            0x00 => SocksReply::Succeeded,
            0x01 => SocksReply::GeneralFailure,
            0x02 => SocksReply::ConnectionNotAllowed,
            0x03 => SocksReply::NetworkUnreachable,
            0x04 => SocksReply::HostUnreachable,
            0x05 => SocksReply::ConnectionRefused,
            0x06 => SocksReply::TtlExpired,
            0x07 => SocksReply::CommandNotSupported,
            0x08 => SocksReply::AddressTypeNotSupported,
            other => SocksReply::Other(other),
        }
    }

    fn from_v4(code: u8) -> Self {
        match code {
            0x5a => SocksReply::Succeeded,
            0x5b => SocksReply::GeneralFailure,
            0x5c => SocksReply::ConnectionNotAllowed,
            0x5d => SocksReply::NetworkUnreachable,
            other => SocksReply::Other(other),
        }
    }
}

/// SOCKS5 method-selection request.
pub fn build_greeting(auth: &SocksAuth) -> Vec<u8> {
    let methods: &[u8] = match auth {
        SocksAuth::NoAuth => &[0x00],
        SocksAuth::UserPass { .. } => &[0x00, 0x02],
    };
    let mut buf = Vec::with_capacity(2 + methods.len());
    buf.push(0x05);
    buf.push(methods.len() as u8);
    buf.extend_from_slice(methods);
    buf
}

/// RFC 1929 username/password sub-negotiation request.
pub fn build_userpass(username: &str, password: &str) -> Result<Vec<u8>, SocksError> {
    if username.len() > 255 || password.len() > 255 {
        return Err(SocksError::CredentialTooLong);
    }
    let mut buf = Vec::with_capacity(3 + username.len() + password.len());
    buf.push(0x01);
    buf.push(username.len() as u8);
    buf.extend_from_slice(username.as_bytes());
    buf.push(password.len() as u8);
    buf.extend_from_slice(password.as_bytes());
    Ok(buf)
}

/// SOCKS5 CONNECT request.
pub fn build_v5_connect(address: &SocksAddress, port: u16) -> Vec<u8> {
    let mut buf = vec![0x05, 0x01, 0x00];
    match address {
        SocksAddress::IpV4(ip) => {
            buf.push(0x01);
            buf.extend_from_slice(&ip.octets());
        }
        SocksAddress::Domain(domain) => {
            buf.push(0x03);
            buf.push(domain.len().min(255) as u8);
            buf.extend_from_slice(&domain.as_bytes()[..domain.len().min(255)]);
        }
        SocksAddress::IpV6(ip) => {
            buf.push(0x04);
            buf.extend_from_slice(&ip.octets());
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

/// SOCKS4/4a CONNECT request. Domains use the 4a convention: an invalid
/// destination IP (0.0.0.1) with the hostname appended after the user id.
pub fn build_v4_connect(address: &SocksAddress, port: u16, user_id: &str) -> Vec<u8> {
    let mut buf = vec![0x04, 0x01];
    buf.extend_from_slice(&port.to_be_bytes());
    match address {
        SocksAddress::IpV4(ip) => {
            buf.extend_from_slice(&ip.octets());
            buf.extend_from_slice(user_id.as_bytes());
            buf.push(0x00);
        }
        SocksAddress::Domain(domain) => {
            buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            buf.extend_from_slice(user_id.as_bytes());
            buf.push(0x00);
            buf.extend_from_slice(domain.as_bytes());
            buf.push(0x00);
        }
        SocksAddress::IpV6(ip) => {
            // SOCKS4 cannot express IPv6; fall back to the 4a form with the
            // textual address.
            buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            buf.extend_from_slice(user_id.as_bytes());
            buf.push(0x00);
            buf.extend_from_slice(ip.to_string().as_bytes());
            buf.push(0x00);
        }
    }
    buf
}

/// Drive a complete SOCKS handshake on `stream`, leaving it connected to
/// `host:port` through the proxy.
pub async fn socks_connect<S>(
    stream: &mut S,
    version: SocksVersion,
    auth: &SocksAuth,
    host: &str,
    port: u16,
) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let address = SocksAddress::from_host(host);
    match version {
        SocksVersion::V4 | SocksVersion::V4a => {
            let user_id = match auth {
                SocksAuth::UserPass { username, .. } => username.as_str(),
                SocksAuth::NoAuth => "",
            };
            stream
                .write_all(&build_v4_connect(&address, port, user_id))
                .await?;
            let mut reply = [0u8; 8];
            stream.read_exact(&mut reply).await?;
            if reply[0] != 0x00 {
                return Err(SocksError::InvalidVersion(reply[0]));
            }
            match SocksReply::from_v4(reply[1]) {
                SocksReply::Succeeded => {}
                other => return Err(SocksError::ConnectRefused(other)),
            }
        }
        SocksVersion::V5 => {
            stream.write_all(&build_greeting(auth)).await?;
            let mut choice = [0u8; 2];
            stream.read_exact(&mut choice).await?;
            if choice[0] != 0x05 {
                return Err(SocksError::InvalidVersion(choice[0]));
            }
            match choice[1] {
                0x00 => {}
                0x02 => {
                    let SocksAuth::UserPass { username, password } = auth else {
                        return Err(SocksError::NoAcceptableAuth);
                    };
                    stream.write_all(&build_userpass(username, password)?).await?;
                    let mut status = [0u8; 2];
                    stream.read_exact(&mut status).await?;
                    if status[1] != 0x00 {
                        return Err(SocksError::AuthRejected);
                    }
                }
                0xff => return Err(SocksError::NoAcceptableAuth),
                _ => return Err(SocksError::NoAcceptableAuth),
            }

            stream.write_all(&build_v5_connect(&address, port)).await?;
            let mut head = [0u8; 4];
            stream.read_exact(&mut head).await?;
            if head[0] != 0x05 {
                return Err(SocksError::InvalidVersion(head[0]));
            }
            match SocksReply::from_v5(head[1]) {
                SocksReply::Succeeded => {}
                other => return Err(SocksError::ConnectRefused(other)),
            }
            // Drain the bound address, variable by address type.
            match head[3] {
                0x01 => {
                    let mut rest = [0u8; 6];
                    stream.read_exact(&mut rest).await?;
                }
                0x04 => {
                    let mut rest = [0u8; 18];
                    stream.read_exact(&mut rest).await?;
                }
                0x03 => {
                    let mut len = [0u8; 1];
                    stream.read_exact(&mut len).await?;
                    let mut rest = vec![0u8; len[0] as usize + 2];
                    stream.read_exact(&mut rest).await?;
                }
                _ => return Err(SocksError::MalformedResponse),
            }
        }
    }
    debug!(host, port, ?version, "SOCKS tunnel established");
    Ok(())
}
