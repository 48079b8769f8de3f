// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PROXY protocol v1 preamble.
//!
//! Load balancers in front of the endpoint may prefix a connection with one
//! text line naming the original client:
//!
//! ```text
//! PROXY TCP4 192.168.0.1 192.168.0.11 56324 443\r\n
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Bytes every preamble starts with.
pub(crate) const SIGNATURE: &[u8] = b"PROXY ";

/// Longest legal preamble, CRLF included.
pub(crate) const MAX_LINE_LEN: usize = 107;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFamily {
    Tcp4,
    Tcp6,
    Unknown,
}

/// A parsed preamble. Addresses are absent for `UNKNOWN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHeader {
    pub family: ProxyFamily,
    pub source: Option<SocketAddr>,
    pub destination: Option<SocketAddr>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("PROXY line longer than {MAX_LINE_LEN} bytes")]
    TooLong,

    #[error("PROXY line is not terminated by CRLF")]
    Unterminated,

    #[error("PROXY line is not ASCII")]
    NotAscii,

    #[error("unsupported PROXY family: {0}")]
    Family(String),

    #[error("invalid PROXY {field}: {value:?}")]
    Field { field: &'static str, value: String },

    #[error("PROXY line has {0} fields, expected 6")]
    FieldCount(usize),
}

/// Parse one preamble line, without its trailing CRLF.
pub fn parse_proxy_line(line: &[u8]) -> Result<ProxyHeader, ProxyError> {
    if line.len() + 2 > MAX_LINE_LEN {
        return Err(ProxyError::TooLong);
    }
    let line = std::str::from_utf8(line)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or(ProxyError::NotAscii)?;

    let fields: Vec<&str> = line.split(' ').collect();
    if fields.first() != Some(&"PROXY") || fields.len() < 2 {
        return Err(ProxyError::FieldCount(fields.len()));
    }

    let family = match fields[1] {
        "TCP4" => ProxyFamily::Tcp4,
        "TCP6" => ProxyFamily::Tcp6,
        // Receivers must ignore everything after UNKNOWN
        "UNKNOWN" => {
            let header =
                ProxyHeader { family: ProxyFamily::Unknown, source: None, destination: None };
            return Ok(header);
        }
        other => return Err(ProxyError::Family(other.to_string())),
    };

    if fields.len() != 6 {
        return Err(ProxyError::FieldCount(fields.len()));
    }

    let src_ip = parse_ip(family, "source address", fields[2])?;
    let dst_ip = parse_ip(family, "destination address", fields[3])?;
    let src_port = parse_port("source port", fields[4])?;
    let dst_port = parse_port("destination port", fields[5])?;

    Ok(ProxyHeader {
        family,
        source: Some(SocketAddr::new(src_ip, src_port)),
        destination: Some(SocketAddr::new(dst_ip, dst_port)),
    })
}

fn parse_ip(family: ProxyFamily, field: &'static str, value: &str) -> Result<IpAddr, ProxyError> {
    let invalid = || ProxyError::Field { field, value: value.to_string() };
    match family {
        ProxyFamily::Tcp4 => value.parse::<Ipv4Addr>().map(IpAddr::V4).map_err(|_| invalid()),
        ProxyFamily::Tcp6 => value.parse::<Ipv6Addr>().map(IpAddr::V6).map_err(|_| invalid()),
        ProxyFamily::Unknown => Err(invalid()),
    }
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, ProxyError> {
    // Ports are plain decimal: no sign, no leading zeros
    let canonical = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && (value == "0" || !value.starts_with('0'));
    value
        .parse::<u16>()
        .ok()
        .filter(|_| canonical)
        .ok_or_else(|| ProxyError::Field { field, value: value.to_string() })
}

#[cfg(test)]
#[path = "proxy_protocol_tests.rs"]
mod tests;
