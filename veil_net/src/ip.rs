//! IPv4/IPv6 address value type with text parsing for both families.

use std::fmt;
use veil_core::error::{Error, ErrorCode, Result};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IpAddress {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl IpAddress {
    pub fn localhost_v4() -> IpAddress {
        IpAddress::V4([127, 0, 0, 1])
    }

    pub fn localhost_v6() -> IpAddress {
        let mut octets = [0u8; 16];
        octets[15] = 1;
        IpAddress::V6(octets)
    }

    /// From a network-order IPv4 dword as it sits in memory: byte 0 is the
    /// first octet (`0x0100007F` is 127.0.0.1 on the wire).
    pub fn from_ipv4(addr: u32) -> IpAddress {
        IpAddress::V4(addr.to_le_bytes())
    }

    pub fn from_ipv6(octets: [u8; 16]) -> IpAddress {
        IpAddress::V6(octets)
    }

    /// The inverse of [`IpAddress::from_ipv4`]. Zero for IPv6 addresses.
    pub fn to_ipv4(&self) -> u32 {
        match self {
            IpAddress::V4(octets) => u32::from_le_bytes(*octets),
            IpAddress::V6(_) => 0,
        }
    }

    pub fn to_ipv6(&self) -> [u8; 16] {
        match self {
            IpAddress::V6(octets) => *octets,
            // IPv4-mapped form ::ffff:a.b.c.d
            IpAddress::V4(v4) => {
                let mut octets = [0u8; 16];
                octets[10] = 0xFF;
                octets[11] = 0xFF;
                octets[12..].copy_from_slice(v4);
                octets
            }
        }
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self, IpAddress::V6(_))
    }

    /// Parses a dotted quad or an RFC 4291 hex-group address (with `::`
    /// elision).
    pub fn parse(text: &str) -> Result<IpAddress> {
        if text.contains(':') {
            parse_v6(text)
        } else {
            parse_v4(text)
        }
    }
}

fn parse_v4(text: &str) -> Result<IpAddress> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for part in text.split('.') {
        if count == 4 || part.is_empty() || part.len() > 3 {
            return Err(Error::internal(ErrorCode::IpParseFailed));
        }
        let value: u32 = part.parse().map_err(|_| Error::internal(ErrorCode::IpParseFailed))?;
        if value > 255 {
            return Err(Error::internal(ErrorCode::IpParseFailed));
        }
        octets[count] = value as u8;
        count += 1;
    }
    if count != 4 {
        return Err(Error::internal(ErrorCode::IpParseFailed));
    }
    Ok(IpAddress::V4(octets))
}

fn parse_v6(text: &str) -> Result<IpAddress> {
    let bad = || Error::internal(ErrorCode::IpParseFailed);

    let mut head: Vec<u16> = Vec::new();
    let mut tail: Vec<u16> = Vec::new();
    let mut seen_elision = false;

    let mut parts = text.split("::");
    let first = parts.next().ok_or_else(bad)?;
    let second = parts.next();
    if parts.next().is_some() {
        return Err(bad()); // more than one "::"
    }

    for group in first.split(':') {
        if group.is_empty() {
            if first.is_empty() {
                break;
            }
            return Err(bad());
        }
        head.push(u16::from_str_radix(group, 16).map_err(|_| bad())?);
    }
    if let Some(second) = second {
        seen_elision = true;
        for group in second.split(':') {
            if group.is_empty() {
                if second.is_empty() {
                    break;
                }
                return Err(bad());
            }
            tail.push(u16::from_str_radix(group, 16).map_err(|_| bad())?);
        }
    }

    let total = head.len() + tail.len();
    if (seen_elision && total >= 8) || (!seen_elision && total != 8) {
        return Err(bad());
    }

    let mut groups = [0u16; 8];
    groups[..head.len()].copy_from_slice(&head);
    groups[8 - tail.len()..].copy_from_slice(&tail);

    let mut octets = [0u8; 16];
    for (chunk, group) in octets.chunks_exact_mut(2).zip(groups) {
        chunk.copy_from_slice(&group.to_be_bytes());
    }
    Ok(IpAddress::V6(octets))
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::V4(octets) => {
                write!(f, "{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
            }
            IpAddress::V6(octets) => {
                for (index, chunk) in octets.chunks_exact(2).enumerate() {
                    if index > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{:x}", u16::from_be_bytes([chunk[0], chunk[1]]))?;
                }
                Ok(())
            }
        }
    }
}
