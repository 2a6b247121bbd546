//! DNS resolver speaking RFC 1035 wireformat over DoH (RFC 8484).
//!
//! Queries are POSTed as `application/dns-message` to Cloudflare
//! (1.1.1.1) with Google (dns.google via 8.8.8.8) as the fallback
//! provider. The resolver endpoints are reached by IP literal, so no
//! resolution is needed to resolve. `localhost` short-circuits without
//! touching the network.
//!
//! Answer parsing is hardened: compression pointers terminate a name and
//! are never followed, label counts are bounded, and truncated records
//! are errors rather than panics.

use crate::http::HttpClient;
use crate::ip::IpAddress;
use crate::tls::buffer::Reader;
use log::debug;
use veil_core::djb2;
use veil_core::error::{Error, ErrorCode, Result, ResultExt};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u16)]
pub enum QueryType {
    A = 1,
    Aaaa = 28,
}

/// Transaction id and flags for every query we emit: a fixed id and
/// "standard query, recursion desired".
const QUERY_ID: u16 = 0x1234;
const QUERY_FLAGS: u16 = 0x0100;

const MAX_HOST: usize = 253;
const MAX_LABEL: usize = 63;
const MAX_RESPONSE: usize = 64 * 1024;

/// Resolves `host`, preferring AAAA and falling back to A.
pub fn resolve(host: &str) -> Result<IpAddress> {
    match resolve_with_type(host, QueryType::Aaaa) {
        Ok(ip) => Ok(ip),
        Err(_) => resolve_with_type(host, QueryType::A).or_code(ErrorCode::DnsResolveFailed),
    }
}

/// Resolves one record type, trying Cloudflare then Google.
pub fn resolve_with_type(host: &str, qtype: QueryType) -> Result<IpAddress> {
    if let Some(ip) = localhost_shortcut(host, qtype) {
        return Ok(ip);
    }
    cloudflare_resolve(host, qtype)
        .or_else(|_| google_resolve(host, qtype))
        .or_code(match qtype {
            QueryType::A => ErrorCode::DnsResolveFailedA,
            QueryType::Aaaa => ErrorCode::DnsResolveFailedAaaa,
        })
}

pub fn cloudflare_resolve(host: &str, qtype: QueryType) -> Result<IpAddress> {
    if let Some(ip) = localhost_shortcut(host, qtype) {
        return Ok(ip);
    }
    let query = build_query(host, qtype)?;
    doh_exchange("https://1.1.1.1/dns-query", "1.1.1.1", &query, qtype)
}

pub fn google_resolve(host: &str, qtype: QueryType) -> Result<IpAddress> {
    if let Some(ip) = localhost_shortcut(host, qtype) {
        return Ok(ip);
    }
    let query = build_query(host, qtype)?;
    doh_exchange("https://dns.google/dns-query", "8.8.8.8", &query, qtype)
}

fn localhost_shortcut(host: &str, qtype: QueryType) -> Option<IpAddress> {
    if !djb2::matches(host.as_bytes(), b"localhost") {
        return None;
    }
    Some(match qtype {
        QueryType::A => IpAddress::localhost_v4(),
        QueryType::Aaaa => IpAddress::localhost_v6(),
    })
}

/// One POST round trip against a DoH endpoint.
fn doh_exchange(url: &str, ip_literal: &str, query: &[u8], qtype: QueryType) -> Result<IpAddress> {
    let mut client =
        HttpClient::create_with_ip(url, ip_literal).or_code(ErrorCode::DnsCreateFailedClient)?;
    client.open().or_code(ErrorCode::DnsSendFailed)?;
    client
        .send_post_request_with_headers(
            query,
            &[
                ("Content-Type", "application/dns-message"),
                ("Accept", "application/dns-message"),
            ],
        )
        .or_code(ErrorCode::DnsSendFailed)?;

    let content_length = HttpClient::read_response_headers(client.transport(), 200)
        .or_code(ErrorCode::DnsReadFailedHeaders)?;
    if content_length > MAX_RESPONSE as i64 {
        return Err(Error::internal(ErrorCode::DnsReadFailedBody));
    }

    // Bounded body read; without a Content-Length we read until the peer
    // closes.
    let limit = if content_length >= 0 { content_length as usize } else { MAX_RESPONSE };
    let mut body = Vec::new();
    let mut chunk = [0u8; 1024];
    while body.len() < limit {
        match client.read(&mut chunk) {
            Ok(received) if received > 0 => {
                let take = (received as usize).min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }
    let _ = client.close();

    if content_length >= 0 && body.len() < limit {
        return Err(Error::internal(ErrorCode::DnsReadFailedBody));
    }
    debug!("doh {} answered {} bytes", url, body.len());
    parse_response(&body, qtype)
}

/// RFC 1035 §4.1 query: fixed header, one question, no other sections.
fn build_query(host: &str, qtype: QueryType) -> Result<Vec<u8>> {
    if host.is_empty() || host.len() > MAX_HOST {
        return Err(Error::internal(ErrorCode::DnsQueryFailedHostTooLong));
    }

    let mut query = Vec::with_capacity(18 + host.len());
    query.extend_from_slice(&QUERY_ID.to_be_bytes());
    query.extend_from_slice(&QUERY_FLAGS.to_be_bytes());
    query.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    query.extend_from_slice(&[0, 0, 0, 0, 0, 0]); // an/ns/ar counts

    for label in host.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL {
            return Err(Error::internal(ErrorCode::DnsQueryFailedLabelTooLong));
        }
        query.push(label.len() as u8);
        query.extend_from_slice(label.as_bytes());
    }
    query.push(0);

    query.extend_from_slice(&(qtype as u16).to_be_bytes());
    query.extend_from_slice(&1u16.to_be_bytes()); // class IN
    Ok(query)
}

/// Walks the answer section and returns the first record matching the
/// query type.
fn parse_response(message: &[u8], qtype: QueryType) -> Result<IpAddress> {
    let mut reader = Reader::new(message);

    let _id = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;
    let _flags = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;
    let qdcount = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;
    let ancount = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;
    let _nscount = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;
    let _arcount = reader.read_u16().or_code(ErrorCode::DnsParseFailedHeader)?;

    for _ in 0..qdcount {
        skip_name(&mut reader).or_code(ErrorCode::DnsParseFailedQuestion)?;
        reader.skip(4).or_code(ErrorCode::DnsParseFailedQuestion)?; // qtype + qclass
    }

    for _ in 0..ancount {
        skip_name(&mut reader).or_code(ErrorCode::DnsParseFailedAnswer)?;
        let rtype = reader.read_u16().or_code(ErrorCode::DnsParseFailedAnswer)?;
        let _class = reader.read_u16().or_code(ErrorCode::DnsParseFailedAnswer)?;
        let _ttl = reader.read_u32().or_code(ErrorCode::DnsParseFailedAnswer)?;
        let rdlength = reader.read_u16().or_code(ErrorCode::DnsParseFailedAnswer)? as usize;
        let rdata = reader.read_slice(rdlength).or_code(ErrorCode::DnsParseFailedAnswer)?;

        if rtype == qtype as u16 {
            match qtype {
                QueryType::A if rdlength == 4 => {
                    let mut octets = [0u8; 4];
                    octets.copy_from_slice(rdata);
                    return Ok(IpAddress::V4(octets));
                }
                QueryType::Aaaa if rdlength == 16 => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(rdata);
                    return Ok(IpAddress::V6(octets));
                }
                _ => return Err(Error::internal(ErrorCode::DnsParseFailedAnswer)),
            }
        }
    }

    Err(Error::internal(ErrorCode::DnsNoRecord))
}

/// Skips over an encoded name. A compression pointer (RFC 1035 §4.1.4)
/// terminates the name; it is skipped, never followed, so malformed
/// pointer chains cannot loop.
fn skip_name(reader: &mut Reader<'_>) -> Result<()> {
    let mut labels = 0;
    loop {
        let length = reader.read_u8()?;
        if length == 0 {
            return Ok(());
        }
        if length & 0xC0 == 0xC0 {
            reader.skip(1)?; // low pointer byte
            return Ok(());
        }
        if length & 0xC0 != 0 {
            return Err(Error::internal(ErrorCode::DnsParseFailedPointer));
        }
        reader.skip(length as usize)?;
        labels += 1;
        if labels > 32 {
            return Err(Error::internal(ErrorCode::DnsParseFailedPointer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_wire_format() {
        let query = build_query("dns.google", QueryType::A).unwrap();
        let expected: Vec<u8> = [
            0x12, 0x34, // id
            0x01, 0x00, // flags: standard query, recursion desired
            0x00, 0x01, // one question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // empty other sections
            3, b'd', b'n', b's', 6, b'g', b'o', b'o', b'g', b'l', b'e', 0, // name
            0x00, 0x01, // qtype A
            0x00, 0x01, // class IN
        ]
        .to_vec();
        assert_eq!(query, expected);

        let aaaa = build_query("a.b", QueryType::Aaaa).unwrap();
        assert_eq!(&aaaa[aaaa.len() - 4..], &[0x00, 28, 0x00, 0x01]);
    }

    #[test]
    fn query_rejects_bad_hosts() {
        assert!(build_query("", QueryType::A).is_err());
        assert!(build_query(&"a".repeat(254), QueryType::A).is_err());
        assert!(build_query(&format!("{}.com", "a".repeat(64)), QueryType::A).is_err());
        assert!(build_query("a..b", QueryType::A).is_err());
    }

    /// Header + echoed question for `x.y` + `answers`.
    fn response_with_answers(ancount: u16, answers: &[u8]) -> Vec<u8> {
        let mut message = Vec::new();
        message.extend_from_slice(&0x1234u16.to_be_bytes());
        message.extend_from_slice(&0x8180u16.to_be_bytes());
        message.extend_from_slice(&1u16.to_be_bytes());
        message.extend_from_slice(&ancount.to_be_bytes());
        message.extend_from_slice(&[0, 0, 0, 0]);
        message.extend_from_slice(&[1, b'x', 1, b'y', 0, 0x00, 0x01, 0x00, 0x01]);
        message.extend_from_slice(answers);
        message
    }

    #[test]
    fn parses_an_a_record_with_compressed_name() {
        // Name is a pointer back to the question (0xC00C).
        let answer = [
            0xC0, 0x0C, // compressed name
            0x00, 0x01, 0x00, 0x01, // type A, class IN
            0x00, 0x00, 0x01, 0x2C, // ttl
            0x00, 0x04, // rdlength
            8, 8, 8, 8,
        ];
        let message = response_with_answers(1, &answer);
        let ip = parse_response(&message, QueryType::A).unwrap();
        assert_eq!(ip, IpAddress::V4([8, 8, 8, 8]));
    }

    #[test]
    fn skips_non_matching_records() {
        // A CNAME answer first, then the A record we want.
        let mut answers = Vec::new();
        answers.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x05, 0x00, 0x01, 0, 0, 0, 60, 0x00, 0x02]);
        answers.extend_from_slice(&[0xC0, 0x0C]); // rdata: compressed cname
        answers.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0, 0, 0, 60, 0x00, 0x04]);
        answers.extend_from_slice(&[1, 0, 0, 1]);
        let message = response_with_answers(2, &answers);
        let ip = parse_response(&message, QueryType::A).unwrap();
        assert_eq!(ip, IpAddress::V4([1, 0, 0, 1]));
    }

    #[test]
    fn parses_an_aaaa_record() {
        let mut answer = vec![0xC0, 0x0C, 0x00, 28, 0x00, 0x01, 0, 0, 0, 60, 0x00, 16];
        answer.extend_from_slice(&[0x26, 0x06, 0x47, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x11, 0x11]);
        let message = response_with_answers(1, &answer);
        let ip = parse_response(&message, QueryType::Aaaa).unwrap();
        assert!(ip.is_ipv6());
    }

    #[test]
    fn no_matching_record_is_an_error() {
        let answer = [0xC0, 0x0C, 0x00, 0x05, 0x00, 0x01, 0, 0, 0, 60, 0x00, 0x02, 0xC0, 0x0C];
        let message = response_with_answers(1, &answer);
        let err = parse_response(&message, QueryType::A).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DnsNoRecord));
    }

    #[test]
    fn truncated_responses_are_rejected() {
        let answer = [0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01, 0, 0, 0, 60, 0x00, 0x04, 8, 8];
        let message = response_with_answers(1, &answer);
        assert!(parse_response(&message, QueryType::A).is_err());

        // Header alone.
        assert!(parse_response(&[0x12, 0x34, 0x81], QueryType::A).is_err());
    }

    #[test]
    fn bad_label_flags_are_rejected() {
        // 0x40 is a reserved label type.
        let answer = [0x40, 0x00, 0x01, 0x00, 0x01];
        let message = response_with_answers(1, &answer);
        assert!(parse_response(&message, QueryType::A).is_err());
    }

    #[test]
    fn localhost_short_circuits() {
        assert_eq!(
            cloudflare_resolve("localhost", QueryType::A).unwrap(),
            IpAddress::localhost_v4()
        );
        assert_eq!(
            cloudflare_resolve("LocalHost", QueryType::Aaaa).unwrap(),
            IpAddress::localhost_v6()
        );
        assert_eq!(resolve("localhost").unwrap(), IpAddress::localhost_v6());
    }
}
