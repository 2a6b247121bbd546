//! Minimal HTTP/1.1 client: URL parsing, GET/POST composition, and a
//! byte-at-a-time response-header parser.
//!
//! The parser never buffers headers. A rolling 4-byte window detects the
//! `CR LF CR LF` terminator and, at byte 13, holds exactly the status
//! text, which is compared against the expected code. A small
//! line-anchored matcher extracts `Content-Length` on the way past.

use crate::dns::{self, QueryType};
use crate::ip::IpAddress;
use crate::tls::client::TlsClient;
use log::debug;
use veil_core::djb2;
use veil_core::error::{Error, ErrorCode, Result, ResultExt};

/// RFC 1035 caps the host name at 253 characters.
pub const MAX_HOST: usize = 253;
/// De facto URL path cap.
pub const MAX_PATH: usize = 2047;

/// Header section cap; parsing aborts beyond this.
const MAX_HEADER_BYTES: u32 = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    pub path: String,
    pub port: u16,
    pub secure: bool,
}

pub struct HttpClient {
    host: String,
    path: String,
    port: u16,
    ip: IpAddress,
    tls: TlsClient,
}

impl HttpClient {
    /// Parses the URL, resolves the host (AAAA first), and prepares the
    /// transport. Falls back to an A record once if socket creation fails
    /// for an IPv6 address.
    pub fn create(url: &str) -> Result<HttpClient> {
        let parsed = ParsedUrl::parse(url).or_code(ErrorCode::HttpCreateFailed)?;
        let ip = dns::resolve(&parsed.host).or_code(ErrorCode::HttpCreateFailedDns)?;
        Self::from_parts(parsed, ip)
    }

    /// Like [`HttpClient::create`] but with the peer address supplied by
    /// the caller; no DNS traffic. This is how the DoH resolvers bootstrap.
    pub fn create_with_ip(url: &str, ip_literal: &str) -> Result<HttpClient> {
        let parsed = ParsedUrl::parse(url).or_code(ErrorCode::HttpCreateFailed)?;
        let ip = IpAddress::parse(ip_literal).or_code(ErrorCode::HttpCreateFailedIp)?;
        let tls = TlsClient::create(&parsed.host, ip, parsed.port, parsed.secure)
            .or_code(ErrorCode::HttpCreateFailedTls)?;
        Ok(HttpClient { host: parsed.host, path: parsed.path, port: parsed.port, ip, tls })
    }

    fn from_parts(parsed: ParsedUrl, mut ip: IpAddress) -> Result<HttpClient> {
        let mut tls = TlsClient::create(&parsed.host, ip, parsed.port, parsed.secure);

        // IPv6 socket creation can fail on hosts without IPv6 support.
        if tls.is_err() && ip.is_ipv6() {
            if let Ok(v4) = dns::resolve_with_type(&parsed.host, QueryType::A) {
                debug!("ipv6 transport failed for {}, retrying over ipv4", parsed.host);
                ip = v4;
                tls = TlsClient::create(&parsed.host, ip, parsed.port, parsed.secure);
            }
        }

        let tls = tls.or_code(ErrorCode::HttpCreateFailedTls)?;
        Ok(HttpClient { host: parsed.host, path: parsed.path, port: parsed.port, ip, tls })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip(&self) -> IpAddress {
        self.ip
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_secure()
    }

    pub fn transport(&mut self) -> &mut TlsClient {
        &mut self.tls
    }

    pub fn open(&mut self) -> Result<()> {
        self.tls.open().or_code(ErrorCode::HttpOpenFailed)
    }

    pub fn close(&mut self) -> Result<()> {
        self.tls.close().or_code(ErrorCode::HttpCloseFailed)
    }

    pub fn read(&mut self, buffer: &mut [u8]) -> Result<isize> {
        self.tls.read(buffer).or_code(ErrorCode::HttpReadFailed)
    }

    pub fn write(&mut self, buffer: &[u8]) -> Result<u32> {
        self.tls.write(buffer).or_code(ErrorCode::HttpWriteFailed)
    }

    pub fn send_get_request(&mut self) -> Result<()> {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            self.path, self.host
        );
        let written = self.write(request.as_bytes()).or_code(ErrorCode::HttpSendGetFailed)?;
        if written as usize != request.len() {
            return Err(Error::internal(ErrorCode::HttpSendGetFailed));
        }
        Ok(())
    }

    pub fn send_post_request(&mut self, body: &[u8]) -> Result<()> {
        self.send_post_request_with_headers(body, &[])
    }

    /// POST with extra headers, e.g. a content type.
    pub fn send_post_request_with_headers(
        &mut self,
        body: &[u8],
        extra_headers: &[(&str, &str)],
    ) -> Result<()> {
        let mut request = format!("POST {} HTTP/1.1\r\nHost: {}\r\n", self.path, self.host);
        for (name, value) in extra_headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str(&format!("Content-Length: {}\r\nConnection: close\r\n\r\n", body.len()));

        let written = self.write(request.as_bytes()).or_code(ErrorCode::HttpSendPostFailed)?;
        if written as usize != request.len() {
            return Err(Error::internal(ErrorCode::HttpSendPostFailed));
        }
        if !body.is_empty() {
            let written = self.write(body).or_code(ErrorCode::HttpSendPostFailed)?;
            if written as usize != body.len() {
                return Err(Error::internal(ErrorCode::HttpSendPostFailed));
            }
        }
        Ok(())
    }

    /// Consumes the response headers from `client`, validating the status
    /// line and returning the Content-Length (-1 when absent).
    pub fn read_response_headers(client: &mut TlsClient, expected_status: u16) -> Result<i64> {
        read_headers(|buffer| client.read(buffer), expected_status)
    }
}

impl ParsedUrl {
    /// Recognizes `http://`, `https://`, `ws://`, and `wss://` URLs.
    /// Scheme matching is case-insensitive; the port defaults to 80/443
    /// by scheme and the path to `/`.
    pub fn parse(url: &str) -> Result<ParsedUrl> {
        let bad = || Error::internal(ErrorCode::HttpParseUrlFailed);

        let (scheme, rest) = url.split_once("://").ok_or_else(bad)?;
        let scheme_hash = djb2::hash(scheme.as_bytes());
        let secure = if scheme_hash == djb2::hash(b"http") || scheme_hash == djb2::hash(b"ws") {
            false
        } else if scheme_hash == djb2::hash(b"https") || scheme_hash == djb2::hash(b"wss") {
            true
        } else {
            return Err(bad());
        };

        let path_start = rest.find('/').unwrap_or(rest.len());
        let (authority, path_text) = rest.split_at(path_start);

        let (host, port) = match authority.split_once(':') {
            None => (authority, if secure { 443 } else { 80 }),
            Some((host, port_text)) => {
                if port_text.is_empty()
                    || port_text.len() > 5
                    || !port_text.bytes().all(|b| b.is_ascii_digit())
                {
                    return Err(bad());
                }
                let port: u32 = port_text.parse().map_err(|_| bad())?;
                if port == 0 || port > 65535 {
                    return Err(bad());
                }
                (host, port as u16)
            }
        };

        if host.is_empty() || host.len() > MAX_HOST {
            return Err(bad());
        }
        if path_text.len() > MAX_PATH {
            return Err(bad());
        }

        Ok(ParsedUrl {
            host: host.to_string(),
            path: if path_text.is_empty() { "/".to_string() } else { path_text.to_string() },
            port,
            secure,
        })
    }
}

/// The transport-agnostic header parser behind
/// [`HttpClient::read_response_headers`].
fn read_headers<R>(mut read: R, expected_status: u16) -> Result<i64>
where
    R: FnMut(&mut [u8]) -> Result<isize>,
{
    // "XYZ ": the status text occupies bytes 9..13 of the status line.
    let expected_tail: u32 = (u32::from(b'0' + (expected_status / 100) as u8) << 24)
        | (u32::from(b'0' + ((expected_status / 10) % 10) as u8) << 16)
        | (u32::from(b'0' + (expected_status % 10) as u8) << 8)
        | u32::from(b' ');

    const CONTENT_LENGTH: &[u8] = b"Content-Length: ";

    let mut window: u32 = 0;
    let mut consumed: u32 = 0;
    let mut status_valid = false;
    let mut content_length: i64 = -1;

    let mut match_index = 0usize;
    let mut parsing_value = false;
    let mut at_line_start = true;

    loop {
        let mut byte = [0u8; 1];
        let received = read(&mut byte)?;
        if received <= 0 {
            return Err(Error::internal(ErrorCode::HttpReadHeadersFailedRead));
        }
        let c = byte[0];

        window = (window << 8) | u32::from(c);
        consumed += 1;
        if consumed > MAX_HEADER_BYTES {
            return Err(Error::internal(ErrorCode::HttpReadHeadersFailedRead));
        }

        // After 13 bytes the window holds bytes 9..12 of "HTTP/1.1 XYZ ".
        if consumed == 13 {
            status_valid = window == expected_tail;
        }

        if parsing_value {
            if c.is_ascii_digit() {
                if content_length > i64::MAX / 10 - 9 {
                    parsing_value = false;
                } else {
                    content_length = content_length * 10 + i64::from(c - b'0');
                }
            } else {
                parsing_value = false;
            }
        } else if at_line_start {
            match_index = usize::from(c == CONTENT_LENGTH[0]);
            at_line_start = false;
        } else if match_index > 0 && match_index < CONTENT_LENGTH.len() {
            if c == CONTENT_LENGTH[match_index] {
                match_index += 1;
                if match_index == CONTENT_LENGTH.len() {
                    parsing_value = true;
                    content_length = 0;
                }
            } else {
                match_index = 0;
            }
        }

        if c == b'\n' {
            at_line_start = true;
        }

        // \r\n\r\n ends the header section.
        if window == 0x0D0A0D0A {
            break;
        }
    }

    if !status_valid {
        return Err(Error::internal(ErrorCode::HttpReadHeadersFailedStatus));
    }
    Ok(content_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader_over(bytes: &'static [u8]) -> impl FnMut(&mut [u8]) -> Result<isize> {
        let mut offset = 0usize;
        move |buffer: &mut [u8]| {
            if offset >= bytes.len() {
                return Ok(0);
            }
            let count = buffer.len().min(bytes.len() - offset);
            buffer[..count].copy_from_slice(&bytes[offset..offset + count]);
            offset += count;
            Ok(count as isize)
        }
    }

    #[test]
    fn parse_url_defaults() {
        let parsed = ParsedUrl::parse("https://example.com").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.port, 443);
        assert!(parsed.secure);

        let parsed = ParsedUrl::parse("http://example.com/index.html").unwrap();
        assert_eq!(parsed.port, 80);
        assert!(!parsed.secure);
        assert_eq!(parsed.path, "/index.html");

        let parsed = ParsedUrl::parse("ws://example.com:8080/socket?x=1").unwrap();
        assert_eq!(parsed.port, 8080);
        assert!(!parsed.secure);
        assert_eq!(parsed.path, "/socket?x=1");

        let parsed = ParsedUrl::parse("wss://example.com").unwrap();
        assert_eq!(parsed.port, 443);
        assert!(parsed.secure);
    }

    #[test]
    fn parse_url_is_scheme_case_insensitive() {
        assert!(ParsedUrl::parse("HTTPS://example.com").unwrap().secure);
        assert!(!ParsedUrl::parse("Ws://example.com").unwrap().secure);
    }

    #[test]
    fn parse_url_rejects_garbage() {
        for bad in [
            "example.com",
            "ftp://example.com",
            "https://",
            "https://:8080/",
            "https://example.com:0/",
            "https://example.com:65536/",
            "https://example.com:12a/",
            "https://example.com:123456/",
        ] {
            assert!(ParsedUrl::parse(bad).is_err(), "{}", bad);
        }

        let long_host = format!("https://{}/", "a".repeat(254));
        assert!(ParsedUrl::parse(&long_host).is_err());
        let ok_host = format!("https://{}/", "a".repeat(253));
        assert!(ParsedUrl::parse(&ok_host).is_ok());
    }

    #[test]
    fn headers_with_content_length() {
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\nX: y\r\n\r\n";
        assert_eq!(read_headers(reader_over(response), 200).unwrap(), 42);
    }

    #[test]
    fn headers_without_content_length() {
        let response: &[u8] = b"HTTP/1.1 204 No Content\r\nServer: t\r\n\r\n";
        assert_eq!(read_headers(reader_over(response), 204).unwrap(), -1);
    }

    #[test]
    fn status_mismatch_is_an_error() {
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\nX: y\r\n\r\n";
        let err = read_headers(reader_over(response), 201).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::HttpReadHeadersFailedStatus));
    }

    #[test]
    fn content_length_matcher_is_line_anchored_and_case_sensitive() {
        // Lowercase header name must not match.
        let response: &[u8] = b"HTTP/1.1 200 OK\r\ncontent-length: 9\r\n\r\n";
        assert_eq!(read_headers(reader_over(response), 200).unwrap(), -1);

        // Mid-line occurrence must not match.
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nX-Note: Content-Length: 7\r\n\r\n";
        assert_eq!(read_headers(reader_over(response), 200).unwrap(), -1);

        // A later real header still matches.
        let response: &[u8] =
            b"HTTP/1.1 200 OK\r\nServer: x\r\nContent-Length: 1234\r\nVia: y\r\n\r\n";
        assert_eq!(read_headers(reader_over(response), 200).unwrap(), 1234);
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let response: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Le";
        let err = read_headers(reader_over(response), 200).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::HttpReadHeadersFailedRead));
    }

    #[test]
    fn unbounded_headers_are_cut_off() {
        let mut endless = move |buffer: &mut [u8]| {
            buffer[0] = b'a';
            Ok(1isize)
        };
        let err = read_headers(&mut endless, 200).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::HttpReadHeadersFailedRead));
    }
}
