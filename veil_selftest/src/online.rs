//! Suites that exercise the stack against real endpoints. Only run with
//! `online=true` in the configuration.

use log::{error, info};
use veil_net::dns::{self, QueryType};
use veil_net::ip::IpAddress;
use veil_net::tls::client::TlsClient;
use veil_net::websocket::{Opcode, WebSocketClient};

/// Full TLS 1.3 handshake against one.one.one.one (1.1.1.1:443), then a
/// GET and at least one byte of response.
pub fn tls_suite() -> bool {
    let ip = IpAddress::V4([1, 1, 1, 1]);
    let mut client = match TlsClient::create("one.one.one.one", ip, 443, true) {
        Ok(client) => client,
        Err(err) => {
            error!("  tls client creation failed: {}", err);
            return false;
        }
    };
    if let Err(err) = client.open() {
        error!("  tls handshake failed: {}", err);
        return false;
    }
    if !client.is_established() {
        error!("  handshake reported success but the session is not open");
        return false;
    }

    let request = b"GET / HTTP/1.1\r\nHost: one.one.one.one\r\nConnection: close\r\n\r\n";
    match client.write(request) {
        Ok(written) if written as usize == request.len() => {}
        other => {
            error!("  request write failed: {:?}", other);
            return false;
        }
    }

    let mut response = [0u8; 128];
    let received = match client.read(&mut response) {
        Ok(received) => received,
        Err(err) => {
            error!("  response read failed: {}", err);
            return false;
        }
    };
    let _ = client.close();

    if received < 1 {
        error!("  empty response");
        return false;
    }
    info!("  received {} bytes, starts {:?}", received, &response[..12.min(received as usize)]);
    true
}

/// DoH resolution of dns.google; the answer must be one of its anycast
/// addresses.
pub fn doh_suite() -> bool {
    match dns::cloudflare_resolve("dns.google", QueryType::A) {
        Ok(ip) => {
            let accepted = ip.to_ipv4() == 0x08080808 || ip.to_ipv4() == 0x04040808;
            if !accepted {
                error!("  unexpected address for dns.google: {}", ip);
            } else {
                info!("  dns.google -> {}", ip);
            }
            accepted
        }
        Err(err) => {
            error!("  resolution failed: {}", err);
            false
        }
    }
}

/// Binary echo round trip against a public echo endpoint. Some echo
/// services greet with a text message first, so a few non-matching
/// messages are tolerated.
pub fn websocket_suite(echo_url: &str) -> bool {
    let mut client = match WebSocketClient::create(echo_url) {
        Ok(client) => client,
        Err(err) => {
            error!("  websocket creation failed: {}", err);
            return false;
        }
    };
    if let Err(err) = client.open() {
        error!("  websocket handshake failed: {}", err);
        return false;
    }

    let payload = [0x01u8, 0x02, 0x03];
    if client.write(&payload, Opcode::Binary).is_err() {
        error!("  frame write failed");
        return false;
    }

    for _ in 0..4 {
        match client.read() {
            Ok(message) => {
                if message.opcode == Opcode::Binary && message.payload == payload {
                    let _ = client.close();
                    return true;
                }
                info!("  skipping non-echo message ({:?}, {} bytes)", message.opcode, message.payload.len());
            }
            Err(err) => {
                error!("  read failed: {}", err);
                return false;
            }
        }
    }
    error!("  echo never arrived");
    let _ = client.close();
    false
}
