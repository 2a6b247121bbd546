//! Scenarios that need real internet connectivity. Ignored by default;
//! run with `cargo test -- --ignored` on a connected machine, or through
//! the veil_selftest binary with `online=true`.

use veil_net::dns::{self, QueryType};
use veil_net::ip::IpAddress;
use veil_net::tls::client::TlsClient;
use veil_net::websocket::{Opcode, WebSocketClient};

#[test]
#[ignore = "needs internet access"]
fn tls13_handshake_with_cloudflare() {
    let mut client =
        TlsClient::create("one.one.one.one", IpAddress::V4([1, 1, 1, 1]), 443, true).unwrap();
    client.open().unwrap();
    assert!(client.is_established());

    let request = b"GET / HTTP/1.1\r\nHost: one.one.one.one\r\nConnection: close\r\n\r\n";
    assert_eq!(client.write(request).unwrap() as usize, request.len());

    let mut response = [0u8; 128];
    let received = client.read(&mut response).unwrap();
    assert!(received >= 1);
    client.close().unwrap();
}

#[test]
#[ignore = "needs internet access"]
fn doh_resolves_dns_google() {
    let ip = dns::cloudflare_resolve("dns.google", QueryType::A).unwrap();
    assert!(
        ip.to_ipv4() == 0x08080808 || ip.to_ipv4() == 0x04040808,
        "unexpected address {}",
        ip
    );
}

#[test]
#[ignore = "needs internet access"]
fn doh_google_resolves_cloudflare() {
    let ip = dns::google_resolve("one.one.one.one", QueryType::A).unwrap();
    assert!(
        ip.to_ipv4() == 0x01010101 || ip.to_ipv4() == 0x01000001,
        "unexpected address {}",
        ip
    );
}

#[test]
#[ignore = "needs internet access"]
fn websocket_echo_round_trip() {
    let mut client = WebSocketClient::create("wss://echo.websocket.org").unwrap();
    client.open().unwrap();

    let payload = [0x01u8, 0x02, 0x03];
    client.write(&payload, Opcode::Binary).unwrap();

    // The endpoint greets with a text banner before echoing.
    for _ in 0..4 {
        let message = client.read().unwrap();
        if message.opcode == Opcode::Binary {
            assert_eq!(message.payload, payload);
            let _ = client.close();
            return;
        }
    }
    panic!("echo never arrived");
}
