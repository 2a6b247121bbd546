//! End-to-end HTTP client behavior against a scripted loopback server,
//! no real network required.

use std::io::{Read, Write};
use std::net::TcpListener;
use veil_net::http::HttpClient;

fn spawn_server(response: &'static [u8]) -> (std::thread::JoinHandle<Vec<u8>>, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        // Read until the blank line; requests here have no body unless
        // Content-Length says otherwise.
        loop {
            let received = stream.read(&mut chunk).unwrap();
            request.extend_from_slice(&chunk[..received]);
            if request.windows(4).any(|w| w == b"\r\n\r\n") || received == 0 {
                break;
            }
        }
        let header_end = request.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
        if let Some(header_end) = header_end {
            let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
            if let Some(line) = headers.lines().find(|l| l.starts_with("Content-Length: ")) {
                let expected: usize = line["Content-Length: ".len()..].trim().parse().unwrap();
                while request.len() - header_end < expected {
                    let received = stream.read(&mut chunk).unwrap();
                    if received == 0 {
                        break;
                    }
                    request.extend_from_slice(&chunk[..received]);
                }
            }
        }
        stream.write_all(response).unwrap();
        request
    });
    (handle, port)
}

#[test]
fn get_request_and_response_headers() {
    let (server, port) =
        spawn_server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    let url = format!("http://localhost:{}/index.html", port);
    let mut client = HttpClient::create_with_ip(&url, "127.0.0.1").unwrap();
    assert!(!client.is_secure());
    assert_eq!(client.host(), "localhost");
    assert_eq!(client.path(), "/index.html");

    client.open().unwrap();
    client.send_get_request().unwrap();

    let content_length =
        HttpClient::read_response_headers(client.transport(), 200).unwrap();
    assert_eq!(content_length, 5);

    let mut body = [0u8; 5];
    let mut total = 0usize;
    while total < 5 {
        let received = client.read(&mut body[total..]).unwrap();
        assert!(received > 0);
        total += received as usize;
    }
    assert_eq!(&body, b"hello");
    client.close().unwrap();

    let request = server.join().unwrap();
    let text = String::from_utf8_lossy(&request);
    assert!(text.starts_with("GET /index.html HTTP/1.1\r\n"));
    assert!(text.contains("Host: localhost\r\n"));
    assert!(text.contains("Connection: close\r\n"));
}

#[test]
fn post_request_carries_length_and_body() {
    let (server, port) = spawn_server(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");

    let url = format!("http://localhost:{}/submit", port);
    let mut client = HttpClient::create_with_ip(&url, "127.0.0.1").unwrap();
    client.open().unwrap();
    client.send_post_request(b"key=value").unwrap();

    let content_length =
        HttpClient::read_response_headers(client.transport(), 200).unwrap();
    assert_eq!(content_length, 0);
    client.close().unwrap();

    let request = server.join().unwrap();
    let text = String::from_utf8_lossy(&request);
    assert!(text.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(text.contains("Content-Length: 9\r\n"));
    assert!(text.ends_with("key=value"));
}

#[test]
fn unexpected_status_surfaces_as_error() {
    let (server, port) =
        spawn_server(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");

    let url = format!("http://localhost:{}/missing", port);
    let mut client = HttpClient::create_with_ip(&url, "127.0.0.1").unwrap();
    client.open().unwrap();
    client.send_get_request().unwrap();

    assert!(HttpClient::read_response_headers(client.transport(), 200).is_err());
    let _ = client.close();
    let _ = server.join();
}
