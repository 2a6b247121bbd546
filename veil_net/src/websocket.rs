//! WebSocket client (RFC 6455) over the TLS/plaintext transport.
//!
//! Implements the opening handshake (§4), the base framing protocol with
//! client-to-server masking (§5.2, §5.3), fragmented-message reassembly
//! (§5.4), Close/Ping/Pong control frames (§5.5), and the closing
//! handshake (§7).

use crate::dns::{self, QueryType};
use crate::http::{HttpClient, ParsedUrl};
use crate::ip::IpAddress;
use crate::tls::client::TlsClient;
use log::debug;
use veil_core::base64;
use veil_core::error::{Error, ErrorCode, Result, ResultExt};
use veil_core::prng::Prng;

/// Frames beyond this payload size are rejected outright.
const MAX_FRAME_PAYLOAD: u64 = 64 * 1024 * 1024;

/// Mask-and-send staging buffer; also the coalescing threshold for small
/// frames.
const CHUNK_SIZE: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Opcode> {
        match bits {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }
}

/// One reassembled message: the opcode of the initial frame plus the
/// concatenated payload of every fragment.
#[derive(Debug)]
pub struct WebSocketMessage {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// One parsed frame off the wire.
struct Frame {
    fin: bool,
    opcode: Opcode,
    payload: Vec<u8>,
}

pub struct WebSocketClient {
    host: String,
    path: String,
    port: u16,
    ip: IpAddress,
    tls: TlsClient,
    connected: bool,
    prng: Prng,
}

impl WebSocketClient {
    /// Parses a `ws://` or `wss://` URL, resolves the host (AAAA first,
    /// A fallback), and prepares the transport. `open` performs the
    /// handshake.
    pub fn create(url: &str) -> Result<WebSocketClient> {
        let parsed = ParsedUrl::parse(url).or_code(ErrorCode::WsCreateFailed)?;
        let mut ip = dns::resolve(&parsed.host).or_code(ErrorCode::WsDnsFailed)?;

        let mut tls = TlsClient::create(&parsed.host, ip, parsed.port, parsed.secure);
        if tls.is_err() && ip.is_ipv6() {
            if let Ok(v4) = dns::resolve_with_type(&parsed.host, QueryType::A) {
                ip = v4;
                tls = TlsClient::create(&parsed.host, ip, parsed.port, parsed.secure);
            }
        }
        let tls = tls.or_code(ErrorCode::WsCreateFailed)?;

        Ok(WebSocketClient {
            host: parsed.host,
            path: parsed.path,
            port: parsed.port,
            ip,
            tls,
            connected: false,
            prng: Prng::from_hardware(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_secure()
    }

    /// Opening handshake (§4): connect (retrying once over IPv4 when the
    /// IPv6 connect fails), send the Upgrade request with a fresh
    /// `Sec-WebSocket-Key`, and require a 101 response.
    pub fn open(&mut self) -> Result<()> {
        let secure = self.tls.is_secure();
        debug!("opening websocket to {}:{}{}", self.host, self.port, self.path);

        let mut opened = self.tls.open();
        if opened.is_err() && self.ip.is_ipv6() {
            debug!("ipv6 connect failed for {}, retrying over ipv4", self.host);
            let v4 = dns::resolve_with_type(&self.host, QueryType::A)
                .or_code(ErrorCode::WsDnsFailed)?;
            let _ = self.tls.close();
            self.ip = v4;
            self.tls = TlsClient::create(&self.host, v4, self.port, secure)
                .or_code(ErrorCode::WsTransportFailed)?;
            opened = self.tls.open();
        }
        opened.or_code(ErrorCode::WsTransportFailed)?;

        // 16 random bytes, Base64-encoded to the 24-character key (§4.1).
        let mut key_bytes = [0u8; 16];
        self.prng.fill_bytes(&mut key_bytes).or_code(ErrorCode::WsHandshakeFailed)?;
        let key = base64::encode(&key_bytes);

        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Origin: {origin}{host}\r\n\
             \r\n",
            path = self.path,
            host = self.host,
            key = key,
            origin = if secure { "https://" } else { "http://" },
        );
        let written = self.tls.write(request.as_bytes()).or_code(ErrorCode::WsWriteFailed)?;
        if written as usize != request.len() {
            let _ = self.close();
            return Err(Error::internal(ErrorCode::WsWriteFailed));
        }

        if let Err(err) = HttpClient::read_response_headers(&mut self.tls, 101) {
            let _ = self.close();
            return Err(err).or_code(ErrorCode::WsHandshakeFailed);
        }

        self.connected = true;
        Ok(())
    }

    /// Closing handshake (§7): best-effort Close frame with status 1000,
    /// then transport teardown.
    pub fn close(&mut self) -> Result<()> {
        if self.connected {
            let status = 1000u16.to_be_bytes();
            let _ = self.write(&status, Opcode::Close);
        }
        self.connected = false;
        let _ = self.tls.close();
        debug!("websocket to {}:{}{} closed", self.host, self.port, self.path);
        Ok(())
    }

    /// Sends one complete frame: FIN=1, MASK=1, a fresh 32-bit mask per
    /// frame. Small frames go out in a single transport write; larger
    /// payloads stream in masked 256-byte chunks.
    pub fn write(&mut self, payload: &[u8], opcode: Opcode) -> Result<u32> {
        if !self.connected && opcode != Opcode::Close {
            return Err(Error::internal(ErrorCode::WsNotConnected));
        }

        let mask_key = (self.prng.get() as u32).to_le_bytes();
        let (header, header_len) = encode_frame_header(opcode, payload.len() as u64, &mask_key);

        let mut chunk = [0u8; CHUNK_SIZE];

        // Small frame: header and masked payload in one write.
        if payload.len() <= CHUNK_SIZE - header_len {
            chunk[..header_len].copy_from_slice(&header[..header_len]);
            for (index, &byte) in payload.iter().enumerate() {
                chunk[header_len + index] = byte ^ mask_key[index & 3];
            }
            let frame_len = header_len + payload.len();
            let written =
                self.tls.write(&chunk[..frame_len]).or_code(ErrorCode::WsWriteFailed)?;
            if written as usize != frame_len {
                return Err(Error::internal(ErrorCode::WsWriteFailed));
            }
            return Ok(payload.len() as u32);
        }

        // Large frame: header first, then masked chunks.
        let written =
            self.tls.write(&header[..header_len]).or_code(ErrorCode::WsWriteFailed)?;
        if written as usize != header_len {
            return Err(Error::internal(ErrorCode::WsWriteFailed));
        }

        let mut offset = 0usize;
        while offset < payload.len() {
            let count = (payload.len() - offset).min(CHUNK_SIZE);
            for index in 0..count {
                chunk[index] = payload[offset + index] ^ mask_key[(offset + index) & 3];
            }
            let written = self.tls.write(&chunk[..count]).or_code(ErrorCode::WsWriteFailed)?;
            if written as usize != count {
                return Err(Error::internal(ErrorCode::WsWriteFailed));
            }
            offset += count;
        }
        Ok(payload.len() as u32)
    }

    /// Reads the next complete message, reassembling fragments (§5.4) and
    /// servicing control frames on the way: Close is echoed and surfaces
    /// as `WsConnectionClosed`, Ping is answered with Pong, Pong is
    /// discarded.
    pub fn read(&mut self) -> Result<WebSocketMessage> {
        if !self.connected {
            return Err(Error::internal(ErrorCode::WsNotConnected));
        }

        let mut message: Option<WebSocketMessage> = None;

        loop {
            let frame = self.receive_frame()?;
            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    match (&mut message, frame.opcode) {
                        (None, Opcode::Continuation) => {
                            // Continuation with nothing to continue.
                            return Err(Error::internal(ErrorCode::WsInvalidFrame));
                        }
                        (None, opcode) => {
                            message = Some(WebSocketMessage { opcode, payload: frame.payload });
                        }
                        (Some(partial), Opcode::Continuation) => {
                            partial.payload.extend_from_slice(&frame.payload);
                        }
                        (Some(_), _) => {
                            // A new data frame may not interleave with an
                            // unfinished message.
                            return Err(Error::internal(ErrorCode::WsInvalidFrame));
                        }
                    }
                    if frame.fin {
                        match message.take() {
                            Some(done) => return Ok(done),
                            None => return Err(Error::internal(ErrorCode::WsInvalidFrame)),
                        }
                    }
                }
                Opcode::Close => {
                    // Echo the 2-byte status code back (§5.5.1).
                    let echo_len = if frame.payload.len() >= 2 { 2 } else { 0 };
                    let status = frame.payload[..echo_len].to_vec();
                    let _ = self.write(&status, Opcode::Close);
                    self.connected = false;
                    let _ = self.tls.close();
                    return Err(Error::internal(ErrorCode::WsConnectionClosed));
                }
                Opcode::Ping => {
                    let payload = frame.payload;
                    let _ = self.write(&payload, Opcode::Pong);
                }
                Opcode::Pong => {} // unsolicited pongs are allowed
            }
        }
    }

    /// Reads exactly `buffer.len()` bytes off the transport.
    fn receive_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut total = 0usize;
        while total < buffer.len() {
            let received =
                self.tls.read(&mut buffer[total..]).or_code(ErrorCode::WsReceiveFailed)?;
            if received <= 0 {
                return Err(Error::internal(ErrorCode::WsReceiveFailed));
            }
            total += received as usize;
        }
        Ok(())
    }

    /// Parses one frame off the wire (§5.2): rejects non-zero RSV bits and
    /// oversized payloads, reads the optional extended length and mask
    /// key, unmasks when the peer set the mask bit.
    fn receive_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; 2];
        self.receive_exact(&mut header).or_code(ErrorCode::WsReceiveFailedHeader)?;

        let fin = header[0] & 0x80 != 0;
        let rsv = header[0] & 0x70;
        let opcode_bits = header[0] & 0x0F;
        let masked = header[1] & 0x80 != 0;
        let length_bits = header[1] & 0x7F;

        // No extensions are negotiated, so RSV1-3 must be zero.
        if rsv != 0 {
            return Err(Error::internal(ErrorCode::WsInvalidFrame));
        }
        let opcode =
            Opcode::from_bits(opcode_bits).ok_or(Error::internal(ErrorCode::WsInvalidFrame))?;

        let payload_len: u64 = match length_bits {
            126 => {
                let mut extended = [0u8; 2];
                self.receive_exact(&mut extended).or_code(ErrorCode::WsReceiveFailedLength)?;
                u64::from(u16::from_be_bytes(extended))
            }
            127 => {
                let mut extended = [0u8; 8];
                self.receive_exact(&mut extended).or_code(ErrorCode::WsReceiveFailedLength)?;
                u64::from_be_bytes(extended)
            }
            n => u64::from(n),
        };
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(Error::internal(ErrorCode::WsFrameTooLarge));
        }

        let mut mask_key = [0u8; 4];
        if masked {
            self.receive_exact(&mut mask_key).or_code(ErrorCode::WsReceiveFailedMask)?;
        }

        let mut payload = vec![0u8; payload_len as usize];
        if payload_len > 0 {
            self.receive_exact(&mut payload).or_code(ErrorCode::WsReceiveFailedPayload)?;
            if masked {
                apply_mask(&mut payload, &mask_key);
            }
        }

        Ok(Frame { fin, opcode, payload })
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builds the frame header: FIN | opcode, MASK | 7-bit length, the 16- or
/// 64-bit extended length when needed, then the mask key. Returns the
/// header bytes and their count (6, 8, or 14).
fn encode_frame_header(opcode: Opcode, payload_len: u64, mask_key: &[u8; 4]) -> ([u8; 14], usize) {
    let mut header = [0u8; 14];
    header[0] = 0x80 | opcode as u8;

    let header_len = if payload_len <= 125 {
        header[1] = 0x80 | payload_len as u8;
        header[2..6].copy_from_slice(mask_key);
        6
    } else if payload_len <= 0xFFFF {
        header[1] = 0x80 | 126;
        header[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
        header[4..8].copy_from_slice(mask_key);
        8
    } else {
        header[1] = 0x80 | 127;
        header[2..10].copy_from_slice(&payload_len.to_be_bytes());
        header[10..14].copy_from_slice(mask_key);
        14
    };
    (header, header_len)
}

/// §5.3 masking transform; XOR is its own inverse, so this both masks and
/// unmasks.
fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[index & 3];
    }
}
