//! TLS 1.3 client (RFC 8446), TLS_CHACHA20_POLY1305_SHA256 only.
//!
//! The handshake is a strict linear sequence; any out-of-order record
//! aborts the connection:
//!
//! ```text
//! 0  ClientHello sent
//! 1  ServerHello received
//! 2  ChangeCipherSpec received (middlebox compatibility, ignored)
//! 3  EncryptedExtensions received
//! 4  Certificate received
//! 5  CertificateVerify received
//! 6  Finished received and verified -> open
//! ```
//!
//! The server's certificate chain and CertificateVerify signature are fed
//! to the transcript but NOT validated. That makes this client safe only
//! against peers you already trust at the network layer; do not point it
//! at hostile infrastructure without adding chain validation.
//!
//! With `secure = false` the client degrades to a byte-for-byte
//! passthrough over the socket, which is how the `http://` and `ws://`
//! schemes ride the same code path.

use super::buffer::{Reader, TlsBuffer};
use super::cipher::{NamedGroup, TlsCipher, RANDOM_SIZE};
use super::encoder::ChaCha20Encoder;
use crate::ip::IpAddress;
use crate::socket::Socket;
use log::{debug, error};
use veil_core::error::{Error, ErrorCode, Result, ResultExt};
use veil_core::prng::Prng;

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 0x14;
const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_APPLICATION_DATA: u8 = 0x17;

const MSG_CLIENT_HELLO: u8 = 0x01;
const MSG_SERVER_HELLO: u8 = 0x02;
const MSG_ENCRYPTED_EXTENSIONS: u8 = 0x08;
const MSG_CERTIFICATE: u8 = 0x0B;
const MSG_CERTIFICATE_VERIFY: u8 = 0x0F;
const MSG_FINISHED: u8 = 0x14;
const MSG_CHANGE_CIPHER_SPEC: u8 = 0x01;

const EXT_SERVER_NAME: u16 = 0x0000;
const EXT_SUPPORTED_GROUPS: u16 = 0x000A;
const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000D;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002B;
const EXT_KEY_SHARE: u16 = 0x0033;

const TLS_CHACHA20_POLY1305_SHA256: u16 = 0x1303;
const LEGACY_VERSION: u16 = 0x0303;
const TLS13_VERSION: u16 = 0x0304;

/// Plaintext cap per record (RFC 8446 §5.1).
const MAX_PLAINTEXT: usize = 16 * 1024;
/// Ciphertext cap per record (RFC 8446 §5.2).
const MAX_CIPHERTEXT: usize = 16 * 1024 + 256;

const HANDSHAKE_DONE: usize = 6;

/// Expected (content type, message type) at each handshake state.
const STATE_SEQUENCE: [(u8, u8); HANDSHAKE_DONE] = [
    (CONTENT_HANDSHAKE, MSG_SERVER_HELLO),
    (CONTENT_CHANGE_CIPHER_SPEC, MSG_CHANGE_CIPHER_SPEC),
    (CONTENT_HANDSHAKE, MSG_ENCRYPTED_EXTENSIONS),
    (CONTENT_HANDSHAKE, MSG_CERTIFICATE),
    (CONTENT_HANDSHAKE, MSG_CERTIFICATE_VERIFY),
    (CONTENT_HANDSHAKE, MSG_FINISHED),
];

const SIGNATURE_ALGORITHMS: [u16; 11] = [
    0x0403, 0x0503, 0x0603, // ecdsa p256/p384/p521 sha2
    0x0804, 0x0805, 0x0806, // rsa-pss-rsae sha2
    0x0401, 0x0501, 0x0601, // rsa-pkcs1 sha2
    0x0203, 0x0201, // legacy sha1
];

pub struct TlsClient {
    host: String,
    socket: Socket,
    secure: bool,
    cipher: Option<TlsCipher>,
    state: usize,
    receive: Vec<u8>,
    channel: Vec<u8>,
    channel_cursor: usize,
}

impl TlsClient {
    /// `secure = false` yields the plaintext passthrough client.
    pub fn create(host: &str, ip: IpAddress, port: u16, secure: bool) -> Result<TlsClient> {
        let socket = Socket::create(ip, port).or_code(ErrorCode::TlsCreateFailedSocket)?;
        let cipher = if secure { Some(TlsCipher::new(Prng::from_hardware())?) } else { None };
        Ok(TlsClient {
            host: host.to_string(),
            socket,
            secure,
            cipher,
            state: 0,
            receive: Vec::new(),
            channel: Vec::new(),
            channel_cursor: 0,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// True once application data may flow.
    pub fn is_established(&self) -> bool {
        !self.secure || self.state >= HANDSHAKE_DONE
    }

    pub fn peer_ip(&self) -> IpAddress {
        self.socket.ip()
    }

    /// Connects and, for secure clients, drives the handshake to
    /// completion.
    pub fn open(&mut self) -> Result<()> {
        self.socket.open().or_code(ErrorCode::TlsOpenFailedSocket)?;
        if !self.secure {
            return Ok(());
        }
        self.send_client_hello().or_code(ErrorCode::TlsOpenFailedClientHello)?;
        while self.state < HANDSHAKE_DONE {
            self.process_receive().or_code(ErrorCode::TlsOpenFailedHandshake)?;
        }
        debug!("tls handshake with {} complete", self.host);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.state = 0;
        self.receive.clear();
        self.channel.clear();
        self.channel_cursor = 0;
        self.socket.close().or_code(ErrorCode::TlsCloseFailed)
    }

    /// Sends application data, chunked at the record size cap.
    pub fn write(&mut self, data: &[u8]) -> Result<u32> {
        if !self.secure {
            self.socket.write_all(data).or_code(ErrorCode::TlsWriteFailedSocket)?;
            return Ok(data.len() as u32);
        }
        if self.state < HANDSHAKE_DONE {
            return Err(Error::internal(ErrorCode::TlsWriteFailedState));
        }
        for chunk in data.chunks(MAX_PLAINTEXT) {
            let mut payload = TlsBuffer::new();
            payload.put_slice(chunk);
            self.send_record(CONTENT_APPLICATION_DATA, &mut payload)?;
        }
        Ok(data.len() as u32)
    }

    /// Returns buffered plaintext when available, otherwise drains one
    /// round of records. Short reads are normal.
    pub fn read(&mut self, out: &mut [u8]) -> Result<isize> {
        if !self.secure {
            return self.socket.read(out).or_code(ErrorCode::TlsReadFailedSocket);
        }
        if self.state < HANDSHAKE_DONE {
            return Err(Error::internal(ErrorCode::TlsReadFailedState));
        }
        while self.channel.len() <= self.channel_cursor {
            self.process_receive()?;
        }
        let available = self.channel.len() - self.channel_cursor;
        let count = available.min(out.len());
        out[..count].copy_from_slice(&self.channel[self.channel_cursor..self.channel_cursor + count]);
        self.channel_cursor += count;

        // Compact once fully drained, or once the read point is past 3/4
        // of a large buffer.
        if self.channel_cursor >= self.channel.len()
            || (self.channel.len() > 1024 * 1024 && self.channel_cursor > self.channel.len() / 4 * 3)
        {
            self.channel.drain(..self.channel_cursor);
            self.channel_cursor = 0;
        }
        Ok(count as isize)
    }

    // ---- outgoing records ----

    /// Frames and sends one record. Handshake payloads enter the
    /// transcript; once keys are installed everything except
    /// ChangeCipherSpec and alerts is AEAD-protected with the true
    /// content type appended to the plaintext (RFC 8446 §5.2).
    fn send_record(&mut self, content_type: u8, payload: &mut TlsBuffer) -> Result<()> {
        let cipher = self
            .cipher
            .as_mut()
            .ok_or(Error::internal(ErrorCode::TlsWriteFailedState))?;

        if content_type == CONTENT_HANDSHAKE && !payload.is_empty() {
            cipher.update_transcript(payload.as_slice());
        }

        let keep_plain =
            content_type == CONTENT_CHANGE_CIPHER_SPEC || content_type == CONTENT_ALERT;
        let encrypt = cipher.is_encoding() && !keep_plain;

        let mut record = TlsBuffer::new();
        record.put_u8(if encrypt { CONTENT_APPLICATION_DATA } else { content_type });
        record.put_u16(LEGACY_VERSION);
        let length_at = record.reserve_len(2);

        if encrypt {
            payload.put_u8(content_type);
            let wire_len = ChaCha20Encoder::compute_size(payload.len(), true);
            let aad = [
                CONTENT_APPLICATION_DATA,
                0x03,
                0x03,
                (wire_len >> 8) as u8,
                wire_len as u8,
            ];
            cipher.encode_record(&mut record, payload.as_slice(), &aad)?;
        } else {
            record.put_slice(payload.as_slice());
        }

        let body_len = record.len() - length_at - 2;
        record.patch_u16(length_at, body_len as u16);
        self.socket
            .write_all(record.as_slice())
            .or_code(ErrorCode::TlsWriteFailedSocket)
    }

    fn send_client_hello(&mut self) -> Result<()> {
        let host = self.host.clone();
        let cipher = self
            .cipher
            .as_mut()
            .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedClientHello))?;
        let client_random = cipher.create_client_random()?;

        let mut hello = TlsBuffer::new();
        hello.put_u8(MSG_CLIENT_HELLO);
        let body_at = hello.reserve_len(3);

        hello.put_u16(LEGACY_VERSION);
        hello.put_slice(&client_random);
        hello.put_u8(0); // empty legacy session id

        let ciphers_at = hello.reserve_len(2);
        hello.put_u16(TLS_CHACHA20_POLY1305_SHA256);
        hello.patch_u16(ciphers_at, (hello.len() - ciphers_at - 2) as u16);
        hello.put_u8(1);
        hello.put_u8(0); // null compression

        let extensions_at = hello.reserve_len(2);

        // server_name (SNI)
        let host_len = host.len() as u16;
        hello.put_u16(EXT_SERVER_NAME);
        hello.put_u16(host_len + 5);
        hello.put_u16(host_len + 3);
        hello.put_u8(0); // name type: host_name
        hello.put_u16(host_len);
        hello.put_slice(host.as_bytes());

        // supported_groups
        hello.put_u16(EXT_SUPPORTED_GROUPS);
        hello.put_u16((NamedGroup::ALL.len() * 2 + 2) as u16);
        hello.put_u16((NamedGroup::ALL.len() * 2) as u16);
        for group in NamedGroup::ALL {
            hello.put_u16(group.iana());
        }

        // supported_versions: TLS 1.3 only
        hello.put_u16(EXT_SUPPORTED_VERSIONS);
        hello.put_u16(3);
        hello.put_u8(2);
        hello.put_u16(TLS13_VERSION);

        // signature_algorithms
        hello.put_u16(EXT_SIGNATURE_ALGORITHMS);
        hello.put_u16((SIGNATURE_ALGORITHMS.len() * 2 + 2) as u16);
        hello.put_u16((SIGNATURE_ALGORITHMS.len() * 2) as u16);
        for algorithm in SIGNATURE_ALGORITHMS {
            hello.put_u16(algorithm);
        }

        // key_share: one entry per supported group
        hello.put_u16(EXT_KEY_SHARE);
        let share_ext_at = hello.reserve_len(2);
        let share_list_at = hello.reserve_len(2);
        for group in NamedGroup::ALL {
            hello.put_u16(group.iana());
            let entry_at = hello.reserve_len(2);
            cipher.append_public_key(group, &mut hello)?;
            hello.patch_u16(entry_at, (hello.len() - entry_at - 2) as u16);
        }
        hello.patch_u16(share_ext_at, (hello.len() - share_ext_at - 2) as u16);
        hello.patch_u16(share_list_at, (hello.len() - share_list_at - 2) as u16);

        hello.patch_u16(extensions_at, (hello.len() - extensions_at - 2) as u16);
        hello.patch_u24(body_at, (hello.len() - body_at - 3) as u32);

        self.send_record(CONTENT_HANDSHAKE, &mut hello)
    }

    fn send_change_cipher_spec(&mut self) -> Result<()> {
        let mut payload = TlsBuffer::new();
        payload.put_u8(0x01);
        self.send_record(CONTENT_CHANGE_CIPHER_SPEC, &mut payload)
    }

    fn send_client_finished(&mut self) -> Result<()> {
        let verify = self
            .cipher
            .as_ref()
            .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedState))?
            .verify_data(false);
        let mut message = TlsBuffer::new();
        message.put_u8(MSG_FINISHED);
        message.put_u24(verify.len() as u32);
        message.put_slice(&verify);
        self.send_record(CONTENT_HANDSHAKE, &mut message)
    }

    // ---- incoming records ----

    /// One blocking socket read, then every complete record in the
    /// accumulation buffer.
    fn process_receive(&mut self) -> Result<()> {
        let mut chunk = [0u8; MAX_CIPHERTEXT];
        let received = self.socket.read(&mut chunk).or_code(ErrorCode::TlsReadFailedSocket)?;
        if received <= 0 {
            let _ = self.close();
            return Err(Error::internal(ErrorCode::TlsReadFailedClosed));
        }
        self.receive.extend_from_slice(&chunk[..received as usize]);

        let mut consumed = 0;
        while self.receive.len() - consumed >= 5 {
            let mut header = [0u8; 5];
            header.copy_from_slice(&self.receive[consumed..consumed + 5]);
            let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
            if record_len > MAX_CIPHERTEXT {
                let _ = self.close();
                return Err(Error::internal(ErrorCode::TlsRecordTooLarge));
            }
            if consumed + 5 + record_len > self.receive.len() {
                break;
            }
            let body = self.receive[consumed + 5..consumed + 5 + record_len].to_vec();
            if let Err(err) = self.on_record(header, &body) {
                let _ = self.close();
                return Err(err);
            }
            consumed += 5 + record_len;
        }
        self.receive.drain(..consumed);
        Ok(())
    }

    /// Decrypts a protected record (recovering the true content type from
    /// the trailing byte) and walks the messages inside it.
    fn on_record(&mut self, header: [u8; 5], body: &[u8]) -> Result<()> {
        let mut content_type = header[0];
        let mut plain = TlsBuffer::new();

        {
            let cipher = self
                .cipher
                .as_mut()
                .ok_or(Error::internal(ErrorCode::TlsReadFailedState))?;
            if cipher.is_encoding()
                && content_type != CONTENT_CHANGE_CIPHER_SPEC
                && content_type != CONTENT_ALERT
            {
                cipher.decode_record(body, &mut plain, &header)?;
                // Strip record padding, then the true content type.
                let data = plain.as_slice();
                let mut end = data.len();
                while end > 0 && data[end - 1] == 0 {
                    end -= 1;
                }
                if end == 0 {
                    return Err(Error::internal(ErrorCode::TlsDecodeFailedLength));
                }
                content_type = data[end - 1];
                plain.truncate(end - 1);
            } else {
                plain.put_slice(body);
            }
        }

        self.dispatch(content_type, plain.as_slice())
    }

    fn dispatch(&mut self, content_type: u8, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let segment_len = if content_type == CONTENT_HANDSHAKE {
                if data.len() - offset < 4 {
                    return Err(Error::internal(ErrorCode::TlsHandshakeFailedUnexpectedMessage));
                }
                4 + u32::from_be_bytes([0, data[offset + 1], data[offset + 2], data[offset + 3]])
                    as usize
            } else {
                data.len() - offset
            };
            if offset + segment_len > data.len() {
                return Err(Error::internal(ErrorCode::TlsHandshakeFailedUnexpectedMessage));
            }
            let segment = &data[offset..offset + segment_len];

            if self.state < HANDSHAKE_DONE && content_type != CONTENT_ALERT {
                let (want_content, want_message) = STATE_SEQUENCE[self.state];
                let message = segment.first().copied().unwrap_or(0);
                if want_content != content_type || want_message != message {
                    debug!(
                        "handshake state {} expected ({:#04x}, {:#04x}), got ({:#04x}, {:#04x})",
                        self.state, want_content, want_message, content_type, message
                    );
                    return Err(Error::internal(ErrorCode::TlsHandshakeFailedUnexpectedMessage));
                }
                self.state += 1;
            }

            match content_type {
                CONTENT_HANDSHAKE => self.on_handshake_message(segment)?,
                CONTENT_CHANGE_CIPHER_SPEC => {} // middlebox compat, no semantics
                CONTENT_ALERT => {
                    if segment.len() >= 2 {
                        error!("tls alert from {}: level {} code {}", self.host, segment[0], segment[1]);
                    }
                    return Err(Error::internal(ErrorCode::TlsAlertReceived));
                }
                CONTENT_APPLICATION_DATA => self.channel.extend_from_slice(segment),
                _ => return Err(Error::internal(ErrorCode::TlsHandshakeFailedUnexpectedMessage)),
            }
            offset += segment_len;
        }
        Ok(())
    }

    fn on_handshake_message(&mut self, segment: &[u8]) -> Result<()> {
        let message = segment[0];
        if message != MSG_FINISHED {
            self.cipher
                .as_mut()
                .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedState))?
                .update_transcript(segment);
        }
        match message {
            MSG_SERVER_HELLO => self.on_server_hello(segment),
            // Absorbed into the transcript above. The chain and signature
            // are deliberately not validated; see the module docs.
            MSG_ENCRYPTED_EXTENSIONS | MSG_CERTIFICATE | MSG_CERTIFICATE_VERIFY => Ok(()),
            MSG_FINISHED => self.on_server_finished(segment),
            // Post-handshake messages (NewSessionTicket and friends) are
            // ignored; resumption is unsupported. During the handshake the
            // state sequence has already rejected anything unexpected.
            _ => {
                debug!("ignoring handshake message {:#04x} from {}", message, self.host);
                Ok(())
            }
        }
    }

    /// Extracts the server random, echoed cipher, and key share, then
    /// derives handshake traffic keys.
    fn on_server_hello(&mut self, segment: &[u8]) -> Result<()> {
        let mut reader = Reader::new(segment);
        reader.skip(4)?; // message type + length
        let _legacy_version = reader.read_u16()?;

        let mut server_random = [0u8; RANDOM_SIZE];
        server_random.copy_from_slice(reader.read_slice(RANDOM_SIZE)?);
        let session_len = reader.read_u8()? as usize;
        reader.skip(session_len)?;
        let cipher_suite = reader.read_u16()?;
        let _compression = reader.read_u8()?;

        if cipher_suite != TLS_CHACHA20_POLY1305_SHA256 {
            return Err(Error::internal(ErrorCode::TlsHandshakeFailedServerHello));
        }

        if reader.remaining() < 2 {
            // No extensions means no key share and no TLS 1.3.
            return Err(Error::internal(ErrorCode::TlsHandshakeFailedVersion));
        }
        let extensions_len = reader.read_u16()? as usize;
        let extensions_end = reader.cursor() + extensions_len;

        let mut selected_version = 0u16;
        let mut group = None;
        let mut peer_key: Vec<u8> = Vec::new();

        while reader.cursor() < extensions_end {
            let ext_type = reader.read_u16()?;
            let ext_len = reader.read_u16()? as usize;
            match ext_type {
                EXT_SUPPORTED_VERSIONS => {
                    if ext_len != 2 {
                        return Err(Error::internal(ErrorCode::TlsHandshakeFailedServerHello));
                    }
                    selected_version = reader.read_u16()?;
                }
                EXT_KEY_SHARE => {
                    let iana = reader.read_u16()?;
                    group = NamedGroup::from_iana(iana);
                    if ext_len > 4 {
                        let key_len = reader.read_u16()? as usize;
                        peer_key = reader.read_slice(key_len)?.to_vec();
                    } else {
                        reader.skip(ext_len - 2)?;
                    }
                }
                _ => reader.skip(ext_len)?,
            }
        }

        if selected_version != TLS13_VERSION {
            return Err(Error::internal(ErrorCode::TlsHandshakeFailedVersion));
        }
        let group = group.ok_or(Error::internal(ErrorCode::TlsHandshakeFailedKeyShare))?;
        if peer_key.is_empty() {
            return Err(Error::internal(ErrorCode::TlsHandshakeFailedKeyShare));
        }

        let cipher = self
            .cipher
            .as_mut()
            .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedState))?;
        cipher.set_server_random(&server_random);
        cipher.compute_handshake_keys(group, &peer_key)?;
        debug!("negotiated {:?} with {}", group, self.host);
        Ok(())
    }

    /// Verifies the server Finished, answers with ChangeCipherSpec plus
    /// the client Finished, and rotates to application traffic keys.
    fn on_server_finished(&mut self, segment: &[u8]) -> Result<()> {
        let handshake_transcript;
        {
            let cipher = self
                .cipher
                .as_mut()
                .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedState))?;

            let mut reader = Reader::new(segment);
            reader.skip(1)?;
            let verify_len = reader.read_u24()? as usize;
            let received = reader.read_slice(verify_len)?;
            // The expected value binds everything up to but not including
            // this Finished message.
            let expected = cipher.verify_data(true);
            if verify_len != expected.len() || !constant_time_eq(received, &expected) {
                return Err(Error::internal(ErrorCode::TlsHandshakeFailedFinished));
            }

            cipher.update_transcript(segment);
            handshake_transcript = cipher.transcript_hash();
        }

        self.send_change_cipher_spec()?;
        self.send_client_finished()?;
        self.cipher
            .as_mut()
            .ok_or(Error::internal(ErrorCode::TlsHandshakeFailedState))?
            .compute_application_keys(&handshake_transcript)?;
        Ok(())
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
