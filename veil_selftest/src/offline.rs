//! Suites that need no network: primitive vectors and parser behavior.

use log::error;
use veil_core::crypto::{aead, ecc::Ecc, hkdf, hmac, sha2};
use veil_core::{base64, djb2, prng::Prng};
use veil_net::http::{HttpClient, ParsedUrl};
use veil_net::ip::IpAddress;
use veil_net::tls::client::TlsClient;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn check(ok: bool, what: &str) -> bool {
    if !ok {
        error!("  {}", what);
    }
    ok
}

pub fn prng_suite() -> bool {
    let mut all = true;

    let mut prng = Prng::new(1);
    let expected = [1082269761, 201397313, 1854285353, 1432191013, 274305637];
    all &= check(
        expected.iter().all(|&want| prng.get() == want),
        "seed 1 must reproduce the fixed sequence",
    );

    let mut prng = Prng::new(12345);
    all &= check(
        (0..1000).all(|_| (0..veil_core::prng::MAX).contains(&prng.get())),
        "values must stay in [0, MAX)",
    );

    let mut prng = Prng::new(777);
    all &= check(
        (0..100).all(|_| prng.alpha_char().is_ascii_lowercase()),
        "alpha output must be a-z",
    );

    let mut unseeded = Prng::default();
    all &= check(!unseeded.is_seeded(), "default generator reports unseeded");
    all &= check(unseeded.fill_bytes(&mut [0u8; 4]).is_err(), "unseeded fill must fail");
    all
}

pub fn sha2_suite() -> bool {
    let mut all = true;
    all &= check(
        hex(&sha2::sha224(b"abc")) == "23097d223405d8228642a477bda255b32aadbce4bda0b3f7e36c9da7",
        "sha224 abc vector",
    );
    all &= check(
        hex(&sha2::sha256(b"abc"))
            == "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        "sha256 abc vector",
    );
    all &= check(
        hex(&sha2::sha384(b"abc"))
            == "cb00753f45a35e8bb5a03d699ac65007272c32ab0eded1631a8b605a43ff5bed\
                8086072ba1e7cc2358baeca134c825a7",
        "sha384 abc vector",
    );
    all &= check(
        hex(&sha2::sha512(b"abc"))
            == "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f",
        "sha512 abc vector",
    );
    all
}

pub fn hmac_suite() -> bool {
    let mut all = true;
    // RFC 4231 case 2.
    all &= check(
        hex(&hmac::hmac_sha256(b"Jefe", b"what do ya want for nothing?"))
            == "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843",
        "hmac-sha256 rfc4231 case 2",
    );
    // RFC 4231 case 1.
    all &= check(
        hex(&hmac::hmac_sha512(&[0x0b; 20], b"Hi There"))
            == "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cde\
                daa833b7d6b8a702038b274eaea3f4e4be9d914eeb61f1702e696c203a126854",
        "hmac-sha512 rfc4231 case 1",
    );
    all
}

pub fn hkdf_suite() -> bool {
    let mut all = true;
    let zeros = [0u8; 32];
    let early = hkdf::hkdf_extract(&zeros, &zeros);
    all &= check(
        hex(&early) == "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a",
        "tls13 early secret constant",
    );
    let derived = hkdf::derive_secret(&early, b"derived", &sha2::sha256(b""));
    all &= check(
        hex(&derived) == "6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba",
        "tls13 derived secret constant",
    );
    all
}

pub fn aead_suite() -> bool {
    let mut all = true;

    let key = [0x42u8; 32];
    let nonce = [7u8; 12];
    let aad = b"header";
    let mut payload = b"the quick brown fox".to_vec();
    let tag = aead::seal(&key, &nonce, aad, &mut payload);

    let mut opened = payload.clone();
    all &= check(
        aead::open(&key, &nonce, aad, &mut opened, &tag) && opened == b"the quick brown fox",
        "seal/open round trip",
    );

    let mut corrupted = payload.clone();
    corrupted[0] ^= 1;
    all &= check(
        !aead::open(&key, &nonce, aad, &mut corrupted, &tag),
        "ciphertext tampering must fail",
    );
    all &= check(
        !aead::open(&key, &nonce, b"other", &mut payload.clone(), &tag),
        "aad tampering must fail",
    );
    all
}

pub fn ecdh_suite() -> bool {
    let mut all = true;
    for bytes in [16usize, 24, 32, 48] {
        let mut rng_a = Prng::from_hardware();
        let mut rng_b = Prng::from_hardware();
        let (alice, bob) = match (Ecc::generate(bytes, &mut rng_a), Ecc::generate(bytes, &mut rng_b)) {
            (Ok(a), Ok(b)) => (a, b),
            _ => {
                error!("  keypair generation failed for {} bytes", bytes);
                all = false;
                continue;
            }
        };

        let mut public_a = vec![0u8; bytes * 2 + 1];
        let mut public_b = vec![0u8; bytes * 2 + 1];
        if alice.export_public_key(&mut public_a).is_err()
            || bob.export_public_key(&mut public_b).is_err()
        {
            error!("  public key export failed for {} bytes", bytes);
            all = false;
            continue;
        }
        all &= check(public_a != public_b, "independent public keys must differ");

        let mut secret_a = vec![0u8; bytes];
        let mut secret_b = vec![0u8; bytes];
        let ok = alice.compute_shared_secret(&public_b, &mut secret_a, &mut rng_a).is_ok()
            && bob.compute_shared_secret(&public_a, &mut secret_b, &mut rng_b).is_ok()
            && secret_a == secret_b;
        all &= check(ok, "shared secrets must agree");
    }
    all
}

pub fn base64_suite() -> bool {
    let mut all = true;
    for (plain, encoded) in
        [("", ""), ("f", "Zg=="), ("fo", "Zm8="), ("foo", "Zm9v"), ("foobar", "Zm9vYmFy")]
    {
        all &= check(base64::encode(plain.as_bytes()) == encoded, "base64 encode vector");
        all &= check(
            base64::decode(encoded).map(|d| d == plain.as_bytes()).unwrap_or(false),
            "base64 decode vector",
        );
    }

    let mut prng = Prng::new(99);
    let mut payload = [0u8; 57];
    let _ = prng.fill_bytes(&mut payload);
    all &= check(
        base64::decode(&base64::encode(&payload)).map(|d| d == payload).unwrap_or(false),
        "base64 round trip",
    );
    all
}

pub fn djb2_suite() -> bool {
    let mut all = true;
    all &= check(djb2::hash(b"LOCALHOST") == djb2::hash(b"localhost"), "case-insensitive hash");
    all &= check(djb2::hash(b"ws") != djb2::hash(b"wss"), "distinct schemes hash apart");
    all &= check(djb2::matches(b"WsS", b"wss"), "matches helper");
    all
}

pub fn url_suite() -> bool {
    let mut all = true;

    let parsed = match ParsedUrl::parse("https://example.com:8443/a/b?c=d") {
        Ok(parsed) => parsed,
        Err(_) => {
            error!("  https url failed to parse");
            return false;
        }
    };
    all &= check(parsed.host == "example.com", "host extraction");
    all &= check(parsed.port == 8443, "explicit port");
    all &= check(parsed.path == "/a/b?c=d", "path extraction");
    all &= check(parsed.secure, "https is secure");

    all &= check(
        ParsedUrl::parse("ws://h").map(|u| u.port == 80 && !u.secure).unwrap_or(false),
        "ws defaults",
    );
    all &= check(ParsedUrl::parse("ftp://example.com").is_err(), "unknown scheme rejected");
    all &= check(ParsedUrl::parse("https://example.com:0").is_err(), "port 0 rejected");
    all
}

/// Response-header parsing against a real loopback socket pair.
pub fn header_suite() -> bool {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    let listener = match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => listener,
        Err(_) => {
            error!("  cannot bind loopback listener");
            return false;
        }
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
    let server = std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 42\r\nX: y\r\n\r\n");
            let _ = stream.read(&mut [0u8; 16]);
        }
    });

    let mut all = true;
    let mut client = match TlsClient::create("localhost", IpAddress::localhost_v4(), port, false) {
        Ok(client) => client,
        Err(_) => {
            error!("  loopback transport creation failed");
            return false;
        }
    };
    all &= check(client.open().is_ok(), "loopback connect");
    all &= check(
        HttpClient::read_response_headers(&mut client, 200) == Ok(42),
        "content-length extraction over a socket",
    );
    let _ = client.close();
    let _ = server.join();
    all
}
