//! Self-test runner: offline suites always, live-network suites when the
//! configuration enables them. Exits 0 when everything passed, 1
//! otherwise.
//!
//! Configuration comes from `veil.conf` (or the path given as the first
//! argument); see `veil_core::config` for the format.

use log::{error, info};
use veil_core::config::RunnerConfig;
use veil_core::logger;

mod offline;
mod online;

fn main() {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "veil.conf".to_string());
    let config = match RunnerConfig::load_from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("bad configuration {}: {}", config_path, err);
            std::process::exit(1);
        }
    };

    let log_result = match &config.log_file {
        Some(path) => logger::init_with_file(config.log_level, path),
        None => logger::init(config.log_level),
    };
    if let Err(err) = log_result {
        eprintln!("logger setup failed: {}", err);
        std::process::exit(1);
    }

    let mut results: Vec<(&str, bool)> = Vec::new();

    info!("running offline suites");
    results.push(("prng", offline::prng_suite()));
    results.push(("sha2", offline::sha2_suite()));
    results.push(("hmac", offline::hmac_suite()));
    results.push(("hkdf", offline::hkdf_suite()));
    results.push(("aead", offline::aead_suite()));
    results.push(("ecdh", offline::ecdh_suite()));
    results.push(("base64", offline::base64_suite()));
    results.push(("djb2", offline::djb2_suite()));
    results.push(("url", offline::url_suite()));
    results.push(("http-headers", offline::header_suite()));

    if config.online {
        info!("running live network suites");
        results.push(("tls-handshake", online::tls_suite()));
        results.push(("doh-resolve", online::doh_suite()));
        results.push(("websocket-echo", online::websocket_suite(&config.ws_echo_url)));
    } else {
        info!("live network suites skipped (online=false)");
    }

    let mut all_passed = true;
    for (name, passed) in &results {
        if *passed {
            info!("suite {:<16} pass", name);
        } else {
            error!("suite {:<16} FAIL", name);
            all_passed = false;
        }
    }

    std::process::exit(if all_passed { 0 } else { 1 });
}
